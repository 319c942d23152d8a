//! Notification preference reconciliation.
//!
//! Event listener, reconciliation engine and backfill orchestrator, written
//! against narrow traits for the store, enrollment source, feature gate,
//! event bus and job queue.

pub mod backfill;
pub mod bus;
pub mod defaults;
pub mod enrollment;
pub mod gate;
pub mod listener;
pub mod queue;
pub mod reconcile;
pub mod store;
