//! HTTP ingress for PrefSync.
//!
//! Endpoints:
//! - GET  /health
//! - POST /api/events/course-enrollment-created: publish onto the event bus
//! - POST /api/events/user-notification: publish onto the event bus
//! - POST /api/notification-preferences/backfill: enqueue a backfill job
//! - GET  /api/notification-preferences/{user_id}/{course_id}

pub mod middleware;
pub mod routes;
pub mod state;
