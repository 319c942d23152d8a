//! Shared application state for the Axum ingress.

use std::sync::Arc;

use prefsync_common::config::AppConfig;
use prefsync_engine::bus::EventBus;
use prefsync_engine::defaults::PreferenceDefaults;
use prefsync_engine::queue::JobQueue;
use prefsync_engine::store::PreferenceStore;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    /// Inbound events are published here; the listener is subscribed.
    pub bus: Arc<dyn EventBus>,
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn PreferenceStore>,
    pub defaults: Arc<PreferenceDefaults>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(
        bus: Arc<dyn EventBus>,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn PreferenceStore>,
        defaults: Arc<PreferenceDefaults>,
        config: AppConfig,
    ) -> Self {
        Self {
            bus,
            queue,
            store,
            defaults,
            config,
        }
    }
}
