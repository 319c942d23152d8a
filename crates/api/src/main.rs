//! PrefSync API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use prefsync_common::config::AppConfig;
use prefsync_common::db::{create_pool, run_migrations};
use prefsync_common::redis_pool::create_redis_pool;
use prefsync_engine::bus::InProcessEventBus;
use prefsync_engine::defaults::PreferenceDefaults;
use prefsync_engine::gate::PgFeatureGate;
use prefsync_engine::listener::NotificationListener;
use prefsync_engine::queue::RedisJobQueue;
use prefsync_engine::store::PgPreferenceStore;

use prefsync_api::routes::create_router;
use prefsync_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("prefsync_api=debug,prefsync_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting PrefSync API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    let redis = create_redis_pool(&config.redis_url).await?;

    let defaults =
        Arc::new(PreferenceDefaults::load(config.notification_defaults_path.as_deref()).await?);
    let reloader = defaults
        .clone()
        .spawn_reloader(Duration::from_secs(config.defaults_reload_interval_secs));

    // Wire the listener onto the bus
    let store = Arc::new(PgPreferenceStore::new(pool.clone()));
    let queue = Arc::new(RedisJobQueue::new(redis, config.job_queue_prefix.clone()));
    let gate = Arc::new(PgFeatureGate::new(pool, config.enable_notifications));
    let bus = Arc::new(InProcessEventBus::new());
    Arc::new(NotificationListener::new(
        store.clone(),
        gate,
        queue.clone(),
        defaults.clone(),
    ))
    .register(bus.as_ref());

    let port = config.api_port;
    let state = AppState::new(bus, queue, store, defaults, config);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    reloader.abort();
    Ok(())
}
