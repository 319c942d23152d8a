use std::sync::Arc;
use std::time::Duration;

use prefsync_common::config::AppConfig;
use prefsync_common::db;
use prefsync_common::redis_pool::create_redis_pool;
use prefsync_engine::backfill::BackfillOrchestrator;
use prefsync_engine::defaults::PreferenceDefaults;
use prefsync_engine::enrollment::PgEnrollmentSource;
use prefsync_engine::queue::RedisJobQueue;
use prefsync_engine::reconcile::Reconciler;
use prefsync_engine::store::PgPreferenceStore;
use prefsync_worker::runner::{JobExecutor, JobRunner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prefsync_worker=info,prefsync_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("PrefSync worker starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let redis = create_redis_pool(&config.redis_url).await?;
    let queue = RedisJobQueue::new(redis, config.job_queue_prefix.clone());

    let defaults =
        Arc::new(PreferenceDefaults::load(config.notification_defaults_path.as_deref()).await?);

    let orchestrator = BackfillOrchestrator::new(
        Arc::new(PgEnrollmentSource::new(pool.clone())),
        Reconciler::new(Arc::new(PgPreferenceStore::new(pool))),
        defaults.clone(),
    );
    let runner = JobRunner::new(
        Arc::new(queue),
        JobExecutor::new(orchestrator, defaults),
        config.job_max_attempts,
        Duration::from_secs(config.worker_poll_timeout_secs),
    );

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = runner.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Job runner exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("PrefSync worker stopped.");
    Ok(())
}
