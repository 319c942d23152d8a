//! `generate-notification-preferences`: hand a backfill to the worker.

use anyhow::Context;
use clap::Args;

use prefsync_common::config::QueueConfig;
use prefsync_common::redis_pool::create_redis_pool;
use prefsync_common::types::JobHandle;
use prefsync_engine::backfill::BackfillOrchestrator;
use prefsync_engine::queue::{JobQueue, RedisJobQueue};

#[derive(Args)]
pub struct GenerateArgs {
    /// Course ids to backfill, processed in the order given
    pub course_ids: Vec<String>,
}

pub async fn execute(args: GenerateArgs) -> anyhow::Result<()> {
    let config = QueueConfig::from_env()?;
    let redis = create_redis_pool(&config.redis_url)
        .await
        .context("job queue is unreachable")?;
    let queue = RedisJobQueue::new(redis, config.job_queue_prefix);

    let handle = submit(&queue, args.course_ids).await?;
    println!("Queued {} job {}", handle.queue, handle.job_id);
    Ok(())
}

/// Enqueue only. The caller never waits for the backfill itself.
pub async fn submit(queue: &dyn JobQueue, course_ids: Vec<String>) -> anyhow::Result<JobHandle> {
    BackfillOrchestrator::schedule(queue, course_ids)
        .await
        .context("failed to enqueue backfill job")
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefsync_common::types::{BACKFILL_QUEUE, Job};
    use prefsync_engine::queue::InMemoryJobQueue;

    #[tokio::test]
    async fn test_submit_enqueues_courses_in_order() {
        let queue = InMemoryJobQueue::new();
        let handle = submit(&queue, vec!["b".to_string(), "a".to_string()])
            .await
            .unwrap();

        assert_eq!(handle.queue, BACKFILL_QUEUE);
        let jobs = queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, handle.job_id);
        assert_eq!(
            jobs[0].job,
            Job::CreateNotificationPreferences {
                course_ids: vec!["b".to_string(), "a".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_submit_with_no_courses_still_enqueues() {
        let queue = InMemoryJobQueue::new();
        submit(&queue, vec![]).await.unwrap();
        assert_eq!(queue.jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_passes_blank_course_through() {
        let queue = InMemoryJobQueue::new();
        let handle = submit(&queue, vec!["".to_string()]).await.unwrap();

        let jobs = queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, handle.job_id);
        assert_eq!(
            jobs[0].job,
            Job::CreateNotificationPreferences {
                course_ids: vec!["".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_submit_fails_when_queue_unavailable() {
        let queue = InMemoryJobQueue::unavailable();
        assert!(submit(&queue, vec!["a".to_string()]).await.is_err());
    }
}
