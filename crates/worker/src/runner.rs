//! Backfill job runner.
//!
//! Pulls `create_notification_preferences` jobs off the backfill queue and runs
//! them through the orchestrator. Failed jobs go back on the queue until they
//! reach `max_attempts`, then land on the dead-letter list.

use std::sync::Arc;
use std::time::Duration;

use prefsync_common::error::AppError;
use prefsync_common::types::{BACKFILL_QUEUE, Job, JobEnvelope};
use prefsync_engine::backfill::{BackfillOrchestrator, BackfillReport};
use prefsync_engine::defaults::PreferenceDefaults;
use prefsync_engine::queue::{JobConsumer, Reserved};

/// What to do with a job whose execution just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retry,
    DeadLetter,
}

/// `attempts` is the number of failures before this one.
pub fn disposition(err: &AppError, attempts: u32, max_attempts: u32) -> Disposition {
    let retryable = !matches!(err, AppError::Validation(_) | AppError::Config(_));
    if retryable && attempts + 1 < max_attempts {
        Disposition::Retry
    } else {
        Disposition::DeadLetter
    }
}

/// Executes a single job envelope. Has no queue of its own.
#[derive(Clone)]
pub struct JobExecutor {
    orchestrator: BackfillOrchestrator,
    defaults: Arc<PreferenceDefaults>,
}

impl JobExecutor {
    pub fn new(orchestrator: BackfillOrchestrator, defaults: Arc<PreferenceDefaults>) -> Self {
        Self {
            orchestrator,
            defaults,
        }
    }

    pub async fn execute(&self, envelope: &JobEnvelope) -> Result<BackfillReport, AppError> {
        // Pick up a redeployed defaults file before the run snapshots it.
        if let Err(e) = self.defaults.reload_if_changed().await {
            tracing::warn!(error = %e, "Failed to reload preference defaults, keeping current");
        }

        match &envelope.job {
            Job::CreateNotificationPreferences { course_ids } => {
                self.orchestrator.run(course_ids).await
            }
            other => Err(AppError::Validation(format!(
                "{} jobs are not handled by the backfill worker",
                other.name()
            ))),
        }
    }
}

/// Consumer loop around a [`JobExecutor`].
pub struct JobRunner {
    queue: Arc<dyn JobConsumer>,
    executor: JobExecutor,
    max_attempts: u32,
    poll_timeout: Duration,
}

impl JobRunner {
    pub fn new(
        queue: Arc<dyn JobConsumer>,
        executor: JobExecutor,
        max_attempts: u32,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            executor,
            max_attempts: max_attempts.max(1),
            poll_timeout,
        }
    }

    /// Run until the task is cancelled.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.queue.recover_in_flight(BACKFILL_QUEUE).await?;

        tracing::info!(
            queue = BACKFILL_QUEUE,
            max_attempts = self.max_attempts,
            poll_timeout_secs = self.poll_timeout.as_secs(),
            "Job runner started"
        );

        loop {
            let reserved = match self.queue.reserve(BACKFILL_QUEUE, self.poll_timeout).await {
                Ok(Some(reserved)) => reserved,
                Ok(None) => continue,
                Err(e) => {
                    // Broker unavailable, wait and retry
                    tracing::warn!(error = %e, "Failed to reserve job, retrying");
                    tokio::time::sleep(self.poll_timeout).await;
                    continue;
                }
            };

            if let Err(e) = self.process(&reserved).await {
                // Left on the in-flight list; picked up again by recover_in_flight
                tracing::warn!(
                    job_id = %reserved.envelope.id,
                    error = %e,
                    "Failed to settle job, continuing"
                );
                tokio::time::sleep(self.poll_timeout).await;
            }
        }
    }

    async fn process(&self, reserved: &Reserved) -> anyhow::Result<()> {
        let envelope = &reserved.envelope;
        tracing::info!(
            job_id = %envelope.id,
            task = envelope.job.name(),
            attempt = envelope.attempts + 1,
            "Job started"
        );

        match self.executor.execute(envelope).await {
            Ok(report) => {
                self.queue.ack(reserved).await?;
                tracing::info!(
                    job_id = %envelope.id,
                    courses = report.courses.len(),
                    newly_created = report.total_created(),
                    outdated_updated = report.total_migrated(),
                    "Job succeeded"
                );
            }
            Err(e) => match disposition(&e, envelope.attempts, self.max_attempts) {
                Disposition::Retry => {
                    tracing::warn!(
                        job_id = %envelope.id,
                        attempt = envelope.attempts + 1,
                        error = %e,
                        "Job failed, re-queued"
                    );
                    self.queue.retry(reserved).await?;
                }
                Disposition::DeadLetter => {
                    tracing::error!(
                        job_id = %envelope.id,
                        attempt = envelope.attempts + 1,
                        error = %e,
                        "Job failed permanently, moved to dead-letter list"
                    );
                    self.queue.dead_letter(reserved).await?;
                }
            },
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefsync_engine::enrollment::InMemoryEnrollmentSource;
    use prefsync_engine::reconcile::Reconciler;
    use prefsync_engine::store::{InMemoryPreferenceStore, PreferenceStore};
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn executor() -> (
        Arc<InMemoryPreferenceStore>,
        Arc<InMemoryEnrollmentSource>,
        JobExecutor,
    ) {
        let store = Arc::new(InMemoryPreferenceStore::new());
        let enrollments = Arc::new(InMemoryEnrollmentSource::new());
        let defaults = Arc::new(PreferenceDefaults::default());
        let orchestrator = BackfillOrchestrator::new(
            enrollments.clone(),
            Reconciler::new(store.clone()),
            defaults.clone(),
        );
        (store, enrollments, JobExecutor::new(orchestrator, defaults))
    }

    #[test]
    fn test_disposition_retries_until_max() {
        let err = AppError::Internal("db down".into());
        assert_eq!(disposition(&err, 0, 3), Disposition::Retry);
        assert_eq!(disposition(&err, 1, 3), Disposition::Retry);
        assert_eq!(disposition(&err, 2, 3), Disposition::DeadLetter);
        assert_eq!(disposition(&err, 0, 1), Disposition::DeadLetter);
    }

    #[test]
    fn test_validation_errors_are_not_retried() {
        let err = AppError::Validation("bad job".into());
        assert_eq!(disposition(&err, 0, 5), Disposition::DeadLetter);
    }

    #[tokio::test]
    async fn test_execute_backfill_job() {
        let (store, enrollments, executor) = executor();
        enrollments.enroll(1, "c1", true).await;
        enrollments.enroll(2, "c1", true).await;

        let envelope = JobEnvelope::new(Job::CreateNotificationPreferences {
            course_ids: vec!["c1".to_string()],
        });
        let report = executor.execute(&envelope).await.unwrap();

        assert_eq!(report.total_created(), 2);
        assert_eq!(store.list_by_course("c1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_execute_empty_backfill_job() {
        let (store, _, executor) = executor();
        let envelope = JobEnvelope::new(Job::CreateNotificationPreferences { course_ids: vec![] });
        let report = executor.execute(&envelope).await.unwrap();
        assert!(report.courses.is_empty());
        assert!(store.is_empty().await);
    }

    /// Hands out the scripted jobs once, then idles; fails the first `ack`.
    struct ScriptedConsumer {
        pending: tokio::sync::Mutex<Vec<Reserved>>,
        acks: AtomicUsize,
    }

    impl ScriptedConsumer {
        fn new(jobs: Vec<Job>) -> Self {
            let pending = jobs
                .into_iter()
                .rev()
                .map(|job| Reserved::new(BACKFILL_QUEUE, JobEnvelope::new(job)).unwrap())
                .collect();
            Self {
                pending: tokio::sync::Mutex::new(pending),
                acks: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl JobConsumer for ScriptedConsumer {
        async fn recover_in_flight(&self, _queue: &str) -> Result<usize, AppError> {
            Ok(0)
        }

        async fn reserve(
            &self,
            _queue: &str,
            timeout: Duration,
        ) -> Result<Option<Reserved>, AppError> {
            let next = self.pending.lock().await.pop();
            if next.is_none() {
                tokio::time::sleep(timeout).await;
            }
            Ok(next)
        }

        async fn ack(&self, _reserved: &Reserved) -> Result<(), AppError> {
            if self.acks.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(AppError::Internal("connection reset".into()));
            }
            Ok(())
        }

        async fn retry(&self, _reserved: &Reserved) -> Result<(), AppError> {
            Ok(())
        }

        async fn dead_letter(&self, _reserved: &Reserved) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_runner_survives_failed_ack() {
        let (store, enrollments, executor) = executor();
        enrollments.enroll(1, "c1", true).await;
        enrollments.enroll(2, "c2", true).await;

        let consumer = Arc::new(ScriptedConsumer::new(vec![
            Job::CreateNotificationPreferences {
                course_ids: vec!["c1".to_string()],
            },
            Job::CreateNotificationPreferences {
                course_ids: vec!["c2".to_string()],
            },
        ]));
        let runner = JobRunner::new(
            consumer.clone(),
            executor,
            3,
            Duration::from_millis(10),
        );

        // The loop only ends by cancellation
        let outcome = tokio::time::timeout(Duration::from_millis(300), runner.run()).await;
        assert!(outcome.is_err());

        assert_eq!(consumer.acks.load(Ordering::SeqCst), 2);
        assert!(store.get(1, "c1").await.unwrap().is_some());
        assert!(store.get(2, "c2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_execute_rejects_dispatch_job() {
        let (_, _, executor) = executor();
        let envelope = JobEnvelope::new(Job::SendNotifications { kwargs: Map::new() });
        let err = executor.execute(&envelope).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
