//! Job queues: the outbound side of the listener and the backfill trigger.
//!
//! Producers only ever call [`JobQueue::enqueue`] and never wait on consumers.
//! Workers use [`JobConsumer`], the reliable-consumer side:
//! - `reserve` moves a job onto an in-flight list (`BLMOVE`)
//! - `ack` removes it once handled
//! - `retry` / `dead_letter` re-route failures atomically (`MULTI`)

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;

use prefsync_common::error::AppError;
use prefsync_common::types::{Job, JobEnvelope, JobHandle};

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Hand a job to its queue. Transport failures are returned, not masked.
    async fn enqueue(&self, job: Job) -> Result<JobHandle, AppError>;
}

#[async_trait]
pub trait JobConsumer: Send + Sync {
    /// Move everything left in flight by a previous consumer back onto `queue`.
    async fn recover_in_flight(&self, queue: &str) -> Result<usize, AppError>;

    /// Wait up to `timeout` for the next job on `queue`.
    async fn reserve(&self, queue: &str, timeout: Duration) -> Result<Option<Reserved>, AppError>;

    /// Mark a reserved job as done.
    async fn ack(&self, reserved: &Reserved) -> Result<(), AppError>;

    /// Put a failed job back on its queue with `attempts + 1`.
    async fn retry(&self, reserved: &Reserved) -> Result<(), AppError>;

    /// Park a job that exhausted its attempts on the dead-letter list.
    async fn dead_letter(&self, reserved: &Reserved) -> Result<(), AppError>;
}

/// Redis list-backed queue.
#[derive(Clone)]
pub struct RedisJobQueue {
    redis: ConnectionManager,
    prefix: String,
}

/// A job taken off a queue and parked on its in-flight list.
#[derive(Debug, Clone)]
pub struct Reserved {
    pub queue: String,
    pub envelope: JobEnvelope,
    /// Exact bytes stored in the broker, needed to `LREM` the in-flight entry.
    raw: String,
}

impl Reserved {
    pub fn new(queue: impl Into<String>, envelope: JobEnvelope) -> Result<Self, AppError> {
        let raw = serde_json::to_string(&envelope)?;
        Ok(Self {
            queue: queue.into(),
            envelope,
            raw,
        })
    }
}

impl RedisJobQueue {
    pub fn new(redis: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
        }
    }

    pub fn queue_key(&self, queue: &str) -> String {
        format!("{}:queue:{}", self.prefix, queue)
    }

    pub fn processing_key(&self, queue: &str) -> String {
        format!("{}:queue:{}:processing", self.prefix, queue)
    }

    pub fn dead_key(&self, queue: &str) -> String {
        format!("{}:queue:{}:dead", self.prefix, queue)
    }

    async fn reroute(
        &self,
        reserved: &Reserved,
        target: String,
        envelope: &JobEnvelope,
    ) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        let raw = serde_json::to_string(envelope)?;
        let (): () = redis::pipe()
            .atomic()
            .lrem(self.processing_key(&reserved.queue), 1, &reserved.raw)
            .ignore()
            .lpush(target, raw)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobConsumer for RedisJobQueue {
    /// Called at worker start; a job interrupted mid-run is executed again,
    /// which is fine because every job kind here is idempotent.
    async fn recover_in_flight(&self, queue: &str) -> Result<usize, AppError> {
        let mut conn = self.redis.clone();
        let processing = self.processing_key(queue);
        let target = self.queue_key(queue);
        let mut recovered = 0usize;

        loop {
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(&processing)
                .arg(&target)
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            tracing::warn!(queue, recovered, "Re-queued in-flight jobs from a previous run");
        }
        Ok(recovered)
    }

    /// Entries that fail to decode are moved to the dead-letter list and
    /// skipped.
    async fn reserve(&self, queue: &str, timeout: Duration) -> Result<Option<Reserved>, AppError> {
        let mut conn = self.redis.clone();
        let processing = self.processing_key(queue);

        let raw: Option<String> = redis::cmd("BLMOVE")
            .arg(self.queue_key(queue))
            .arg(&processing)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<JobEnvelope>(&raw) {
            Ok(envelope) => Ok(Some(Reserved {
                queue: queue.to_string(),
                envelope,
                raw,
            })),
            Err(e) => {
                tracing::warn!(queue, error = %e, "Undecodable job moved to dead-letter list");
                let (): () = redis::pipe()
                    .atomic()
                    .lrem(&processing, 1, &raw)
                    .ignore()
                    .lpush(self.dead_key(queue), &raw)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, reserved: &Reserved) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        let _: i64 = conn
            .lrem(self.processing_key(&reserved.queue), 1, &reserved.raw)
            .await?;
        Ok(())
    }

    async fn retry(&self, reserved: &Reserved) -> Result<(), AppError> {
        let mut next = reserved.envelope.clone();
        next.attempts += 1;
        self.reroute(reserved, self.queue_key(&reserved.queue), &next)
            .await
    }

    async fn dead_letter(&self, reserved: &Reserved) -> Result<(), AppError> {
        let mut last = reserved.envelope.clone();
        last.attempts += 1;
        self.reroute(reserved, self.dead_key(&reserved.queue), &last)
            .await
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: Job) -> Result<JobHandle, AppError> {
        let queue = job.queue();
        let name = job.name();
        let envelope = JobEnvelope::new(job);
        let raw = serde_json::to_string(&envelope)?;

        let mut conn = self.redis.clone();
        let _: i64 = conn.lpush(self.queue_key(queue), raw).await?;

        tracing::info!(job_id = %envelope.id, queue, task = name, "Job enqueued");

        Ok(JobHandle {
            job_id: envelope.id,
            queue: queue.to_string(),
        })
    }
}

/// Queue that keeps jobs in memory. Used by tests and single-process wiring.
#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<Vec<JobEnvelope>>,
    unavailable: bool,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue whose every enqueue fails, standing in for a broker outage.
    pub fn unavailable() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            unavailable: true,
        }
    }

    /// Everything enqueued so far, oldest first.
    pub async fn jobs(&self) -> Vec<JobEnvelope> {
        self.jobs.lock().await.clone()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<JobHandle, AppError> {
        if self.unavailable {
            return Err(AppError::Internal(format!(
                "Job queue unavailable, cannot enqueue {}",
                job.name()
            )));
        }

        let envelope = JobEnvelope::new(job);
        let handle = JobHandle {
            job_id: envelope.id,
            queue: envelope.job.queue().to_string(),
        };
        self.jobs.lock().await.push(envelope);
        Ok(handle)
    }
}
