//! Notification listener: turns domain events into store writes and jobs.
//!
//! - `course_enrollment_created`: create the course preference (gated per course)
//! - `user_notification`: enqueue a `send_notifications` job, no gate

use std::sync::Arc;

use async_trait::async_trait;

use prefsync_common::error::AppError;
use prefsync_common::types::{
    DomainEvent, EnrollmentCreated, EventKind, Job, JobHandle, NotificationData,
};

use crate::bus::{EventBus, EventHandler};
use crate::defaults::PreferenceDefaults;
use crate::gate::FeatureGate;
use crate::queue::JobQueue;
use crate::store::PreferenceStore;

/// What the enrollment handler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentOutcome {
    Created,
    /// The pair already had a preference (a concurrent path won).
    AlreadyExists,
    /// The event was for an update, not an insert.
    SkippedNotNew,
    SkippedGateDisabled,
}

pub struct NotificationListener {
    store: Arc<dyn PreferenceStore>,
    gate: Arc<dyn FeatureGate>,
    queue: Arc<dyn JobQueue>,
    defaults: Arc<PreferenceDefaults>,
}

impl NotificationListener {
    pub fn new(
        store: Arc<dyn PreferenceStore>,
        gate: Arc<dyn FeatureGate>,
        queue: Arc<dyn JobQueue>,
        defaults: Arc<PreferenceDefaults>,
    ) -> Self {
        Self {
            store,
            gate,
            queue,
            defaults,
        }
    }

    /// Subscribe this listener to both event kinds on `bus`.
    pub fn register(self: Arc<Self>, bus: &dyn EventBus) {
        bus.subscribe(EventKind::CourseEnrollmentCreated, self.clone());
        bus.subscribe(EventKind::UserNotification, self);
    }

    pub async fn on_enrollment_created(
        &self,
        event: &EnrollmentCreated,
    ) -> Result<EnrollmentOutcome, AppError> {
        if !event.created {
            return Ok(EnrollmentOutcome::SkippedNotNew);
        }

        if !self.gate.is_enabled(&event.course_id).await? {
            tracing::debug!(
                course_id = %event.course_id,
                "Notifications disabled for course, skipping preference"
            );
            return Ok(EnrollmentOutcome::SkippedGateDisabled);
        }

        let defaults = self.defaults.current();
        match self
            .store
            .create(event.user_id, &event.course_id, &defaults)
            .await
        {
            Ok(pref) => {
                tracing::info!(
                    user_id = event.user_id,
                    course_id = %event.course_id,
                    preference_id = pref.id,
                    config_version = pref.config_version,
                    "CourseNotificationPreference created"
                );
                Ok(EnrollmentOutcome::Created)
            }
            Err(AppError::Conflict(_)) => {
                tracing::info!(
                    user_id = event.user_id,
                    course_id = %event.course_id,
                    "CourseNotificationPreference already exists"
                );
                Ok(EnrollmentOutcome::AlreadyExists)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn on_user_notification(&self, data: &NotificationData) -> Result<JobHandle, AppError> {
        let handle = self
            .queue
            .enqueue(Job::SendNotifications {
                kwargs: data.fields.clone(),
            })
            .await?;

        tracing::debug!(job_id = %handle.job_id, "Notification dispatch queued");
        Ok(handle)
    }
}

#[async_trait]
impl EventHandler for NotificationListener {
    async fn handle(&self, event: &DomainEvent) -> Result<(), AppError> {
        match event {
            DomainEvent::CourseEnrollmentCreated(e) => {
                self.on_enrollment_created(e).await?;
            }
            DomainEvent::UserNotification { notification_data } => {
                self.on_user_notification(notification_data).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessEventBus;
    use crate::gate::StaticFeatureGate;
    use crate::queue::InMemoryJobQueue;
    use crate::store::InMemoryPreferenceStore;
    use prefsync_common::types::{DISPATCH_QUEUE, DefaultPreferenceConfig};
    use serde_json::json;

    const COURSE: &str = "course-v1:edX+DemoX+Demo_Course";

    /// Enabled only for the listed courses.
    struct CourseListGate(Vec<String>);

    #[async_trait]
    impl FeatureGate for CourseListGate {
        async fn is_enabled(&self, course_id: &str) -> Result<bool, AppError> {
            Ok(self.0.iter().any(|c| c == course_id))
        }
    }

    struct BrokenGate;

    #[async_trait]
    impl FeatureGate for BrokenGate {
        async fn is_enabled(&self, _course_id: &str) -> Result<bool, AppError> {
            Err(AppError::Internal("flag service down".into()))
        }
    }

    struct Fixture {
        store: Arc<InMemoryPreferenceStore>,
        queue: Arc<InMemoryJobQueue>,
        listener: Arc<NotificationListener>,
    }

    fn fixture_with(gate: Arc<dyn FeatureGate>, queue: InMemoryJobQueue) -> Fixture {
        let store = Arc::new(InMemoryPreferenceStore::new());
        let queue = Arc::new(queue);
        let listener = Arc::new(NotificationListener::new(
            store.clone(),
            gate,
            queue.clone(),
            Arc::new(PreferenceDefaults::default()),
        ));
        Fixture {
            store,
            queue,
            listener,
        }
    }

    fn fixture(enabled: bool) -> Fixture {
        fixture_with(
            Arc::new(StaticFeatureGate::new(enabled)),
            InMemoryJobQueue::new(),
        )
    }

    fn enrolled(user_id: i64, created: bool) -> EnrollmentCreated {
        EnrollmentCreated {
            user_id,
            course_id: COURSE.to_string(),
            created,
        }
    }

    #[tokio::test]
    async fn test_new_enrollment_creates_preference() {
        let f = fixture(true);
        let outcome = f.listener.on_enrollment_created(&enrolled(1, true)).await.unwrap();
        assert_eq!(outcome, EnrollmentOutcome::Created);

        let pref = f.store.get(1, COURSE).await.unwrap().unwrap();
        assert_eq!(pref.config_version, DefaultPreferenceConfig::builtin().version);
        assert!(f.queue.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_updated_enrollment_is_ignored() {
        let f = fixture(true);
        let outcome = f.listener.on_enrollment_created(&enrolled(1, false)).await.unwrap();
        assert_eq!(outcome, EnrollmentOutcome::SkippedNotNew);
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_gate_is_evaluated_per_course() {
        let f = fixture_with(
            Arc::new(CourseListGate(vec!["course-v1:other".to_string()])),
            InMemoryJobQueue::new(),
        );
        let outcome = f.listener.on_enrollment_created(&enrolled(1, true)).await.unwrap();
        assert_eq!(outcome, EnrollmentOutcome::SkippedGateDisabled);
        assert!(f.store.is_empty().await);

        let other = EnrollmentCreated {
            user_id: 1,
            course_id: "course-v1:other".to_string(),
            created: true,
        };
        let outcome = f.listener.on_enrollment_created(&other).await.unwrap();
        assert_eq!(outcome, EnrollmentOutcome::Created);
    }

    #[tokio::test]
    async fn test_duplicate_enrollment_is_swallowed() {
        let f = fixture(true);
        f.listener.on_enrollment_created(&enrolled(1, true)).await.unwrap();
        let outcome = f.listener.on_enrollment_created(&enrolled(1, true)).await.unwrap();
        assert_eq!(outcome, EnrollmentOutcome::AlreadyExists);
        assert_eq!(f.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_simultaneous_enrollments_create_one_record() {
        let f = fixture(true);
        let e1 = enrolled(1, true);
        let e2 = enrolled(1, true);
        let (a, b) = tokio::join!(
            f.listener.on_enrollment_created(&e1),
            f.listener.on_enrollment_created(&e2)
        );
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o as u8);
        assert_eq!(
            outcomes,
            vec![EnrollmentOutcome::Created, EnrollmentOutcome::AlreadyExists]
        );
        assert_eq!(f.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_gate_fault_propagates() {
        let f = fixture_with(Arc::new(BrokenGate), InMemoryJobQueue::new());
        assert!(f.listener.on_enrollment_created(&enrolled(1, true)).await.is_err());
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_notification_enqueues_one_dispatch_job() {
        let f = fixture(false);
        let data: NotificationData =
            serde_json::from_value(json!({"recipient": 1, "message": "m"})).unwrap();

        let handle = f.listener.on_user_notification(&data).await.unwrap();
        assert_eq!(handle.queue, DISPATCH_QUEUE);

        let jobs = f.queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        match &jobs[0].job {
            Job::SendNotifications { kwargs } => {
                assert_eq!(kwargs.len(), 2);
                assert_eq!(kwargs["recipient"], 1);
                assert_eq!(kwargs["message"], "m");
            }
            other => panic!("unexpected job {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_enqueue_failure_propagates() {
        let f = fixture_with(
            Arc::new(StaticFeatureGate::new(true)),
            InMemoryJobQueue::unavailable(),
        );
        let result = f.listener.on_user_notification(&NotificationData::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_registered_listener_handles_bus_events() {
        let f = fixture(true);
        let bus = InProcessEventBus::new();
        f.listener.clone().register(&bus);

        bus.publish(DomainEvent::CourseEnrollmentCreated(enrolled(5, true)))
            .await
            .unwrap();
        bus.publish(DomainEvent::UserNotification {
            notification_data: NotificationData::default(),
        })
        .await
        .unwrap();

        assert!(f.store.get(5, COURSE).await.unwrap().is_some());
        assert_eq!(f.queue.jobs().await.len(), 1);
    }
}
