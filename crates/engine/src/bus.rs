//! Event bus: subscribe handlers per event kind, publish domain events.
//!
//! Handlers run inline in the publisher's task, in subscription order, and
//! the first handler error is returned to the publisher.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use prefsync_common::error::AppError;
use prefsync_common::types::{DomainEvent, EventKind};

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> Result<(), AppError>;
}

#[async_trait]
pub trait EventBus: Send + Sync {
    fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>);

    /// Deliver `event` to every handler subscribed to its kind.
    /// Returns how many handlers ran.
    async fn publish(&self, event: DomainEvent) -> Result<usize, AppError>;
}

/// Bus whose handlers live in this process.
#[derive(Default)]
pub struct InProcessEventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
}

impl InProcessEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBus for InProcessEventBus {
    fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(handler);
        tracing::debug!(event_kind = %kind, "Handler subscribed");
    }

    async fn publish(&self, event: DomainEvent) -> Result<usize, AppError> {
        let kind = event.kind();
        // Clone the list so the lock is not held across handler awaits.
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::debug!(event_kind = %kind, "No handlers subscribed, event dropped");
            return Ok(0);
        }

        for handler in &handlers {
            handler.handle(&event).await?;
        }

        Ok(handlers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefsync_common::types::{EnrollmentCreated, NotificationData};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _event: &DomainEvent) -> Result<(), AppError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _event: &DomainEvent) -> Result<(), AppError> {
            Err(AppError::Internal("boom".into()))
        }
    }

    fn enrollment() -> DomainEvent {
        DomainEvent::CourseEnrollmentCreated(EnrollmentCreated {
            user_id: 1,
            course_id: "c1".into(),
            created: true,
        })
    }

    #[tokio::test]
    async fn test_publish_reaches_only_matching_kind() {
        let bus = InProcessEventBus::new();
        let enrollments = Arc::new(Counter(AtomicUsize::new(0)));
        let notifications = Arc::new(Counter(AtomicUsize::new(0)));
        bus.subscribe(EventKind::CourseEnrollmentCreated, enrollments.clone());
        bus.subscribe(EventKind::UserNotification, notifications.clone());

        assert_eq!(bus.publish(enrollment()).await.unwrap(), 1);
        assert_eq!(enrollments.0.load(Ordering::SeqCst), 1);
        assert_eq!(notifications.0.load(Ordering::SeqCst), 0);

        let ran = bus
            .publish(DomainEvent::UserNotification {
                notification_data: NotificationData::default(),
            })
            .await
            .unwrap();
        assert_eq!(ran, 1);
        assert_eq!(notifications.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_publish_without_handlers_is_noop() {
        let bus = InProcessEventBus::new();
        assert_eq!(bus.publish(enrollment()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let bus = InProcessEventBus::new();
        bus.subscribe(EventKind::CourseEnrollmentCreated, Arc::new(Failing));
        assert!(bus.publish(enrollment()).await.is_err());
    }
}
