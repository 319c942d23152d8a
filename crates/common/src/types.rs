use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Version of the built-in default preference config.
/// Bump together with `DefaultPreferenceConfig::builtin` when a course-level
/// notification app or type changes.
pub const BUILTIN_CONFIG_VERSION: i32 = 1;

/// Queue carrying `send_notifications` jobs to the delivery workers.
pub const DISPATCH_QUEUE: &str = "notifications.dispatch";

/// Queue carrying `create_notification_preferences` backfill jobs.
pub const BACKFILL_QUEUE: &str = "notifications.backfill";

/// Kinds of domain events this system listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CourseEnrollmentCreated,
    UserNotification,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::CourseEnrollmentCreated => write!(f, "course_enrollment_created"),
            EventKind::UserNotification => write!(f, "user_notification"),
        }
    }
}

/// Fired by the enrollment subsystem every time an enrollment row is saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentCreated {
    pub user_id: i64,
    pub course_id: String,
    /// `true` on insert, `false` on update of an existing enrollment.
    pub created: bool,
}

/// Opaque notification payload; its top-level fields become the dispatch
/// job's keyword arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A domain event as delivered by the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    CourseEnrollmentCreated(EnrollmentCreated),
    UserNotification { notification_data: NotificationData },
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::CourseEnrollmentCreated(_) => EventKind::CourseEnrollmentCreated,
            DomainEvent::UserNotification { .. } => EventKind::UserNotification,
        }
    }
}

/// A user's notification preferences for one course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CourseNotificationPreference {
    pub id: i64,
    pub user_id: i64,
    pub course_id: String,
    pub notification_preference_config: Value,
    pub config_version: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CourseNotificationPreference {
    /// Config object for one notification app, `{}` when absent.
    pub fn app_config(&self, app_name: &str) -> Value {
        self.notification_preference_config
            .get(app_name)
            .cloned()
            .unwrap_or_else(|| json!({}))
    }

    /// Config object for one notification type within an app, `{}` when absent.
    pub fn notification_type_config(&self, app_name: &str, notification_type: &str) -> Value {
        self.notification_preference_config
            .get(app_name)
            .and_then(|app| app.get(notification_type))
            .cloned()
            .unwrap_or_else(|| json!({}))
    }

    /// Whether web delivery is on for a notification type. Defaults to `false`.
    pub fn web_config(&self, app_name: &str, notification_type: &str) -> bool {
        self.notification_preference_config
            .get(app_name)
            .and_then(|app| app.get(notification_type))
            .and_then(|t| t.get("web"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_stale(&self, defaults: &DefaultPreferenceConfig) -> bool {
        self.config_version != defaults.version
    }
}

/// An enrollment row, owned by the enrollment subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CourseEnrollment {
    pub user_id: i64,
    pub course_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// The default preference payload every new or stale record is set to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultPreferenceConfig {
    pub version: i32,
    pub config: Value,
}

impl DefaultPreferenceConfig {
    pub fn new(version: i32, config: Value) -> Self {
        Self { version, config }
    }

    /// Built-in course-level default: the discussion app with every channel on.
    pub fn builtin() -> Self {
        let channels = |info: &str| {
            json!({
                "email": true,
                "push": true,
                "web": true,
                "info": info,
            })
        };

        Self {
            version: BUILTIN_CONFIG_VERSION,
            config: json!({
                "discussion": {
                    "enabled": true,
                    "not_editable": {
                        "new_comment_on_post": ["push"],
                        "new_response_on_post": ["web"],
                        "new_response_on_comment": ["web", "push"],
                    },
                    "notification_types": {
                        "new_comment_on_post": channels("Comment on post"),
                        "new_response_on_comment": channels("Response on comment"),
                        "new_response_on_post": channels("New Response on Post"),
                        "core": channels("comment on post and response on comment"),
                    },
                    "core_notification_types": [],
                }
            }),
        }
    }
}

impl Default for DefaultPreferenceConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Work items carried by the job queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Job {
    /// Deliver a generated notification. Consumed by the delivery workers.
    SendNotifications { kwargs: Map<String, Value> },
    /// Back-fill preferences for every active enrollment of these courses.
    CreateNotificationPreferences { course_ids: Vec<String> },
}

impl Job {
    pub fn queue(&self) -> &'static str {
        match self {
            Job::SendNotifications { .. } => DISPATCH_QUEUE,
            Job::CreateNotificationPreferences { .. } => BACKFILL_QUEUE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Job::SendNotifications { .. } => "send_notifications",
            Job::CreateNotificationPreferences { .. } => "create_notification_preferences",
        }
    }
}

/// A job plus the bookkeeping the queue needs for retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub job: Job,
    pub enqueued_at: DateTime<Utc>,
    /// Failed executions so far.
    #[serde(default)]
    pub attempts: u32,
}

impl JobEnvelope {
    pub fn new(job: Job) -> Self {
        Self {
            id: Uuid::new_v4(),
            job,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }
}

/// Returned to producers once a job is accepted by a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub queue: String,
}
