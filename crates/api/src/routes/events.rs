//! Event ingress: the HTTP callback transport for the event bus.
//!
//! Upstream subsystems POST their events here; each request is published
//! onto the bus and the subscribed listener runs before the response is sent.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use prefsync_common::error::AppError;
use prefsync_common::types::{DomainEvent, EnrollmentCreated, NotificationData};

use crate::middleware::auth::OperatorAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/events/course-enrollment-created",
            post(course_enrollment_created),
        )
        .route("/api/events/user-notification", post(user_notification))
}

/// Body of `POST /api/events/user-notification`.
#[derive(Debug, Deserialize)]
pub struct UserNotificationRequest {
    #[serde(default)]
    pub notification_data: NotificationData,
}

/// POST /api/events/course-enrollment-created: An enrollment row was saved.
async fn course_enrollment_created(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Json(event): Json<EnrollmentCreated>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if event.course_id.trim().is_empty() {
        return Err(AppError::Validation("course_id must not be empty".to_string()));
    }

    tracing::debug!(
        source = %auth.operator,
        user_id = event.user_id,
        course_id = %event.course_id,
        created = event.created,
        "Enrollment event received"
    );

    let handlers = state
        .bus
        .publish(DomainEvent::CourseEnrollmentCreated(event))
        .await?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "handlers": handlers }))))
}

/// POST /api/events/user-notification: A notification was generated.
async fn user_notification(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Json(req): Json<UserNotificationRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    tracing::debug!(
        source = %auth.operator,
        fields = req.notification_data.fields.len(),
        "User notification event received"
    );

    let handlers = state
        .bus
        .publish(DomainEvent::UserNotification {
            notification_data: req.notification_data,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "handlers": handlers }))))
}
