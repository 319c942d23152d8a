//! Notification preference routes: backfill trigger and lookup.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use prefsync_common::error::AppError;
use prefsync_common::types::{CourseNotificationPreference, JobHandle};
use prefsync_engine::backfill::BackfillOrchestrator;

use crate::middleware::auth::OperatorAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notification-preferences/backfill", post(schedule_backfill))
        .route(
            "/api/notification-preferences/{user_id}/{course_id}",
            get(get_preference),
        )
}

#[derive(Debug, Deserialize)]
pub struct BackfillRequest {
    #[serde(default)]
    pub course_ids: Vec<String>,
}

/// POST /api/notification-preferences/backfill: Queue a back-fill job.
///
/// Returns as soon as the job is queued; progress is in the worker logs.
/// Ids are passed through as given; an unknown one backfills nothing.
async fn schedule_backfill(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Json(req): Json<BackfillRequest>,
) -> Result<(StatusCode, Json<JobHandle>), AppError> {
    tracing::info!(
        operator = %auth.operator,
        courses = req.course_ids.len(),
        "Backfill requested"
    );

    let handle = BackfillOrchestrator::schedule(state.queue.as_ref(), req.course_ids).await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

/// GET /api/notification-preferences/{user_id}/{course_id}
async fn get_preference(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path((user_id, course_id)): Path<(i64, String)>,
) -> Result<Json<CourseNotificationPreference>, AppError> {
    let pref = state.store.get(user_id, &course_id).await?.ok_or_else(|| {
        AppError::NotFound(format!(
            "No notification preference for user {} in course {}",
            user_id, course_id
        ))
    })?;

    Ok(Json(pref))
}
