//! Per-course notifications feature gate.
//!
//! Consulted only when an enrollment is created; backfill and dispatch never
//! look at it.

use async_trait::async_trait;
use sqlx::PgPool;

use prefsync_common::error::AppError;

#[async_trait]
pub trait FeatureGate: Send + Sync {
    async fn is_enabled(&self, course_id: &str) -> Result<bool, AppError>;
}

/// Same answer for every course.
pub struct StaticFeatureGate {
    enabled: bool,
}

impl StaticFeatureGate {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl FeatureGate for StaticFeatureGate {
    async fn is_enabled(&self, _course_id: &str) -> Result<bool, AppError> {
        Ok(self.enabled)
    }
}

/// Reads per-course overrides from `course_notification_flags`, falling back
/// to the global `ENABLE_NOTIFICATIONS` value.
#[derive(Clone)]
pub struct PgFeatureGate {
    pool: PgPool,
    default_enabled: bool,
}

impl PgFeatureGate {
    pub fn new(pool: PgPool, default_enabled: bool) -> Self {
        Self {
            pool,
            default_enabled,
        }
    }

    /// Set or clear (`None`) the override for a course.
    pub async fn set_override(&self, course_id: &str, enabled: Option<bool>) -> Result<(), AppError> {
        match enabled {
            Some(enabled) => {
                sqlx::query(
                    r#"
                    INSERT INTO course_notification_flags (course_id, enabled)
                    VALUES ($1, $2)
                    ON CONFLICT (course_id) DO UPDATE SET enabled = $2, updated_at = NOW()
                    "#,
                )
                .bind(course_id)
                .bind(enabled)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM course_notification_flags WHERE course_id = $1")
                    .bind(course_id)
                    .execute(&self.pool)
                    .await?;
            }
        }

        tracing::info!(course_id, ?enabled, "Notifications flag override updated");
        Ok(())
    }
}

#[async_trait]
impl FeatureGate for PgFeatureGate {
    async fn is_enabled(&self, course_id: &str) -> Result<bool, AppError> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT enabled FROM course_notification_flags WHERE course_id = $1")
                .bind(course_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(enabled,)| enabled).unwrap_or(self.default_enabled))
    }
}
