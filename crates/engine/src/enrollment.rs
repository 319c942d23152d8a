//! Read-only access to course enrollments.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::RwLock;

use prefsync_common::error::AppError;
use prefsync_common::types::CourseEnrollment;

#[async_trait]
pub trait EnrollmentSource: Send + Sync {
    /// All enrollments in the course with `is_active = true`.
    /// An unknown course yields an empty list.
    async fn active_enrollments(&self, course_id: &str) -> Result<Vec<CourseEnrollment>, AppError>;
}

#[derive(Clone)]
pub struct PgEnrollmentSource {
    pool: PgPool,
}

impl PgEnrollmentSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnrollmentSource for PgEnrollmentSource {
    async fn active_enrollments(&self, course_id: &str) -> Result<Vec<CourseEnrollment>, AppError> {
        let enrollments = sqlx::query_as(
            r#"
            SELECT user_id, course_id, is_active, created_at
            FROM course_enrollments
            WHERE course_id = $1 AND is_active = true
            ORDER BY user_id
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(enrollments)
    }
}

#[derive(Default)]
pub struct InMemoryEnrollmentSource {
    enrollments: RwLock<Vec<CourseEnrollment>>,
}

impl InMemoryEnrollmentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enroll(&self, user_id: i64, course_id: &str, is_active: bool) {
        self.enrollments.write().await.push(CourseEnrollment {
            user_id,
            course_id: course_id.to_string(),
            is_active,
            created_at: Utc::now(),
        });
    }
}

#[async_trait]
impl EnrollmentSource for InMemoryEnrollmentSource {
    async fn active_enrollments(&self, course_id: &str) -> Result<Vec<CourseEnrollment>, AppError> {
        let enrollments = self.enrollments.read().await;
        Ok(enrollments
            .iter()
            .filter(|e| e.course_id == course_id && e.is_active)
            .cloned()
            .collect())
    }
}
