//! Preference store: one `CourseNotificationPreference` per (user, course).
//!
//! Uniqueness is owned by the store (`UNIQUE (user_id, course_id)` in
//! Postgres), never by a check-then-insert in application code.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::Mutex;

use prefsync_common::error::AppError;
use prefsync_common::types::{CourseNotificationPreference, DefaultPreferenceConfig};

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Insert a fresh record with the given defaults.
    ///
    /// Fails with `AppError::Conflict` if the pair already has a record.
    async fn create(
        &self,
        user_id: i64,
        course_id: &str,
        defaults: &DefaultPreferenceConfig,
    ) -> Result<CourseNotificationPreference, AppError>;

    /// Atomic fetch-or-insert. The flag is `true` when this call inserted.
    async fn get_or_create(
        &self,
        user_id: i64,
        course_id: &str,
        defaults: &DefaultPreferenceConfig,
    ) -> Result<(CourseNotificationPreference, bool), AppError>;

    /// Replace config and version wholesale if the stored version differs.
    ///
    /// Returns `None` when the record was already current, so concurrent
    /// migrators count one migration between them.
    async fn migrate_if_stale(
        &self,
        preference_id: i64,
        defaults: &DefaultPreferenceConfig,
    ) -> Result<Option<CourseNotificationPreference>, AppError>;

    async fn get(
        &self,
        user_id: i64,
        course_id: &str,
    ) -> Result<Option<CourseNotificationPreference>, AppError>;

    async fn list_by_course(
        &self,
        course_id: &str,
    ) -> Result<Vec<CourseNotificationPreference>, AppError>;
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgPreferenceStore {
    pool: PgPool,
}

impl PgPreferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceStore for PgPreferenceStore {
    async fn create(
        &self,
        user_id: i64,
        course_id: &str,
        defaults: &DefaultPreferenceConfig,
    ) -> Result<CourseNotificationPreference, AppError> {
        let pref: CourseNotificationPreference = sqlx::query_as(
            r#"
            INSERT INTO course_notification_preferences
                (user_id, course_id, notification_preference_config, config_version)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .bind(&defaults.config)
        .bind(defaults.version)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::from_insert(
                e,
                format!(
                    "CourseNotificationPreference already exists for user {} and course {}",
                    user_id, course_id
                ),
            )
        })?;

        Ok(pref)
    }

    async fn get_or_create(
        &self,
        user_id: i64,
        course_id: &str,
        defaults: &DefaultPreferenceConfig,
    ) -> Result<(CourseNotificationPreference, bool), AppError> {
        let inserted: Option<CourseNotificationPreference> = sqlx::query_as(
            r#"
            INSERT INTO course_notification_preferences
                (user_id, course_id, notification_preference_config, config_version)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, course_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .bind(&defaults.config)
        .bind(defaults.version)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(pref) = inserted {
            return Ok((pref, true));
        }

        // Lost the race (or the row predates us): read the winner.
        let existing = self.get(user_id, course_id).await?.ok_or_else(|| {
            AppError::Internal(format!(
                "Preference for user {} and course {} vanished after insert conflict",
                user_id, course_id
            ))
        })?;

        Ok((existing, false))
    }

    async fn migrate_if_stale(
        &self,
        preference_id: i64,
        defaults: &DefaultPreferenceConfig,
    ) -> Result<Option<CourseNotificationPreference>, AppError> {
        let migrated: Option<CourseNotificationPreference> = sqlx::query_as(
            r#"
            UPDATE course_notification_preferences
            SET notification_preference_config = $1,
                config_version = $2,
                updated_at = NOW()
            WHERE id = $3 AND config_version <> $2
            RETURNING *
            "#,
        )
        .bind(&defaults.config)
        .bind(defaults.version)
        .bind(preference_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(migrated)
    }

    async fn get(
        &self,
        user_id: i64,
        course_id: &str,
    ) -> Result<Option<CourseNotificationPreference>, AppError> {
        let pref = sqlx::query_as(
            "SELECT * FROM course_notification_preferences WHERE user_id = $1 AND course_id = $2",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(pref)
    }

    async fn list_by_course(
        &self,
        course_id: &str,
    ) -> Result<Vec<CourseNotificationPreference>, AppError> {
        let prefs = sqlx::query_as(
            "SELECT * FROM course_notification_preferences WHERE course_id = $1 ORDER BY user_id",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(prefs)
    }
}

#[derive(Default)]
struct MemoryTable {
    next_id: i64,
    rows: HashMap<(i64, String), CourseNotificationPreference>,
}

/// In-process store with the same uniqueness semantics as Postgres.
/// Used by tests and single-process wiring.
#[derive(Default)]
pub struct InMemoryPreferenceStore {
    table: Mutex<MemoryTable>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, e.g. one written under an older config version.
    pub async fn insert_raw(
        &self,
        user_id: i64,
        course_id: &str,
        defaults: &DefaultPreferenceConfig,
    ) -> CourseNotificationPreference {
        let mut table = self.table.lock().await;
        let pref = table.new_row(user_id, course_id, defaults);
        table
            .rows
            .insert((user_id, course_id.to_string()), pref.clone());
        pref
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl MemoryTable {
    fn new_row(
        &mut self,
        user_id: i64,
        course_id: &str,
        defaults: &DefaultPreferenceConfig,
    ) -> CourseNotificationPreference {
        self.next_id += 1;
        let now = Utc::now();
        CourseNotificationPreference {
            id: self.next_id,
            user_id,
            course_id: course_id.to_string(),
            notification_preference_config: defaults.config.clone(),
            config_version: defaults.version,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn create(
        &self,
        user_id: i64,
        course_id: &str,
        defaults: &DefaultPreferenceConfig,
    ) -> Result<CourseNotificationPreference, AppError> {
        let mut table = self.table.lock().await;
        let key = (user_id, course_id.to_string());
        if table.rows.contains_key(&key) {
            return Err(AppError::Conflict(format!(
                "CourseNotificationPreference already exists for user {} and course {}",
                user_id, course_id
            )));
        }

        let pref = table.new_row(user_id, course_id, defaults);
        table.rows.insert(key, pref.clone());
        Ok(pref)
    }

    async fn get_or_create(
        &self,
        user_id: i64,
        course_id: &str,
        defaults: &DefaultPreferenceConfig,
    ) -> Result<(CourseNotificationPreference, bool), AppError> {
        let mut table = self.table.lock().await;
        let key = (user_id, course_id.to_string());
        if let Some(existing) = table.rows.get(&key) {
            return Ok((existing.clone(), false));
        }

        let pref = table.new_row(user_id, course_id, defaults);
        table.rows.insert(key, pref.clone());
        Ok((pref, true))
    }

    async fn migrate_if_stale(
        &self,
        preference_id: i64,
        defaults: &DefaultPreferenceConfig,
    ) -> Result<Option<CourseNotificationPreference>, AppError> {
        let mut table = self.table.lock().await;
        let Some(pref) = table.rows.values_mut().find(|p| p.id == preference_id) else {
            return Ok(None);
        };
        if pref.config_version == defaults.version {
            return Ok(None);
        }

        pref.notification_preference_config = defaults.config.clone();
        pref.config_version = defaults.version;
        pref.updated_at = Utc::now();
        Ok(Some(pref.clone()))
    }

    async fn get(
        &self,
        user_id: i64,
        course_id: &str,
    ) -> Result<Option<CourseNotificationPreference>, AppError> {
        let table = self.table.lock().await;
        Ok(table.rows.get(&(user_id, course_id.to_string())).cloned())
    }

    async fn list_by_course(
        &self,
        course_id: &str,
    ) -> Result<Vec<CourseNotificationPreference>, AppError> {
        let table = self.table.lock().await;
        let mut prefs: Vec<_> = table
            .rows
            .values()
            .filter(|p| p.course_id == course_id)
            .cloned()
            .collect();
        prefs.sort_by_key(|p| p.user_id);
        Ok(prefs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const COURSE: &str = "course-v1:edX+DemoX+Demo_Course";

    #[tokio::test]
    async fn test_create_rejects_duplicate_pair() {
        let store = InMemoryPreferenceStore::new();
        let defaults = DefaultPreferenceConfig::builtin();

        store.create(1, COURSE, &defaults).await.unwrap();
        let err = store.create(1, COURSE, &defaults).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.len().await, 1);

        // Same user, other course is a different key
        store.create(1, "course-v1:other", &defaults).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_get_or_create_returns_existing() {
        let store = InMemoryPreferenceStore::new();
        let defaults = DefaultPreferenceConfig::builtin();

        let (first, created) = store.get_or_create(2, COURSE, &defaults).await.unwrap();
        assert!(created);
        let (second, created) = store.get_or_create(2, COURSE, &defaults).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_migrate_only_when_version_differs() {
        let store = InMemoryPreferenceStore::new();
        let old = DefaultPreferenceConfig::new(1, json!({"old": true}));
        let new = DefaultPreferenceConfig::new(2, json!({"new": true}));

        let pref = store.insert_raw(3, COURSE, &old).await;

        let migrated = store.migrate_if_stale(pref.id, &new).await.unwrap().unwrap();
        assert_eq!(migrated.config_version, 2);
        assert_eq!(migrated.notification_preference_config, json!({"new": true}));

        // Already current → nothing to do
        assert!(store.migrate_if_stale(pref.id, &new).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_course_filters_and_sorts() {
        let store = InMemoryPreferenceStore::new();
        let defaults = DefaultPreferenceConfig::builtin();
        store.create(9, COURSE, &defaults).await.unwrap();
        store.create(4, COURSE, &defaults).await.unwrap();
        store.create(5, "course-v1:other", &defaults).await.unwrap();

        let prefs = store.list_by_course(COURSE).await.unwrap();
        let users: Vec<i64> = prefs.iter().map(|p| p.user_id).collect();
        assert_eq!(users, vec![4, 9]);
    }
}
