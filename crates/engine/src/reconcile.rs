//! Reconciliation engine: idempotent get-or-create plus version migration
//! for a single (user, course) pair.
//!
//! Safe under arbitrary interleaving with other reconciles and with the
//! enrollment listener:
//! 1. Fetch-or-insert is one atomic upsert in the store
//! 2. Migration is a conditional overwrite that only fires on a stale version

use std::sync::Arc;

use prefsync_common::error::AppError;
use prefsync_common::types::{CourseNotificationPreference, DefaultPreferenceConfig};

use crate::store::PreferenceStore;

/// Outcome of reconciling one pair.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub preference: CourseNotificationPreference,
    /// This call inserted the record.
    pub created: bool,
    /// This call moved a pre-existing record onto the current defaults.
    pub migrated: bool,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn PreferenceStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// Make sure (user, course) has a preference on `defaults.version`.
    ///
    /// Only storage faults are returned as errors.
    pub async fn reconcile(
        &self,
        user_id: i64,
        course_id: &str,
        defaults: &DefaultPreferenceConfig,
    ) -> Result<Reconciled, AppError> {
        let (preference, created) = self
            .store
            .get_or_create(user_id, course_id, defaults)
            .await?;

        if created || !preference.is_stale(defaults) {
            return Ok(Reconciled {
                preference,
                created,
                migrated: false,
            });
        }

        let from_version = preference.config_version;
        match self.store.migrate_if_stale(preference.id, defaults).await? {
            Some(updated) => {
                tracing::debug!(
                    user_id,
                    course_id,
                    from_version,
                    to_version = defaults.version,
                    "Migrated stale notification preference"
                );
                Ok(Reconciled {
                    preference: updated,
                    created: false,
                    migrated: true,
                })
            }
            // Someone else migrated it between our read and write.
            None => {
                let current = self.store.get(user_id, course_id).await?.unwrap_or(preference);
                Ok(Reconciled {
                    preference: current,
                    created: false,
                    migrated: false,
                })
            }
        }
    }
}
