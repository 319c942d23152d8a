//! Reload-aware source of the current default preference config.
//!
//! Callers take a snapshot with [`PreferenceDefaults::current`] and pass it
//! into the reconciler, so one reconcile or one backfill run always compares
//! against a single consistent version.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use prefsync_common::error::AppError;
use prefsync_common::types::DefaultPreferenceConfig;

/// Process-wide holder of the active `DefaultPreferenceConfig`.
pub struct PreferenceDefaults {
    current: RwLock<Arc<DefaultPreferenceConfig>>,
    path: Option<PathBuf>,
}

impl PreferenceDefaults {
    /// Fixed defaults with no backing file.
    pub fn new(initial: DefaultPreferenceConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            path: None,
        }
    }

    /// Load from `path` when given, otherwise fall back to the built-in default.
    pub async fn load(path: Option<&str>) -> Result<Self, AppError> {
        let Some(path) = path else {
            tracing::info!("No defaults file configured, using built-in preference defaults");
            return Ok(Self::new(DefaultPreferenceConfig::builtin()));
        };

        let path = PathBuf::from(path);
        let initial = read_defaults_file(&path).await?;
        tracing::info!(
            path = %path.display(),
            version = initial.version,
            "Loaded preference defaults"
        );

        Ok(Self {
            current: RwLock::new(Arc::new(initial)),
            path: Some(path),
        })
    }

    /// Snapshot of the defaults active right now.
    pub fn current(&self) -> Arc<DefaultPreferenceConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in new defaults. Returns `true` if they differ from the active ones.
    pub fn replace(&self, next: DefaultPreferenceConfig) -> bool {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if **guard == next {
            return false;
        }

        tracing::info!(
            old_version = guard.version,
            new_version = next.version,
            "Preference defaults replaced"
        );
        *guard = Arc::new(next);
        true
    }

    /// Re-read the backing file and swap if its contents changed.
    ///
    /// Returns `Ok(false)` when there is no file or nothing changed. On a read
    /// or parse error the active defaults are left untouched.
    pub async fn reload_if_changed(&self) -> Result<bool, AppError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        let next = read_defaults_file(path).await?;
        Ok(self.replace(next))
    }

    /// Poll the backing file every `interval` until the task is aborted.
    pub fn spawn_reloader(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.reload_if_changed().await {
                    tracing::warn!(error = %e, "Failed to reload preference defaults, keeping current");
                }
            }
        })
    }
}

impl Default for PreferenceDefaults {
    fn default() -> Self {
        Self::new(DefaultPreferenceConfig::builtin())
    }
}

/// Read and validate a `{ "version": .., "config": {..} }` file.
async fn read_defaults_file(path: &Path) -> Result<DefaultPreferenceConfig, AppError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        AppError::Config(format!(
            "Cannot read preference defaults {}: {}",
            path.display(),
            e
        ))
    })?;

    let parsed: DefaultPreferenceConfig = serde_json::from_str(&raw)?;

    if parsed.version < 1 {
        return Err(AppError::Config(format!(
            "Preference defaults version must be >= 1, got {}",
            parsed.version
        )));
    }
    if !parsed.config.is_object() {
        return Err(AppError::Config(
            "Preference defaults `config` must be a JSON object".to_string(),
        ));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("prefsync-defaults-{}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_load_without_path_uses_builtin() {
        let defaults = PreferenceDefaults::load(None).await.unwrap();
        assert_eq!(*defaults.current(), DefaultPreferenceConfig::builtin());
        assert!(!defaults.reload_if_changed().await.unwrap());
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_version() {
        let path = temp_path();
        tokio::fs::write(&path, json!({"version": 1, "config": {"a": 1}}).to_string())
            .await
            .unwrap();

        let defaults = PreferenceDefaults::load(path.to_str()).await.unwrap();
        let before = defaults.current();
        assert_eq!(before.version, 1);

        // Unchanged file → no swap
        assert!(!defaults.reload_if_changed().await.unwrap());

        tokio::fs::write(&path, json!({"version": 2, "config": {"a": 2}}).to_string())
            .await
            .unwrap();
        assert!(defaults.reload_if_changed().await.unwrap());
        assert_eq!(defaults.current().version, 2);

        // Snapshots taken earlier are unaffected
        assert_eq!(before.version, 1);

        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn test_bad_file_keeps_current_defaults() {
        let path = temp_path();
        tokio::fs::write(&path, json!({"version": 4, "config": {}}).to_string())
            .await
            .unwrap();
        let defaults = PreferenceDefaults::load(path.to_str()).await.unwrap();

        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(defaults.reload_if_changed().await.is_err());
        assert_eq!(defaults.current().version, 4);

        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn test_rejects_non_object_config() {
        let path = temp_path();
        tokio::fs::write(&path, json!({"version": 1, "config": [1, 2]}).to_string())
            .await
            .unwrap();
        let result = PreferenceDefaults::load(path.to_str()).await;
        assert!(matches!(result, Err(AppError::Config(_))));
        tokio::fs::remove_file(&path).await.ok();
    }

    #[test]
    fn test_replace_reports_change() {
        let defaults = PreferenceDefaults::default();
        assert!(!defaults.replace(DefaultPreferenceConfig::builtin()));
        assert!(defaults.replace(DefaultPreferenceConfig::new(9, json!({}))));
        assert_eq!(defaults.current().version, 9);
    }
}
