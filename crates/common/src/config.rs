use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string (job queues live here)
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Port the HTTP ingress listens on (default: 3000)
    pub api_port: u16,

    /// Secret used to sign and verify operator tokens
    pub jwt_secret: String,

    /// Operator token expiry in hours
    pub jwt_expiry_hours: u64,

    /// Fallback value of the notifications gate for courses without an override
    pub enable_notifications: bool,

    /// Optional JSON file holding the current default preference config.
    /// When unset the built-in default is used.
    pub notification_defaults_path: Option<String>,

    /// How often the API re-checks the defaults file, in seconds (default: 30)
    pub defaults_reload_interval_secs: u64,

    /// Redis key prefix for job queues (default: "prefsync")
    pub job_queue_prefix: String,

    /// Attempts before a failing job is moved to the dead-letter list (default: 3)
    pub job_max_attempts: u32,

    /// Blocking pop timeout used by the worker, in seconds (default: 5)
    pub worker_poll_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid u16"))?,
            jwt_secret: std::env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?,
            jwt_expiry_hours: std::env::var("JWT_EXPIRY_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("JWT_EXPIRY_HOURS must be a valid u64"))?,
            enable_notifications: parse_bool(
                "ENABLE_NOTIFICATIONS",
                &std::env::var("ENABLE_NOTIFICATIONS").unwrap_or_else(|_| "false".to_string()),
            )?,
            notification_defaults_path: std::env::var("NOTIFICATION_DEFAULTS_PATH").ok(),
            defaults_reload_interval_secs: std::env::var("DEFAULTS_RELOAD_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DEFAULTS_RELOAD_INTERVAL_SECS must be a valid u64"))?,
            job_queue_prefix: std::env::var("JOB_QUEUE_PREFIX")
                .unwrap_or_else(|_| "prefsync".to_string()),
            job_max_attempts: std::env::var("JOB_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("JOB_MAX_ATTEMPTS must be a valid u32"))?,
            worker_poll_timeout_secs: std::env::var("WORKER_POLL_TIMEOUT_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WORKER_POLL_TIMEOUT_SECS must be a valid u64"))?,
        })
    }
}

/// The subset of configuration needed to submit jobs, for tools that never
/// touch the database.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub redis_url: String,
    pub job_queue_prefix: String,
}

impl QueueConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            job_queue_prefix: std::env::var("JOB_QUEUE_PREFIX")
                .unwrap_or_else(|_| "prefsync".to_string()),
        })
    }
}

/// Parse a boolean flag, accepting the usual spellings.
fn parse_bool(name: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(anyhow::anyhow!("{} must be a boolean, got '{}'", name, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_accepts_common_spellings() {
        assert!(parse_bool("X", "true").unwrap());
        assert!(parse_bool("X", "ON").unwrap());
        assert!(parse_bool("X", "1").unwrap());
        assert!(!parse_bool("X", "false").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(!parse_bool("X", "").unwrap());
    }

    #[test]
    fn test_parse_bool_rejects_garbage() {
        let err = parse_bool("ENABLE_NOTIFICATIONS", "maybe").unwrap_err();
        assert!(err.to_string().contains("ENABLE_NOTIFICATIONS"));
    }
}
