//! Cronny configuration, driven by the environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CronnyError, Result};

/// Recognized deployment environments.
pub const DEVELOPMENT_ENV: &str = "development";
pub const STAGING_ENV: &str = "staging";
pub const PRODUCTION_ENV: &str = "production";

/// Environment variables Cronny reads.
pub const CRONNY_ENV_VAR: &str = "CRONNY_ENV";
pub const JWT_SECRET_VAR: &str = "JWT_SECRET";
pub const DB_PATH_VAR: &str = "CRONNY_DB_PATH";
pub const DB_TIMEZONE_VAR: &str = "DB_TIMEZONE";

/// Fallback secret, acceptable in development only.
const DEV_JWT_SECRET: &str = "dev-secret-key-change-in-production";

/// Upper bound applied to a job's executor call when the job doesn't set one.
pub const DEFAULT_JOB_TIMEOUT_SECS: i64 = 60;

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronnyConfig {
    /// Deployment environment (development/staging/production).
    pub env: String,
    /// Secret used by the API surface; must be set outside development.
    pub jwt_secret: String,
    /// SQLite database location.
    pub db_path: PathBuf,
    /// Timezone of stored timestamps. Cronny always writes UTC.
    pub db_timezone: String,
    /// Default per-job executor deadline, in seconds.
    pub default_job_timeout_secs: i64,
    /// Number of trigger executor workers.
    pub executor_concurrency: usize,
    /// Capacity of the trigger dispatch queue.
    pub trigger_queue_capacity: usize,
    /// Execution history retained per job.
    pub allowed_job_executions_per_job: usize,
}

impl Default for CronnyConfig {
    fn default() -> Self {
        Self {
            env: DEVELOPMENT_ENV.to_string(),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            db_path: Self::default_db_path(),
            db_timezone: "UTC".to_string(),
            default_job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            executor_concurrency: 10,
            trigger_queue_capacity: 1024,
            allowed_job_executions_per_job: 10,
        }
    }
}

impl CronnyConfig {
    /// Build a config from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(env) = std::env::var(CRONNY_ENV_VAR) {
            if !env.is_empty() {
                config.env = env;
            }
        }
        if let Ok(secret) = std::env::var(JWT_SECRET_VAR) {
            if !secret.is_empty() {
                config.jwt_secret = secret;
            }
        }
        if let Ok(path) = std::env::var(DB_PATH_VAR) {
            if !path.is_empty() {
                config.db_path = PathBuf::from(path);
            }
        }
        if let Ok(tz) = std::env::var(DB_TIMEZONE_VAR) {
            if !tz.is_empty() {
                config.db_timezone = tz;
            }
        }
        config
    }

    /// Check invariants that depend on the deployment environment.
    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.is_empty() {
            return Err(CronnyError::Config("JWT_SECRET must be set".into()));
        }
        if self.env != DEVELOPMENT_ENV && self.jwt_secret == DEV_JWT_SECRET {
            return Err(CronnyError::Config(format!(
                "JWT_SECRET must not use the default value in {}",
                self.env
            )));
        }
        Ok(())
    }

    /// The Cronny home directory (~/.cronny).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cronny")
    }

    /// Default SQLite database path (~/.cronny/cronny.db).
    pub fn default_db_path() -> PathBuf {
        Self::home_dir().join("cronny.db")
    }
}
