//! Crate-wide error type.

use thiserror::Error;

/// Convenience alias used across all Cronny crates.
pub type Result<T> = std::result::Result<T, CronnyError>;

/// All the ways Cronny can fail.
#[derive(Debug, Error)]
pub enum CronnyError {
    /// Configuration is missing or inconsistent.
    #[error("config error: {0}")]
    Config(String),

    /// An entity failed a save-time or delete-time validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Every persisted entity must belong to a user.
    #[error("user id is required")]
    MissingUserId,

    /// A referenced entity does not exist (or is soft-deleted).
    #[error("not found: {0}")]
    NotFound(String),

    /// The persistence gateway failed.
    #[error("database error: {0}")]
    Database(String),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// An RFC3339 timestamp failed to parse.
    #[error("time parse error: {0}")]
    Time(#[from] chrono::ParseError),

    /// A job template names an executor that is not registered.
    #[error("job template '{0}' is not registered")]
    UnknownTemplate(String),

    /// A job's executor did not return within its deadline.
    #[error("job execution timed out after {0} seconds")]
    Timeout(i64),

    /// No condition rule matched the job output.
    #[error("no route: no condition rule matched input {0}")]
    NoRoute(String),

    /// A condition filter uses a comparison that is reserved but not evaluated.
    #[error("comparison type '{0}' is not supported")]
    UnsupportedComparison(String),

    /// Template marker resolution failed.
    #[error("template error: {0}")]
    Template(String),

    /// An executor failed while running.
    #[error("action error: {0}")]
    Action(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
