//! Error types for the cron engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronError {
    /// Malformed schedule: bad cron expression, unknown timezone, or a
    /// non-positive interval. The job is never stored.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A job creation/update payload is missing required fields or is
    /// structurally invalid.
    #[error("invalid job definition: {0}")]
    Normalization(String),

    /// Operation referenced a job id that does not exist.
    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for cron operations.
pub type Result<T> = std::result::Result<T, CronError>;
