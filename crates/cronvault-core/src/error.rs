//! Error taxonomy shared by every Cronvault crate.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, CronvaultError>;

/// Errors raised by the scheduler, its stores and the daemon configuration.
#[derive(Debug, Error)]
pub enum CronvaultError {
    // ── Validation ─────────────────────────────────────────────────
    #[error("index out of bound: {index}, must be 0 <= x < {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("unknown encoding format: '{0}' (available: json, yaml, toml)")]
    UnknownEncoding(String),

    #[error("invalid period '{0}'")]
    InvalidPeriod(String),

    #[error("unsupported payload kind: {0}")]
    UnsupportedPayload(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("configuration error: {0}")]
    Config(String),

    // ── I/O ────────────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    // ── Job runs ───────────────────────────────────────────────────
    #[error("execution of command id {id} failed: {message}")]
    Execution { id: String, message: String },

    #[error("payload error: {0}")]
    Payload(String),

    // ── Engine ─────────────────────────────────────────────────────
    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("no active tasks for the scheduler")]
    NoActiveTasks,

    #[error("fatal tasks execution error: {0}")]
    Fatal(String),
}

impl CronvaultError {
    /// Validation errors are caller mistakes; they never stop the engine.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::IndexOutOfBounds { .. }
                | Self::UnknownEncoding(_)
                | Self::InvalidPeriod(_)
                | Self::UnsupportedPayload(_)
                | Self::InvalidCommand(_)
                | Self::Config(_)
        )
    }
}
