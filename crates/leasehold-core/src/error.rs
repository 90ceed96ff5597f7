//! Error types for leasehold-core with categorization:
//!
//! - **Validation errors**: input, configuration, illegal phase transitions (exit code 1)
//! - **System errors**: IO, automation driver, downstream workflows, worker tasks (exit code 2)
//! - **Not found**: missing jobs, runs, leases (exit code 3)
//! - **State errors**: database, lease ownership, cancellation (exit code 4)

use thiserror::Error;

use crate::engine::state_machine::TransitionError;

/// Core error type for engine operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Database errors
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Row or payload could not be decoded
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input failed validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration is malformed or out of range
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Phase transition absent from the transition table
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// A run tried to close a session it does not own
    #[error("run_id={caller_run_id} is not the session owner (owner run_id={owner_run_id}), close_profile denied")]
    PermissionDenied {
        profile_id: i64,
        owner_run_id: i64,
        caller_run_id: i64,
    },

    /// Remote automation driver failure (connection, page, navigation)
    #[error("{0}")]
    Driver(String),

    /// Downstream workflow failure (submit, poll, publish, watermark)
    #[error("{0}")]
    Workflow(String),

    /// Cooperative cancellation observed at a loop boundary
    #[error("job canceled")]
    Canceled,

    /// Profile lease heartbeat found another owner or no row
    #[error("profile lock lost: profile_id={profile_id} run_id={run_id}")]
    LeaseLost { profile_id: i64, run_id: i64 },

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// A worker task panicked or was aborted
    #[error("Worker task failed: {0}")]
    Worker(String),
}

/// Result type alias for leasehold-core operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a driver error.
    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(msg.into())
    }

    /// Create a workflow error.
    pub fn workflow(msg: impl Into<String>) -> Self {
        Self::Workflow(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::ParseError(_) => "PARSE_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Transition(_) => "INVALID_TRANSITION",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::Driver(_) => "DRIVER_ERROR",
            Self::Workflow(_) => "WORKFLOW_ERROR",
            Self::Canceled => "CANCELED",
            Self::LeaseLost { .. } => "LEASE_LOST",
            Self::Io(_) => "IO_ERROR",
            Self::Worker(_) => "WORKER_ERROR",
        }
    }

    /// Returns the appropriate exit code for this error type.
    ///
    /// - 1: validation (input, config, transitions)
    /// - 2: system (IO, driver, workflows)
    /// - 3: not found
    /// - 4: invalid state (database, ownership, cancellation)
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ValidationError(_)
            | Self::InvalidConfig(_)
            | Self::ParseError(_)
            | Self::Transition(_) => 1,
            Self::Driver(_) | Self::Workflow(_) | Self::Io(_) | Self::Worker(_) => 2,
            Self::NotFound(_) => 3,
            Self::DatabaseError(_)
            | Self::PermissionDenied { .. }
            | Self::Canceled
            | Self::LeaseLost { .. } => 4,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::InvalidConfig(format!("Failed to parse config: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
