//! crates/library_core/src/error.rs
//!
//! Defines the error type returned by every core operation.

use crate::ports::PortError;
use crate::size::SizeError;

/// The primary error type for the core.
///
/// Nothing here is recovered locally; the caller decides how to present it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A recorded size string could not be parsed.
    #[error("Malformed size: {0}")]
    MalformedSize(#[from] SizeError),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The target changed since it was read. Reload and reapply to retry.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid patch operation: {0}")]
    InvalidPatchOperation(String),

    #[error("Storage quota exceeded: {used} bytes used, {requested} requested, limit is {limit}")]
    QuotaExceeded { used: u64, requested: u64, limit: u64 },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Represents an unexpected failure inside the repository adapter.
    #[error("Repository error: {0}")]
    Repository(String),
}

/// A convenience type alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;

impl From<PortError> for CoreError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => CoreError::NotFound(what),
            PortError::Conflict(what) => CoreError::Conflict(what),
            PortError::Unexpected(what) => CoreError::Repository(what),
        }
    }
}

impl CoreError {
    /// HTTP-agnostic status code; the transport layer maps it onto the wire.
    pub fn status(&self) -> u16 {
        match self {
            CoreError::Validation(_) | CoreError::InvalidPatchOperation(_) => 400,
            CoreError::QuotaExceeded { .. } => 403,
            CoreError::NotFound(_) => 404,
            CoreError::Conflict(_) => 409,
            CoreError::MalformedSize(_) => 422,
            CoreError::Repository(_) => 500,
        }
    }

    /// Returns `true` if reloading and reapplying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Conflict(_))
    }
}
