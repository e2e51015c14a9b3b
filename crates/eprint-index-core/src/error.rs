//! Error taxonomy shared by the engines.
//!
//! Store backends return [`anyhow::Error`]; engines fold those into
//! [`IndexError::Transient`] so callers only ever branch on three cases.
//! Citation edges skipped by the closed-world rule are not errors and never
//! appear here.

use thiserror::Error;

/// Failure modes surfaced by engine operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The indexed record or the authoritative record does not exist.
    /// Definitive; retrying will not help.
    #[error("not found: {uri}")]
    NotFound { uri: String },

    /// The authoritative repository or a backing store could not be reached.
    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// Malformed input, rejected before any backing-store call.
    #[error("invalid input: {0}")]
    Validation(String),
}

impl IndexError {
    pub fn not_found(uri: impl Into<String>) -> Self {
        IndexError::NotFound { uri: uri.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        IndexError::Validation(message.into())
    }

    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IndexError::Transient(_))
    }

    /// Short machine-readable code, used in CLI and log output.
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::NotFound { .. } => "NotFound",
            IndexError::Transient(_) => "TransientFetchError",
            IndexError::Validation(_) => "ValidationError",
        }
    }
}

impl From<anyhow::Error> for IndexError {
    fn from(err: anyhow::Error) -> Self {
        IndexError::Transient(err)
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
