//! Error taxonomy for knowledge lookups and scoring.

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the knowledge cache and scoring engine.
///
/// `Clone` so that every waiter on a coalesced chunk load can receive the
/// same outcome.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum KnowledgeError {
    /// Entity absent from every chunk and from the fallback snapshot.
    #[error("horse not found: {key}")]
    NotFound { key: String },

    /// Network or timeout failure; retryable.
    #[error("transient failure while {context}: {reason}")]
    Transient { context: String, reason: String },

    /// A chunk or a scanned fragment failed to parse.
    #[error("corrupt data in {scope}: {reason}")]
    Corrupt { scope: String, reason: String },

    /// Malformed key or oversized batch.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Artifact missing from local storage and from the remote release.
    #[error("{location} unavailable: {reason}")]
    Unavailable { location: String, reason: String },
}

impl KnowledgeError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn transient(context: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transient {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub fn corrupt(scope: impl Into<String>, reason: impl ToString) -> Self {
        Self::Corrupt {
            scope: scope.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unavailable(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    /// Only transient failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Machine-readable reason reported for failed keys.
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::NotFound { .. } => FailureReason::NotFound,
            Self::Transient { .. } => FailureReason::Transient,
            Self::Corrupt { .. } => FailureReason::Corrupt,
            Self::InvalidInput(_) => FailureReason::InvalidInput,
            Self::Unavailable { .. } => FailureReason::Unavailable,
        }
    }
}

/// Why a requested key could not be scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NotFound,
    InvalidInput,
    Corrupt,
    Transient,
    Unavailable,
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

/// Run a future under a caller-supplied deadline.
///
/// On expiry the inner future is dropped along with any partially read
/// buffers, and the elapsed deadline surfaces as a transient error.
pub async fn with_deadline<T, F>(context: &str, timeout: Duration, fut: F) -> KnowledgeResult<T>
where
    F: Future<Output = KnowledgeResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(KnowledgeError::transient(
            context,
            format!("timed out after {:?}", timeout),
        )),
    }
}
