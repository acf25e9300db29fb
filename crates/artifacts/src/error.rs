use std::io;

use thiserror::Error;

/// Errors surfaced by [`ArtifactCache::ensure`](crate::ArtifactCache::ensure).
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The source could not deliver the artifact (retries exhausted, permanent
    /// failure, or the per-model cache lock timed out).
    #[error("artifact `{artifact}` unavailable: {reason}")]
    Unavailable { artifact: String, reason: String },
    /// Fetched bytes did not match the pinned checksum on two consecutive fetches.
    #[error("artifact `{artifact}` failed integrity check: expected sha256 {expected}, got {actual}")]
    IntegrityMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },
    /// The artifact description itself is unusable (bad name, bad checksum).
    #[error("invalid artifact spec: {0}")]
    InvalidSpec(String),
    /// Filesystem failure inside the cache directory.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ArtifactError {
    /// Whether asking again later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArtifactError::Unavailable { .. } | ArtifactError::Io(_))
    }
}

/// Failure reported by an [`ArtifactSource`](crate::ArtifactSource).
///
/// The source classifies its own failures; the cache only retries the
/// transient ones.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchError {
    message: String,
    retryable: bool,
}

impl FetchError {
    /// A failure worth retrying (timeouts, 5xx, throttling).
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will not go away by asking again (404, bad URI).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
