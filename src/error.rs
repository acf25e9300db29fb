use std::ops::Range;

use artifacts::ArtifactError;
use engine::EngineError;
use thiserror::Error;
use tokenizer::TokenizerError;

/// Every failure an [`EmbeddingService`](crate::EmbeddingService) can report.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The identifier names no known model. Raised at construction.
    #[error("unknown model `{0}`")]
    UnknownModel(String),
    #[error("artifact `{artifact}` unavailable: {reason}")]
    ArtifactUnavailable { artifact: String, reason: String },
    #[error("artifact `{artifact}` failed integrity check: expected sha256 {expected}, got {actual}")]
    IntegrityMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },
    /// A document was null. `index` is its position in the caller's list.
    #[error("document {index} is not valid text")]
    InvalidInput { index: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Shape mismatch inside the forward pass; a bug, not a runtime condition.
    #[error("model execution failed: {0}")]
    ModelExecution(String),
    #[error("document {index} has no attended tokens")]
    EmptySequence { index: usize },
    /// The service is still loading, or loading failed.
    #[error("model not ready: {0}")]
    ModelNotReady(String),
    #[error("service has been disposed")]
    ServiceDisposed,
    #[error("embedding call was cancelled")]
    Cancelled,
    /// A sub-batch failed; `documents` are the caller indices it covered.
    #[error("sub-batch covering documents {}..{} failed: {source}", documents.start, documents.end)]
    SubBatch {
        documents: Range<usize>,
        #[source]
        source: Box<EmbedError>,
    },
    /// Model files were fetched but could not be turned into a tokenizer or encoder.
    #[error("model load failed: {0}")]
    Load(String),
}

impl EmbedError {
    /// Whether retrying the same call later could succeed. Only
    /// environment failures (network, cache) qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbedError::ArtifactUnavailable { .. } | EmbedError::IntegrityMismatch { .. } => true,
            EmbedError::SubBatch { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// The innermost error, unwrapping any sub-batch context.
    pub fn root_cause(&self) -> &EmbedError {
        match self {
            EmbedError::SubBatch { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub(crate) fn in_sub_batch(self, documents: Range<usize>) -> Self {
        match self {
            EmbedError::Cancelled => EmbedError::Cancelled,
            source => EmbedError::SubBatch {
                documents,
                source: Box::new(source),
            },
        }
    }
}

impl From<ArtifactError> for EmbedError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::Unavailable { artifact, reason } => {
                EmbedError::ArtifactUnavailable { artifact, reason }
            }
            ArtifactError::IntegrityMismatch {
                artifact,
                expected,
                actual,
            } => EmbedError::IntegrityMismatch {
                artifact,
                expected,
                actual,
            },
            ArtifactError::InvalidSpec(msg) => EmbedError::InvalidConfiguration(msg),
            ArtifactError::Io(err) => EmbedError::ArtifactUnavailable {
                artifact: "cache".into(),
                reason: err.to_string(),
            },
        }
    }
}

impl From<TokenizerError> for EmbedError {
    fn from(err: TokenizerError) -> Self {
        match err {
            TokenizerError::InvalidInput { index } => EmbedError::InvalidInput { index },
            other => EmbedError::Load(format!("tokenizer: {other}")),
        }
    }
}

impl From<EngineError> for EmbedError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidConfiguration(msg) => EmbedError::InvalidConfiguration(msg),
            EngineError::ModelExecution(msg) => EmbedError::ModelExecution(msg),
            EngineError::EmptySequence { index } => EmbedError::EmptySequence { index },
            EngineError::Load(msg) => EmbedError::Load(msg),
            EngineError::Io(err) => EmbedError::Load(err.to_string()),
        }
    }
}
