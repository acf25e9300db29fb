use std::io;

use thiserror::Error;

/// Errors from planning, weight loading, the forward pass, and pooling.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Caller-supplied knobs are out of range (negative batch size, zero token budget).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// The forward pass cannot run on the given batch, or produced the wrong shape.
    #[error("model execution failed: {0}")]
    ModelExecution(String),
    /// A row reached pooling with no attended positions.
    #[error("document {index} has no attended tokens")]
    EmptySequence { index: usize },
    /// `config.json` or the weight file could not be turned into an encoder.
    #[error("model load failed: {0}")]
    Load(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<safetensors::SafeTensorError> for EngineError {
    fn from(err: safetensors::SafeTensorError) -> Self {
        EngineError::Load(format!("safetensors: {err}"))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Load(format!("config.json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert!(EngineError::InvalidConfiguration("batch_size -1".into())
            .to_string()
            .contains("batch_size -1"));
        assert!(EngineError::ModelExecution("token id 99".into())
            .to_string()
            .starts_with("model execution failed"));
        assert_eq!(
            EngineError::EmptySequence { index: 3 }.to_string(),
            "document 3 has no attended tokens"
        );
    }

    #[test]
    fn from_json_is_load() {
        let err: EngineError = serde_json::from_str::<serde_json::Value>("[")
            .unwrap_err()
            .into();
        assert!(matches!(err, EngineError::Load(_)));
    }

    #[test]
    fn from_io() {
        let err: EngineError = io::Error::new(io::ErrorKind::NotFound, "model.safetensors").into();
        assert!(err.to_string().contains("model.safetensors"));
    }
}
