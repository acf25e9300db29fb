use std::io;

use thiserror::Error;

/// Errors raised while loading a tokenizer or encoding caller input.
#[derive(Debug, Error)]
pub enum TokenizerError {
    /// A document slot held no text at all (as opposed to an empty string).
    #[error("invalid input at index {index}: text is missing")]
    InvalidInput { index: usize },
    /// The tokenizer description could not be interpreted.
    #[error("tokenizer load failed: {0}")]
    Load(String),
    /// A special token required by the post-processor is absent from the vocabulary.
    #[error("special token not in vocabulary: {0}")]
    MissingSpecialToken(String),
    /// Configuration is internally inconsistent.
    #[error("invalid tokenizer config: {0}")]
    InvalidConfig(String),
    #[error("tokenizer json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_names_index() {
        let err = TokenizerError::InvalidInput { index: 7 };
        assert!(err.to_string().contains("index 7"));
    }

    #[test]
    fn load_error_display() {
        let err = TokenizerError::Load("unsupported model type BPE".into());
        assert!(err.to_string().contains("tokenizer load failed"));
        assert!(err.to_string().contains("BPE"));
    }

    #[test]
    fn from_io() {
        let err: TokenizerError = io::Error::new(io::ErrorKind::NotFound, "vocab.txt").into();
        assert!(matches!(err, TokenizerError::Io(_)));
        assert!(err.to_string().contains("io error"));
    }

    #[test]
    fn from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: TokenizerError = json_err.into();
        assert!(err.to_string().contains("tokenizer json error"));
    }
}
