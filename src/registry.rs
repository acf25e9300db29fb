//! Closed set of known embedding models and the metadata each resolves to.

use std::fmt;
use std::str::FromStr;

use artifacts::{hugging_face_uri, ArtifactSpec};
use engine::PoolingMode;
use serde::{Deserialize, Serialize};
use tokenizer::{TokenizerConfig, TokenizerKind};

use crate::error::EmbedError;

/// Bumped whenever a variant is added or a spec changes meaning.
pub const REGISTRY_VERSION: u32 = 1;

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const VOCAB_FILE: &str = "vocab.txt";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Numeric precision the forward pass runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    F32,
}

/// How a model's text is split into ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerSpec {
    pub kind: TokenizerKind,
    pub lowercase: bool,
}

impl TokenizerSpec {
    pub fn word_piece(lowercase: bool) -> Self {
        Self {
            kind: TokenizerKind::WordPiece,
            lowercase,
        }
    }

    pub fn unigram(lowercase: bool) -> Self {
        Self {
            kind: TokenizerKind::Unigram,
            lowercase,
        }
    }

    /// Settings used when the shipped `tokenizer.json` does not state them.
    pub fn fallback_config(&self) -> TokenizerConfig {
        match self.kind {
            TokenizerKind::WordPiece => TokenizerConfig::word_piece(self.lowercase),
            TokenizerKind::Unigram => TokenizerConfig::unigram(self.lowercase),
        }
    }
}

/// Everything needed to fetch, load and run one model. Immutable once a
/// service is built from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Repository-style identifier, e.g. `BAAI/bge-small-en-v1.5`.
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub dimension: usize,
    /// Longest token sequence fed to the encoder, specials included.
    pub max_length: usize,
    pub pooling: PoolingMode,
    #[serde(default = "default_true")]
    pub normalize: bool,
    pub tokenizer: TokenizerSpec,
    #[serde(default)]
    pub precision: Precision,
    pub artifacts: Vec<ArtifactSpec>,
}

fn default_true() -> bool {
    true
}

impl ModelSpec {
    /// Spec whose artifacts are the standard three files of a Hugging Face
    /// repository.
    pub fn hugging_face(
        id: impl Into<String>,
        dimension: usize,
        max_length: usize,
        pooling: PoolingMode,
        tokenizer: TokenizerSpec,
    ) -> Self {
        let id = id.into();
        let artifacts = [CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE]
            .into_iter()
            .map(|file| ArtifactSpec::new(file, hugging_face_uri(&id, file)))
            .collect();
        Self {
            id,
            description: String::new(),
            dimension,
            max_length,
            pooling,
            normalize: true,
            tokenizer,
            precision: Precision::F32,
            artifacts,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<ArtifactSpec>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Rejects specs no service could run.
    pub fn validate(&self) -> Result<(), EmbedError> {
        let invalid = |msg: String| Err(EmbedError::InvalidConfiguration(msg));
        if self.id.trim().is_empty() {
            return invalid("model id must not be empty".into());
        }
        if self.dimension == 0 {
            return invalid(format!("model `{}` declares dimension 0", self.id));
        }
        if self.max_length < 2 {
            return invalid(format!(
                "model `{}` max_length {} leaves no room for special tokens",
                self.id, self.max_length
            ));
        }
        for required in [CONFIG_FILE, WEIGHTS_FILE] {
            if !self.artifacts.iter().any(|a| a.name == required) {
                return invalid(format!("model `{}` has no `{required}` artifact", self.id));
            }
        }
        if !self
            .artifacts
            .iter()
            .any(|a| a.name == TOKENIZER_FILE || a.name == VOCAB_FILE)
        {
            return invalid(format!(
                "model `{}` needs a `{TOKENIZER_FILE}` or `{VOCAB_FILE}` artifact",
                self.id
            ));
        }
        Ok(())
    }
}

/// Known models. The set is closed; anything else is a user-defined
/// [`ModelSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EmbeddingModel {
    /// sentence-transformers/all-MiniLM-L6-v2
    AllMiniLML6V2,
    /// v1.5 base English model
    BGEBaseENV15,
    /// v1.5 large English model
    BGELargeENV15,
    /// v1.5 small English model
    #[default]
    BGESmallENV15,
    /// 8192-token English model
    NomicEmbedTextV1,
    /// Multilingual paraphrase model
    ParaphraseMLMiniLML12V2,
}

impl EmbeddingModel {
    pub const ALL: [EmbeddingModel; 6] = [
        EmbeddingModel::AllMiniLML6V2,
        EmbeddingModel::BGEBaseENV15,
        EmbeddingModel::BGELargeENV15,
        EmbeddingModel::BGESmallENV15,
        EmbeddingModel::NomicEmbedTextV1,
        EmbeddingModel::ParaphraseMLMiniLML12V2,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EmbeddingModel::AllMiniLML6V2 => "AllMiniLML6V2",
            EmbeddingModel::BGEBaseENV15 => "BGEBaseENV15",
            EmbeddingModel::BGELargeENV15 => "BGELargeENV15",
            EmbeddingModel::BGESmallENV15 => "BGESmallENV15",
            EmbeddingModel::NomicEmbedTextV1 => "NomicEmbedTextV1",
            EmbeddingModel::ParaphraseMLMiniLML12V2 => "ParaphraseMLMiniLML12V2",
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            EmbeddingModel::AllMiniLML6V2 => "sentence-transformers/all-MiniLM-L6-v2",
            EmbeddingModel::BGEBaseENV15 => "BAAI/bge-base-en-v1.5",
            EmbeddingModel::BGELargeENV15 => "BAAI/bge-large-en-v1.5",
            EmbeddingModel::BGESmallENV15 => "BAAI/bge-small-en-v1.5",
            EmbeddingModel::NomicEmbedTextV1 => "nomic-ai/nomic-embed-text-v1",
            EmbeddingModel::ParaphraseMLMiniLML12V2 => {
                "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2"
            }
        }
    }

    pub fn spec(self) -> ModelSpec {
        use EmbeddingModel::*;
        let (dimension, max_length, pooling, tokenizer, description) = match self {
            AllMiniLML6V2 => (
                384,
                512,
                PoolingMode::Mean,
                TokenizerSpec::word_piece(true),
                "Sentence Transformer model, MiniLM-L6-v2",
            ),
            BGEBaseENV15 => (
                768,
                512,
                PoolingMode::Cls,
                TokenizerSpec::word_piece(true),
                "v1.5 release of the base English model",
            ),
            BGELargeENV15 => (
                1024,
                512,
                PoolingMode::Cls,
                TokenizerSpec::word_piece(true),
                "v1.5 release of the large English model",
            ),
            BGESmallENV15 => (
                384,
                512,
                PoolingMode::Cls,
                TokenizerSpec::word_piece(true),
                "Fast and default English model",
            ),
            NomicEmbedTextV1 => (
                768,
                8192,
                PoolingMode::Mean,
                TokenizerSpec::word_piece(true),
                "8192 context length English model",
            ),
            ParaphraseMLMiniLML12V2 => (
                384,
                512,
                PoolingMode::Mean,
                TokenizerSpec::unigram(false),
                "Multilingual model",
            ),
        };
        ModelSpec::hugging_face(self.id(), dimension, max_length, pooling, tokenizer)
            .with_description(description)
    }

    /// Specs of every known model, in declaration order.
    pub fn list() -> Vec<ModelSpec> {
        Self::ALL.iter().map(|m| m.spec()).collect()
    }
}

impl fmt::Display for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EmbeddingModel {
    type Err = EmbedError;

    /// Accepts the variant name (any case) or the repository identifier.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(wanted) || m.id() == wanted)
            .ok_or_else(|| EmbedError::UnknownModel(wanted.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_model_resolves_to_a_valid_spec() {
        for spec in EmbeddingModel::list() {
            spec.validate().unwrap();
            assert_eq!(spec.artifacts.len(), 3);
            assert!(spec.normalize);
            assert_eq!(spec.precision, Precision::F32);
        }
        assert_eq!(EmbeddingModel::list().len(), EmbeddingModel::ALL.len());
    }

    #[test]
    fn dimensions_and_pooling() {
        let small = EmbeddingModel::BGESmallENV15.spec();
        assert_eq!(small.dimension, 384);
        assert_eq!(small.pooling, PoolingMode::Cls);
        assert_eq!(EmbeddingModel::BGELargeENV15.spec().dimension, 1024);
        let nomic = EmbeddingModel::NomicEmbedTextV1.spec();
        assert_eq!(nomic.max_length, 8192);
        assert_eq!(nomic.pooling, PoolingMode::Mean);
        let multi = EmbeddingModel::ParaphraseMLMiniLML12V2.spec();
        assert_eq!(multi.tokenizer.kind, TokenizerKind::Unigram);
        assert!(!multi.tokenizer.lowercase);
    }

    #[test]
    fn artifact_uris_point_at_the_repository() {
        let spec = EmbeddingModel::AllMiniLML6V2.spec();
        let weights = spec.artifacts.iter().find(|a| a.name == WEIGHTS_FILE).unwrap();
        assert_eq!(
            weights.uri,
            "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/model.safetensors"
        );
    }

    #[test]
    fn parses_names_and_identifiers() {
        assert_eq!(
            "bgesmallenv15".parse::<EmbeddingModel>().unwrap(),
            EmbeddingModel::BGESmallENV15
        );
        assert_eq!(
            "nomic-ai/nomic-embed-text-v1".parse::<EmbeddingModel>().unwrap(),
            EmbeddingModel::NomicEmbedTextV1
        );
        for model in EmbeddingModel::ALL {
            assert_eq!(model.to_string().parse::<EmbeddingModel>().unwrap(), model);
        }
    }

    #[test]
    fn unknown_names_fail() {
        let err = "gpt-embedder".parse::<EmbeddingModel>().unwrap_err();
        assert!(matches!(err, EmbedError::UnknownModel(ref name) if name == "gpt-embedder"));
    }

    #[test]
    fn default_model_is_bge_small() {
        assert_eq!(EmbeddingModel::default(), EmbeddingModel::BGESmallENV15);
    }

    #[test]
    fn validate_rejects_unusable_specs() {
        let base = EmbeddingModel::BGESmallENV15.spec();

        let mut spec = base.clone();
        spec.max_length = 1;
        assert!(matches!(spec.validate(), Err(EmbedError::InvalidConfiguration(_))));

        let mut spec = base.clone();
        spec.dimension = 0;
        assert!(spec.validate().is_err());

        let spec = base.clone().with_artifacts(vec![]);
        assert!(spec.validate().is_err());

        let spec = base.with_artifacts(vec![
            ArtifactSpec::new(CONFIG_FILE, "file:///m/config.json"),
            ArtifactSpec::new(WEIGHTS_FILE, "file:///m/model.safetensors"),
            ArtifactSpec::new(VOCAB_FILE, "file:///m/vocab.txt"),
        ]);
        spec.validate().unwrap();
    }

    #[test]
    fn fallback_tokenizer_configs() {
        let cfg = TokenizerSpec::unigram(false).fallback_config();
        assert_eq!(cfg.kind, TokenizerKind::Unigram);
        assert!(!cfg.lowercase);
        assert!(TokenizerSpec::word_piece(true).fallback_config().lowercase);
    }
}
