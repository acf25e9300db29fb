//! Local text embeddings.
//!
//! `textembed` turns a list of documents into fixed-length `f32` vectors
//! with a BERT-family encoder that runs in-process. Model files are fetched
//! once into a checksummed cache and loaded into memory. After that,
//! embedding is a pure function of the model and the input.
//!
//! ```text
//! EmbeddingModel ─▶ ModelSpec ─▶ ArtifactCache ─▶ Tokenizer + Encoder
//!                                                        │
//!   documents ─▶ tokenize ─▶ BatchPlanner ─▶ forward ─▶ Pooler ─▶ vectors
//! ```
//!
//! ```no_run
//! use textembed::{EmbedOptions, EmbeddingService, cosine_similarity};
//!
//! let service = EmbeddingService::new("BGESmallENV15", EmbedOptions::default())?;
//! let vectors = service.embed(&["passage: Hello, World!", "query: Hello, World!"], 2)?;
//! assert_eq!(vectors[0].len(), service.dimension());
//! println!("{}", cosine_similarity(&vectors[0], &vectors[1]));
//! # Ok::<(), textembed::EmbedError>(())
//! ```
//!
//! The parts are usable on their own: [`tokenizer`], [`artifacts`] and
//! [`engine`] are re-exported whole.

mod cancel;
mod config;
mod error;
mod metrics;
mod model;
mod registry;
mod service;
#[doc(hidden)]
pub mod testing;

pub use artifacts;
pub use engine;
pub use tokenizer;

pub use crate::cancel::{CancelOnDrop, CancelToken};
pub use crate::config::{
    ArtifactYamlConfig, ConfigLoadError, EmbedConfig, EmbedOptions, DEFAULT_BATCH_SIZE,
    DEFAULT_CACHE_DIR, DEFAULT_MAX_LENGTH, ENV_CACHE_DIR, ENV_MODEL,
};
pub use crate::error::EmbedError;
pub use crate::metrics::{set_embed_metrics, EmbedMetrics};
pub use crate::registry::{
    EmbeddingModel, ModelSpec, Precision, TokenizerSpec, CONFIG_FILE, REGISTRY_VERSION,
    TOKENIZER_FILE, VOCAB_FILE, WEIGHTS_FILE,
};
pub use crate::service::{EmbeddingService, ServiceState};
pub use artifacts::{ArtifactSource, ArtifactSpec, DirectorySource, HttpSource, RetryConfig};
pub use engine::{cosine_similarity, PoolingMode};
pub use tokenizer::TokenizerKind;
