//! Text to token-id layer for embedding models.
//!
//! Turns raw document text into the id sequences a BERT-family encoder
//! consumes. Two subword models are supported:
//!
//! - WordPiece (BERT, BGE, MiniLM, Nomic): BERT normalization, punctuation
//!   splitting, greedy longest match with `##` continuations
//! - Unigram (XLM-R / multilingual MiniLM): NFKC, `▁` word prefixes, Viterbi
//!   segmentation over piece log-probabilities
//!
//! ## Guarantees
//!
//! - Pure and deterministic: same text, vocabulary and config give the same ids
//! - Never fails on content: unknown subwords become the unknown-token id
//! - Head truncation at token granularity, framing tokens always present
//! - The vocabulary is immutable and shared through an `Arc`
//!
//! The only encode-time error is a missing text slot
//! ([`TokenizerError::InvalidInput`]).

mod config;
mod error;
#[doc(hidden)]
pub mod fixture;
mod loader;
mod normalize;
mod pretokenize;
mod sequence;
#[allow(clippy::module_inception)]
mod tokenizer;
mod unigram;
mod vocab;
mod wordpiece;

pub use crate::config::{
    SpecialTokens, TokenizerConfig, TokenizerKind, DEFAULT_MAX_INPUT_CHARS_PER_WORD,
};
pub use crate::error::TokenizerError;
pub use crate::normalize::{collapse_whitespace, Normalizer};
pub use crate::pretokenize::{PreTokenizer, METASPACE};
pub use crate::sequence::TokenSequence;
pub use crate::tokenizer::{SpecialIds, Tokenizer};
pub use crate::unigram::Unigram;
pub use crate::vocab::Vocabulary;
pub use crate::wordpiece::WordPiece;
