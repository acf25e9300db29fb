//! Numeric half of the embedding pipeline.
//!
//! ```text
//! token sequences ─▶ BatchPlanner ─▶ Batch ─▶ InferenceEngine ─▶ [rows, width, hidden]
//!                                                                    │
//!                                                          Pooler ◀──┘ ─▶ Vec<f32> per document
//! ```
//!
//! The encoder is pure Rust over `ndarray`, loading BERT and NomicBERT
//! checkpoints from safetensors. Weights are immutable after load and the
//! forward pass keeps its scratch per call, so an [`Encoder`] is shared
//! across threads without locking.

mod batch;
mod config;
mod encoder;
mod error;
#[doc(hidden)]
pub mod fixture;
pub mod ops;
mod pooling;
mod weights;

pub use crate::batch::{Batch, BatchPlanner};
pub use crate::config::{Activation, Architecture, EncoderConfig, RotaryConfig};
pub use crate::encoder::{Encoder, InferenceEngine};
pub use crate::error::EngineError;
pub use crate::pooling::{cosine_similarity, l2_normalize_in_place, Pooler, PoolingMode};
pub use crate::weights::WeightStore;
