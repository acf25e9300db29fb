//! Model artifact acquisition.
//!
//! Resolves the files a model needs (config, tokenizer, weights) to verified
//! local paths, fetching from an [`ArtifactSource`] only when the cache cannot
//! vouch for what it already holds.
//!
//! ## What we do
//!
//! - Per-model cache directories with a recorded SHA-256 per file
//! - Atomic rename-on-complete writes, safe across processes
//! - Per-model locking with a bounded wait, safe across threads
//! - Exponential backoff for transient fetch failures
//! - One re-fetch on checksum mismatch, then a hard integrity error
//!
//! This is the only crate in the workspace that performs I/O against the
//! outside world, and every wait in it is bounded.

mod cache;
pub mod checksum;
mod error;
pub mod retry;
mod serde_millis;
mod source;

pub use crate::cache::{model_slug, ArtifactCache, ArtifactSpec, CacheOptions, LocalPaths};
pub use crate::error::{ArtifactError, FetchError};
pub use crate::retry::{execute_with_retry, RetryConfig, RetryResult};
pub use crate::source::{
    hugging_face_uri, infer_filename_from_uri, relative_path_from_uri, ArtifactSource,
    DirectorySource, HttpSource, HUGGING_FACE_BASE,
};
