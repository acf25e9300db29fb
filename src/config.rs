//! YAML configuration and the runtime options it produces.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//! name: "search-backend"
//!
//! model: "BGESmallENV15"
//! cache_dir: ".fastembed_cache"
//! max_length: 512
//! batch_size: 256
//! threads: 4
//! max_batch_tokens: 65536
//! show_download_progress: true
//!
//! artifacts:
//!   mirror_dir: "/srv/models"
//!   fetch_timeout_secs: 300
//!   lock_timeout_secs: 600
//!   verify_existing: false
//!   retry:
//!     max_retries: 3
//!     base_delay: 250ms
//!     max_delay: 10s
//! ```
//!
//! `TEXTEMBED_MODEL` and `TEXTEMBED_CACHE_DIR` override the corresponding
//! fields when [`EmbedConfig::apply_env_overrides`] is called.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use artifacts::{ArtifactSource, CacheOptions, RetryConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::EmbedError;
use crate::registry::EmbeddingModel;

pub const DEFAULT_CACHE_DIR: &str = ".fastembed_cache";
pub const DEFAULT_MAX_LENGTH: usize = 512;
pub const DEFAULT_BATCH_SIZE: usize = 256;
pub const DEFAULT_SHOW_DOWNLOAD_PROGRESS: bool = true;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

pub const ENV_MODEL: &str = "TEXTEMBED_MODEL";
pub const ENV_CACHE_DIR: &str = "TEXTEMBED_CACHE_DIR";

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level YAML configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EmbedConfig {
    /// Configuration format version
    pub version: String,

    /// Optional configuration name/description
    #[serde(default)]
    pub name: Option<String>,

    /// Variant name or repository identifier of a known model.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Used when a caller does not pass a batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Worker threads for sub-batches; unset shares the global pool.
    #[serde(default)]
    pub threads: Option<usize>,

    /// Upper bound on `rows * padded_width` per sub-batch.
    #[serde(default)]
    pub max_batch_tokens: Option<usize>,

    #[serde(default = "true_value")]
    pub show_download_progress: bool,

    #[serde(default)]
    pub artifacts: ArtifactYamlConfig,
}

impl EmbedConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: EmbedConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.model
            .parse::<EmbeddingModel>()
            .map_err(|e| ConfigLoadError::Validation(e.to_string()))?;
        if self.max_length < 2 {
            return Err(ConfigLoadError::Validation(
                "max_length must be >= 2 to fit the special tokens".to_string(),
            ));
        }
        if self.threads == Some(0) {
            return Err(ConfigLoadError::Validation(
                "threads must be >= 1 when set".to_string(),
            ));
        }
        if self.max_batch_tokens == Some(0) {
            return Err(ConfigLoadError::Validation(
                "max_batch_tokens must be >= 1 when set".to_string(),
            ));
        }
        self.artifacts.validate()
    }

    /// Applies `TEXTEMBED_MODEL` / `TEXTEMBED_CACHE_DIR` from the process
    /// environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigLoadError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key lookup, then re-validates.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup(ENV_MODEL).filter(|v| !v.trim().is_empty()) {
            self.model = model;
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        self.validate()
    }

    pub fn embedding_model(&self) -> Result<EmbeddingModel, EmbedError> {
        self.model.parse()
    }

    /// Runtime options described by this file.
    pub fn to_options(&self) -> EmbedOptions {
        let artifacts = &self.artifacts;
        let mut options = EmbedOptions::default()
            .with_cache_dir(&self.cache_dir)
            .with_max_length(self.max_length)
            .with_batch_size(self.batch_size)
            .with_threads(self.threads)
            .with_max_batch_tokens(self.max_batch_tokens)
            .with_show_download_progress(self.show_download_progress)
            .with_fetch_timeout(Duration::from_secs(artifacts.fetch_timeout_secs))
            .with_retry(artifacts.retry);
        options.cache.lock_timeout = Duration::from_secs(artifacts.lock_timeout_secs);
        options.cache.verify_existing = artifacts.verify_existing;
        options.mirror_dir = artifacts.mirror_dir.clone();
        options
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            model: default_model(),
            cache_dir: default_cache_dir(),
            max_length: DEFAULT_MAX_LENGTH,
            batch_size: DEFAULT_BATCH_SIZE,
            threads: None,
            max_batch_tokens: None,
            show_download_progress: DEFAULT_SHOW_DOWNLOAD_PROGRESS,
            artifacts: ArtifactYamlConfig::default(),
        }
    }
}

/// Artifact fetching YAML configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactYamlConfig {
    /// Read artifacts from this local mirror instead of the network.
    #[serde(default)]
    pub mirror_dir: Option<PathBuf>,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    #[serde(default)]
    pub verify_existing: bool,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl ArtifactYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigLoadError::Validation(
                "artifacts.fetch_timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.lock_timeout_secs == 0 {
            return Err(ConfigLoadError::Validation(
                "artifacts.lock_timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigLoadError::Validation(
                "artifacts.retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ArtifactYamlConfig {
    fn default() -> Self {
        Self {
            mirror_dir: None,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            lock_timeout_secs: default_lock_timeout_secs(),
            verify_existing: false,
            retry: RetryConfig::default(),
        }
    }
}

fn default_model() -> String {
    EmbeddingModel::default().name().to_string()
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}
fn default_max_length() -> usize {
    DEFAULT_MAX_LENGTH
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn true_value() -> bool {
    true
}
fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT.as_secs()
}
fn default_lock_timeout_secs() -> u64 {
    CacheOptions::default().lock_timeout.as_secs()
}

/// Runtime knobs for building an [`EmbeddingService`](crate::EmbeddingService).
#[derive(Clone)]
pub struct EmbedOptions {
    pub cache_dir: PathBuf,
    /// Token limit per document, specials included. The model's own limit
    /// still applies when it is lower.
    pub max_length: usize,
    pub batch_size: usize,
    pub threads: Option<usize>,
    pub max_batch_tokens: Option<usize>,
    pub show_download_progress: bool,
    pub fetch_timeout: Duration,
    /// Bearer token for gated repositories.
    pub auth_token: Option<String>,
    /// Serve artifacts from a local directory instead of HTTP.
    pub mirror_dir: Option<PathBuf>,
    pub cache: CacheOptions,
    /// Overrides both HTTP and `mirror_dir`.
    pub source: Option<Arc<dyn ArtifactSource>>,
}

impl fmt::Debug for EmbedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbedOptions")
            .field("cache_dir", &self.cache_dir)
            .field("max_length", &self.max_length)
            .field("batch_size", &self.batch_size)
            .field("threads", &self.threads)
            .field("max_batch_tokens", &self.max_batch_tokens)
            .field("show_download_progress", &self.show_download_progress)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("mirror_dir", &self.mirror_dir)
            .field("cache", &self.cache)
            .field("custom_source", &self.source.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_length: DEFAULT_MAX_LENGTH,
            batch_size: DEFAULT_BATCH_SIZE,
            threads: None,
            max_batch_tokens: None,
            show_download_progress: DEFAULT_SHOW_DOWNLOAD_PROGRESS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            auth_token: None,
            mirror_dir: None,
            cache: CacheOptions::default(),
            source: None,
        }
    }
}

impl EmbedOptions {
    pub fn with_cache_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cache_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_max_batch_tokens(mut self, budget: Option<usize>) -> Self {
        self.max_batch_tokens = budget;
        self
    }

    pub fn with_show_download_progress(mut self, show: bool) -> Self {
        self.show_download_progress = show;
        self.cache.show_progress = show;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.cache.retry = retry;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_mirror_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.mirror_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_source(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn validate(&self) -> Result<(), EmbedError> {
        if self.max_length < 2 {
            return Err(EmbedError::InvalidConfiguration(format!(
                "max_length {} leaves no room for special tokens",
                self.max_length
            )));
        }
        if self.threads == Some(0) {
            return Err(EmbedError::InvalidConfiguration(
                "threads must be at least 1".into(),
            ));
        }
        if self.max_batch_tokens == Some(0) {
            return Err(EmbedError::InvalidConfiguration(
                "max_batch_tokens must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
