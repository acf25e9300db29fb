use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::checksum;
use crate::error::{ArtifactError, FetchError};
use crate::retry::{execute_with_retry, RetryConfig};
use crate::source::ArtifactSource;

/// A checksum mismatch is tolerated once; the second one is final.
const INTEGRITY_ATTEMPTS: u32 = 2;

const DIGEST_SUFFIX: &str = ".sha256";

/// One file a model needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Path inside the model's cache directory, e.g. `model.safetensors`.
    pub name: String,
    pub uri: String,
    /// Pinned SHA-256 hex digest. Without one the first verified download is
    /// trusted and its digest recorded.
    #[serde(default)]
    pub sha256: Option<String>,
}

impl ArtifactSpec {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.sha256 = Some(digest.into());
        self
    }

    fn validate(&self) -> Result<(), ArtifactError> {
        let path = Path::new(&self.name);
        let well_formed = !self.name.is_empty()
            && path.components().all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(ArtifactError::InvalidSpec(format!(
                "artifact name `{}` must be a relative path inside the cache",
                self.name
            )));
        }
        if let Some(digest) = &self.sha256 {
            checksum::normalize_digest(digest)?;
        }
        Ok(())
    }
}

/// Local files for one model, keyed by artifact name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPaths {
    dir: PathBuf,
    files: BTreeMap<String, PathBuf>,
}

impl LocalPaths {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.files.get(name).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Cache behavior knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    pub retry: RetryConfig,
    /// Longest wait for another thread's in-flight `ensure` of the same model.
    #[serde(with = "crate::serde_millis")]
    pub lock_timeout: Duration,
    /// Re-hash cached files instead of trusting the recorded digest.
    pub verify_existing: bool,
    /// Log each download with its size at `info`.
    pub show_progress: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            lock_timeout: Duration::from_secs(600),
            verify_existing: false,
            show_progress: true,
        }
    }
}

/// Checksummed on-disk cache of model artifacts.
///
/// Layout: `<root>/<model slug>/<artifact name>` with the artifact's digest
/// recorded next to it in `<artifact name>.sha256`. Files are written to a
/// temporary file in the same directory and renamed into place, so a reader
/// (in this process or another) never sees a partial artifact.
pub struct ArtifactCache {
    root: PathBuf,
    source: Arc<dyn ArtifactSource>,
    options: CacheOptions,
}

type LockKey = (PathBuf, String);

/// Per-model locks shared by every cache instance in the process, keyed by
/// absolute cache root and model id.
fn model_locks() -> &'static DashMap<LockKey, Arc<Mutex<()>>> {
    static LOCKS: OnceLock<DashMap<LockKey, Arc<Mutex<()>>>> = OnceLock::new();
    LOCKS.get_or_init(DashMap::new)
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("root", &self.root)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>, source: Arc<dyn ArtifactSource>) -> Self {
        Self {
            root: root.into(),
            source,
            options: CacheOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Lock serializing `ensure` for one model under this root, shared with
    /// every other cache opened on the same directory.
    fn model_lock(&self, model_id: &str) -> Arc<Mutex<()>> {
        let root = std::path::absolute(&self.root).unwrap_or_else(|_| self.root.clone());
        model_locks()
            .entry((root, model_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Directory holding one model's artifacts.
    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        self.root.join(model_slug(model_id))
    }

    /// Makes every artifact of `model_id` available locally and verified.
    ///
    /// Concurrent calls for the same model are serialized; calls for
    /// different models proceed in parallel.
    pub fn ensure(
        &self,
        model_id: &str,
        artifacts: &[ArtifactSpec],
    ) -> Result<LocalPaths, ArtifactError> {
        for spec in artifacts {
            spec.validate()?;
        }

        let lock = self.model_lock(model_id);
        let _guard = lock
            .try_lock_for(self.options.lock_timeout)
            .ok_or_else(|| ArtifactError::Unavailable {
                artifact: model_id.to_string(),
                reason: format!(
                    "timed out after {:?} waiting for the cache lock",
                    self.options.lock_timeout
                ),
            })?;

        let dir = self.model_dir(model_id);
        fs::create_dir_all(&dir)?;

        let mut files = BTreeMap::new();
        for spec in artifacts {
            let path = self.ensure_one(&dir, spec)?;
            files.insert(spec.name.clone(), path);
        }
        Ok(LocalPaths { dir, files })
    }

    fn ensure_one(&self, dir: &Path, spec: &ArtifactSpec) -> Result<PathBuf, ArtifactError> {
        let target = dir.join(&spec.name);
        if self.reusable(&target, spec)? {
            debug!(artifact = %spec.name, path = %target.display(), "artifact_cache_hit");
            return Ok(target);
        }

        let start = Instant::now();
        if self.options.show_progress {
            info!(artifact = %spec.name, uri = %spec.uri, "artifact_fetch_start");
        }
        let bytes = self.fetch_verified(spec)?;
        let digest = checksum::sha256_hex(&bytes);

        let parent = target.parent().unwrap_or(dir);
        fs::create_dir_all(parent)?;
        write_atomic(&target, &bytes)?;
        write_atomic(&digest_path(&target), digest.as_bytes())?;

        if self.options.show_progress {
            info!(
                artifact = %spec.name,
                bytes = bytes.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "artifact_fetch_complete"
            );
        }
        Ok(target)
    }

    /// A cached file is reused when its digest agrees with the pinned
    /// checksum, or when nothing is pinned and the file is intact.
    fn reusable(&self, target: &Path, spec: &ArtifactSpec) -> Result<bool, ArtifactError> {
        if !target.is_file() {
            return Ok(false);
        }
        let record = digest_path(target);
        let recorded = fs::read_to_string(&record)
            .ok()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty());

        let digest = match recorded {
            Some(recorded) if !self.options.verify_existing => recorded,
            Some(recorded) => {
                let actual = checksum::sha256_file(target)?;
                if actual != recorded {
                    warn!(artifact = %spec.name, recorded = %recorded, actual = %actual, "cached_artifact_corrupt");
                    return Ok(false);
                }
                actual
            }
            None => {
                let actual = checksum::sha256_file(target)?;
                if spec
                    .sha256
                    .as_deref()
                    .is_none_or(|expected| checksum::digest_eq(&actual, expected))
                {
                    write_atomic(&record, actual.as_bytes())?;
                }
                actual
            }
        };

        match spec.sha256.as_deref() {
            Some(expected) if !checksum::digest_eq(&digest, expected) => {
                warn!(artifact = %spec.name, expected = %expected, cached = %digest, "cached_artifact_stale");
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    fn fetch_verified(&self, spec: &ArtifactSpec) -> Result<Vec<u8>, ArtifactError> {
        let Some(expected) = spec.sha256.as_deref() else {
            return self.fetch_with_retry(spec);
        };

        let mut actual = String::new();
        for attempt in 1..=INTEGRITY_ATTEMPTS {
            let bytes = self.fetch_with_retry(spec)?;
            if self.source.verify(&bytes, expected) {
                return Ok(bytes);
            }
            actual = checksum::sha256_hex(&bytes);
            warn!(
                artifact = %spec.name,
                attempt,
                expected = %expected,
                actual = %actual,
                "artifact_checksum_mismatch"
            );
        }
        Err(ArtifactError::IntegrityMismatch {
            artifact: spec.name.clone(),
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        })
    }

    fn fetch_with_retry(&self, spec: &ArtifactSpec) -> Result<Vec<u8>, ArtifactError> {
        let outcome = execute_with_retry(
            &self.options.retry,
            |attempt| {
                if attempt > 0 {
                    debug!(artifact = %spec.name, attempt, "artifact_fetch_retry");
                }
                self.source.fetch(&spec.uri)
            },
            FetchError::is_retryable,
        );
        let attempts = outcome.attempts;
        outcome.into_result().map_err(|err| {
            warn!(artifact = %spec.name, attempts, error = %err, "artifact_fetch_failed");
            ArtifactError::Unavailable {
                artifact: spec.name.clone(),
                reason: format!("{err} (after {attempts} attempt(s))"),
            }
        })
    }
}

/// Filesystem-safe directory name for a model identifier.
pub fn model_slug(model_id: &str) -> String {
    let mut slug = String::with_capacity(model_id.len() + 8);
    for ch in model_id.chars() {
        match ch {
            '/' | '\\' => slug.push_str("--"),
            c if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') => slug.push(c),
            _ => slug.push('_'),
        }
    }
    if slug.is_empty() || slug.chars().all(|c| c == '.') {
        slug.insert_str(0, "model");
    }
    slug
}

fn digest_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(DIGEST_SUFFIX);
    PathBuf::from(name)
}

fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}
