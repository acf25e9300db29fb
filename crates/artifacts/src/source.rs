//! Where artifact bytes come from.
//!
//! The cache never talks to a network or a mirror directly; it asks an
//! [`ArtifactSource`] for bytes and for a verdict on their checksum.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::debug;

use crate::checksum;
use crate::error::FetchError;

/// Default base for registry artifacts.
pub const HUGGING_FACE_BASE: &str = "https://huggingface.co";

/// `https://huggingface.co/{repo}/resolve/main/{file}`
pub fn hugging_face_uri(repo: &str, file: &str) -> String {
    format!("{HUGGING_FACE_BASE}/{repo}/resolve/main/{file}")
}

/// External store the cache fetches from.
pub trait ArtifactSource: Send + Sync {
    /// Returns the full artifact body. Implementations bound their own wait
    /// time and classify failures as transient or permanent.
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError>;

    /// Checks `bytes` against a pinned checksum; SHA-256 hex by default.
    fn verify(&self, bytes: &[u8], checksum: &str) -> bool {
        checksum::verify_sha256(bytes, checksum)
    }
}

/// HTTP(S) source with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    auth_token: Option<String>,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("textembed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::permanent(format!("http client init failed: {e}")))?;
        Ok(Self {
            client,
            auth_token: None,
        })
    }

    /// Sends `Authorization: Bearer <token>` with every request (gated repos).
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

impl ArtifactSource for HttpSource {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(uri);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().map_err(|e| {
            let message = format!("request to {uri} failed: {e}");
            if e.is_builder() {
                FetchError::permanent(message)
            } else {
                FetchError::transient(message)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("unexpected status {status} while fetching {uri}");
            return Err(if is_retryable_status(status) {
                FetchError::transient(message)
            } else {
                FetchError::permanent(message)
            });
        }

        let bytes = response
            .bytes()
            .map_err(|e| FetchError::transient(format!("reading body of {uri} failed: {e}")))?;
        debug!(uri, bytes = bytes.len(), "http_fetch_complete");
        Ok(bytes.to_vec())
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Local mirror laid out like the remote repository.
///
/// `…/resolve/<revision>/<path>` URIs map to `<root>/<path>`; any other URI
/// maps to its last path segment. `file://` URIs are read as-is.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, uri: &str) -> Result<PathBuf, FetchError> {
        if let Some(path) = uri.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        let relative = relative_path_from_uri(uri)
            .ok_or_else(|| FetchError::permanent(format!("cannot map `{uri}` to a file")))?;
        let relative = Path::new(&relative);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(FetchError::permanent(format!(
                "`{uri}` escapes the mirror directory"
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl ArtifactSource for DirectorySource {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.resolve(uri)?;
        fs::read(&path).map_err(|e| {
            let message = format!("reading {} failed: {e}", path.display());
            match e.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                    FetchError::permanent(message)
                }
                _ => FetchError::transient(message),
            }
        })
    }
}

/// Repository-relative path of a URI, without query or fragment.
pub fn relative_path_from_uri(uri: &str) -> Option<String> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    if let Some((_, after)) = path.split_once("/resolve/") {
        // Skip the revision segment.
        let (_, file) = after.split_once('/')?;
        return (!file.is_empty()).then(|| file.to_string());
    }
    infer_filename_from_uri(path)
}

/// Last non-empty path segment, stripped of query and fragment.
pub fn infer_filename_from_uri(uri: &str) -> Option<String> {
    uri.split(['?', '#'])
        .next()
        .unwrap_or(uri)
        .split('/')
        .rev()
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hugging_face_layout() {
        assert_eq!(
            hugging_face_uri("BAAI/bge-small-en-v1.5", "config.json"),
            "https://huggingface.co/BAAI/bge-small-en-v1.5/resolve/main/config.json"
        );
    }

    #[test]
    fn relative_path_keeps_subdirectories() {
        assert_eq!(
            relative_path_from_uri("https://hf.co/org/m/resolve/main/1_Pooling/config.json?dl=1")
                .as_deref(),
            Some("1_Pooling/config.json")
        );
        assert_eq!(
            relative_path_from_uri("https://mirror.local/files/tokenizer.json").as_deref(),
            Some("tokenizer.json")
        );
    }

    #[test]
    fn filename_inference() {
        assert_eq!(
            infer_filename_from_uri("https://x/y/model.safetensors#frag").as_deref(),
            Some("model.safetensors")
        );
        assert_eq!(infer_filename_from_uri("https://x/y/").as_deref(), Some("y"));
        assert_eq!(infer_filename_from_uri(""), None);
    }

    #[test]
    fn directory_source_reads_mirror() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), b"{}").unwrap();
        let source = DirectorySource::new(dir.path());
        let bytes = source
            .fetch(&hugging_face_uri("org/model", "config.json"))
            .unwrap();
        assert_eq!(bytes, b"{}");
    }

    #[test]
    fn directory_source_missing_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectorySource::new(dir.path())
            .fetch("https://x/resolve/main/absent.bin")
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn directory_source_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectorySource::new(dir.path())
            .fetch("https://x/resolve/main/../../etc/passwd")
            .unwrap_err();
        assert!(err.message().contains("escapes"));
    }

    #[test]
    fn file_uri_read_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        fs::write(&path, b"[PAD]\n").unwrap();
        let uri = format!("file://{}", path.display());
        let bytes = DirectorySource::new("/nonexistent").fetch(&uri).unwrap();
        assert_eq!(bytes, b"[PAD]\n");
    }

    #[test]
    fn default_verify_is_sha256() {
        let source = DirectorySource::new(".");
        assert!(source.verify(b"hello", &checksum::sha256_hex(b"hello")));
        assert!(!source.verify(b"hello", &checksum::sha256_hex(b"world")));
    }

    #[test]
    fn status_classification() {
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }
}
