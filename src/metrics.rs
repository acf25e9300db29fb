//! Optional observer for load and inference timings.

use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};

use crate::error::EmbedError;

/// Metrics observer for the embedding service.
pub trait EmbedMetrics: Send + Sync {
    /// Model fetch and deserialization finished (or failed).
    fn record_load(&self, model: &str, latency: Duration, result: Result<(), &EmbedError>);
    /// One sub-batch went through the encoder and pooler.
    fn record_batch(&self, rows: usize, padded_tokens: usize, latency: Duration);
    /// A whole `embed` call finished.
    fn record_embed(&self, documents: usize, latency: Duration, result: Result<(), &EmbedError>);
}

/// Install or clear the global embedding metrics recorder.
pub fn set_embed_metrics(recorder: Option<Arc<dyn EmbedMetrics>>) {
    let mut guard = metrics_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = recorder;
}

fn metrics_lock() -> &'static RwLock<Option<Arc<dyn EmbedMetrics>>> {
    static METRICS: OnceLock<RwLock<Option<Arc<dyn EmbedMetrics>>>> = OnceLock::new();
    METRICS.get_or_init(|| RwLock::new(None))
}

fn metrics_recorder() -> Option<Arc<dyn EmbedMetrics>> {
    let guard = metrics_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.clone()
}

/// Started only when a recorder is installed, so timing costs nothing otherwise.
pub(crate) struct MetricsSpan {
    recorder: Arc<dyn EmbedMetrics>,
    start: Instant,
}

impl MetricsSpan {
    pub(crate) fn start() -> Option<Self> {
        metrics_recorder().map(|recorder| Self {
            recorder,
            start: Instant::now(),
        })
    }

    pub(crate) fn record_load<T>(self, model: &str, result: &Result<T, EmbedError>) {
        self.recorder
            .record_load(model, self.start.elapsed(), result.as_ref().map(|_| ()));
    }

    pub(crate) fn record_batch(self, rows: usize, padded_tokens: usize) {
        self.recorder
            .record_batch(rows, padded_tokens, self.start.elapsed());
    }

    pub(crate) fn record_embed<T>(self, documents: usize, result: &Result<T, EmbedError>) {
        self.recorder
            .record_embed(documents, self.start.elapsed(), result.as_ref().map(|_| ()));
    }
}
