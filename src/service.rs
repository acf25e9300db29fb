//! The embedding service and its load lifecycle.
//!
//! ```text
//! Unloaded ──▶ Loading ──▶ Ready ──▶ Disposed
//!                 │                     ▲
//!                 └──────▶ Failed ──────┘
//! ```
//!
//! Loading happens once per service. Callers that arrive while it runs
//! block on a condition variable until the outcome is known.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{info, info_span, warn};

use crate::cancel::CancelToken;
use crate::config::EmbedOptions;
use crate::error::EmbedError;
use crate::metrics::MetricsSpan;
use crate::model::LoadedModel;
use crate::registry::{EmbeddingModel, ModelSpec};

/// Observable lifecycle state of an [`EmbeddingService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Unloaded,
    Loading,
    Ready,
    /// Loading failed; every call reports `ModelNotReady`.
    Failed,
    Disposed,
}

enum Slot {
    Unloaded,
    Loading,
    Ready(Arc<LoadedModel>),
    Failed(String),
    Disposed,
}

impl Slot {
    fn state(&self) -> ServiceState {
        match self {
            Slot::Unloaded => ServiceState::Unloaded,
            Slot::Loading => ServiceState::Loading,
            Slot::Ready(_) => ServiceState::Ready,
            Slot::Failed(_) => ServiceState::Failed,
            Slot::Disposed => ServiceState::Disposed,
        }
    }
}

struct Inner {
    spec: ModelSpec,
    options: EmbedOptions,
    slot: Mutex<Slot>,
    changed: Condvar,
}

/// Turns documents into fixed-length vectors with one loaded model.
///
/// Cheap to clone; clones share the model and its state. Every method takes
/// `&self` and may be called from any number of threads at once.
#[derive(Clone)]
pub struct EmbeddingService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("model", &self.inner.spec.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl EmbeddingService {
    /// Resolves `model` (variant name or repository id) and loads it before
    /// returning.
    pub fn new(model: &str, options: EmbedOptions) -> Result<Self, EmbedError> {
        let model: EmbeddingModel = model.parse()?;
        Self::from_spec(model.spec(), options)
    }

    pub fn from_model(model: EmbeddingModel, options: EmbedOptions) -> Result<Self, EmbedError> {
        Self::from_spec(model.spec(), options)
    }

    /// Loads a caller-defined model before returning.
    pub fn from_spec(spec: ModelSpec, options: EmbedOptions) -> Result<Self, EmbedError> {
        let service = Self::unloaded(spec, options)?;
        service.mark_loading();
        service.finish_load()?;
        Ok(service)
    }

    /// Resolves `model`, then loads it on a background thread. The returned
    /// service is `Loading`; calls made before the load finishes wait for it.
    pub fn spawn(model: &str, options: EmbedOptions) -> Result<Self, EmbedError> {
        let model: EmbeddingModel = model.parse()?;
        Self::spawn_from_spec(model.spec(), options)
    }

    pub fn spawn_from_spec(spec: ModelSpec, options: EmbedOptions) -> Result<Self, EmbedError> {
        let service = Self::unloaded(spec, options)?;
        service.mark_loading();
        let loader = service.clone();
        thread::Builder::new()
            .name("textembed-loader".into())
            .spawn(move || {
                // The outcome is recorded in the slot.
                let _ = loader.finish_load();
            })
            .map_err(|e| EmbedError::Load(format!("spawning loader thread failed: {e}")))?;
        Ok(service)
    }

    fn unloaded(spec: ModelSpec, options: EmbedOptions) -> Result<Self, EmbedError> {
        spec.validate()?;
        options.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                spec,
                options,
                slot: Mutex::new(Slot::Unloaded),
                changed: Condvar::new(),
            }),
        })
    }

    fn mark_loading(&self) {
        let mut slot = self.inner.slot.lock();
        if matches!(*slot, Slot::Unloaded) {
            *slot = Slot::Loading;
        }
    }

    fn finish_load(&self) -> Result<(), EmbedError> {
        let spec = &self.inner.spec;
        let _span = info_span!("load_model", model = %spec.id).entered();
        let started = Instant::now();
        let metrics = MetricsSpan::start();
        let result = LoadedModel::load(spec, &self.inner.options);
        if let Some(metrics) = metrics {
            metrics.record_load(&spec.id, &result);
        }

        let mut slot = self.inner.slot.lock();
        let outcome = match result {
            Ok(model) => {
                if matches!(*slot, Slot::Disposed) {
                    Err(EmbedError::ServiceDisposed)
                } else {
                    info!(
                        model = %spec.id,
                        dimension = spec.dimension,
                        max_length = model.max_length(),
                        elapsed_micros = started.elapsed().as_micros() as u64,
                        "model_loaded"
                    );
                    *slot = Slot::Ready(Arc::new(model));
                    Ok(())
                }
            }
            Err(err) => {
                warn!(
                    model = %spec.id,
                    error = %err,
                    retryable = err.is_retryable(),
                    "model_load_failed"
                );
                if !matches!(*slot, Slot::Disposed) {
                    *slot = Slot::Failed(err.to_string());
                }
                Err(err)
            }
        };
        self.inner.changed.notify_all();
        outcome
    }

    /// The loaded model, waiting out an in-flight load.
    fn model(&self) -> Result<Arc<LoadedModel>, EmbedError> {
        let mut slot = self.inner.slot.lock();
        loop {
            match &*slot {
                Slot::Ready(model) => return Ok(Arc::clone(model)),
                Slot::Loading => {}
                Slot::Failed(reason) => return Err(EmbedError::ModelNotReady(reason.clone())),
                Slot::Unloaded => {
                    return Err(EmbedError::ModelNotReady("load has not started".into()));
                }
                Slot::Disposed => return Err(EmbedError::ServiceDisposed),
            }
            self.inner.changed.wait(&mut slot);
        }
    }

    pub fn state(&self) -> ServiceState {
        self.inner.slot.lock().state()
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.inner.spec
    }

    /// Length of every vector this service returns.
    pub fn dimension(&self) -> usize {
        self.inner.spec.dimension
    }

    pub fn options(&self) -> &EmbedOptions {
        &self.inner.options
    }

    /// Waits up to `timeout` for loading to finish.
    pub fn wait_ready(&self, timeout: Duration) -> Result<(), EmbedError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.slot.lock();
        while matches!(*slot, Slot::Loading) {
            if self.inner.changed.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        match &*slot {
            Slot::Ready(_) => Ok(()),
            Slot::Loading => Err(EmbedError::ModelNotReady(format!(
                "still loading after {timeout:?}"
            ))),
            Slot::Failed(reason) => Err(EmbedError::ModelNotReady(reason.clone())),
            Slot::Unloaded => Err(EmbedError::ModelNotReady("load has not started".into())),
            Slot::Disposed => Err(EmbedError::ServiceDisposed),
        }
    }

    /// Embeds `documents` in groups of `batch_size` (`0` = one group).
    ///
    /// The result has one vector per document, in input order. Any failure
    /// fails the whole call.
    pub fn embed<S>(&self, documents: &[S], batch_size: i64) -> Result<Vec<Vec<f32>>, EmbedError>
    where
        S: AsRef<str> + Sync,
    {
        self.embed_with_cancel(documents, batch_size, &CancelToken::new())
    }

    /// [`embed`](Self::embed) with the configured default batch size.
    pub fn embed_default<S>(&self, documents: &[S]) -> Result<Vec<Vec<f32>>, EmbedError>
    where
        S: AsRef<str> + Sync,
    {
        let batch_size = i64::try_from(self.inner.options.batch_size).unwrap_or(i64::MAX);
        self.embed(documents, batch_size)
    }

    /// Sub-batches that already started finish; none starts after `cancel`
    /// fires, and the call then returns `Cancelled`.
    pub fn embed_with_cancel<S>(
        &self,
        documents: &[S],
        batch_size: i64,
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<f32>>, EmbedError>
    where
        S: AsRef<str> + Sync,
    {
        let metrics = MetricsSpan::start();
        let result = self
            .model()
            .and_then(|model| model.embed(documents, batch_size, cancel));
        self.finish_call(documents.len(), metrics, result)
    }

    /// Like [`embed`](Self::embed) for inputs that may be missing. A `None`
    /// entry fails the call with `InvalidInput` naming its index.
    pub fn embed_optional(
        &self,
        documents: &[Option<&str>],
        batch_size: i64,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let metrics = MetricsSpan::start();
        let result = self.model().and_then(|model| {
            model.embed_optional(documents, batch_size, &CancelToken::new())
        });
        self.finish_call(documents.len(), metrics, result)
    }

    fn finish_call(
        &self,
        documents: usize,
        metrics: Option<MetricsSpan>,
        result: Result<Vec<Vec<f32>>, EmbedError>,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        if let Some(metrics) = metrics {
            metrics.record_embed(documents, &result);
        }
        if let Err(err) = &result {
            warn!(
                model = %self.inner.spec.id,
                documents,
                error = %err,
                "embed_failure"
            );
        }
        result
    }

    /// Releases the model. Calls already running finish; later calls fail
    /// with `ServiceDisposed`. Disposing twice is a no-op.
    pub fn dispose(&self) {
        let previous = {
            let mut slot = self.inner.slot.lock();
            std::mem::replace(&mut *slot, Slot::Disposed)
        };
        self.inner.changed.notify_all();
        if !matches!(previous, Slot::Disposed) {
            info!(model = %self.inner.spec.id, "service_disposed");
        }
    }

    /// Runs [`embed`](Self::embed) on tokio's blocking pool. Dropping the
    /// future cancels the call before its next sub-batch.
    #[cfg(feature = "tokio")]
    pub async fn embed_async(
        &self,
        documents: Vec<String>,
        batch_size: i64,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let service = self.clone();
        let cancel = CancelToken::new();
        let guard = cancel.drop_guard();
        let result = tokio::task::spawn_blocking(move || {
            service.embed_with_cancel(&documents, batch_size, &cancel)
        })
        .await
        .map_err(|e| EmbedError::ModelExecution(format!("embedding task failed: {e}")))?;
        guard.disarm();
        result
    }
}
