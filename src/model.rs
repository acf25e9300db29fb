//! A model whose artifacts are on disk and whose weights are in memory.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use artifacts::{ArtifactCache, ArtifactSource, DirectorySource, HttpSource};
use engine::{Batch, BatchPlanner, Encoder, InferenceEngine, Pooler};
use rayon::prelude::*;
use rayon::ThreadPool;
use tokenizer::{TokenSequence, Tokenizer};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::config::EmbedOptions;
use crate::error::EmbedError;
use crate::metrics::MetricsSpan;
use crate::registry::{ModelSpec, CONFIG_FILE, TOKENIZER_FILE, VOCAB_FILE, WEIGHTS_FILE};

/// Everything `embed` needs, immutable after construction.
pub(crate) struct LoadedModel {
    spec: ModelSpec,
    tokenizer: Tokenizer,
    engine: Arc<dyn InferenceEngine>,
    planner: BatchPlanner,
    pooler: Pooler,
    max_length: usize,
    pool: Option<ThreadPool>,
}

impl LoadedModel {
    /// Fetches (or reuses) the artifacts of `spec` and loads them.
    pub(crate) fn load(spec: &ModelSpec, options: &EmbedOptions) -> Result<Self, EmbedError> {
        spec.validate()?;
        options.validate()?;

        let cache = ArtifactCache::new(&options.cache_dir, artifact_source(spec, options)?)
            .with_options(options.cache.clone());
        let paths = cache.ensure(&spec.id, &spec.artifacts)?;

        let tokenizer_path = paths
            .get(TOKENIZER_FILE)
            .or_else(|| paths.get(VOCAB_FILE))
            .ok_or_else(|| EmbedError::Load(format!("model `{}` has no tokenizer", spec.id)))?;
        let tokenizer = Tokenizer::from_file(tokenizer_path, &spec.tokenizer.fallback_config())?;

        let config_path = required(&paths, CONFIG_FILE, spec)?;
        let weights_path = required(&paths, WEIGHTS_FILE, spec)?;
        let encoder = Encoder::from_files(config_path, weights_path)?;
        let vocab_size = encoder.config().vocab_size;
        if tokenizer.vocabulary().len() > vocab_size {
            return Err(EmbedError::Load(format!(
                "tokenizer has {} entries but the encoder embeds only {vocab_size}",
                tokenizer.vocabulary().len()
            )));
        }

        debug!(
            model = %spec.id,
            artifacts = paths.len(),
            cache_dir = %paths.dir().display(),
            "model_artifacts_loaded"
        );
        Self::from_parts(spec.clone(), tokenizer, Arc::new(encoder), options)
    }

    /// Wires already-loaded parts together. The engine's width must match
    /// the declared dimension.
    pub(crate) fn from_parts(
        spec: ModelSpec,
        tokenizer: Tokenizer,
        engine: Arc<dyn InferenceEngine>,
        options: &EmbedOptions,
    ) -> Result<Self, EmbedError> {
        if engine.hidden_size() != spec.dimension {
            return Err(EmbedError::Load(format!(
                "model `{}` declares dimension {} but the encoder produces {}",
                spec.id,
                spec.dimension,
                engine.hidden_size()
            )));
        }
        let max_length = options
            .max_length
            .min(spec.max_length)
            .min(engine.max_positions());
        if max_length < 2 {
            return Err(EmbedError::InvalidConfiguration(format!(
                "effective max_length {max_length} leaves no room for special tokens"
            )));
        }

        let pool = options
            .threads
            .map(|threads| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("textembed-{i}"))
                    .build()
                    .map_err(|e| {
                        EmbedError::InvalidConfiguration(format!("thread pool: {e}"))
                    })
            })
            .transpose()?;

        Ok(Self {
            planner: BatchPlanner::new(tokenizer.pad_id())
                .with_max_batch_tokens(options.max_batch_tokens),
            pooler: Pooler::new(spec.pooling, spec.normalize),
            spec,
            tokenizer,
            engine,
            max_length,
            pool,
        })
    }

    pub(crate) fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub(crate) fn max_length(&self) -> usize {
        self.max_length
    }

    pub(crate) fn embed<S>(
        &self,
        documents: &[S],
        batch_size: i64,
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<f32>>, EmbedError>
    where
        S: AsRef<str> + Sync,
    {
        self.install(|| {
            let sequences = self.tokenizer.encode_batch(documents, self.max_length);
            self.run(&sequences, batch_size, cancel)
        })
    }

    pub(crate) fn embed_optional(
        &self,
        documents: &[Option<&str>],
        batch_size: i64,
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.install(|| {
            let sequences = self.tokenizer.encode_inputs(documents, self.max_length)?;
            self.run(&sequences, batch_size, cancel)
        })
    }

    fn install<T: Send>(&self, op: impl FnOnce() -> T + Send) -> T {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    fn run(
        &self,
        sequences: &[TokenSequence],
        batch_size: i64,
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let started = Instant::now();
        let batches = self.planner.plan(sequences, batch_size)?;
        if cancel.is_cancelled() {
            return Err(EmbedError::Cancelled);
        }

        // Stops sub-batches that have not started once any sibling fails.
        let abort = CancelToken::new();
        let results: Vec<Result<Vec<Vec<f32>>, EmbedError>> = batches
            .par_iter()
            .map(|batch| {
                if cancel.is_cancelled() || abort.is_cancelled() {
                    return Err(EmbedError::Cancelled);
                }
                self.run_batch(batch).map_err(|e| {
                    abort.cancel();
                    e.in_sub_batch(batch.documents())
                })
            })
            .collect();

        let mut vectors = Vec::with_capacity(sequences.len());
        let mut cancelled = false;
        for result in results {
            match result {
                Ok(batch) => vectors.extend(batch),
                Err(EmbedError::Cancelled) => cancelled = true,
                Err(err) => return Err(err),
            }
        }
        if cancelled {
            return Err(EmbedError::Cancelled);
        }
        if vectors.len() != sequences.len() {
            return Err(EmbedError::ModelExecution(format!(
                "produced {} vectors for {} documents",
                vectors.len(),
                sequences.len()
            )));
        }

        debug!(
            model = %self.spec.id,
            documents = sequences.len(),
            batches = batches.len(),
            elapsed_micros = started.elapsed().as_micros() as u64,
            "embed_complete"
        );
        Ok(vectors)
    }

    fn run_batch(&self, batch: &Batch) -> Result<Vec<Vec<f32>>, EmbedError> {
        let span = MetricsSpan::start();
        let hidden = self.engine.forward(batch)?;
        let vectors = self.pooler.pool(&hidden, batch)?;
        if let Some(span) = span {
            span.record_batch(batch.rows(), batch.padded_tokens());
        }
        if let Some(v) = vectors.iter().find(|v| v.len() != self.spec.dimension) {
            return Err(EmbedError::ModelExecution(format!(
                "pooled vector has {} components, expected {}",
                v.len(),
                self.spec.dimension
            )));
        }
        Ok(vectors)
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("model", &self.spec.id)
            .field("max_length", &self.max_length)
            .field("planner", &self.planner)
            .field("pooler", &self.pooler)
            .finish_non_exhaustive()
    }
}

fn artifact_source(
    spec: &ModelSpec,
    options: &EmbedOptions,
) -> Result<Arc<dyn ArtifactSource>, EmbedError> {
    if let Some(source) = &options.source {
        return Ok(Arc::clone(source));
    }
    if let Some(dir) = &options.mirror_dir {
        return Ok(Arc::new(DirectorySource::new(dir)));
    }
    let mut http =
        HttpSource::new(options.fetch_timeout).map_err(|e| EmbedError::ArtifactUnavailable {
            artifact: spec.id.clone(),
            reason: e.to_string(),
        })?;
    if let Some(token) = &options.auth_token {
        http = http.with_auth_token(token.clone());
    }
    Ok(Arc::new(http))
}

fn required<'a>(
    paths: &'a artifacts::LocalPaths,
    name: &str,
    spec: &ModelSpec,
) -> Result<&'a Path, EmbedError> {
    paths
        .get(name)
        .ok_or_else(|| EmbedError::Load(format!("model `{}` has no `{name}` on disk", spec.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use engine::{EngineError, PoolingMode};
    use ndarray::Array3;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns all-ones states, failing on the `fail_at`-th forward call and
    /// tripping `cancel_at` once that call has run.
    struct ScriptedEngine {
        hidden: usize,
        calls: AtomicUsize,
        fail_at: Option<usize>,
        cancel_at: Option<(usize, CancelToken)>,
    }

    impl ScriptedEngine {
        fn new(hidden: usize) -> Self {
            Self {
                hidden,
                calls: AtomicUsize::new(0),
                fail_at: None,
                cancel_at: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl InferenceEngine for ScriptedEngine {
        fn hidden_size(&self) -> usize {
            self.hidden
        }

        fn max_positions(&self) -> usize {
            512
        }

        fn forward(&self, batch: &Batch) -> Result<Array3<f32>, EngineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(call) == self.fail_at {
                return Err(EngineError::ModelExecution("scripted failure".into()));
            }
            if let Some((at, token)) = &self.cancel_at {
                if call == *at {
                    token.cancel();
                }
            }
            Ok(Array3::ones((batch.rows(), batch.width(), self.hidden)))
        }
    }

    fn scripted(fail_at: Option<usize>, options: &EmbedOptions) -> LoadedModel {
        let spec = testing::tiny_spec();
        let engine = ScriptedEngine {
            fail_at,
            ..ScriptedEngine::new(spec.dimension)
        };
        with_engine(engine, options).0
    }

    fn with_engine(
        engine: ScriptedEngine,
        options: &EmbedOptions,
    ) -> (LoadedModel, Arc<ScriptedEngine>) {
        let spec = testing::tiny_spec().with_normalize(false);
        let tokenizer = testing::tiny_tokenizer().unwrap();
        let engine = Arc::new(engine);
        let model = LoadedModel::from_parts(spec, tokenizer, engine.clone(), options).unwrap();
        (model, engine)
    }

    fn single_threaded() -> EmbedOptions {
        EmbedOptions::default().with_threads(Some(1))
    }

    #[test]
    fn output_follows_input_order() {
        let model = scripted(None, &EmbedOptions::default());
        let docs = ["a", "b", "c", "d", "e"];
        let out = model.embed(&docs, 2, &CancelToken::new()).unwrap();
        assert_eq!(out.len(), docs.len());
        assert!(out.iter().all(|v| v.iter().all(|&x| x == 1.0)));
    }

    #[test]
    fn failing_sub_batch_fails_the_call_with_its_range() {
        let model = scripted(Some(1), &single_threaded());
        let err = model
            .embed(&["a", "b", "c", "d", "e"], 2, &CancelToken::new())
            .unwrap_err();
        match err {
            EmbedError::SubBatch { documents, source } => {
                assert_eq!(documents, 2..4);
                assert!(matches!(*source, EmbedError::ModelExecution(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cancelled_before_start() {
        let model = scripted(None, &EmbedOptions::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = model.embed(&["a", "b"], 1, &cancel).unwrap_err();
        assert!(matches!(err, EmbedError::Cancelled));
    }

    #[test]
    fn cancel_mid_call_skips_later_sub_batches() {
        let cancel = CancelToken::new();
        let engine = ScriptedEngine {
            cancel_at: Some((1, cancel.clone())),
            ..ScriptedEngine::new(testing::tiny_spec().dimension)
        };
        let (model, engine) = with_engine(engine, &single_threaded());
        let err = model
            .embed(&["a", "b", "c", "d", "e"], 1, &cancel)
            .unwrap_err();
        assert!(matches!(err, EmbedError::Cancelled));
        assert_eq!(engine.calls(), 2);
    }

    #[test]
    fn failure_skips_sub_batches_not_yet_started() {
        let engine = ScriptedEngine {
            fail_at: Some(1),
            ..ScriptedEngine::new(testing::tiny_spec().dimension)
        };
        let (model, engine) = with_engine(engine, &single_threaded());
        let err = model
            .embed(&["a", "b", "c", "d", "e"], 1, &CancelToken::new())
            .unwrap_err();
        match err {
            EmbedError::SubBatch { documents, .. } => assert_eq!(documents, 1..2),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(engine.calls(), 2);
    }

    #[test]
    fn negative_batch_size_is_rejected() {
        let model = scripted(None, &EmbedOptions::default());
        let err = model.embed(&["a"], -1, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, EmbedError::InvalidConfiguration(_)));
        let err = model
            .embed::<&str>(&[], -3, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, EmbedError::InvalidConfiguration(_)));
    }

    #[test]
    fn missing_slot_reports_index() {
        let model = scripted(None, &EmbedOptions::default());
        let err = model
            .embed_optional(&[Some("a"), None, Some("c")], 0, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, EmbedError::InvalidInput { index: 1 }));
    }

    #[test]
    fn dimension_mismatch_is_a_load_error() {
        let spec = testing::tiny_spec();
        let engine = Arc::new(ScriptedEngine::new(spec.dimension + 1));
        let err = LoadedModel::from_parts(
            spec,
            testing::tiny_tokenizer().unwrap(),
            engine,
            &EmbedOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EmbedError::Load(_)));
    }

    #[test]
    fn effective_max_length_is_the_smallest_limit() {
        let model = scripted(None, &EmbedOptions::default().with_max_length(16));
        assert_eq!(model.max_length(), 16);
        let model = scripted(None, &EmbedOptions::default());
        assert_eq!(model.max_length(), testing::tiny_spec().max_length);
    }

    #[test]
    fn loads_tiny_model_from_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let spec = testing::write_tiny_model(dir.path()).unwrap();
        let options = testing::tiny_options(dir.path());
        let model = LoadedModel::load(&spec, &options).unwrap();
        assert_eq!(model.spec().pooling, PoolingMode::Mean);

        let out = model
            .embed(&["hello world", "the cat"], 0, &CancelToken::new())
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), spec.dimension);
        assert!(dir.path().join("cache").exists());
    }

    #[test]
    fn missing_mirror_files_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let spec = testing::tiny_spec();
        let options = testing::tiny_options(dir.path());
        let err = LoadedModel::load(&spec, &options).unwrap_err();
        assert!(matches!(err, EmbedError::ArtifactUnavailable { .. }));
    }
}
