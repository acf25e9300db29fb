//! Concurrent use of one service from many threads.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{max_abs_diff, TinyModel, DOCS};
use textembed::artifacts::FetchError;
use textembed::{ArtifactSource, DirectorySource, EmbeddingService, ServiceState};

#[test]
fn concurrent_calls_match_sequential_results() {
    let model = TinyModel::bert();
    let service = model.service();
    let reference = service.embed(DOCS, 2).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let service = service.clone();
            thread::spawn(move || {
                let batch_size = (i % 4) as i64;
                service.embed(DOCS, batch_size).unwrap()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let vectors = handle.join().unwrap();
        assert_eq!(vectors.len(), reference.len(), "thread {i}");
        for (a, b) in vectors.iter().zip(&reference) {
            assert!(max_abs_diff(a, b) < 1e-5, "thread {i} produced different vectors");
        }
    }
}

#[test]
fn callers_block_until_background_load_finishes() {
    let model = TinyModel::bert();
    let service = EmbeddingService::spawn_from_spec(model.spec.clone(), model.options()).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            thread::spawn(move || service.embed(&["hello world"], 1))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    service.wait_ready(Duration::from_secs(30)).unwrap();
    assert_eq!(service.state(), ServiceState::Ready);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), first);
    }
}

/// Mirror that counts fetches and answers slowly, so overlapping loads
/// would each download if they were not serialized.
struct CountingSource {
    inner: DirectorySource,
    fetches: AtomicUsize,
}

impl ArtifactSource for CountingSource {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        self.inner.fetch(uri)
    }
}

#[test]
fn concurrent_loads_share_one_cache() {
    let model = TinyModel::bert();
    let source = Arc::new(CountingSource {
        inner: DirectorySource::new(model.path().join("mirror")),
        fetches: AtomicUsize::new(0),
    });
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let spec = model.spec.clone();
            let options = model.options().with_source(source.clone());
            thread::spawn(move || {
                EmbeddingService::from_spec(spec, options)
                    .and_then(|service| service.embed(&["the cat"], 1))
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    for r in &results[1..] {
        assert_eq!(r, &results[0]);
    }
    assert_eq!(source.fetches.load(Ordering::SeqCst), model.spec.artifacts.len());
}

#[test]
fn dispose_while_others_embed() {
    let model = TinyModel::bert();
    let service = model.service();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            thread::spawn(move || {
                // Each call either completes or sees the disposal.
                for _ in 0..20 {
                    match service.embed(DOCS, 3) {
                        Ok(vectors) => assert_eq!(vectors.len(), DOCS.len()),
                        Err(textembed::EmbedError::ServiceDisposed) => return,
                        Err(other) => panic!("unexpected error: {other:?}"),
                    }
                }
            })
        })
        .collect();
    service.dispose();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(service.state(), ServiceState::Disposed);
}
