mod common;

use std::sync::Arc;
use std::time::Duration;

use common::TinyModel;
use textembed::artifacts::{ArtifactSource, FetchError};
use textembed::{
    ArtifactSpec, CancelToken, EmbedError, EmbedOptions, EmbeddingService, ServiceState,
    WEIGHTS_FILE,
};

struct Offline;

impl ArtifactSource for Offline {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::transient(format!("connection refused: {uri}")))
    }
}

#[test]
fn unknown_identifier_is_rejected_at_construction() {
    for name in ["", "bge", "BAAI/bge-small-en", "gpt-4"] {
        let result = EmbeddingService::new(name, EmbedOptions::default());
        assert!(
            matches!(result, Err(EmbedError::UnknownModel(_))),
            "{name:?} should be unknown"
        );
    }
}

#[test]
fn negative_batch_size_is_invalid_configuration() {
    let model = TinyModel::bert();
    let service = model.service();
    for batch_size in [-1, -256, i64::MIN] {
        let err = service.embed(&["hello"], batch_size).unwrap_err();
        assert!(matches!(err, EmbedError::InvalidConfiguration(_)));
        assert!(!err.is_retryable());
    }
}

#[test]
fn missing_document_names_its_index() {
    let model = TinyModel::bert();
    let service = model.service();
    let err = service
        .embed_optional(&[Some("hello"), Some("world"), None, None], 2)
        .unwrap_err();
    assert!(matches!(err, EmbedError::InvalidInput { index: 2 }));

    let ok = service.embed_optional(&[Some("hello"), Some("")], 2).unwrap();
    assert_eq!(ok, service.embed(&["hello", ""], 2).unwrap());
}

#[test]
fn disposed_service_rejects_calls() {
    let model = TinyModel::bert();
    let service = model.service();
    let other = service.clone();
    service.embed(&["hello"], 1).unwrap();
    service.dispose();

    assert_eq!(other.state(), ServiceState::Disposed);
    assert!(matches!(other.embed(&["hello"], 1), Err(EmbedError::ServiceDisposed)));
    assert!(matches!(
        other.embed_optional(&[Some("hello")], 1),
        Err(EmbedError::ServiceDisposed)
    ));
}

#[test]
fn unreachable_source_fails_load_and_is_retryable() {
    let model = TinyModel::bert();
    let options = model.options().with_source(Arc::new(Offline));
    let err = EmbeddingService::from_spec(model.spec.clone(), options).unwrap_err();
    match &err {
        EmbedError::ArtifactUnavailable { reason, .. } => {
            assert!(reason.contains("connection refused"))
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
}

#[test]
fn failed_background_load_makes_every_call_not_ready() {
    let model = TinyModel::bert();
    let options = model.options().with_source(Arc::new(Offline));
    let service = EmbeddingService::spawn_from_spec(model.spec.clone(), options).unwrap();
    assert!(service.wait_ready(Duration::from_secs(30)).is_err());
    assert_eq!(service.state(), ServiceState::Failed);

    for _ in 0..3 {
        assert!(matches!(
            service.embed(&["hello"], 1),
            Err(EmbedError::ModelNotReady(_))
        ));
    }
}

#[test]
fn checksum_mismatch_is_an_integrity_error() {
    let model = TinyModel::bert();
    let artifacts = model
        .spec
        .artifacts
        .iter()
        .map(|a| {
            if a.name == WEIGHTS_FILE {
                ArtifactSpec::new(a.name.clone(), a.uri.clone()).with_sha256("ab".repeat(32))
            } else {
                a.clone()
            }
        })
        .collect();
    let spec = model.spec.clone().with_artifacts(artifacts);
    let err = EmbeddingService::from_spec(spec, model.options()).unwrap_err();
    match err {
        EmbedError::IntegrityMismatch {
            artifact, expected, ..
        } => {
            assert_eq!(artifact, WEIGHTS_FILE);
            assert_eq!(expected, "ab".repeat(32));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn spec_without_weights_is_invalid() {
    let model = TinyModel::bert();
    let artifacts = model
        .spec
        .artifacts
        .iter()
        .filter(|a| a.name != WEIGHTS_FILE)
        .cloned()
        .collect();
    let spec = model.spec.clone().with_artifacts(artifacts);
    let err = EmbeddingService::from_spec(spec, model.options()).unwrap_err();
    assert!(matches!(err, EmbedError::InvalidConfiguration(_)));
}

#[test]
fn dimension_mismatch_fails_load() {
    let model = TinyModel::bert();
    let mut spec = model.spec.clone();
    spec.dimension += 1;
    let err = EmbeddingService::from_spec(spec, model.options()).unwrap_err();
    assert!(matches!(err, EmbedError::Load(_)));
}

#[test]
fn cancelled_call_returns_cancelled() {
    let model = TinyModel::bert();
    let service = model.service();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = service
        .embed_with_cancel(&["hello", "world"], 1, &cancel)
        .unwrap_err();
    assert!(matches!(err, EmbedError::Cancelled));

    // The service itself is unaffected.
    assert_eq!(service.embed(&["hello"], 1).unwrap().len(), 1);
}
