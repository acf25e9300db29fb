//! Miniature models that load through the real artifact path.
//!
//! The weights are seeded noise, so vectors are deterministic but carry no
//! meaning. Useful for ordering, batching and lifecycle checks, and for
//! benchmarks that should not hit the network.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use artifacts::{checksum, ArtifactSpec, DirectorySource, RetryConfig};
use engine::{fixture, EncoderConfig, PoolingMode};
use tokenizer::Tokenizer;

use crate::config::EmbedOptions;
use crate::error::EmbedError;
use crate::registry::{ModelSpec, TokenizerSpec, CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE};

pub const TINY_MODEL_ID: &str = "textembed/tiny-bert";
pub const TINY_NOMIC_MODEL_ID: &str = "textembed/tiny-nomic";
pub const TINY_MAX_LENGTH: usize = 128;
pub const TINY_NOMIC_MAX_LENGTH: usize = 256;

const SEED: u64 = 17;

pub fn tiny_tokenizer() -> Result<Tokenizer, EmbedError> {
    Ok(Tokenizer::from_json_str(
        &tokenizer::fixture::word_piece_json(),
        &TokenizerSpec::word_piece(true).fallback_config(),
    )?)
}

/// Spec of the tiny BERT model. Its artifact URIs point at the Hugging Face
/// layout and resolve only against a mirror.
pub fn tiny_spec() -> ModelSpec {
    ModelSpec::hugging_face(
        TINY_MODEL_ID,
        fixture::TINY_HIDDEN,
        TINY_MAX_LENGTH,
        PoolingMode::Mean,
        TokenizerSpec::word_piece(true),
    )
    .with_description("Seeded two-layer BERT for tests")
}

pub fn tiny_nomic_spec() -> ModelSpec {
    ModelSpec::hugging_face(
        TINY_NOMIC_MODEL_ID,
        fixture::TINY_HIDDEN,
        TINY_NOMIC_MAX_LENGTH,
        PoolingMode::Mean,
        TokenizerSpec::word_piece(true),
    )
    .with_description("Seeded two-layer NomicBERT for tests")
}

/// Writes the tiny BERT model under `dir/mirror` and returns a spec whose
/// artifacts are pinned `file://` URIs.
pub fn write_tiny_model(dir: &Path) -> Result<ModelSpec, EmbedError> {
    let vocab = tiny_tokenizer()?.vocabulary().len();
    write_model(dir, tiny_spec(), fixture::tiny_bert_config(vocab))
}

pub fn write_tiny_nomic_model(dir: &Path) -> Result<ModelSpec, EmbedError> {
    let vocab = tiny_tokenizer()?.vocabulary().len();
    write_model(dir, tiny_nomic_spec(), fixture::tiny_nomic_config(vocab))
}

/// Options that never touch the network: cache under `dir/cache`, mirror at
/// `dir/mirror`, no retries.
pub fn tiny_options(dir: &Path) -> EmbedOptions {
    EmbedOptions::default()
        .with_cache_dir(dir.join("cache"))
        .with_show_download_progress(false)
        .with_retry(RetryConfig::none())
        .with_source(Arc::new(DirectorySource::new(dir.join("mirror"))))
}

fn write_model(
    dir: &Path,
    spec: ModelSpec,
    config: EncoderConfig,
) -> Result<ModelSpec, EmbedError> {
    let model_dir = dir.join("mirror").join(artifacts::model_slug(&spec.id));
    fs::create_dir_all(&model_dir).map_err(|e| EmbedError::Load(e.to_string()))?;

    let files = [
        (CONFIG_FILE, fixture::config_json(&config).into_bytes()),
        (
            TOKENIZER_FILE,
            tokenizer::fixture::word_piece_json().into_bytes(),
        ),
        (WEIGHTS_FILE, fixture::checkpoint(&config, SEED)?),
    ];

    let mut artifacts = Vec::with_capacity(files.len());
    for (name, bytes) in files {
        let path = model_dir.join(name);
        fs::write(&path, &bytes).map_err(|e| EmbedError::Load(e.to_string()))?;
        artifacts.push(
            ArtifactSpec::new(name, format!("file://{}", path.display()))
                .with_sha256(checksum::sha256_hex(&bytes)),
        );
    }
    Ok(spec.with_artifacts(artifacts))
}
