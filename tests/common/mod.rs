//! Shared setup for integration tests: a tiny model on disk behind a mirror.

#![allow(dead_code)]

use std::path::Path;

use tempfile::TempDir;
use textembed::{testing, EmbedOptions, EmbeddingService, ModelSpec};

pub const DOCS: &[&str] = &[
    "hello world",
    "the quick brown fox jumps over the lazy dog",
    "passage: text search",
    "cat",
    "",
    "embedding text, quickly!",
    "中文",
];

pub struct TinyModel {
    pub dir: TempDir,
    pub spec: ModelSpec,
}

impl TinyModel {
    pub fn bert() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let spec = testing::write_tiny_model(dir.path()).unwrap();
        Self { dir, spec }
    }

    pub fn nomic() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let spec = testing::write_tiny_nomic_model(dir.path()).unwrap();
        Self { dir, spec }
    }

    pub fn options(&self) -> EmbedOptions {
        testing::tiny_options(self.dir.path())
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn service(&self) -> EmbeddingService {
        EmbeddingService::from_spec(self.spec.clone(), self.options()).unwrap()
    }
}

pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}
