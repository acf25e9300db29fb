//! Reducing per-token hidden states to one vector per document.

use ndarray::{Array3, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingMode {
    /// Average of the attended positions.
    #[default]
    Mean,
    /// Hidden state of the first position.
    Cls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pooler {
    mode: PoolingMode,
    normalize: bool,
}

impl Pooler {
    pub fn new(mode: PoolingMode, normalize: bool) -> Self {
        Self { mode, normalize }
    }

    pub fn mode(&self) -> PoolingMode {
        self.mode
    }

    pub fn normalizes(&self) -> bool {
        self.normalize
    }

    /// Pools one row. `index` is the caller's document index, reported in
    /// [`EngineError::EmptySequence`] when the row has no attended position.
    pub fn pool_row(
        &self,
        hidden: ArrayView2<f32>,
        mask: ArrayView1<bool>,
        index: usize,
    ) -> Result<Vec<f32>, EngineError> {
        if hidden.nrows() != mask.len() {
            return Err(EngineError::ModelExecution(format!(
                "hidden states cover {} positions but the mask has {}",
                hidden.nrows(),
                mask.len()
            )));
        }
        let attended = mask.iter().filter(|&&m| m).count();
        if attended == 0 {
            return Err(EngineError::EmptySequence { index });
        }

        let mut pooled = match self.mode {
            PoolingMode::Cls => hidden.row(0).to_vec(),
            PoolingMode::Mean => {
                let mut sum = vec![0.0f32; hidden.ncols()];
                for (row, _) in hidden.rows().into_iter().zip(mask).filter(|(_, m)| **m) {
                    for (acc, v) in sum.iter_mut().zip(row) {
                        *acc += v;
                    }
                }
                let inv = (attended as f32).recip();
                for acc in &mut sum {
                    *acc *= inv;
                }
                sum
            }
        };
        if self.normalize {
            l2_normalize_in_place(&mut pooled);
        }
        Ok(pooled)
    }

    /// Pools every row of a batch's hidden states, in row order.
    pub fn pool(&self, hidden: &Array3<f32>, batch: &Batch) -> Result<Vec<Vec<f32>>, EngineError> {
        let (rows, width, _) = hidden.dim();
        if rows != batch.rows() || width != batch.width() {
            return Err(EngineError::ModelExecution(format!(
                "hidden states {:?} do not match batch of {} x {}",
                hidden.dim(),
                batch.rows(),
                batch.width()
            )));
        }
        hidden
            .axis_iter(Axis(0))
            .zip(batch.attention_mask().rows())
            .enumerate()
            .map(|(r, (states, mask))| self.pool_row(states, mask, batch.offset() + r))
            .collect()
    }
}

/// Scales `v` to unit Euclidean length in place. A zero vector, or one with
/// non-finite components, is left as it is.
///
/// The sum of squares is taken in `f64` so large finite components do not
/// overflow it.
pub fn l2_normalize_in_place(v: &mut [f32]) {
    let norm_sq: f64 = v.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
    if norm_sq > 0.0 && norm_sq.is_finite() {
        let inv_norm = norm_sq.sqrt().recip();
        for x in v.iter_mut() {
            *x = (f64::from(*x) * inv_norm) as f32;
        }
    }
}

/// Cosine of the angle between `a` and `b`; 0.0 when either is zero or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(&x, &y)| f64::from(x) * f64::from(y)).sum();
    let norm_a = a.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0) as f32
}
