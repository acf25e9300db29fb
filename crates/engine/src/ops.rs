//! Numeric building blocks of the encoder, all in `f32`.
//!
//! Matrix products go through `ndarray::dot`, which runs single-threaded
//! unless `matrixmultiply` threading is enabled; every reduction here has a
//! fixed order, so identical inputs give identical bits.

use ndarray::{Array1, Array2, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};

use crate::error::EngineError;

/// Affine projection `y = x W + b`.
///
/// Weights are stored as `(in, out)`, transposed once at load from the
/// `(out, in)` layout checkpoints use.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Option<Array1<f32>>,
}

impl Linear {
    /// Takes a checkpoint-layout `(out, in)` weight.
    pub fn from_checkpoint(
        weight: Array2<f32>,
        bias: Option<Array1<f32>>,
    ) -> Result<Self, EngineError> {
        let (out, _) = weight.dim();
        if let Some(b) = &bias {
            if b.len() != out {
                return Err(EngineError::Load(format!(
                    "bias of length {} for a projection with {out} outputs",
                    b.len()
                )));
            }
        }
        let weight = weight.reversed_axes().as_standard_layout().into_owned();
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn out_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn forward(&self, x: &ArrayView2<f32>) -> Array2<f32> {
        let mut y = x.dot(&self.weight);
        if let Some(b) = &self.bias {
            y += b;
        }
        y
    }
}

#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Array1<f32>,
    bias: Array1<f32>,
    eps: f32,
}

impl LayerNorm {
    pub fn new(weight: Array1<f32>, bias: Array1<f32>, eps: f32) -> Result<Self, EngineError> {
        if weight.len() != bias.len() {
            return Err(EngineError::Load(format!(
                "layer norm weight has {} entries, bias has {}",
                weight.len(),
                bias.len()
            )));
        }
        Ok(Self { weight, bias, eps })
    }

    /// Normalizes every row of `x` over its last axis.
    pub fn forward_in_place(&self, x: &mut Array2<f32>) {
        for row in x.axis_iter_mut(Axis(0)) {
            self.normalize_row(row);
        }
    }

    fn normalize_row(&self, mut row: ArrayViewMut1<f32>) {
        let n = row.len() as f32;
        let mean = row.iter().sum::<f32>() / n;
        let var = row.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        let inv_std = (var + self.eps).sqrt().recip();
        for ((v, w), b) in row.iter_mut().zip(&self.weight).zip(&self.bias) {
            *v = (*v - mean) * inv_std * w + b;
        }
    }
}

/// Abramowitz & Stegun 7.1.26, absolute error below 1.5e-7.
pub fn erf(x: f32) -> f32 {
    const A1: f32 = 0.254_829_6;
    const A2: f32 = -0.284_496_74;
    const A3: f32 = 1.421_413_7;
    const A4: f32 = -1.453_152_1;
    const A5: f32 = 1.061_405_4;
    const P: f32 = 0.327_591_1;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

pub fn gelu(x: f32) -> f32 {
    0.5 * x * (1.0 + erf(x * std::f32::consts::FRAC_1_SQRT_2))
}

pub fn gelu_tanh(x: f32) -> f32 {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    0.5 * x * (1.0 + (SQRT_2_OVER_PI * (x + 0.044_715 * x * x * x)).tanh())
}

pub fn silu(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}

/// Softmax over `scores` with masked-out positions forced to zero weight.
///
/// Masked entries become `-inf` before the max is taken. A row with no
/// visible position comes out all zeros instead of NaN.
pub fn masked_softmax_in_place(mut scores: ArrayViewMut1<f32>, visible: &[bool]) {
    for (s, &keep) in scores.iter_mut().zip(visible) {
        if !keep {
            *s = f32::NEG_INFINITY;
        }
    }
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        scores.fill(0.0);
        return;
    }
    let mut sum = 0.0f32;
    for s in scores.iter_mut() {
        *s = (*s - max).exp();
        sum += *s;
    }
    let inv = sum.recip();
    for s in scores.iter_mut() {
        *s *= inv;
    }
}

/// Rotary position encoding applied to per-head query/key blocks.
#[derive(Debug, Clone)]
pub struct Rotary {
    inv_freq: Vec<f32>,
    interleaved: bool,
}

impl Rotary {
    pub fn new(rotary_dim: usize, base: f32, interleaved: bool) -> Self {
        let half = rotary_dim / 2;
        let inv_freq = (0..half)
            .map(|i| base.powf(-((2 * i) as f32) / rotary_dim as f32))
            .collect();
        Self {
            inv_freq,
            interleaved,
        }
    }

    pub fn rotary_dim(&self) -> usize {
        self.inv_freq.len() * 2
    }

    /// `(cos, sin)` tables of shape `(positions, rotary_dim / 2)`.
    pub fn tables(&self, positions: usize) -> (Array2<f32>, Array2<f32>) {
        let half = self.inv_freq.len();
        let angles =
            Array2::from_shape_fn((positions, half), |(p, i)| p as f32 * self.inv_freq[i]);
        (angles.mapv(f32::cos), angles.mapv(f32::sin))
    }

    /// Rotates the leading `rotary_dim` columns of a `(positions, head_dim)` block.
    pub fn apply(&self, x: &mut ArrayViewMut2<f32>, cos: &Array2<f32>, sin: &Array2<f32>) {
        let half = self.inv_freq.len();
        for (p, mut row) in x.axis_iter_mut(Axis(0)).enumerate() {
            for i in 0..half {
                let (a, b) = if self.interleaved {
                    (2 * i, 2 * i + 1)
                } else {
                    (i, i + half)
                };
                let (c, s) = (cos[[p, i]], sin[[p, i]]);
                let (x1, x2) = (row[a], row[b]);
                row[a] = x1 * c - x2 * s;
                row[b] = x2 * c + x1 * s;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn close(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn linear_transposes_checkpoint_layout() {
        // out = 2, in = 3
        let w = array![[1.0f32, 0.0, 0.0], [0.0, 1.0, 1.0]];
        let lin = Linear::from_checkpoint(w, Some(array![0.5, -0.5])).unwrap();
        assert_eq!(lin.in_features(), 3);
        assert_eq!(lin.out_features(), 2);
        let y = lin.forward(&array![[1.0f32, 2.0, 3.0]].view());
        assert_eq!(y, array![[1.5, 4.5]]);
    }

    #[test]
    fn linear_rejects_bias_mismatch() {
        let w = Array2::<f32>::zeros((2, 3));
        assert!(Linear::from_checkpoint(w, Some(array![0.0])).is_err());
    }

    #[test]
    fn layer_norm_centers_and_scales() {
        let ln = LayerNorm::new(array![1.0, 1.0, 1.0, 1.0], array![0.0, 0.0, 0.0, 0.0], 1e-12)
            .unwrap();
        let mut x = array![[1.0f32, 2.0, 3.0, 4.0]];
        ln.forward_in_place(&mut x);
        let mean: f32 = x.row(0).sum() / 4.0;
        let var: f32 = x.row(0).iter().map(|v| v * v).sum::<f32>() / 4.0;
        assert!(close(mean, 0.0, 1e-6));
        assert!(close(var, 1.0, 1e-5));
    }

    #[test]
    fn layer_norm_applies_affine() {
        let ln = LayerNorm::new(array![2.0, 2.0], array![1.0, 1.0], 1e-12).unwrap();
        let mut x = array![[0.0f32, 2.0]];
        ln.forward_in_place(&mut x);
        assert!(close(x[[0, 0]], -1.0, 1e-5));
        assert!(close(x[[0, 1]], 3.0, 1e-5));
    }

    #[test]
    fn erf_reference_points() {
        assert!(close(erf(0.0), 0.0, 1e-6));
        assert!(close(erf(0.5), 0.520_499_9, 1e-6));
        assert!(close(erf(1.0), 0.842_700_8, 1e-6));
        assert!(close(erf(-1.0), -0.842_700_8, 1e-6));
        assert!(close(erf(3.0), 0.999_977_9, 1e-6));
    }

    #[test]
    fn activations() {
        assert!(close(gelu(1.0), 0.841_344_7, 1e-5));
        assert!(close(gelu(-1.0), -0.158_655_3, 1e-5));
        assert!(close(gelu_tanh(1.0), 0.841_192, 1e-5));
        assert!(close(silu(0.0), 0.0, 1e-7));
        assert!(close(silu(1.0), 0.731_058_6, 1e-6));
        assert_eq!(relu(-2.0), 0.0);
        assert_eq!(relu(2.0), 2.0);
    }

    #[test]
    fn softmax_ignores_masked_positions() {
        let mut scores = array![1.0f32, 100.0, 1.0];
        masked_softmax_in_place(scores.view_mut(), &[true, false, true]);
        assert_eq!(scores[1], 0.0);
        assert!(close(scores[0], 0.5, 1e-6));
        assert!(close(scores[2], 0.5, 1e-6));
    }

    #[test]
    fn softmax_fully_masked_row_is_zero() {
        let mut scores = array![1.0f32, 2.0];
        masked_softmax_in_place(scores.view_mut(), &[false, false]);
        assert_eq!(scores, array![0.0, 0.0]);
    }

    #[test]
    fn softmax_is_stable_for_large_scores() {
        let mut scores = array![1000.0f32, 1000.0];
        masked_softmax_in_place(scores.view_mut(), &[true, true]);
        assert!(close(scores[0], 0.5, 1e-6));
    }

    #[test]
    fn rotary_position_zero_is_identity() {
        let rot = Rotary::new(4, 10_000.0, false);
        let (cos, sin) = rot.tables(2);
        let mut x = array![[1.0f32, 2.0, 3.0, 4.0], [1.0, 2.0, 3.0, 4.0]];
        rot.apply(&mut x.view_mut(), &cos, &sin);
        assert_eq!(x.row(0), array![1.0f32, 2.0, 3.0, 4.0]);
        // Rotation keeps the norm of each rotated pair.
        let before = 1.0f32 * 1.0 + 3.0 * 3.0;
        let after = x[[1, 0]] * x[[1, 0]] + x[[1, 2]] * x[[1, 2]];
        assert!(close(before, after, 1e-4));
    }

    #[test]
    fn rotary_frequencies_decay_with_pair_index() {
        let rot = Rotary::new(4, 100.0, false);
        let (cos, sin) = rot.tables(2);
        // inv_freq = [100^0, 100^(-2/4)] = [1.0, 0.1]
        assert!(close(sin[[1, 0]], 1.0f32.sin(), 1e-6));
        assert!(close(sin[[1, 1]], 0.1f32.sin(), 1e-6));
        assert!(close(cos[[1, 1]], 0.1f32.cos(), 1e-6));
    }

    #[test]
    fn rotary_interleaved_pairs_adjacent_columns() {
        let rot = Rotary::new(2, 1.0, true);
        let (cos, sin) = rot.tables(2);
        // inv_freq = [1.0], position 1 rotates by one radian.
        let mut x = array![[0.0f32, 0.0], [1.0, 0.0]];
        rot.apply(&mut x.view_mut(), &cos, &sin);
        assert!(close(x[[1, 0]], 1.0f32.cos(), 1e-6));
        assert!(close(x[[1, 1]], 1.0f32.sin(), 1e-6));
    }

    #[test]
    fn rotary_leaves_trailing_columns() {
        let rot = Rotary::new(2, 10.0, false);
        assert_eq!(rot.rotary_dim(), 2);
        let (cos, sin) = rot.tables(3);
        let mut x = Array2::from_elem((3, 4), 1.0f32);
        rot.apply(&mut x.view_mut(), &cos, &sin);
        for p in 0..3 {
            assert_eq!(x[[p, 2]], 1.0);
            assert_eq!(x[[p, 3]], 1.0);
        }
    }
}
