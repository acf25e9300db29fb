//! Transformer encoder forward pass.
//!
//! One [`Encoder`] covers both supported layouts. BERT and NomicBERT share
//! the post-norm block `x = LN(x + Attn(x)); x = LN(x + FFN(x))` and differ
//! only in position handling (learned table vs. rotary) and the FFN shape
//! (dense vs. gated), which are data here rather than separate types.

use std::fs;
use std::path::Path;
use std::time::Instant;

use ndarray::{concatenate, s, stack, Array1, Array2, Array3, ArrayView1, Axis};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::batch::Batch;
use crate::config::{Activation, Architecture, EncoderConfig};
use crate::error::EngineError;
use crate::ops::{gelu, gelu_tanh, masked_softmax_in_place, relu, silu, LayerNorm, Linear, Rotary};
use crate::weights::WeightStore;

const WORD_EMBEDDINGS: &str = "embeddings.word_embeddings.weight";

/// Runs the numeric forward pass over a padded batch.
///
/// Implementations hold read-only weights and keep all scratch per call, so
/// one instance can serve many threads at once.
pub trait InferenceEngine: Send + Sync {
    /// Width of every per-token hidden vector.
    fn hidden_size(&self) -> usize;

    /// Longest padded width the engine accepts.
    fn max_positions(&self) -> usize;

    /// Hidden states of shape `[rows, width, hidden_size]`.
    ///
    /// Padded positions never influence real ones. Shape problems (token ids
    /// outside the vocabulary, a width past `max_positions`) are
    /// [`EngineError::ModelExecution`].
    fn forward(&self, batch: &Batch) -> Result<Array3<f32>, EngineError>;
}

#[derive(Debug)]
struct Embeddings {
    word: Array2<f32>,
    position: Option<Array2<f32>>,
    /// Row 0 of the token-type table; every input is segment 0.
    token_type: Option<Array1<f32>>,
    norm: LayerNorm,
}

#[derive(Debug)]
enum FeedForward {
    Dense { up: Linear, activation: Activation },
    Gated { value: Linear, gate: Linear },
}

impl FeedForward {
    fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        match self {
            FeedForward::Dense { up, activation } => {
                let mut y = up.forward(&x.view());
                let act: fn(f32) -> f32 = match activation {
                    Activation::Gelu => gelu,
                    Activation::GeluTanh => gelu_tanh,
                    Activation::Relu => relu,
                    Activation::SwiGlu => silu,
                };
                y.mapv_inplace(act);
                y
            }
            FeedForward::Gated { value, gate } => {
                let mut y = value.forward(&x.view());
                let g = gate.forward(&x.view());
                y.zip_mut_with(&g, |v, &g| *v *= silu(g));
                y
            }
        }
    }
}

#[derive(Debug)]
struct Layer {
    /// Fused `[q | k | v]` projection.
    qkv: Linear,
    out: Linear,
    attn_norm: LayerNorm,
    ffn: FeedForward,
    down: Linear,
    ffn_norm: LayerNorm,
}

/// Rotary state for one forward call.
struct RotaryTables<'a> {
    rotary: &'a Rotary,
    cos: Array2<f32>,
    sin: Array2<f32>,
}

/// BERT-family encoder with weights in memory.
#[derive(Debug)]
pub struct Encoder {
    config: EncoderConfig,
    embeddings: Embeddings,
    layers: Vec<Layer>,
    rotary: Option<Rotary>,
}

impl Encoder {
    /// Reads `config.json` and a safetensors checkpoint.
    pub fn from_files(
        config_path: impl AsRef<Path>,
        weights_path: impl AsRef<Path>,
    ) -> Result<Self, EngineError> {
        let started = Instant::now();
        let config = EncoderConfig::from_file(config_path)?;
        let weights_path = weights_path.as_ref();
        let bytes = fs::read(weights_path).map_err(|e| {
            EngineError::Load(format!("reading {} failed: {e}", weights_path.display()))
        })?;
        let encoder = Self::from_checkpoint(config, &bytes)?;
        info!(
            architecture = ?encoder.config.architecture,
            layers = encoder.config.num_layers,
            hidden = encoder.config.hidden_size,
            checkpoint_bytes = bytes.len(),
            elapsed_micros = started.elapsed().as_micros() as u64,
            "encoder_loaded"
        );
        Ok(encoder)
    }

    /// Builds the encoder from checkpoint bytes already in memory.
    pub fn from_checkpoint(config: EncoderConfig, bytes: &[u8]) -> Result<Self, EngineError> {
        config.validate()?;
        let store = WeightStore::new(bytes, WORD_EMBEDDINGS)?;
        debug!(prefix = store.prefix(), "checkpoint_opened");
        let (embeddings, layers) = match config.architecture {
            Architecture::Bert => load_bert(&config, &store)?,
            Architecture::NomicBert => load_nomic(&config, &store)?,
        };
        let rotary = config
            .rotary
            .map(|r| Rotary::new(r.rotary_dim(config.head_dim()), r.base, r.interleaved));
        Ok(Self {
            config,
            embeddings,
            layers,
            rotary,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    fn check_batch(&self, batch: &Batch) -> Result<(), EngineError> {
        let ids = batch.input_ids();
        if ids.dim() != batch.attention_mask().dim() {
            return Err(EngineError::ModelExecution(format!(
                "ids shape {:?} does not match mask shape {:?}",
                ids.dim(),
                batch.attention_mask().dim()
            )));
        }
        if batch.width() > self.config.max_positions {
            return Err(EngineError::ModelExecution(format!(
                "padded width {} exceeds the model's {} positions",
                batch.width(),
                self.config.max_positions
            )));
        }
        if let Some(&bad) = ids.iter().find(|&&id| id as usize >= self.config.vocab_size) {
            return Err(EngineError::ModelExecution(format!(
                "token id {bad} is outside the vocabulary of {}",
                self.config.vocab_size
            )));
        }
        Ok(())
    }

    fn forward_row(
        &self,
        ids: ArrayView1<u32>,
        mask: ArrayView1<bool>,
        rotary: Option<&RotaryTables<'_>>,
    ) -> Array2<f32> {
        let width = ids.len();
        let emb = &self.embeddings;
        let mut x = Array2::<f32>::zeros((width, self.config.hidden_size));
        for (p, (mut row, &id)) in x.rows_mut().into_iter().zip(ids.iter()).enumerate() {
            row.assign(&emb.word.row(id as usize));
            if let Some(position) = &emb.position {
                row += &position.row(p);
            }
            if let Some(token_type) = &emb.token_type {
                row += token_type;
            }
        }
        emb.norm.forward_in_place(&mut x);

        let visible: Vec<bool> = mask.to_vec();
        for layer in &self.layers {
            x = self.layer_forward(layer, x, &visible, rotary);
        }
        x
    }

    fn layer_forward(
        &self,
        layer: &Layer,
        x: Array2<f32>,
        visible: &[bool],
        rotary: Option<&RotaryTables<'_>>,
    ) -> Array2<f32> {
        let hidden = self.config.hidden_size;
        let head_dim = self.config.head_dim();
        let scale = (head_dim as f32).sqrt().recip();

        let mut qkv = layer.qkv.forward(&x.view());
        if let Some(tables) = rotary {
            for head in 0..self.config.num_heads {
                for base in [0, hidden] {
                    let start = base + head * head_dim;
                    let mut block = qkv.slice_mut(s![.., start..start + head_dim]);
                    tables.rotary.apply(&mut block, &tables.cos, &tables.sin);
                }
            }
        }

        let mut context = Array2::<f32>::zeros((x.nrows(), hidden));
        for head in 0..self.config.num_heads {
            let cols = head * head_dim..(head + 1) * head_dim;
            let q = qkv.slice(s![.., cols.clone()]);
            let k = qkv.slice(s![.., hidden + cols.start..hidden + cols.end]);
            let v = qkv.slice(s![.., 2 * hidden + cols.start..2 * hidden + cols.end]);

            let mut scores = q.dot(&k.t());
            scores *= scale;
            for row in scores.rows_mut() {
                masked_softmax_in_place(row, visible);
            }
            context.slice_mut(s![.., cols]).assign(&scores.dot(&v));
        }

        let mut attended = layer.out.forward(&context.view());
        attended += &x;
        layer.attn_norm.forward_in_place(&mut attended);

        let inner = layer.ffn.forward(&attended);
        let mut out = layer.down.forward(&inner.view());
        out += &attended;
        layer.ffn_norm.forward_in_place(&mut out);
        out
    }
}

impl InferenceEngine for Encoder {
    fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    fn max_positions(&self) -> usize {
        self.config.max_positions
    }

    fn forward(&self, batch: &Batch) -> Result<Array3<f32>, EngineError> {
        self.check_batch(batch)?;
        let (rows, width) = batch.input_ids().dim();
        let hidden = self.config.hidden_size;
        if rows == 0 {
            return Ok(Array3::zeros((0, width, hidden)));
        }

        let tables = self.rotary.as_ref().map(|rotary| {
            let (cos, sin) = rotary.tables(width);
            RotaryTables { rotary, cos, sin }
        });
        let ids = batch.input_ids();
        let mask = batch.attention_mask();

        // Rows are independent, so each runs whole on one worker and a
        // document's output does not depend on its batch neighbours.
        let outputs: Vec<Array2<f32>> = (0..rows)
            .into_par_iter()
            .map(|r| self.forward_row(ids.row(r), mask.row(r), tables.as_ref()))
            .collect();
        let views: Vec<_> = outputs.iter().map(|a| a.view()).collect();
        let states = stack(Axis(0), &views)
            .map_err(|e| EngineError::ModelExecution(format!("stacking rows failed: {e}")))?;

        if states.dim() != (rows, width, hidden) {
            return Err(EngineError::ModelExecution(format!(
                "forward produced shape {:?}, expected {:?}",
                states.dim(),
                (rows, width, hidden)
            )));
        }
        Ok(states)
    }
}

fn layer_norm(
    store: &WeightStore<'_>,
    base: &str,
    width: usize,
    eps: f32,
) -> Result<LayerNorm, EngineError> {
    // TF-converted checkpoints name the affine parameters gamma/beta.
    let (w, b) = if store.contains(&format!("{base}.weight")) {
        ("weight", "bias")
    } else {
        ("gamma", "beta")
    };
    LayerNorm::new(
        store.vector(&format!("{base}.{w}"), width)?,
        store.vector(&format!("{base}.{b}"), width)?,
        eps,
    )
}

fn linear(
    store: &WeightStore<'_>,
    base: &str,
    shape: (usize, usize),
    bias: bool,
) -> Result<Linear, EngineError> {
    Linear::from_checkpoint(
        store.matrix(&format!("{base}.weight"), shape)?,
        store.bias(&format!("{base}.bias"), shape.0, bias)?,
    )
}

fn embeddings(
    config: &EncoderConfig,
    store: &WeightStore<'_>,
    position: Option<&str>,
    norm: &str,
) -> Result<Embeddings, EngineError> {
    let h = config.hidden_size;
    let token_type = if config.type_vocab_size > 0
        && store.contains("embeddings.token_type_embeddings.weight")
    {
        let table = store.matrix(
            "embeddings.token_type_embeddings.weight",
            (config.type_vocab_size, h),
        )?;
        Some(table.row(0).to_owned())
    } else {
        None
    };
    Ok(Embeddings {
        word: store.matrix(WORD_EMBEDDINGS, (config.vocab_size, h))?,
        position: position
            .map(|name| store.matrix(name, (config.max_positions, h)))
            .transpose()?,
        token_type,
        norm: layer_norm(store, norm, h, config.layer_norm_eps)?,
    })
}

fn load_bert(
    config: &EncoderConfig,
    store: &WeightStore<'_>,
) -> Result<(Embeddings, Vec<Layer>), EngineError> {
    let h = config.hidden_size;
    let inter = config.intermediate_size;
    let eps = config.layer_norm_eps;
    let embeddings = embeddings(
        config,
        store,
        Some("embeddings.position_embeddings.weight"),
        "embeddings.LayerNorm",
    )?;

    let mut layers = Vec::with_capacity(config.num_layers);
    for i in 0..config.num_layers {
        let p = format!("encoder.layer.{i}.");
        let mut weights = Vec::with_capacity(3);
        let mut biases = Vec::with_capacity(3);
        for proj in ["query", "key", "value"] {
            let base = format!("{p}attention.self.{proj}");
            weights.push(store.matrix(&format!("{base}.weight"), (h, h))?);
            biases.push(store.bias(&format!("{base}.bias"), h, config.qkv_bias)?);
        }
        let views: Vec<_> = weights.iter().map(|a| a.view()).collect();
        let weight = concatenate(Axis(0), &views)
            .map_err(|e| EngineError::Load(format!("fusing qkv of layer {i}: {e}")))?;
        let bias = match biases.as_slice() {
            [Some(q), Some(k), Some(v)] => Some(
                concatenate(Axis(0), &[q.view(), k.view(), v.view()])
                    .map_err(|e| EngineError::Load(format!("fusing qkv bias of layer {i}: {e}")))?,
            ),
            [None, None, None] => None,
            _ => {
                return Err(EngineError::Load(format!(
                    "layer {i} has biases on only some of q/k/v"
                )))
            }
        };

        layers.push(Layer {
            qkv: Linear::from_checkpoint(weight, bias)?,
            out: linear(store, &format!("{p}attention.output.dense"), (h, h), config.qkv_bias)?,
            attn_norm: layer_norm(store, &format!("{p}attention.output.LayerNorm"), h, eps)?,
            ffn: FeedForward::Dense {
                up: linear(store, &format!("{p}intermediate.dense"), (inter, h), config.fc1_bias)?,
                activation: config.activation,
            },
            down: linear(store, &format!("{p}output.dense"), (h, inter), config.fc2_bias)?,
            ffn_norm: layer_norm(store, &format!("{p}output.LayerNorm"), h, eps)?,
        });
    }
    Ok((embeddings, layers))
}

fn load_nomic(
    config: &EncoderConfig,
    store: &WeightStore<'_>,
) -> Result<(Embeddings, Vec<Layer>), EngineError> {
    let h = config.hidden_size;
    let inter = config.intermediate_size;
    let eps = config.layer_norm_eps;
    let embeddings = embeddings(config, store, None, "emb_ln")?;

    let mut layers = Vec::with_capacity(config.num_layers);
    for i in 0..config.num_layers {
        let p = format!("encoder.layers.{i}.");
        let ffn = if config.activation.is_gated() {
            FeedForward::Gated {
                value: linear(store, &format!("{p}mlp.fc11"), (inter, h), config.fc1_bias)?,
                gate: linear(store, &format!("{p}mlp.fc12"), (inter, h), config.fc1_bias)?,
            }
        } else {
            FeedForward::Dense {
                up: linear(store, &format!("{p}mlp.fc1"), (inter, h), config.fc1_bias)?,
                activation: config.activation,
            }
        };
        layers.push(Layer {
            qkv: linear(store, &format!("{p}attn.Wqkv"), (3 * h, h), config.qkv_bias)?,
            out: linear(store, &format!("{p}attn.out_proj"), (h, h), config.qkv_bias)?,
            attn_norm: layer_norm(store, &format!("{p}norm1"), h, eps)?,
            ffn,
            down: linear(store, &format!("{p}mlp.fc2"), (h, inter), config.fc2_bias)?,
            ffn_norm: layer_norm(store, &format!("{p}norm2"), h, eps)?,
        });
    }
    Ok((embeddings, layers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture;
    use ndarray::array;
    use tokenizer::TokenSequence;

    const VOCAB: usize = 40;

    fn bert() -> Encoder {
        let config = fixture::tiny_bert_config(VOCAB);
        let bytes = fixture::checkpoint(&config, 11).unwrap();
        Encoder::from_checkpoint(config, &bytes).unwrap()
    }

    fn nomic() -> Encoder {
        let config = fixture::tiny_nomic_config(VOCAB);
        let bytes = fixture::checkpoint(&config, 12).unwrap();
        Encoder::from_checkpoint(config, &bytes).unwrap()
    }

    fn seq(ids: &[u32]) -> TokenSequence {
        TokenSequence {
            ids: ids.to_vec(),
            attention_mask: vec![true; ids.len()],
            truncated: false,
        }
    }

    fn max_abs_diff(a: ndarray::ArrayView2<f32>, b: ndarray::ArrayView2<f32>) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn output_shape_matches_batch() {
        for encoder in [bert(), nomic()] {
            let batch = Batch::from_sequences(0, &[seq(&[2, 7, 3]), seq(&[2, 3])], 0).unwrap();
            let states = encoder.forward(&batch).unwrap();
            assert_eq!(states.dim(), (2, 3, fixture::TINY_HIDDEN));
            assert!(states.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn padding_does_not_change_real_positions() {
        for encoder in [bert(), nomic()] {
            let alone = Batch::from_sequences(0, &[seq(&[2, 9, 10, 3])], 0).unwrap();
            let padded =
                Batch::from_sequences(0, &[seq(&[2, 9, 10, 3]), seq(&[2, 5, 6, 7, 8, 11, 3])], 0)
                    .unwrap();
            let a = encoder.forward(&alone).unwrap();
            let b = encoder.forward(&padded).unwrap();
            let diff = max_abs_diff(
                a.index_axis(Axis(0), 0),
                b.index_axis(Axis(0), 0).slice(s![0..4, ..]),
            );
            assert!(diff < 1e-5, "padding leaked into real positions: {diff}");
        }
    }

    #[test]
    fn forward_is_deterministic() {
        let encoder = bert();
        let batch = Batch::from_sequences(0, &[seq(&[2, 12, 13, 14, 3]), seq(&[2, 3])], 0).unwrap();
        let first = encoder.forward(&batch).unwrap();
        let second = encoder.forward(&batch).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn content_changes_output() {
        let encoder = nomic();
        let batch = Batch::from_sequences(0, &[seq(&[2, 12, 3]), seq(&[2, 13, 3])], 0).unwrap();
        let states = encoder.forward(&batch).unwrap();
        let diff = max_abs_diff(
            states.index_axis(Axis(0), 0),
            states.index_axis(Axis(0), 1),
        );
        assert!(diff > 1e-3);
    }

    #[test]
    fn rotary_makes_nomic_order_sensitive() {
        let encoder = nomic();
        let batch = Batch::from_sequences(0, &[seq(&[2, 12, 13, 3]), seq(&[2, 13, 12, 3])], 0)
            .unwrap();
        let states = encoder.forward(&batch).unwrap();
        let first = states.slice(s![0, 0, ..]).to_owned();
        let second = states.slice(s![1, 0, ..]).to_owned();
        let diff = first
            .iter()
            .zip(second.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(diff > 1e-6);
    }

    #[test]
    fn rejects_out_of_vocabulary_ids() {
        let batch = Batch::from_sequences(0, &[seq(&[2, VOCAB as u32, 3])], 0).unwrap();
        let err = bert().forward(&batch).unwrap_err();
        assert!(matches!(err, EngineError::ModelExecution(_)));
    }

    #[test]
    fn rejects_width_past_position_table() {
        let ids: Vec<u32> = vec![5; fixture::TINY_MAX_POSITIONS + 1];
        let batch = Batch::from_sequences(0, &[seq(&ids)], 0).unwrap();
        let err = bert().forward(&batch).unwrap_err();
        assert!(err.to_string().contains("positions"));
    }

    #[test]
    fn empty_batch_has_no_rows() {
        let batch = Batch::from_arrays(0, Array2::zeros((0, 1)), Array2::from_elem((0, 1), false))
            .unwrap();
        assert_eq!(bert().forward(&batch).unwrap().dim(), (0, 1, fixture::TINY_HIDDEN));
    }

    #[test]
    fn fully_masked_row_stays_finite() {
        let batch = Batch::from_arrays(0, array![[2u32, 3]], array![[false, false]]).unwrap();
        let states = bert().forward(&batch).unwrap();
        assert!(states.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn missing_tensor_is_a_load_error() {
        let config = fixture::tiny_bert_config(VOCAB);
        let mut other = config.clone();
        other.num_layers = 1;
        let bytes = fixture::checkpoint(&other, 1).unwrap();
        let err = Encoder::from_checkpoint(config, &bytes).unwrap_err();
        assert!(err.to_string().contains("encoder.layer.1."));
    }

    #[test]
    fn mismatched_vocab_is_a_load_error() {
        let bytes = fixture::checkpoint(&fixture::tiny_bert_config(VOCAB), 1).unwrap();
        let err = Encoder::from_checkpoint(fixture::tiny_bert_config(VOCAB + 1), &bytes)
            .unwrap_err();
        assert!(matches!(err, EngineError::Load(_)));
    }

    #[test]
    fn loads_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture::tiny_nomic_config(VOCAB);
        std::fs::write(dir.path().join("config.json"), fixture::config_json(&config)).unwrap();
        std::fs::write(
            dir.path().join("model.safetensors"),
            fixture::checkpoint(&config, 3).unwrap(),
        )
        .unwrap();
        let encoder = Encoder::from_files(
            dir.path().join("config.json"),
            dir.path().join("model.safetensors"),
        )
        .unwrap();
        assert_eq!(encoder.config(), &config);
        assert_eq!(encoder.hidden_size(), fixture::TINY_HIDDEN);
        assert_eq!(encoder.max_positions(), 2048);
    }
}
