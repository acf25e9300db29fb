//! Encoder hyper-parameters read from a model's `config.json`.
//!
//! Two dialects are accepted: the BERT layout (`hidden_size`,
//! `num_attention_heads`, ...) and the GPT-style names NomicBERT ships
//! (`n_embd`, `n_head`, ...). Both land in one [`EncoderConfig`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

const DEFAULT_LAYER_NORM_EPS: f32 = 1e-12;
const DEFAULT_ROTARY_BASE: f32 = 10_000.0;

/// Which weight layout and position scheme the encoder uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    /// Learned absolute positions, separate q/k/v projections, dense FFN.
    Bert,
    /// Rotary positions, fused qkv, gated SwiGLU FFN.
    NomicBert,
}

/// Feed-forward non-linearity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Exact GELU via erf.
    Gelu,
    /// Tanh approximation (`gelu_new`, `gelu_pytorch_tanh`).
    GeluTanh,
    Relu,
    /// Gated: `fc11(x) * silu(fc12(x))`.
    SwiGlu,
}

impl Activation {
    fn parse(name: &str) -> Result<Self, EngineError> {
        match name.to_ascii_lowercase().as_str() {
            "gelu" => Ok(Activation::Gelu),
            "gelu_new" | "gelu_tanh" | "gelu_pytorch_tanh" | "gelu_fast" => Ok(Activation::GeluTanh),
            "relu" => Ok(Activation::Relu),
            "swiglu" => Ok(Activation::SwiGlu),
            other => Err(EngineError::Load(format!(
                "unsupported activation `{other}`"
            ))),
        }
    }

    pub fn is_gated(self) -> bool {
        matches!(self, Activation::SwiGlu)
    }
}

/// Rotary position embedding parameters (NomicBERT only).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotaryConfig {
    pub base: f32,
    /// Leading share of each head's dimensions that is rotated.
    pub fraction: f32,
    /// Rotate adjacent pairs `(0,1),(2,3)...` instead of halves.
    pub interleaved: bool,
}

impl RotaryConfig {
    /// Number of rotated dimensions per head, always even.
    pub fn rotary_dim(&self, head_dim: usize) -> usize {
        let dim = (head_dim as f32 * self.fraction).round() as usize;
        dim.min(head_dim) & !1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub architecture: Architecture,
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub intermediate_size: usize,
    pub activation: Activation,
    pub layer_norm_eps: f32,
    pub max_positions: usize,
    pub type_vocab_size: usize,
    pub rotary: Option<RotaryConfig>,
    pub qkv_bias: bool,
    pub fc1_bias: bool,
    pub fc2_bias: bool,
}

impl EncoderConfig {
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            EngineError::Load(format!("reading {} failed: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let raw: RawConfig = serde_json::from_str(json)?;
        raw.resolve()
    }

    /// Rejects shapes the forward pass cannot execute.
    pub fn validate(&self) -> Result<(), EngineError> {
        let fail = |msg: String| Err(EngineError::Load(msg));
        if self.hidden_size == 0 || self.num_heads == 0 || self.num_layers == 0 {
            return fail("hidden_size, num_heads and num_layers must be positive".into());
        }
        if self.hidden_size % self.num_heads != 0 {
            return fail(format!(
                "hidden_size {} is not divisible by {} heads",
                self.hidden_size, self.num_heads
            ));
        }
        if self.vocab_size == 0 || self.max_positions == 0 || self.intermediate_size == 0 {
            return fail("vocab_size, max_positions and intermediate_size must be positive".into());
        }
        if self.layer_norm_eps.is_nan() || self.layer_norm_eps <= 0.0 {
            return fail(format!("layer_norm_eps {} must be positive", self.layer_norm_eps));
        }
        match self.architecture {
            Architecture::Bert if self.activation.is_gated() => {
                fail("gated activations need the nomic_bert layout".into())
            }
            Architecture::NomicBert if self.rotary.is_none() => {
                fail("nomic_bert requires rotary parameters".into())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    model_type: Option<String>,
    vocab_size: Option<usize>,
    #[serde(alias = "n_embd")]
    hidden_size: Option<usize>,
    #[serde(alias = "n_head")]
    num_attention_heads: Option<usize>,
    #[serde(alias = "n_layer")]
    num_hidden_layers: Option<usize>,
    #[serde(alias = "n_inner")]
    intermediate_size: Option<usize>,
    #[serde(alias = "activation_function")]
    hidden_act: Option<String>,
    #[serde(alias = "layer_norm_epsilon")]
    layer_norm_eps: Option<f32>,
    #[serde(alias = "n_positions")]
    max_position_embeddings: Option<usize>,
    type_vocab_size: Option<usize>,
    rotary_emb_base: Option<f32>,
    rotary_emb_fraction: Option<f32>,
    rotary_emb_interleaved: Option<bool>,
    qkv_proj_bias: Option<bool>,
    mlp_fc1_bias: Option<bool>,
    mlp_fc2_bias: Option<bool>,
    prenorm: Option<bool>,
    position_embedding_type: Option<String>,
}

impl RawConfig {
    fn resolve(self) -> Result<EncoderConfig, EngineError> {
        let architecture = match self.model_type.as_deref() {
            Some("nomic_bert") => Architecture::NomicBert,
            Some("bert") | None => Architecture::Bert,
            Some(other) => {
                return Err(EngineError::Load(format!(
                    "unsupported model_type `{other}`"
                )))
            }
        };
        if self.prenorm == Some(true) {
            return Err(EngineError::Load("pre-norm encoders are not supported".into()));
        }
        if let Some(kind) = self.position_embedding_type.as_deref() {
            if kind != "absolute" {
                return Err(EngineError::Load(format!(
                    "unsupported position_embedding_type `{kind}`"
                )));
            }
        }

        let required = |value: Option<usize>, name: &str| {
            value.ok_or_else(|| EngineError::Load(format!("config.json is missing `{name}`")))
        };
        let hidden_size = required(self.hidden_size, "hidden_size")?;
        let nomic = architecture == Architecture::NomicBert;
        let activation = match self.hidden_act.as_deref() {
            Some(name) => Activation::parse(name)?,
            None if nomic => Activation::SwiGlu,
            None => Activation::Gelu,
        };
        let rotary = nomic.then(|| RotaryConfig {
            base: self.rotary_emb_base.unwrap_or(DEFAULT_ROTARY_BASE),
            fraction: self.rotary_emb_fraction.unwrap_or(1.0),
            interleaved: self.rotary_emb_interleaved.unwrap_or(false),
        });

        let config = EncoderConfig {
            architecture,
            vocab_size: required(self.vocab_size, "vocab_size")?,
            hidden_size,
            num_heads: required(self.num_attention_heads, "num_attention_heads")?,
            num_layers: required(self.num_hidden_layers, "num_hidden_layers")?,
            intermediate_size: self.intermediate_size.unwrap_or(4 * hidden_size),
            activation,
            layer_norm_eps: self.layer_norm_eps.unwrap_or(DEFAULT_LAYER_NORM_EPS),
            max_positions: self.max_position_embeddings.unwrap_or(512),
            type_vocab_size: self.type_vocab_size.unwrap_or(2),
            rotary,
            qkv_bias: self.qkv_proj_bias.unwrap_or(!nomic),
            fc1_bias: self.mlp_fc1_bias.unwrap_or(!nomic),
            fc2_bias: self.mlp_fc2_bias.unwrap_or(!nomic),
        };
        config.validate()?;
        Ok(config)
    }
}
