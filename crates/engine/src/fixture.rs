//! Deterministic miniature encoders for tests and benchmarks.
//!
//! Weights come from a seeded `fastrand::Rng`, so a given seed always
//! produces the same checkpoint bytes.

use std::collections::HashMap;

use safetensors::tensor::TensorView;
use safetensors::Dtype;
use serde_json::json;

use crate::config::{Activation, Architecture, EncoderConfig, RotaryConfig};
use crate::error::EngineError;

/// Hidden width of the fixture encoders.
pub const TINY_HIDDEN: usize = 32;
pub const TINY_HEADS: usize = 4;
pub const TINY_LAYERS: usize = 2;
pub const TINY_INTERMEDIATE: usize = 64;
pub const TINY_MAX_POSITIONS: usize = 128;

/// One named tensor, already in little-endian bytes.
#[derive(Debug, Clone)]
pub struct FixtureTensor {
    pub name: String,
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl FixtureTensor {
    pub fn f32(name: &str, shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self {
            name: name.to_string(),
            dtype: Dtype::F32,
            shape,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }
}

/// Encodes tensors in the safetensors format.
pub fn serialize_tensors(tensors: Vec<FixtureTensor>) -> Result<Vec<u8>, EngineError> {
    let views = tensors
        .iter()
        .map(|t| {
            TensorView::new(t.dtype, t.shape.clone(), &t.data).map(|view| (t.name.clone(), view))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let metadata: Option<HashMap<String, String>> = None;
    Ok(safetensors::serialize(views, &metadata)?)
}

pub fn tiny_bert_config(vocab_size: usize) -> EncoderConfig {
    EncoderConfig {
        architecture: Architecture::Bert,
        vocab_size,
        hidden_size: TINY_HIDDEN,
        num_heads: TINY_HEADS,
        num_layers: TINY_LAYERS,
        intermediate_size: TINY_INTERMEDIATE,
        activation: Activation::Gelu,
        layer_norm_eps: 1e-12,
        max_positions: TINY_MAX_POSITIONS,
        type_vocab_size: 2,
        rotary: None,
        qkv_bias: true,
        fc1_bias: true,
        fc2_bias: true,
    }
}

pub fn tiny_nomic_config(vocab_size: usize) -> EncoderConfig {
    EncoderConfig {
        architecture: Architecture::NomicBert,
        vocab_size,
        hidden_size: TINY_HIDDEN,
        num_heads: TINY_HEADS,
        num_layers: TINY_LAYERS,
        intermediate_size: TINY_INTERMEDIATE,
        activation: Activation::SwiGlu,
        layer_norm_eps: 1e-12,
        max_positions: 2048,
        type_vocab_size: 2,
        rotary: Some(RotaryConfig {
            base: 1000.0,
            fraction: 1.0,
            interleaved: false,
        }),
        qkv_bias: false,
        fc1_bias: false,
        fc2_bias: false,
    }
}

/// `config.json` in the dialect the architecture ships with.
pub fn config_json(config: &EncoderConfig) -> String {
    let value = match config.architecture {
        Architecture::Bert => json!({
            "architectures": ["BertModel"],
            "model_type": "bert",
            "vocab_size": config.vocab_size,
            "hidden_size": config.hidden_size,
            "num_attention_heads": config.num_heads,
            "num_hidden_layers": config.num_layers,
            "intermediate_size": config.intermediate_size,
            "hidden_act": activation_name(config.activation),
            "layer_norm_eps": config.layer_norm_eps,
            "max_position_embeddings": config.max_positions,
            "type_vocab_size": config.type_vocab_size,
            "position_embedding_type": "absolute",
        }),
        Architecture::NomicBert => {
            let rotary = config.rotary.unwrap_or(RotaryConfig {
                base: 1000.0,
                fraction: 1.0,
                interleaved: false,
            });
            json!({
                "architectures": ["NomicBertModel"],
                "model_type": "nomic_bert",
                "vocab_size": config.vocab_size,
                "n_embd": config.hidden_size,
                "n_head": config.num_heads,
                "n_layer": config.num_layers,
                "n_inner": config.intermediate_size,
                "activation_function": activation_name(config.activation),
                "layer_norm_epsilon": config.layer_norm_eps,
                "n_positions": config.max_positions,
                "type_vocab_size": config.type_vocab_size,
                "rotary_emb_base": rotary.base,
                "rotary_emb_fraction": rotary.fraction,
                "rotary_emb_interleaved": rotary.interleaved,
                "qkv_proj_bias": config.qkv_bias,
                "mlp_fc1_bias": config.fc1_bias,
                "mlp_fc2_bias": config.fc2_bias,
                "prenorm": false,
            })
        }
    };
    value.to_string()
}

fn activation_name(activation: Activation) -> &'static str {
    match activation {
        Activation::Gelu => "gelu",
        Activation::GeluTanh => "gelu_new",
        Activation::Relu => "relu",
        Activation::SwiGlu => "swiglu",
    }
}

/// Random checkpoint matching `config`, under the tensor names the real
/// checkpoints of that architecture use.
pub fn checkpoint(config: &EncoderConfig, seed: u64) -> Result<Vec<u8>, EngineError> {
    let mut builder = Generator::new(seed);
    let h = config.hidden_size;
    let inter = config.intermediate_size;

    builder.random("embeddings.word_embeddings.weight", &[config.vocab_size, h], 0.5);
    builder.random(
        "embeddings.token_type_embeddings.weight",
        &[config.type_vocab_size, h],
        0.1,
    );

    match config.architecture {
        Architecture::Bert => {
            builder.random(
                "embeddings.position_embeddings.weight",
                &[config.max_positions, h],
                0.1,
            );
            builder.layer_norm("embeddings.LayerNorm", h);
            for i in 0..config.num_layers {
                let p = format!("encoder.layer.{i}.");
                for proj in ["query", "key", "value"] {
                    builder.linear(&format!("{p}attention.self.{proj}"), h, h, true);
                }
                builder.linear(&format!("{p}attention.output.dense"), h, h, true);
                builder.layer_norm(&format!("{p}attention.output.LayerNorm"), h);
                builder.linear(&format!("{p}intermediate.dense"), inter, h, true);
                builder.linear(&format!("{p}output.dense"), h, inter, true);
                builder.layer_norm(&format!("{p}output.LayerNorm"), h);
            }
        }
        Architecture::NomicBert => {
            builder.layer_norm("emb_ln", h);
            for i in 0..config.num_layers {
                let p = format!("encoder.layers.{i}.");
                builder.linear(&format!("{p}attn.Wqkv"), 3 * h, h, config.qkv_bias);
                builder.linear(&format!("{p}attn.out_proj"), h, h, config.qkv_bias);
                builder.linear(&format!("{p}mlp.fc11"), inter, h, config.fc1_bias);
                builder.linear(&format!("{p}mlp.fc12"), inter, h, config.fc1_bias);
                builder.linear(&format!("{p}mlp.fc2"), h, inter, config.fc2_bias);
                builder.layer_norm(&format!("{p}norm1"), h);
                builder.layer_norm(&format!("{p}norm2"), h);
            }
        }
    }
    serialize_tensors(builder.tensors)
}

struct Generator {
    rng: fastrand::Rng,
    tensors: Vec<FixtureTensor>,
}

impl Generator {
    fn new(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
            tensors: Vec::new(),
        }
    }

    fn random(&mut self, name: &str, shape: &[usize], scale: f32) {
        let count: usize = shape.iter().product();
        let values = (0..count)
            .map(|_| (self.rng.f32() * 2.0 - 1.0) * scale)
            .collect();
        self.tensors
            .push(FixtureTensor::f32(name, shape.to_vec(), values));
    }

    fn linear(&mut self, name: &str, out: usize, input: usize, bias: bool) {
        let scale = (input as f32).sqrt().recip();
        self.random(&format!("{name}.weight"), &[out, input], scale);
        if bias {
            self.random(&format!("{name}.bias"), &[out], 0.02);
        }
    }

    fn layer_norm(&mut self, name: &str, width: usize) {
        let weight = (0..width).map(|_| 1.0 + (self.rng.f32() - 0.5) * 0.1).collect();
        self.tensors
            .push(FixtureTensor::f32(&format!("{name}.weight"), vec![width], weight));
        self.random(&format!("{name}.bias"), &[width], 0.02);
    }
}
