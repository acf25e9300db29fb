//! Typed, shape-checked access to a safetensors checkpoint.

use half::{bf16, f16};
use ndarray::{Array1, Array2};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use crate::error::EngineError;

/// Prefixes tried, in order, when locating the encoder's tensors. Checkpoints
/// exported with a task head nest the encoder under `bert.` or `model.`.
const PREFIXES: [&str; 3] = ["", "bert.", "model."];

pub struct WeightStore<'a> {
    tensors: SafeTensors<'a>,
    prefix: &'static str,
}

impl<'a> WeightStore<'a> {
    /// Parses the checkpoint header and picks the prefix under which `probe`
    /// exists.
    pub fn new(bytes: &'a [u8], probe: &str) -> Result<Self, EngineError> {
        let tensors = SafeTensors::deserialize(bytes)?;
        let prefix = PREFIXES
            .into_iter()
            .find(|prefix| tensors.tensor(&format!("{prefix}{probe}")).is_ok())
            .ok_or_else(|| {
                EngineError::Load(format!("checkpoint has no `{probe}` tensor"))
            })?;
        Ok(Self { tensors, prefix })
    }

    pub fn prefix(&self) -> &str {
        self.prefix
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.tensor(&self.full_name(name)).is_ok()
    }

    pub fn matrix(&self, name: &str, shape: (usize, usize)) -> Result<Array2<f32>, EngineError> {
        let values = self.load(name, &[shape.0, shape.1])?;
        Array2::from_shape_vec(shape, values)
            .map_err(|e| EngineError::Load(format!("tensor `{name}`: {e}")))
    }

    pub fn vector(&self, name: &str, len: usize) -> Result<Array1<f32>, EngineError> {
        self.load(name, &[len]).map(Array1::from_vec)
    }

    pub fn optional_vector(
        &self,
        name: &str,
        len: usize,
    ) -> Result<Option<Array1<f32>>, EngineError> {
        if self.contains(name) {
            self.vector(name, len).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Loads a `[len]` vector that must be present when `required` is set.
    pub fn bias(
        &self,
        name: &str,
        len: usize,
        required: bool,
    ) -> Result<Option<Array1<f32>>, EngineError> {
        if required {
            self.vector(name, len).map(Some)
        } else {
            self.optional_vector(name, len)
        }
    }

    fn full_name(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    fn load(&self, name: &str, expected: &[usize]) -> Result<Vec<f32>, EngineError> {
        let full = self.full_name(name);
        let view = self
            .tensors
            .tensor(&full)
            .map_err(|_| EngineError::Load(format!("checkpoint is missing `{full}`")))?;
        if view.shape() != expected {
            return Err(EngineError::Load(format!(
                "tensor `{full}` has shape {:?}, expected {expected:?}",
                view.shape()
            )));
        }
        to_f32(&view).map_err(|msg| EngineError::Load(format!("tensor `{full}`: {msg}")))
    }
}

/// Widens the tensor to `f32`. Half-precision checkpoints are converted
/// once here so the forward pass runs in a single precision.
fn to_f32(view: &TensorView<'_>) -> Result<Vec<f32>, String> {
    let data = view.data();
    match view.dtype() {
        Dtype::F32 => Ok(data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()),
        Dtype::F16 => Ok(data
            .chunks_exact(2)
            .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect()),
        Dtype::BF16 => Ok(data
            .chunks_exact(2)
            .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect()),
        other => Err(format!("unsupported dtype {other:?}")),
    }
}
