//! Vector quantization: f32 → int8 (scalar) or 1 bit per dimension (binary).
//!
//! The mode is chosen once per collection before the first insert. Quantized
//! vectors are decoded back to f32 for distance computation, so every search path
//! compares the f32 query against the same reconstruction.

/// 1-bit quantization thresholded at the per-vector median.
pub mod binary;
/// int8 quantization with per-vector scale and offset.
pub mod scalar;

pub use binary::{decode_binary_into, encode_binary_into, quantize_binary, BinaryParams, BitVector};
pub use scalar::{decode_scalar_into, encode_scalar_into, quantize_scalar, ScalarParams};

use serde::{Deserialize, Serialize};

/// Storage representation of vectors in a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuantizationMode {
    /// Full-precision f32.
    #[default]
    None,
    /// int8 codes, 4x smaller than f32.
    Scalar,
    /// 1 bit per dimension, 32x smaller than f32.
    Binary,
}

impl QuantizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantizationMode::None => "none",
            QuantizationMode::Scalar => "scalar",
            QuantizationMode::Binary => "binary",
        }
    }

    /// Payload bytes for one vector of `dim` components, excluding per-vector parameters.
    pub fn payload_bytes(&self, dim: usize) -> usize {
        match self {
            QuantizationMode::None => dim * std::mem::size_of::<f32>(),
            QuantizationMode::Scalar => dim,
            QuantizationMode::Binary => binary::words_for(dim) * std::mem::size_of::<u64>(),
        }
    }

    /// Bytes of per-vector reconstruction parameters.
    pub fn param_bytes(&self) -> usize {
        match self {
            QuantizationMode::None => 0,
            QuantizationMode::Scalar => std::mem::size_of::<ScalarParams>(),
            QuantizationMode::Binary => std::mem::size_of::<BinaryParams>(),
        }
    }
}
