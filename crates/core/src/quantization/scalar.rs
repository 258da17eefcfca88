//! Scalar quantization.
//!
//! Each f32 vector is mapped linearly onto the 256 int8 levels between its own
//! minimum and maximum: `scale = (max - min) / 255`, `offset = min + 128 * scale`,
//! `code = round((v - offset) / scale)`. Decoding is `offset + code * scale`, so the
//! per-component error is at most `scale / 2`.

use serde::{Deserialize, Serialize};

/// Per-vector reconstruction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalarParams {
    pub scale: f32,
    pub offset: f32,
}

/// Quantizes `vector` into `out` (same length) and returns the parameters.
pub fn encode_scalar_into(vector: &[f32], out: &mut [i8]) -> ScalarParams {
    debug_assert_eq!(vector.len(), out.len());
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for &v in vector {
        min = min.min(v);
        max = max.max(v);
    }
    if vector.is_empty() {
        return ScalarParams {
            scale: 0.0,
            offset: 0.0,
        };
    }

    let range = max - min;
    if range < f32::EPSILON {
        // Constant vector: every code decodes to `offset`.
        out.fill(0);
        return ScalarParams {
            scale: 0.0,
            offset: min,
        };
    }

    let scale = range / 255.0;
    let offset = min + 128.0 * scale;
    let inv = 1.0 / scale;
    for (o, &v) in out.iter_mut().zip(vector) {
        *o = ((v - offset) * inv).round().clamp(-128.0, 127.0) as i8;
    }
    ScalarParams { scale, offset }
}

/// Reconstructs an approximate f32 vector from int8 codes.
#[inline]
pub fn decode_scalar_into(codes: &[i8], params: ScalarParams, out: &mut [f32]) {
    debug_assert_eq!(codes.len(), out.len());
    for (o, &c) in out.iter_mut().zip(codes) {
        *o = params.offset + c as f32 * params.scale;
    }
}

/// Owned form of [`encode_scalar_into`]: `(codes, scale, offset)`.
pub fn quantize_scalar(vector: &[f32]) -> (Vec<i8>, f32, f32) {
    let mut codes = vec![0i8; vector.len()];
    let p = encode_scalar_into(vector, &mut codes);
    (codes, p.scale, p.offset)
}
