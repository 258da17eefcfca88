//! Binary quantization.
//!
//! Bit `i` is set when component `i` is above the vector's median. The mean of the
//! components on each side of the threshold is kept so the vector can be rebuilt as a
//! two-level approximation: set bits decode to `high`, clear bits to `low`.

use serde::{Deserialize, Serialize};

/// Per-vector reconstruction levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinaryParams {
    pub low: f32,
    pub high: f32,
}

/// Owned 1-bit vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitVector {
    pub bits: Vec<u64>,
    pub dim: usize,
    pub params: BinaryParams,
}

impl BitVector {
    pub fn get(&self, i: usize) -> bool {
        self.bits[i / 64] >> (i % 64) & 1 == 1
    }

    pub fn count_ones(&self) -> u32 {
        self.bits.iter().map(|w| w.count_ones()).sum()
    }

    pub fn decode(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.dim];
        decode_binary_into(&self.bits, self.params, &mut out);
        out
    }
}

/// Number of u64 words holding `dim` bits.
#[inline]
pub fn words_for(dim: usize) -> usize {
    dim.div_ceil(64)
}

fn median(vector: &[f32]) -> f32 {
    let mut sorted = vector.to_vec();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) * 0.5
    }
}

/// Encodes `vector` into `out` (`words_for(vector.len())` words).
pub fn encode_binary_into(vector: &[f32], out: &mut [u64]) -> BinaryParams {
    debug_assert_eq!(out.len(), words_for(vector.len()));
    out.fill(0);
    if vector.is_empty() {
        return BinaryParams {
            low: 0.0,
            high: 0.0,
        };
    }

    let threshold = median(vector);
    let (mut lo_sum, mut lo_n, mut hi_sum, mut hi_n) = (0.0f64, 0usize, 0.0f64, 0usize);
    for (i, &v) in vector.iter().enumerate() {
        if v > threshold {
            out[i / 64] |= 1u64 << (i % 64);
            hi_sum += v as f64;
            hi_n += 1;
        } else {
            lo_sum += v as f64;
            lo_n += 1;
        }
    }

    let low = if lo_n > 0 { (lo_sum / lo_n as f64) as f32 } else { 0.0 };
    let high = if hi_n > 0 {
        (hi_sum / hi_n as f64) as f32
    } else {
        low
    };
    BinaryParams { low, high }
}

/// Rebuilds the two-level approximation of a binary-quantized vector.
#[inline]
pub fn decode_binary_into(bits: &[u64], params: BinaryParams, out: &mut [f32]) {
    for (i, o) in out.iter_mut().enumerate() {
        *o = if bits[i / 64] >> (i % 64) & 1 == 1 {
            params.high
        } else {
            params.low
        };
    }
}

/// Owned form of [`encode_binary_into`].
pub fn quantize_binary(vector: &[f32]) -> BitVector {
    let mut bits = vec![0u64; words_for(vector.len())];
    let params = encode_binary_into(vector, &mut bits);
    BitVector {
        bits,
        dim: vector.len(),
        params,
    }
}

/// Number of differing bits.
#[inline]
pub fn hamming(a: &[u64], b: &[u64]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}
