//! Distance kernels: L2, cosine and inner product over f32 slices.
//!
//! Every distance is **lower is better**. [`DistanceMetric::score`] maps a distance to a
//! similarity in \[0, 1\] where 1 means identical:
//!
//! | metric          | distance            | score                    |
//! |-----------------|---------------------|--------------------------|
//! | `L2`            | `‖a - b‖²`          | `1 / (1 + ‖a - b‖)`      |
//! | `Cosine`        | `(1 - cos) / 2`     | `(1 + cos) / 2`          |
//! | `InnerProduct`  | `-a·b`              | `1 / (1 + e^(-a·b))`     |
//!
//! A zero-norm vector has cosine similarity 0 against everything (score 0.5).
//! Kernels assume finite input; NaN and infinity are rejected at the API boundary.

pub mod simd;

use serde::{Deserialize, Serialize};

/// Distance metric used for every comparison inside a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared Euclidean distance.
    L2,
    /// Cosine distance, normalized so identical directions score 1.
    #[default]
    Cosine,
    /// Negative dot product.
    InnerProduct,
}

impl DistanceMetric {
    /// Distance between two equal-length vectors. Lower is better.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => simd::l2_sq_f32(a, b),
            DistanceMetric::Cosine => cosine_distance(simd::cosine_f32(a, b)),
            DistanceMetric::InnerProduct => -simd::dot_f32(a, b),
        }
    }

    /// Same as [`distance`](Self::distance) with the squared norm of `query` precomputed.
    /// Only cosine uses the norm.
    #[inline]
    pub fn distance_prenorm(&self, query: &[f32], b: &[f32], query_norm_sq: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => {
                cosine_distance(simd::cosine_prenorm_f32(query, b, query_norm_sq))
            }
            _ => self.distance(query, b),
        }
    }

    /// Converts a distance produced by this metric into a score in \[0, 1\].
    #[inline]
    pub fn score(&self, distance: f32) -> f32 {
        let s = match self {
            DistanceMetric::L2 => 1.0 / (1.0 + distance.max(0.0).sqrt()),
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::InnerProduct => 1.0 / (1.0 + distance.exp()),
        };
        s.clamp(0.0, 1.0)
    }

    /// Similarity score in \[0, 1\] between two vectors.
    #[inline]
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        self.score(self.distance(a, b))
    }

    /// Stable lowercase name, used in stats and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::InnerProduct => "inner_product",
        }
    }
}

#[inline]
fn cosine_distance(cos: f32) -> f32 {
    ((1.0 - cos) * 0.5).clamp(0.0, 1.0)
}

/// Distances from `query` to each candidate.
///
/// Runs the same kernel as [`DistanceMetric::distance`] for every candidate, so each
/// entry equals the scalar call bit for bit. Top-k tie-breaking relies on this.
pub fn batch_distance(metric: DistanceMetric, query: &[f32], candidates: &[&[f32]]) -> Vec<f32> {
    let query_norm_sq = simd::norm_sq_f32(query);
    candidates
        .iter()
        .map(|c| metric.distance_prenorm(query, c, query_norm_sq))
        .collect()
}

/// Distances from `query` to every `dim`-sized row of a contiguous arena.
pub fn batch_distance_contiguous(
    metric: DistanceMetric,
    query: &[f32],
    arena: &[f32],
    dim: usize,
) -> Vec<f32> {
    if dim == 0 {
        return Vec::new();
    }
    let query_norm_sq = simd::norm_sq_f32(query);
    arena
        .chunks_exact(dim)
        .map(|row| metric.distance_prenorm(query, row, query_norm_sq))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_identical_scores_one() {
        let a = [1.0, 2.0, 3.0];
        assert_eq!(DistanceMetric::L2.distance(&a, &a), 0.0);
        assert_eq!(DistanceMetric::L2.similarity(&a, &a), 1.0);
    }

    #[test]
    fn test_l2_known_distance() {
        let d = DistanceMetric::L2.distance(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((d - 25.0).abs() < 1e-5);
        assert!((DistanceMetric::L2.score(d) - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_score_range() {
        let m = DistanceMetric::Cosine;
        assert!((m.similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((m.similarity(&[1.0, 0.0], &[0.0, 1.0]) - 0.5).abs() < 1e-6);
        assert!(m.similarity(&[1.0, 0.0], &[-1.0, 0.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_defined() {
        let m = DistanceMetric::Cosine;
        let s = m.similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]);
        assert!(s.is_finite());
        assert!((s - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_inner_product_ordering() {
        let m = DistanceMetric::InnerProduct;
        let q = [1.0, 1.0];
        assert!(m.distance(&q, &[2.0, 2.0]) < m.distance(&q, &[1.0, 0.0]));
        assert!((m.score(0.0) - 0.5).abs() < 1e-6);
        assert!(m.similarity(&q, &[5.0, 5.0]) > 0.99);
    }

    #[test]
    fn test_batch_matches_scalar_exactly() {
        let q: Vec<f32> = (0..37).map(|i| (i as f32 * 0.3).cos()).collect();
        let rows: Vec<Vec<f32>> = (0..9)
            .map(|r| (0..37).map(|i| ((i * (r + 2)) as f32 * 0.11).sin()).collect())
            .collect();
        let refs: Vec<&[f32]> = rows.iter().map(|r| r.as_slice()).collect();
        let arena: Vec<f32> = rows.iter().flatten().copied().collect();
        for metric in [
            DistanceMetric::L2,
            DistanceMetric::Cosine,
            DistanceMetric::InnerProduct,
        ] {
            let batch = batch_distance(metric, &q, &refs);
            let contiguous = batch_distance_contiguous(metric, &q, &arena, 37);
            for (i, row) in rows.iter().enumerate() {
                let single = metric.distance(&q, row);
                assert_eq!(batch[i].to_bits(), single.to_bits(), "{metric:?} row {i}");
                assert_eq!(contiguous[i].to_bits(), single.to_bits());
            }
        }
    }

    #[test]
    fn test_metric_serde_names() {
        let json = serde_json::to_string(&DistanceMetric::InnerProduct).unwrap();
        assert_eq!(json, "\"inner_product\"");
        let m: DistanceMetric = serde_json::from_str("\"l2\"").unwrap();
        assert_eq!(m, DistanceMetric::L2);
    }
}
