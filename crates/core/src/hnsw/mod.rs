//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! The graph stores no vectors. Nodes are the slots of a [`VectorSource`] (normally
//! the collection's [`VectorStore`](crate::storage::VectorStore)), and every distance
//! is computed through it, so quantized and full-precision collections share one
//! graph implementation.
//!
//! Per-node state is kept in parallel arrays indexed by slot (neighbor lists and
//! layer assignment). Slots that are not part of the graph carry the
//! [`graph::ABSENT`] layer marker.

/// Parallel bulk insertion: concurrent candidate search, sequential linking.
pub mod bulk;
/// Graph structure, configuration, and layer assignment.
pub mod graph;
/// Single-node insertion with heuristic neighbor selection.
pub mod insert;
/// Layer search and multi-layer k-NN search with a result predicate.
pub mod search;
/// Generation-based visited set for graph traversal.
pub mod visited;

pub use graph::{HnswConfig, HnswGraph};
pub use search::knn_search;

use crate::distance::DistanceMetric;

/// Read access to the vectors behind graph nodes.
pub trait VectorSource: Sync {
    /// Distance from `query` to the vector stored in `slot`.
    fn distance(&self, metric: DistanceMetric, query: &[f32], query_norm_sq: f32, slot: u32)
        -> f32;

    /// Writes the vector stored in `slot` into `out`.
    fn decode_into(&self, slot: u32, out: &mut [f32]);

    /// Vector dimension.
    fn dimension(&self) -> usize;
}
