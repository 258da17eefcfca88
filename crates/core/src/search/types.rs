//! Search request and result types.

use crate::storage::vector_store::Metadata;
use serde::{Deserialize, Serialize};

/// One hit returned by a search.
///
/// `score` is in `[0, 1]`, higher is more similar. Its mapping from the raw
/// distance depends on the collection's [`DistanceMetric`](crate::distance::DistanceMetric).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    /// Stored vector (reconstructed when quantized), if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Parameters for [`Collection::search_with`](crate::storage::Collection::search_with).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    /// Number of results, `1..=MAX_K`.
    pub k: usize,
    /// Exact-match AND filter over metadata.
    pub filter: Option<Metadata>,
    /// Graph beam width override. Clamped up to `k`; auto-selected when `None`.
    pub beamwidth: Option<usize>,
    pub include_vectors: bool,
    pub include_metadata: bool,
}

impl SearchParams {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            filter: None,
            beamwidth: None,
            include_vectors: false,
            include_metadata: true,
        }
    }

    pub fn with_filter(mut self, filter: Metadata) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_beamwidth(mut self, beamwidth: usize) -> Self {
        self.beamwidth = Some(beamwidth);
        self
    }

    pub fn with_vectors(mut self, include: bool) -> Self {
        self.include_vectors = include;
        self
    }

    pub fn with_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }
}
