//! Insert and search path selection.
//!
//! The decision depends only on the configured [`Algorithm`], the thresholds in
//! [`CollectionConfig`] and the current indexed population, so it is a pure
//! function that tests can drive directly.

use crate::config::{Algorithm, CollectionConfig};
use serde::Serialize;

/// Where a new record goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertPath {
    /// Append to the write buffer; flushed into the index when full.
    Buffer,
    /// Link into the graph immediately.
    DirectGraph,
}

/// How the indexed population is searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPath {
    /// Exact scan over every indexed vector.
    Flat,
    /// Approximate HNSW beam search.
    Graph,
}

impl SearchPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchPath::Flat => "flat",
            SearchPath::Graph => "graph",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AlgorithmSelector {
    algorithm: Algorithm,
    flat_search_threshold: usize,
    direct_insert_threshold: Option<usize>,
}

impl AlgorithmSelector {
    pub fn new(config: &CollectionConfig) -> Self {
        Self {
            algorithm: config.algorithm,
            flat_search_threshold: config.flat_search_threshold,
            direct_insert_threshold: config.direct_insert_threshold,
        }
    }

    /// Whether the collection keeps an HNSW graph at all.
    pub fn maintains_graph(&self) -> bool {
        self.algorithm != Algorithm::Flat
    }

    pub fn select_insert_path(&self, indexed_count: usize) -> InsertPath {
        match self.direct_insert_threshold {
            Some(t) if self.maintains_graph() && indexed_count >= t => InsertPath::DirectGraph,
            _ => InsertPath::Buffer,
        }
    }

    pub fn select_search_path(&self, indexed_count: usize) -> SearchPath {
        match self.algorithm {
            Algorithm::Flat => SearchPath::Flat,
            Algorithm::Graph => SearchPath::Graph,
            Algorithm::Auto if indexed_count < self.flat_search_threshold => SearchPath::Flat,
            Algorithm::Auto => SearchPath::Graph,
        }
    }
}
