//! Query execution: metadata filters, result types and the engine that merges
//! write-buffer and index candidates into a ranked top-k.

/// Exact-match metadata filtering.
pub mod filter;
/// Flat scan, candidate merge and ranking.
pub mod engine;
/// Search request parameters and results.
pub mod types;

pub use engine::QueryEngine;
pub use filter::MetadataFilter;
pub use types::{SearchParams, SearchResult};
