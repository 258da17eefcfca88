//! # embervec-core
//!
//! Embeddable in-memory vector database engine. Vectors with string ids and
//! string metadata are written to a buffer, flushed in bulk into an HNSW graph,
//! and searched exactly or approximately under L2, cosine or inner-product
//! distance. Storage can be scalar or binary quantized, and a collection can
//! persist to a checksummed snapshot plus write-ahead log.
//!
//! The crate has no async runtime and installs no logging subscriber or metrics
//! recorder; it emits through the `tracing` and `metrics` facades.

/// Opt-in coalescing of single inserts.
pub mod batching;
/// Global configuration constants and per-collection runtime settings.
pub mod config;
/// Distance kernels and the metric enum.
pub mod distance;
/// Error taxonomy: validation, database, resource exhaustion.
pub mod error;
/// HNSW approximate nearest neighbor index: graph, insertion, bulk build, search.
pub mod hnsw;
/// Metric recording helpers.
pub mod metrics;
/// Scalar and binary quantization.
pub mod quantization;
/// Query engine, metadata filters and result types.
pub mod search;
/// Insert and search path selection.
pub mod selector;
/// Storage layer: collections, database, write-ahead log, and disk persistence.
pub mod storage;

pub use config::{Algorithm, AutoBatchConfig, CollectionConfig, WalConfig};
pub use distance::DistanceMetric;
pub use error::{DatabaseError, Error, ErrorKind, Result, ValidationError};
pub use hnsw::HnswConfig;
pub use quantization::QuantizationMode;
pub use search::{SearchParams, SearchResult};
pub use selector::SearchPath;
pub use storage::{Collection, CollectionInfo, Database, Metadata, Record};
