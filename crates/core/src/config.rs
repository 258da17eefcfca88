//! Configuration for embervec collections.
//!
//! Tuning constants and validation limits are compile-time constants. Per-collection
//! runtime settings live in [`CollectionConfig`], which is passed programmatically to
//! [`Collection::open`](crate::storage::Collection::open). Nothing is read from the
//! environment.

use crate::distance::DistanceMetric;
use crate::error::{Result, ValidationError};
use crate::hnsw::HnswConfig;
use crate::quantization::QuantizationMode;
use serde::{Deserialize, Serialize};

/// Default number of bidirectional links per HNSW node.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64. Default: 16.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
///
/// Controls the size of the dynamic candidate list during insertion.
/// Higher values produce a better graph but slow down build time.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
///
/// Used as the base beamwidth; the effective default grows with the indexed population.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 50;

/// Maximum number of layers in the HNSW graph.
pub const HNSW_DEFAULT_MAX_LAYERS: usize = 16;

/// Default seed for HNSW level assignment.
pub const HNSW_DEFAULT_SEED: u64 = 0x5EED_CAFE;

/// Default write buffer capacity (records held before a flush into the graph).
pub const DEFAULT_BUFFER_SIZE: usize = 5_000;

/// Indexed population below which `Algorithm::Auto` answers queries by exact flat scan.
pub const DEFAULT_FLAT_SEARCH_THRESHOLD: usize = 50_000;

/// Maximum allowed embedding dimension.
pub const MAX_DIMENSION: usize = 65_536;

/// Maximum number of results (`k`) per search request.
pub const MAX_K: usize = 10_000;

/// Maximum accepted beamwidth override.
pub const MAX_BEAMWIDTH: usize = 100_000;

/// Upper bound for the automatically selected beamwidth.
pub const AUTO_BEAMWIDTH_CAP: usize = 400;

/// Batches larger than this are streamed in chunks of [`BATCH_CHUNK_SIZE`].
pub const STREAMING_BATCH_THRESHOLD: usize = 2_000;

/// Records processed per write-lock acquisition during batch inserts.
pub const BATCH_CHUNK_SIZE: usize = 1_000;

/// Upper bound on the number of vectors whose graph candidates are searched
/// in parallel before being connected during bulk insertion.
pub const BULK_MAX_SUBBATCH: usize = 256;

/// A sub-batch never exceeds this fraction (1/n) of the graph it is inserted into,
/// so early bulk loads grow the graph gradually.
pub const BULK_GRAPH_FRACTION: usize = 8;

/// Maximum length of a collection name in characters.
pub const MAX_COLLECTION_NAME_LEN: usize = 128;

/// Name of the collection that every [`Database`](crate::storage::Database) always holds.
pub const DEFAULT_COLLECTION: &str = "default";

/// File extension for snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "evdb";

/// File extension for write-ahead log files.
pub const WAL_EXTENSION: &str = "wal";

/// Which index answers queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Exact flat scan below `flat_search_threshold`, graph search above it.
    #[default]
    Auto,
    /// Always exact flat scan. No graph is maintained.
    Flat,
    /// Always graph search once vectors have been flushed into the graph.
    Graph,
}

impl Algorithm {
    /// Stable lowercase name, used in stats and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Auto => "auto",
            Algorithm::Flat => "flat",
            Algorithm::Graph => "graph",
        }
    }
}

/// Write-ahead log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Log every mutation before applying it (only when a persistence path is set).
    pub enabled: bool,
    /// `fsync` after every append. When false the entry is flushed to the OS only.
    pub sync: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync: true,
        }
    }
}

/// Opt-in coalescing of single inserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoBatchConfig {
    /// Pending inserts are written once this many have accumulated.
    pub max_pending: usize,
}

impl Default for AutoBatchConfig {
    fn default() -> Self {
        Self { max_pending: 1_000 }
    }
}

/// Runtime configuration for one collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Write buffer capacity. Reaching it flushes the buffer into the graph.
    pub buffer_size: usize,
    /// Vector storage representation. Frozen once the collection holds a vector.
    pub quantization: QuantizationMode,
    /// Distance metric for every comparison in the collection.
    pub metric: DistanceMetric,
    /// Index selection policy.
    pub algorithm: Algorithm,
    /// Indexed population at which `Algorithm::Auto` switches from flat scan to graph search.
    pub flat_search_threshold: usize,
    /// When set, inserts bypass the buffer once the indexed population reaches this size.
    pub direct_insert_threshold: Option<usize>,
    /// HNSW graph parameters.
    pub hnsw: HnswConfig,
    /// Write-ahead log settings.
    pub wal: WalConfig,
    /// Opt-in auto-batching of single inserts.
    pub auto_batch: Option<AutoBatchConfig>,
    /// Memory ceiling for the collection; inserts beyond it fail with `ResourceExhausted`.
    pub max_memory_bytes: Option<usize>,
    /// Run an implicit checkpoint once the WAL grows past this many bytes.
    pub checkpoint_wal_bytes: Option<u64>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            quantization: QuantizationMode::None,
            metric: DistanceMetric::Cosine,
            algorithm: Algorithm::Auto,
            flat_search_threshold: DEFAULT_FLAT_SEARCH_THRESHOLD,
            direct_insert_threshold: None,
            hnsw: HnswConfig::default(),
            wal: WalConfig::default(),
            auto_batch: None,
            max_memory_bytes: None,
            checkpoint_wal_bytes: None,
        }
    }
}

impl CollectionConfig {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_quantization(mut self, quantization: QuantizationMode) -> Self {
        self.quantization = quantization;
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_hnsw(mut self, hnsw: HnswConfig) -> Self {
        self.hnsw = hnsw;
        self
    }

    pub fn with_auto_batch(mut self, auto_batch: AutoBatchConfig) -> Self {
        self.auto_batch = Some(auto_batch);
        self
    }

    /// Rejects settings that cannot produce a working collection.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ValidationError::InvalidConfig(msg.to_string()).into());
        if self.buffer_size == 0 {
            return invalid("buffer_size must be at least 1");
        }
        if self.hnsw.m < 2 {
            return invalid("hnsw.m must be at least 2");
        }
        if self.hnsw.m_max0 < self.hnsw.m {
            return invalid("hnsw.m_max0 must be >= hnsw.m");
        }
        if self.hnsw.ef_construction == 0 || self.hnsw.ef_search == 0 {
            return invalid("hnsw ef parameters must be positive");
        }
        if self.hnsw.max_layers == 0 || self.hnsw.max_layers > u8::MAX as usize {
            return invalid("hnsw.max_layers must be in 1..=255");
        }
        if let Some(ab) = &self.auto_batch {
            if ab.max_pending == 0 {
                return invalid("auto_batch.max_pending must be at least 1");
            }
        }
        Ok(())
    }
}
