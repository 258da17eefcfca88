//! Storage layer: vector store, write buffer, collections, database, write-ahead
//! log, and snapshot persistence.
//!
//! Data lives in memory in `Collection` instances grouped by a `Database`.
//! Durability comes from a write-ahead log (CRC32 frames, optional fsync) and
//! checksummed snapshots written atomically (temp file + rename).

/// Collections: write buffer + graph behind one lock, persistence and recovery.
pub mod collection;
/// Named collections with an optional data directory.
pub mod database;
/// Snapshot file format, atomic writes, and restore paths.
pub mod persistence;
/// Slot table and vector arena.
pub mod vector_store;
/// Write-Ahead Log with CRC32 checksums.
pub mod wal;
/// Recently inserted, not yet indexed slots.
pub mod write_buffer;

pub use collection::{Collection, CollectionInfo, HealthState, HealthStatus, MemoryUsage};
pub use database::Database;
pub use persistence::{GraphRestore, LoadPath, LoadStats, SnapshotOptions};
pub use vector_store::{Metadata, Record, VectorStore};
pub use wal::{ReplayStats, WalEntry};
