//! Operation metrics.
//!
//! Recorded through the `metrics` facade. Nothing is exported unless the host
//! application installs a recorder; without one every call is a no-op.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Records a write operation, labeled by collection and operation type.
///
/// Operation types: `"insert"`, `"upsert"`, `"delete"`, `"clear"`.
pub fn record_write_operation(collection: &str, operation: &'static str, count: usize) {
    counter!(
        "embervec_operations_total",
        "collection" => collection.to_string(),
        "operation" => operation
    )
    .increment(count as u64);
}

/// Records a search and its latency, labeled by the path that answered it.
pub fn record_search(collection: &str, path: &'static str, duration: Duration) {
    let labels = [
        ("collection", collection.to_string()),
        ("path", path.to_string()),
    ];
    counter!("embervec_search_total", &labels).increment(1);
    histogram!("embervec_search_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Records a write-buffer flush into the index.
pub fn record_flush(collection: &str, size: usize, duration: Duration) {
    let labels = [("collection", collection.to_string())];
    counter!("embervec_flush_total", &labels).increment(1);
    histogram!("embervec_flush_size", &labels).record(size as f64);
    histogram!("embervec_flush_duration_seconds", &labels).record(duration.as_secs_f64());
}

pub fn record_wal_append(collection: &str, bytes: usize) {
    let labels = [("collection", collection.to_string())];
    counter!("embervec_wal_appends_total", &labels).increment(1);
    counter!("embervec_wal_bytes_total", &labels).increment(bytes as u64);
}

pub fn record_checkpoint(collection: &str, duration: Duration) {
    let labels = [("collection", collection.to_string())];
    counter!("embervec_checkpoints_total", &labels).increment(1);
    histogram!("embervec_checkpoint_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Updates per-collection size gauges.
pub fn update_collection_gauges(collection: &str, vectors: usize, deleted: usize, memory_bytes: usize) {
    let labels = [("collection", collection.to_string())];
    gauge!("embervec_vectors_total", &labels).set(vectors as f64);
    gauge!("embervec_deleted_total", &labels).set(deleted as f64);
    gauge!("embervec_collection_memory_bytes", &labels).set(memory_bytes as f64);
}
