//! Collections.
//!
//! A [`Collection`] owns one [`VectorStore`], its [`WriteBuffer`] and (unless the
//! algorithm is `Flat`) an [`HnswGraph`] over the flushed population. All of it
//! sits behind a single `RwLock`: searches take the read side, every mutation
//! (including buffer flushes) takes the write side, so a search always sees each
//! record either in the buffer or in the index.
//!
//! With a persistence path, mutations are logged to the WAL after validation and
//! before they are applied, and snapshots go to `<path>`.

use crate::batching::AutoBatcher;
use crate::config::{
    Algorithm, CollectionConfig, BATCH_CHUNK_SIZE, DEFAULT_COLLECTION, STREAMING_BATCH_THRESHOLD,
    WAL_EXTENSION,
};
use crate::distance::DistanceMetric;
use crate::error::{DatabaseError, Error, Result, ValidationError};
use crate::hnsw::{HnswConfig, HnswGraph};
use crate::metrics;
use crate::quantization::QuantizationMode;
use crate::search::engine::QueryEngine;
use crate::search::types::{SearchParams, SearchResult};
use crate::selector::{AlgorithmSelector, InsertPath, SearchPath};
use crate::storage::persistence::{
    load_snapshot, restore, save_snapshot, LoadStats, RestoredState, SnapshotHeader,
    SnapshotOptions,
};
use crate::storage::vector_store::{
    validate_vector, DetachedVectors, Metadata, Record, SlotState, VectorStore,
};
use crate::storage::wal::{ReplayStats, WalEntry, WriteAheadLog};
use crate::storage::write_buffer::WriteBuffer;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Approximate memory held by a collection, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub vector_bytes: usize,
    pub graph_bytes: usize,
    pub id_map_bytes: usize,
    pub metadata_bytes: usize,
    pub buffer_bytes: usize,
    pub total_bytes: usize,
}

/// Point-in-time statistics for one collection.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub vector_count: usize,
    pub buffered_count: usize,
    pub indexed_count: usize,
    /// Tombstoned slots waiting for compaction.
    pub deleted_count: usize,
    pub pending_count: usize,
    pub dimension: Option<usize>,
    pub metric: DistanceMetric,
    pub quantization: QuantizationMode,
    pub algorithm: Algorithm,
    pub search_path: SearchPath,
    pub buffer_size: usize,
    pub memory: MemoryUsage,
    pub persistence_path: Option<PathBuf>,
    pub wal_bytes: Option<u64>,
}

impl CollectionInfo {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DatabaseError::Serialization(e.to_string()).into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    /// Background work (auto-batch drain, implicit checkpoint) failed.
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub last_error: Option<String>,
    pub vector_count: usize,
    pub algorithm: Algorithm,
}

/// Snapshot path plus optional WAL.
#[derive(Debug)]
struct Persistence {
    snapshot_path: PathBuf,
    wal: Option<WriteAheadLog>,
}

/// WAL file next to a snapshot: `<dir>/<stem>.wal`.
pub fn wal_path_for(snapshot_path: &Path) -> PathBuf {
    snapshot_path.with_extension(WAL_EXTENSION)
}

/// Internal state of a collection, protected by a `RwLock`.
#[derive(Debug)]
pub struct CollectionData {
    name: String,
    config: CollectionConfig,
    selector: AlgorithmSelector,
    store: VectorStore,
    buffer: WriteBuffer,
    graph: Option<HnswGraph>,
    persistence: Option<Persistence>,
    /// Bumped whenever the whole state is replaced (clear, load, recover).
    epoch: u64,
    /// Memory measured at the last full accounting, plus estimates since.
    mem_baseline: usize,
    mem_added: usize,
    last_error: Option<String>,
}

impl CollectionData {
    fn new(name: String, config: CollectionConfig) -> Self {
        let selector = AlgorithmSelector::new(&config);
        let graph = selector
            .maintains_graph()
            .then(|| HnswGraph::new(config.metric, config.hnsw.clone()));
        Self {
            name,
            store: VectorStore::new(config.quantization),
            buffer: WriteBuffer::new(config.buffer_size),
            graph,
            selector,
            config,
            persistence: None,
            epoch: 0,
            mem_baseline: 0,
            mem_added: 0,
            last_error: None,
        }
    }

    /// Live records that have left the write buffer.
    fn indexed_count(&self) -> usize {
        self.store.count() - self.buffer.len()
    }

    fn search_path(&self) -> SearchPath {
        self.selector.select_search_path(self.indexed_count())
    }

    fn wal(&self) -> Option<&WriteAheadLog> {
        self.persistence.as_ref().and_then(|p| p.wal.as_ref())
    }

    fn log(&self, entry: &WalEntry) -> Result<()> {
        if let Some(wal) = self.wal() {
            let bytes = wal.append(entry)?;
            metrics::record_wal_append(&self.name, bytes);
        }
        Ok(())
    }

    fn record_error(&mut self, context: &str, err: &Error) {
        tracing::warn!(collection = %self.name, error = %err, "{context} failed");
        self.last_error = Some(format!("{context}: {err}"));
    }

    // ── Applying mutations ───────────────────────────────────────────────

    /// Stores already-validated records and routes their slots.
    fn apply_inserts(&mut self, records: Vec<Record>) -> Result<()> {
        let path = self.selector.select_insert_path(self.indexed_count());
        let mut slots = Vec::with_capacity(records.len());
        for r in records {
            slots.push(self.store.insert(&r.id, &r.vector, r.metadata)?);
        }
        if let Some(dim) = self.store.dimension() {
            self.mem_added += slots.len() * self.bytes_per_record(dim);
        }
        self.route(path, slots);
        Ok(())
    }

    fn route(&mut self, path: InsertPath, slots: Vec<u32>) {
        match path {
            InsertPath::DirectGraph => {
                if let Some(graph) = self.graph.as_mut() {
                    graph.insert_bulk(&self.store, &slots);
                }
                for slot in slots {
                    self.store.mark_indexed(slot);
                }
            }
            InsertPath::Buffer => {
                for slot in slots {
                    if self.buffer.push(slot) {
                        self.flush_locked();
                    }
                }
            }
        }
    }

    /// Moves every buffered record into the index. Returns how many moved.
    fn flush_locked(&mut self) -> usize {
        if self.buffer.is_empty() {
            return 0;
        }
        let start = Instant::now();
        let slots = self.buffer.take();
        if let Some(graph) = self.graph.as_mut() {
            graph.insert_bulk(&self.store, &slots);
        }
        for &slot in &slots {
            self.store.mark_indexed(slot);
        }
        tracing::debug!(
            collection = %self.name,
            flushed = slots.len(),
            indexed = self.indexed_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "write buffer flushed"
        );
        metrics::record_flush(&self.name, slots.len(), start.elapsed());
        if self.config.max_memory_bytes.is_some() {
            self.remeasure();
        }
        slots.len()
    }

    /// Unmaps `id`. The slot is freed at once unless graph edges still point at it.
    fn remove(&mut self, id: &str) -> bool {
        let Some((slot, prev)) = self.store.delete(id) else {
            return false;
        };
        if prev == SlotState::Buffered {
            self.buffer.remove(slot);
        }
        if !self.graph.as_ref().is_some_and(|g| g.contains(slot)) {
            self.store.release(slot);
        }
        true
    }

    /// Insert-or-replace without logging. Returns whether `id` existed.
    fn apply_upsert(&mut self, record: Record) -> Result<bool> {
        self.store.validate_input(&record.id, &record.vector)?;
        let existed = self.remove(&record.id);
        self.apply_inserts(vec![record])?;
        Ok(existed)
    }

    fn clear_locked(&mut self) {
        self.store.clear();
        self.buffer.clear();
        if self.graph.is_some() {
            self.graph = Some(HnswGraph::new(self.config.metric, self.config.hnsw.clone()));
        }
        self.epoch += 1;
        self.mem_baseline = 0;
        self.mem_added = 0;
    }

    fn replay_entry(&mut self, entry: WalEntry) -> Result<()> {
        match entry {
            WalEntry::Delete { id } => {
                self.remove(&id);
            }
            WalEntry::DeleteBatch { ids } => {
                for id in ids {
                    self.remove(&id);
                }
            }
            WalEntry::Clear => self.clear_locked(),
            WalEntry::SetQuantization { mode } => {
                if self.store.set_mode(mode) {
                    self.config.quantization = mode;
                }
            }
            other => {
                for record in other.into_records() {
                    self.apply_upsert(record)?;
                }
            }
        }
        Ok(())
    }

    // ── Validated write paths ────────────────────────────────────────────

    fn insert_one(&mut self, record: Record) -> Result<()> {
        self.store.validate_input(&record.id, &record.vector)?;
        if self.store.contains(&record.id) {
            return Err(ValidationError::DuplicateId(record.id).into());
        }
        self.check_memory(1, record.vector.len())?;
        let entry = WalEntry::Insert(record);
        self.log(&entry)?;
        self.apply_inserts(entry.into_records())?;
        metrics::record_write_operation(&self.name, "insert", 1);
        self.maybe_checkpoint();
        Ok(())
    }

    /// Inserts the valid records of one chunk; invalid ones are reported `false`.
    fn insert_chunk(&mut self, records: Vec<Record>) -> Result<Vec<bool>> {
        let (flags, valid, dim) = self.screen_inserts(records);
        if let Some(dim) = dim {
            self.commit_inserts(valid, dim).map_err(|u| u.error)?;
        }
        Ok(flags)
    }

    /// Splits off the records `insert_chunk` would accept. `dim` is `None` when
    /// nothing was accepted.
    fn screen_inserts(&self, records: Vec<Record>) -> (Vec<bool>, Vec<Record>, Option<usize>) {
        let mut flags = vec![false; records.len()];
        let mut dim = self.store.dimension();
        let mut seen = HashSet::with_capacity(records.len());
        let mut valid = Vec::with_capacity(records.len());
        for (i, r) in records.into_iter().enumerate() {
            if r.id.is_empty()
                || validate_vector(&r.vector, dim).is_err()
                || self.store.contains(&r.id)
                || !seen.insert(r.id.clone())
            {
                continue;
            }
            dim.get_or_insert(r.vector.len());
            flags[i] = true;
            valid.push(r);
        }
        let dim = dim.filter(|_| !valid.is_empty());
        (flags, valid, dim)
    }

    /// Logs and applies screened records. When the memory check or the WAL
    /// append fails nothing was applied, and the records come back with the error.
    fn commit_inserts(&mut self, valid: Vec<Record>, dim: usize) -> std::result::Result<(), Unapplied> {
        if let Err(error) = self.check_memory(valid.len(), dim) {
            return Err(Unapplied {
                error,
                records: valid,
            });
        }
        let n = valid.len();
        let entry = WalEntry::InsertBatch { records: valid };
        if let Err(error) = self.log(&entry) {
            return Err(Unapplied {
                error,
                records: entry.into_records(),
            });
        }
        self.apply_inserts(entry.into_records())
            .map_err(|error| Unapplied {
                error,
                records: Vec::new(),
            })?;
        metrics::record_write_operation(&self.name, "insert", n);
        self.maybe_checkpoint();
        Ok(())
    }

    fn upsert_one(&mut self, record: Record) -> Result<bool> {
        self.store.validate_input(&record.id, &record.vector)?;
        self.check_memory(1, record.vector.len())?;
        let entry = WalEntry::Upsert(record);
        self.log(&entry)?;
        let mut existed = false;
        for r in entry.into_records() {
            existed = self.apply_upsert(r)?;
        }
        metrics::record_write_operation(&self.name, "upsert", 1);
        self.maybe_checkpoint();
        Ok(existed)
    }

    fn upsert_chunk(&mut self, records: Vec<Record>) -> Result<Vec<bool>> {
        let mut flags = vec![false; records.len()];
        let mut dim = self.store.dimension();
        let mut valid = Vec::with_capacity(records.len());
        for (i, r) in records.into_iter().enumerate() {
            if r.id.is_empty() || validate_vector(&r.vector, dim).is_err() {
                continue;
            }
            dim.get_or_insert(r.vector.len());
            flags[i] = true;
            valid.push(r);
        }
        let Some(dim) = dim.filter(|_| !valid.is_empty()) else {
            return Ok(flags);
        };

        self.check_memory(valid.len(), dim)?;
        let n = valid.len();
        let entry = WalEntry::UpsertBatch { records: valid };
        self.log(&entry)?;
        for r in entry.into_records() {
            self.apply_upsert(r)?;
        }
        metrics::record_write_operation(&self.name, "upsert", n);
        self.maybe_checkpoint();
        Ok(flags)
    }

    fn delete_many(&mut self, ids: &[String]) -> Result<Vec<bool>> {
        let flags: Vec<bool> = ids.iter().map(|id| self.store.contains(id)).collect();
        let present: Vec<String> = ids
            .iter()
            .zip(&flags)
            .filter(|(_, &f)| f)
            .map(|(id, _)| id.clone())
            .collect();
        if present.is_empty() {
            return Ok(flags);
        }
        let entry = if present.len() == 1 {
            WalEntry::Delete {
                id: present[0].clone(),
            }
        } else {
            WalEntry::DeleteBatch {
                ids: present.clone(),
            }
        };
        self.log(&entry)?;
        // Duplicate ids in one call delete once; later copies report false.
        let flags = ids.iter().map(|id| self.remove(id)).collect();
        metrics::record_write_operation(&self.name, "delete", present.len());
        self.maybe_checkpoint();
        Ok(flags)
    }

    // ── Memory accounting ────────────────────────────────────────────────

    fn bytes_per_record(&self, dim: usize) -> usize {
        let mode = self.store.mode();
        let graph = if self.graph.is_some() {
            self.config.hnsw.m_max0 * std::mem::size_of::<u32>() + 64
        } else {
            0
        };
        mode.payload_bytes(dim) + mode.param_bytes() + 96 + graph
    }

    fn memory_usage(&self) -> MemoryUsage {
        let vector_bytes = self.store.vector_bytes();
        let graph_bytes = self.graph.as_ref().map_or(0, |g| g.memory_bytes());
        let id_map_bytes = self.store.id_map_bytes();
        let metadata_bytes = self.store.metadata_bytes();
        let buffer_bytes = self.buffer.memory_bytes();
        MemoryUsage {
            vector_bytes,
            graph_bytes,
            id_map_bytes,
            metadata_bytes,
            buffer_bytes,
            total_bytes: vector_bytes + graph_bytes + id_map_bytes + metadata_bytes + buffer_bytes,
        }
    }

    fn remeasure(&mut self) {
        self.mem_baseline = self.memory_usage().total_bytes;
        self.mem_added = 0;
    }

    /// Fails with `ResourceExhausted` when `n` more records of `dim` would pass the
    /// memory limit, after one in-place compaction attempt.
    fn check_memory(&mut self, n: usize, dim: usize) -> Result<()> {
        let Some(limit) = self.config.max_memory_bytes else {
            return Ok(());
        };
        let incoming = n * self.bytes_per_record(dim);
        if self.mem_baseline + self.mem_added + incoming <= limit {
            return Ok(());
        }
        if self.store.tombstoned_count() > 0 {
            let released = self.compact_locked();
            tracing::debug!(collection = %self.name, released, "compacted under memory pressure");
        }
        self.remeasure();
        let requested = self.mem_baseline + incoming;
        if requested > limit {
            return Err(Error::ResourceExhausted {
                resource: "memory",
                requested,
                limit,
            });
        }
        Ok(())
    }

    /// Rebuilds the graph from live indexed records under the held write lock.
    fn compact_locked(&mut self) -> usize {
        if self.graph.is_some() && self.store.tombstoned_count() > 0 {
            let slots: Vec<u32> = self.store.slots_in(SlotState::Indexed).collect();
            let mut graph = HnswGraph::new(self.config.metric, self.config.hnsw.clone());
            graph.insert_bulk(&self.store, &slots);
            self.graph = Some(graph);
        }
        self.release_unreferenced()
    }

    /// Frees tombstoned slots that the current graph does not reference.
    fn release_unreferenced(&mut self) -> usize {
        let graph = self.graph.as_ref();
        let slots: Vec<u32> = self
            .store
            .slots_in(SlotState::Tombstoned)
            .filter(|&s| !graph.is_some_and(|g| g.contains(s)))
            .collect();
        for &slot in &slots {
            self.store.release(slot);
        }
        slots.len()
    }

    // ── Persistence ──────────────────────────────────────────────────────

    fn header(&self) -> SnapshotHeader {
        SnapshotHeader {
            dimension: self.store.dimension(),
            total_vector_count: self.store.count() as u64,
            rebuild_threshold: self.config.buffer_size,
            metric: self.config.metric,
            quantization: self.store.mode(),
            algorithm: self.config.algorithm,
            hnsw: self.config.hnsw.clone(),
        }
    }

    fn save_to(&self, path: &Path, options: SnapshotOptions) -> Result<u64> {
        save_snapshot(
            path,
            &self.header(),
            &self.store,
            self.graph.as_ref(),
            options,
        )
    }

    fn checkpoint_locked(&self) -> Result<()> {
        let p = self
            .persistence
            .as_ref()
            .ok_or(ValidationError::NoPersistencePath)?;
        let start = Instant::now();
        let _gate = p.wal.as_ref().map(|w| w.freeze());
        self.save_to(&p.snapshot_path, SnapshotOptions::default())?;
        if let Some(wal) = &p.wal {
            wal.truncate()?;
        }
        metrics::record_checkpoint(&self.name, start.elapsed());
        tracing::info!(
            collection = %self.name,
            vectors = self.store.count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "checkpoint complete"
        );
        Ok(())
    }

    /// Implicit checkpoint once the WAL outgrows `checkpoint_wal_bytes`.
    fn maybe_checkpoint(&mut self) {
        let Some(limit) = self.config.checkpoint_wal_bytes else {
            return;
        };
        if self.wal().is_some_and(|w| w.size_bytes() > limit) {
            if let Err(e) = self.checkpoint_locked() {
                self.record_error("automatic checkpoint", &e);
            }
        }
    }

    /// Replaces the whole state with a restored snapshot.
    fn adopt(&mut self, restored: RestoredState) {
        let RestoredState {
            header,
            store,
            graph,
            ..
        } = restored;
        self.config.metric = header.metric;
        self.config.quantization = header.quantization;
        self.store = store;
        self.graph = if self.selector.maintains_graph() {
            Some(graph.unwrap_or_else(|| HnswGraph::new(header.metric, self.config.hnsw.clone())))
        } else {
            None
        };
        self.buffer = WriteBuffer::new(self.config.buffer_size);
        let buffered: Vec<u32> = self.store.slots_in(SlotState::Buffered).collect();
        for slot in buffered {
            self.buffer.push(slot);
        }
        if self.buffer.is_full() {
            self.flush_locked();
        }
        self.epoch += 1;
        self.remeasure();
    }

    fn info(&self, pending_count: usize) -> CollectionInfo {
        CollectionInfo {
            name: self.name.clone(),
            vector_count: self.store.count(),
            buffered_count: self.buffer.len(),
            indexed_count: self.indexed_count(),
            deleted_count: self.store.tombstoned_count(),
            pending_count,
            dimension: self.store.dimension(),
            metric: self.config.metric,
            quantization: self.store.mode(),
            algorithm: self.config.algorithm,
            search_path: self.search_path(),
            buffer_size: self.config.buffer_size,
            memory: self.memory_usage(),
            persistence_path: self.persistence.as_ref().map(|p| p.snapshot_path.clone()),
            wal_bytes: self.wal().map(|w| w.size_bytes()),
        }
    }
}

/// Records a failed insert commit did not apply.
struct Unapplied {
    error: Error,
    records: Vec<Record>,
}

/// Result of phase A of [`Collection::compact`].
enum CompactPlan {
    ReleaseOnly,
    Rebuild {
        slots: Vec<u32>,
        source: DetachedVectors,
        epoch: u64,
        metric: DistanceMetric,
        hnsw: HnswConfig,
    },
}

/// A thread-safe, independently locked vector collection.
///
/// Cloning a `Collection` produces a new handle to the same shared data.
#[derive(Debug, Clone)]
pub struct Collection {
    data: Arc<RwLock<CollectionData>>,
    batcher: Option<Arc<AutoBatcher>>,
    compacting: Arc<Mutex<()>>,
}

impl Collection {
    /// Opens a collection. With `path`, an existing snapshot at `path` is loaded and
    /// the WAL next to it replayed; new state is persisted there.
    pub fn open(path: Option<impl AsRef<Path>>, config: CollectionConfig) -> Result<Self> {
        let path = path.map(|p| p.as_ref().to_path_buf());
        let name = path
            .as_deref()
            .and_then(|p| p.file_stem())
            .and_then(|s| s.to_str())
            .unwrap_or(DEFAULT_COLLECTION)
            .to_string();
        Self::open_named(name, path, config)
    }

    /// In-memory collection with the default configuration.
    pub fn in_memory() -> Self {
        Self::build(DEFAULT_COLLECTION, CollectionConfig::default())
    }

    pub fn open_named(
        name: impl Into<String>,
        path: Option<PathBuf>,
        config: CollectionConfig,
    ) -> Result<Self> {
        config.validate()?;
        let collection = Self::build(name, config);
        if let Some(path) = path {
            collection.attach(path)?;
            collection.recover()?;
        }
        Ok(collection)
    }

    pub(crate) fn build(name: impl Into<String>, config: CollectionConfig) -> Self {
        let batcher = config
            .auto_batch
            .as_ref()
            .map(|ab| Arc::new(AutoBatcher::new(ab.max_pending)));
        Self {
            data: Arc::new(RwLock::new(CollectionData::new(name.into(), config))),
            batcher,
            compacting: Arc::new(Mutex::new(())),
        }
    }

    fn attach(&self, snapshot_path: PathBuf) -> Result<()> {
        let mut data = self.data.write();
        let wal = if data.config.wal.enabled {
            Some(WriteAheadLog::open(
                wal_path_for(&snapshot_path),
                data.config.wal.sync,
            )?)
        } else {
            None
        };
        data.persistence = Some(Persistence { snapshot_path, wal });
        Ok(())
    }

    pub(crate) fn detach_persistence(&self) {
        self.data.write().persistence = None;
    }

    pub fn name(&self) -> String {
        self.data.read().name.clone()
    }

    pub fn config(&self) -> CollectionConfig {
        self.data.read().config.clone()
    }

    /// Applies queued auto-batched inserts. A failed apply puts the records back
    /// at the head of the queue and is recorded in [`health`](Self::health).
    fn drain_pending(&self) {
        if self.batcher.as_ref().is_some_and(|b| !b.is_empty()) {
            self.drain_locked(&mut self.data.write());
        }
    }

    /// Write lock with the auto-batch queue already applied, so queued inserts
    /// stay ordered before the caller's write.
    fn write_drained(&self) -> RwLockWriteGuard<'_, CollectionData> {
        let mut data = self.data.write();
        self.drain_locked(&mut data);
        data
    }

    fn drain_locked(&self, data: &mut CollectionData) {
        let Some(batcher) = &self.batcher else {
            return;
        };
        let records = batcher.take();
        if records.is_empty() {
            return;
        }
        let queued = records.len();
        let (flags, valid, dim) = data.screen_inserts(records);
        let rejected = flags.iter().filter(|&&ok| !ok).count();
        if rejected > 0 {
            tracing::warn!(collection = %data.name, rejected, queued, "queued inserts rejected");
            data.last_error = Some(format!(
                "auto-batch drain: {rejected} of {queued} queued inserts were rejected"
            ));
        }
        let Some(dim) = dim else {
            return;
        };
        if let Err(Unapplied { error, records }) = data.commit_inserts(valid, dim) {
            data.record_error("auto-batch drain", &error);
            batcher.requeue(records);
        }
    }

    // ── Writes ───────────────────────────────────────────────────────────

    /// Inserts a new record. An existing `id` is a `DuplicateId` error; see [`upsert`](Self::upsert).
    ///
    /// With auto-batching the record is validated and queued; it becomes visible
    /// once the queue drains.
    pub fn insert(&self, id: &str, vector: &[f32], metadata: Metadata) -> Result<()> {
        if let Some(batcher) = &self.batcher {
            // Checked and queued under the write lock; every other write drains first.
            let mut data = self.data.write();
            data.store.validate_input(id, vector)?;
            if data.store.contains(id) {
                return Err(ValidationError::DuplicateId(id.to_string()).into());
            }
            let dim = data.store.dimension().unwrap_or(vector.len());
            data.check_memory(batcher.len() + 1, dim)?;
            if batcher.enqueue(Record::new(id, vector.to_vec(), metadata))? {
                self.drain_locked(&mut data);
            }
            return Ok(());
        }
        self.data
            .write()
            .insert_one(Record::new(id, vector.to_vec(), metadata))
    }

    /// Inserts parallel arrays of ids, vectors and (optional) metadata.
    ///
    /// Returns one flag per item: `false` marks a rejected item (bad vector,
    /// empty or duplicate id). Mismatched array lengths fail the whole call.
    pub fn insert_batch(
        &self,
        ids: Vec<String>,
        vectors: Vec<Vec<f32>>,
        metadata: Option<Vec<Metadata>>,
    ) -> Result<Vec<bool>> {
        if vectors.len() != ids.len() {
            return Err(ValidationError::BatchLengthMismatch {
                what: "vectors",
                expected: ids.len(),
                actual: vectors.len(),
            }
            .into());
        }
        let metadata = match metadata {
            Some(m) if m.len() != ids.len() => {
                return Err(ValidationError::BatchLengthMismatch {
                    what: "metadata",
                    expected: ids.len(),
                    actual: m.len(),
                }
                .into())
            }
            Some(m) => m,
            None => vec![Metadata::new(); ids.len()],
        };
        let records = ids
            .into_iter()
            .zip(vectors)
            .zip(metadata)
            .map(|((id, vector), metadata)| Record {
                id,
                vector,
                metadata,
            })
            .collect();
        self.insert_records(records)
    }

    pub fn insert_records(&self, records: Vec<Record>) -> Result<Vec<bool>> {
        self.insert_batch_with_progress(records, |_, _| {})
    }

    /// Batch insert reporting `(done, total)` after every chunk.
    ///
    /// Batches above `STREAMING_BATCH_THRESHOLD` are applied in chunks of
    /// `BATCH_CHUNK_SIZE`, each under its own write-lock acquisition.
    pub fn insert_batch_with_progress<F: FnMut(usize, usize)>(
        &self,
        records: Vec<Record>,
        progress: F,
    ) -> Result<Vec<bool>> {
        self.chunked(records, progress, |data, chunk| data.insert_chunk(chunk))
    }

    fn chunked<F, A>(&self, records: Vec<Record>, mut progress: F, mut apply: A) -> Result<Vec<bool>>
    where
        F: FnMut(usize, usize),
        A: FnMut(&mut CollectionData, Vec<Record>) -> Result<Vec<bool>>,
    {
        let total = records.len();
        let chunk_size = if total > STREAMING_BATCH_THRESHOLD {
            BATCH_CHUNK_SIZE
        } else {
            total.max(1)
        };
        let mut flags = Vec::with_capacity(total);
        let mut iter = records.into_iter().peekable();
        while iter.peek().is_some() {
            let chunk: Vec<Record> = iter.by_ref().take(chunk_size).collect();
            let chunk_flags = {
                let mut data = self.write_drained();
                apply(&mut data, chunk)?
            };
            flags.extend(chunk_flags);
            progress(flags.len(), total);
            if total > STREAMING_BATCH_THRESHOLD {
                tracing::debug!(done = flags.len(), total, "batch chunk applied");
            }
        }
        Ok(flags)
    }

    /// Inserts or replaces. Returns `true` when an existing record was replaced.
    pub fn upsert(&self, id: &str, vector: &[f32], metadata: Metadata) -> Result<bool> {
        self.write_drained()
            .upsert_one(Record::new(id, vector.to_vec(), metadata))
    }

    /// Batch upsert. Per-item flags as for [`insert_batch`](Self::insert_batch).
    pub fn upsert_batch(&self, records: Vec<Record>) -> Result<Vec<bool>> {
        self.chunked(records, |_, _| {}, |data, chunk| data.upsert_chunk(chunk))
    }

    /// Deletes `id`. Returns `false` if it was absent.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let flags = self.write_drained().delete_many(std::slice::from_ref(&id.to_string()))?;
        Ok(flags.first().copied().unwrap_or(false))
    }

    pub fn delete_batch(&self, ids: &[String]) -> Result<Vec<bool>> {
        self.write_drained().delete_many(ids)
    }

    /// Drops every record. Dimension and quantization mode become settable again.
    pub fn clear(&self) -> Result<()> {
        if let Some(b) = &self.batcher {
            b.take();
        }
        let mut data = self.data.write();
        data.log(&WalEntry::Clear)?;
        data.clear_locked();
        metrics::record_write_operation(&data.name, "clear", 1);
        Ok(())
    }

    /// Selects scalar or binary storage. Returns `false` (and changes nothing) once
    /// the collection holds a vector.
    pub fn enable_quantization(&self, mode: QuantizationMode) -> Result<bool> {
        let mut data = self.write_drained();
        if !data.store.is_pristine() {
            return Ok(false);
        }
        data.log(&WalEntry::SetQuantization { mode })?;
        data.store.set_mode(mode);
        data.config.quantization = mode;
        Ok(true)
    }

    /// Moves the write buffer into the index. Returns the number of records moved.
    pub fn flush(&self) -> usize {
        self.write_drained().flush_locked()
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Vector (reconstructed when quantized) and metadata for `id`.
    pub fn get(&self, id: &str) -> Option<(Vec<f32>, Metadata)> {
        self.drain_pending();
        self.data.read().store.get(id)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.drain_pending();
        self.data.read().store.contains(id)
    }

    /// Ids in internal slot order.
    pub fn list_ids(&self, limit: Option<usize>, offset: usize) -> Vec<String> {
        self.drain_pending();
        let data = self.data.read();
        data.store
            .live_slots()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .filter_map(|s| data.store.id_of(s).map(str::to_string))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.drain_pending();
        self.data.read().store.count()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.data.read().store.dimension()
    }

    /// Top-`k` search with an optional exact-match metadata filter.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<Metadata>,
    ) -> Result<Vec<SearchResult>> {
        let mut params = SearchParams::new(k);
        params.filter = filter;
        self.search_with(query, &params)
    }

    pub fn search_with(&self, query: &[f32], params: &SearchParams) -> Result<Vec<SearchResult>> {
        self.drain_pending();
        let start = Instant::now();
        let data = self.data.read();
        let path = data.search_path();
        let engine = QueryEngine::new(
            &data.store,
            &data.buffer,
            data.graph.as_ref(),
            data.config.metric,
            data.config.hnsw.ef_search,
        );
        let results = engine.search(query, params, path)?;
        metrics::record_search(&data.name, path.as_str(), start.elapsed());
        Ok(results)
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        self.data.read().memory_usage()
    }

    pub fn info(&self) -> CollectionInfo {
        let pending = self.batcher.as_ref().map_or(0, |b| b.len());
        let info = self.data.read().info(pending);
        metrics::update_collection_gauges(
            &info.name,
            info.vector_count,
            info.deleted_count,
            info.memory.total_bytes,
        );
        info
    }

    pub fn health(&self) -> HealthStatus {
        let data = self.data.read();
        HealthStatus {
            status: if data.last_error.is_some() {
                HealthState::Degraded
            } else {
                HealthState::Healthy
            },
            last_error: data.last_error.clone(),
            vector_count: data.store.count(),
            algorithm: data.config.algorithm,
        }
    }

    // ── Maintenance ──────────────────────────────────────────────────────

    /// Rebuilds the graph from live records and frees tombstoned slots.
    /// Returns the number of slots freed.
    ///
    /// **Phase A** (read lock): copy the live indexed vectors.
    /// **Phase B** (no lock): build the new graph from the copy.
    /// **Phase C** (write lock): link records indexed meanwhile, swap, free slots.
    pub fn compact(&self) -> Result<usize> {
        let _running = self.compacting.lock();
        self.drain_pending();

        let plan = {
            let data = self.data.read();
            if data.graph.is_none() || data.store.tombstoned_count() == 0 {
                CompactPlan::ReleaseOnly
            } else {
                let slots: Vec<u32> = data.store.slots_in(SlotState::Indexed).collect();
                CompactPlan::Rebuild {
                    source: data.store.detach(&slots),
                    slots,
                    epoch: data.epoch,
                    metric: data.config.metric,
                    hnsw: data.config.hnsw.clone(),
                }
            }
        };

        let (slots, source, epoch, metric, hnsw) = match plan {
            CompactPlan::ReleaseOnly => {
                let mut data = self.data.write();
                return Ok(data.release_unreferenced());
            }
            CompactPlan::Rebuild {
                slots,
                source,
                epoch,
                metric,
                hnsw,
            } => (slots, source, epoch, metric, hnsw),
        };

        let start = Instant::now();
        let mut graph = HnswGraph::new(metric, hnsw);
        graph.insert_bulk(&source, &slots);
        drop(source);

        let mut data = self.data.write();
        if data.epoch != epoch {
            tracing::debug!(collection = %data.name, "state replaced during compaction, discarding rebuilt graph");
            return Ok(0);
        }
        let missing: Vec<u32> = data
            .store
            .slots_in(SlotState::Indexed)
            .filter(|&s| !graph.contains(s))
            .collect();
        graph.insert_bulk(&data.store, &missing);
        data.graph = Some(graph);
        let released = data.release_unreferenced();
        if data.config.max_memory_bytes.is_some() {
            data.remeasure();
        }
        tracing::info!(
            collection = %data.name,
            nodes = slots.len() + missing.len(),
            caught_up = missing.len(),
            released,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "compaction complete"
        );
        Ok(released)
    }

    // ── Persistence ──────────────────────────────────────────────────────

    /// Writes a full snapshot to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.save_with(path, SnapshotOptions::default()).map(|_| ())
    }

    /// Writes a snapshot with the chosen sections. Returns the file size.
    pub fn save_with(&self, path: impl AsRef<Path>, options: SnapshotOptions) -> Result<u64> {
        self.drain_pending();
        self.data.read().save_to(path.as_ref(), options)
    }

    /// Replaces this collection's contents with the snapshot at `path`.
    ///
    /// The snapshot's metric and quantization are adopted. On any error the
    /// collection is left exactly as it was. With persistence attached, a
    /// checkpoint follows so the WAL never replays onto the wrong base.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<LoadStats> {
        let path = path.as_ref();
        self.drain_pending();
        let (maintain_graph, hnsw) = {
            let data = self.data.read();
            (data.selector.maintains_graph(), data.config.hnsw.clone())
        };
        let (snapshot, file_bytes) = load_snapshot(path)?;
        let restored = restore(snapshot, file_bytes, maintain_graph, &hnsw)?;
        let stats = restored.stats.clone();

        let mut data = self.data.write();
        data.adopt(restored);
        if data.persistence.is_some() {
            data.checkpoint_locked()?;
        }
        tracing::info!(
            collection = %data.name,
            path = %path.display(),
            vectors = stats.vectors,
            load_path = ?stats.path,
            graph = ?stats.graph,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "loaded snapshot"
        );
        Ok(stats)
    }

    /// Snapshots to the persistence path and truncates the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        self.drain_pending();
        self.data.read().checkpoint_locked()
    }

    /// Rebuilds state from the persistence path: snapshot (if any), then WAL replay.
    ///
    /// Replay stops at the first torn or corrupt frame. When anything was replayed
    /// the result is checkpointed.
    pub fn recover(&self) -> Result<ReplayStats> {
        self.drain_pending();
        let mut data = self.data.write();
        let snapshot_path = data
            .persistence
            .as_ref()
            .map(|p| p.snapshot_path.clone())
            .ok_or(ValidationError::NoPersistencePath)?;

        if snapshot_path.exists() {
            let (snapshot, file_bytes) = load_snapshot(&snapshot_path)?;
            let maintain_graph = data.selector.maintains_graph();
            let restored = restore(snapshot, file_bytes, maintain_graph, &data.config.hnsw)?;
            data.adopt(restored);
        } else {
            data.clear_locked();
        }

        let (entries, mut stats) = match data.wal() {
            Some(wal) => wal.replay()?,
            None => (Vec::new(), ReplayStats::default()),
        };
        for entry in entries {
            if let Err(e) = data.replay_entry(entry) {
                tracing::warn!(collection = %data.name, error = %e, "WAL entry could not be applied, skipping");
                stats.success -= 1;
                stats.skipped += 1;
            }
        }
        if stats.success > 0 || stats.skipped > 0 || stats.truncated || stats.crc_errors > 0 {
            data.checkpoint_locked()?;
        }
        tracing::info!(
            collection = %data.name,
            vectors = data.store.count(),
            replayed = stats.success,
            skipped = stats.skipped,
            truncated = stats.truncated,
            "recovery complete"
        );
        Ok(stats)
    }

    /// Attaches (or replaces) persistence and writes the current state to `path`.
    pub fn set_persistence(&self, path: impl AsRef<Path>, use_wal: bool) -> Result<()> {
        self.drain_pending();
        let snapshot_path = path.as_ref().to_path_buf();
        let mut data = self.data.write();
        let wal = if use_wal {
            let wal = WriteAheadLog::open(wal_path_for(&snapshot_path), data.config.wal.sync)?;
            Some(wal)
        } else {
            None
        };
        data.config.wal.enabled = use_wal;
        data.persistence = Some(Persistence { snapshot_path, wal });
        data.checkpoint_locked()
    }
}
