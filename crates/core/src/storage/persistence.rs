//! Snapshot files.
//!
//! Layout (little-endian unless noted):
//!
//! ```text
//! "EVDBSNAP" | u32 version | [u64 len | bincode] x 4 | "VCR1" | u32 CRC32 (BE)
//! ```
//!
//! The four sections are header, hashmap, vectors and graph. A zero-length
//! hashmap section selects the per-vector fallback on load; a zero-length graph
//! section makes the loader rebuild the graph. The CRC covers every byte before
//! the footer. Writes use atomic temp-file + rename.

use crate::config::Algorithm;
use crate::distance::DistanceMetric;
use crate::error::{DatabaseError, Result};
use crate::hnsw::{HnswConfig, HnswGraph};
use crate::quantization::QuantizationMode;
use crate::storage::vector_store::{SlotState, VectorStore, VectorsSection};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

const SNAPSHOT_MAGIC: &[u8; 8] = b"EVDBSNAP";
/// Magic bytes before the CRC32 footer.
const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"VCR1";
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;
const SECTION_COUNT: usize = 4;

/// Self-describing header section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub dimension: Option<usize>,
    pub total_vector_count: u64,
    /// Write buffer capacity at save time.
    pub rebuild_threshold: usize,
    pub metric: DistanceMetric,
    pub quantization: QuantizationMode,
    pub algorithm: Algorithm,
    pub hnsw: HnswConfig,
}

/// Which sections to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// Write the id → slot section so loads restore the id map in bulk.
    pub include_hashmap: bool,
    /// Write the graph so loads need no rebuild.
    pub include_graph: bool,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            include_hashmap: true,
            include_graph: true,
        }
    }
}

/// Decoded snapshot file.
#[derive(Debug)]
pub struct Snapshot {
    pub header: SnapshotHeader,
    pub hashmap: Option<Vec<(String, u32)>>,
    pub vectors: VectorsSection,
    pub graph: Option<HnswGraph>,
}

/// How the id map was restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPath {
    /// Id map rebuilt in one pass from the hashmap section.
    BulkHashmap,
    /// Every record re-inserted one at a time.
    PerVector,
}

/// How the graph was restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphRestore {
    Loaded,
    Rebuilt,
    /// The collection keeps no graph.
    Skipped,
}

/// Summary of a load.
#[derive(Debug, Clone, Serialize)]
pub struct LoadStats {
    pub path: LoadPath,
    pub graph: GraphRestore,
    pub vectors: usize,
    pub file_bytes: u64,
    pub elapsed: Duration,
}

/// State rebuilt from a snapshot, ready to be adopted by a collection.
#[derive(Debug)]
pub struct RestoredState {
    pub header: SnapshotHeader,
    pub store: VectorStore,
    pub graph: Option<HnswGraph>,
    pub stats: LoadStats,
}

fn corrupted(msg: impl Into<String>) -> crate::error::Error {
    DatabaseError::Corrupted(msg.into()).into()
}

/// Encodes a snapshot of `store` (and `graph`) into file bytes.
pub fn encode_snapshot(
    header: &SnapshotHeader,
    store: &VectorStore,
    graph: Option<&HnswGraph>,
    options: SnapshotOptions,
) -> Result<Vec<u8>> {
    let sections: [Vec<u8>; SECTION_COUNT] = [
        bincode::serialize(header)?,
        if options.include_hashmap {
            bincode::serialize(&store.hashmap_entries())?
        } else {
            Vec::new()
        },
        store.encode_section()?,
        match graph {
            Some(g) if options.include_graph => bincode::serialize(g)?,
            _ => Vec::new(),
        },
    ];

    let body: usize = sections.iter().map(|s| 8 + s.len()).sum();
    let mut out = Vec::with_capacity(SNAPSHOT_MAGIC.len() + 4 + body + 8);
    out.extend_from_slice(SNAPSHOT_MAGIC);
    out.extend_from_slice(&SNAPSHOT_FORMAT_VERSION.to_le_bytes());
    for section in &sections {
        out.extend_from_slice(&(section.len() as u64).to_le_bytes());
        out.extend_from_slice(section);
    }
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(SNAPSHOT_CRC_MAGIC);
    out.extend_from_slice(&crc.to_be_bytes());
    Ok(out)
}

/// Writes `bytes` to `path` atomically (temp file, fsync, rename).
///
/// Each call gets its own temp file in the target directory, so concurrent
/// saves never share one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir)?;
            dir
        }
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".evdb-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Saves a snapshot to `path`. Returns the file size.
pub fn save_snapshot(
    path: &Path,
    header: &SnapshotHeader,
    store: &VectorStore,
    graph: Option<&HnswGraph>,
    options: SnapshotOptions,
) -> Result<u64> {
    let bytes = encode_snapshot(header, store, graph, options)?;
    write_atomic(path, &bytes)?;
    tracing::info!(
        path = %path.display(),
        vectors = header.total_vector_count,
        bytes = bytes.len(),
        hashmap = options.include_hashmap,
        graph = options.include_graph && graph.is_some(),
        "saved snapshot"
    );
    Ok(bytes.len() as u64)
}

/// Parses and integrity-checks snapshot bytes.
pub fn decode_snapshot(raw: &[u8]) -> Result<Snapshot> {
    let prefix = SNAPSHOT_MAGIC.len() + 4;
    if raw.len() < prefix || &raw[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
        return Err(corrupted("not an embervec snapshot"));
    }
    let version = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
    if version != SNAPSHOT_FORMAT_VERSION {
        return Err(DatabaseError::UnsupportedVersion {
            found: version,
            supported: SNAPSHOT_FORMAT_VERSION,
        }
        .into());
    }
    if raw.len() < prefix + 8 || &raw[raw.len() - 8..raw.len() - 4] != SNAPSHOT_CRC_MAGIC {
        return Err(corrupted("snapshot footer missing (file truncated?)"));
    }
    let body = &raw[..raw.len() - 8];
    let stored_crc = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    let computed_crc = crc32fast::hash(body);
    if computed_crc != stored_crc {
        return Err(corrupted(format!(
            "snapshot CRC32 mismatch: expected {stored_crc:#010x}, got {computed_crc:#010x}"
        )));
    }
    tracing::debug!("snapshot CRC32 verified: {:#010x}", stored_crc);

    let mut sections: Vec<&[u8]> = Vec::with_capacity(SECTION_COUNT);
    let mut pos = prefix;
    for i in 0..SECTION_COUNT {
        let len_bytes: [u8; 8] = body
            .get(pos..pos + 8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| corrupted(format!("section {i} length missing")))?;
        let len = u64::from_le_bytes(len_bytes) as usize;
        pos += 8;
        let end = pos
            .checked_add(len)
            .filter(|&e| e <= body.len())
            .ok_or_else(|| corrupted(format!("section {i} overruns the file")))?;
        sections.push(&body[pos..end]);
        pos = end;
    }
    if pos != body.len() {
        return Err(corrupted("trailing bytes after the last section"));
    }

    let header: SnapshotHeader = bincode::deserialize(sections[0])
        .map_err(|e| corrupted(format!("header section: {e}")))?;
    let hashmap = if sections[1].is_empty() {
        None
    } else {
        Some(
            bincode::deserialize(sections[1])
                .map_err(|e| corrupted(format!("hashmap section: {e}")))?,
        )
    };
    let vectors: VectorsSection = bincode::deserialize(sections[2])
        .map_err(|e| corrupted(format!("vectors section: {e}")))?;
    let graph = if sections[3].is_empty() {
        None
    } else {
        Some(
            bincode::deserialize(sections[3])
                .map_err(|e| corrupted(format!("graph section: {e}")))?,
        )
    };

    Ok(Snapshot {
        header,
        hashmap,
        vectors,
        graph,
    })
}

/// Reads a snapshot file.
pub fn load_snapshot(path: &Path) -> Result<(Snapshot, u64)> {
    let raw = fs::read(path)?;
    let snapshot = decode_snapshot(&raw)?;
    Ok((snapshot, raw.len() as u64))
}

/// Rebuilds the in-memory state from a decoded snapshot.
///
/// With a hashmap section the slot table is adopted as-is; without one every
/// record is re-inserted and comes back indexed. When `maintain_graph` is set the
/// stored graph is validated against the slot table, or rebuilt with bulk
/// insertion when absent.
pub fn restore(
    snapshot: Snapshot,
    file_bytes: u64,
    maintain_graph: bool,
    hnsw: &HnswConfig,
) -> Result<RestoredState> {
    let start = Instant::now();
    let Snapshot {
        header,
        hashmap,
        vectors,
        graph,
    } = snapshot;

    if vectors.arena_mode() != header.quantization {
        return Err(corrupted("vectors section disagrees with header quantization"));
    }
    if vectors.dimension != header.dimension {
        return Err(corrupted("vectors section disagrees with header dimension"));
    }

    let (mut store, path) = match hashmap {
        Some(entries) => (
            VectorStore::from_sections(entries, vectors)?,
            LoadPath::BulkHashmap,
        ),
        None => (VectorStore::rebuild_from_section(vectors)?, LoadPath::PerVector),
    };
    if store.count() as u64 != header.total_vector_count {
        return Err(corrupted(format!(
            "header counts {} vectors, sections hold {}",
            header.total_vector_count,
            store.count()
        )));
    }

    let (graph, graph_restore) = if !maintain_graph {
        store.release_tombstones();
        let buffered: Vec<u32> = match path {
            LoadPath::PerVector => store.slots_in(SlotState::Buffered).collect(),
            LoadPath::BulkHashmap => Vec::new(),
        };
        for slot in buffered {
            store.mark_indexed(slot);
        }
        (None, GraphRestore::Skipped)
    } else {
        match (graph, path) {
            (Some(mut g), LoadPath::BulkHashmap) => {
                check_graph(&g, &store, &header)?;
                g.reseed();
                (Some(g), GraphRestore::Loaded)
            }
            _ => {
                let mut g = HnswGraph::new(header.metric, hnsw.clone());
                let slots: Vec<u32> = match path {
                    LoadPath::BulkHashmap => store.slots_in(SlotState::Indexed).collect(),
                    LoadPath::PerVector => store.slots_in(SlotState::Buffered).collect(),
                };
                store.release_tombstones();
                g.insert_bulk(&store, &slots);
                for &slot in &slots {
                    store.mark_indexed(slot);
                }
                (Some(g), GraphRestore::Rebuilt)
            }
        }
    };

    let stats = LoadStats {
        path,
        graph: graph_restore,
        vectors: store.count(),
        file_bytes,
        elapsed: start.elapsed(),
    };
    Ok(RestoredState {
        header,
        store,
        graph,
        stats,
    })
}

/// Cross-checks a deserialized graph against the slot table.
fn check_graph(graph: &HnswGraph, store: &VectorStore, header: &SnapshotHeader) -> Result<()> {
    if graph.metric != header.metric {
        return Err(corrupted("graph metric disagrees with header"));
    }
    graph
        .validate(store.slot_count())
        .map_err(|e| corrupted(format!("graph section: {e}")))?;
    for slot in graph.nodes() {
        match store.state(slot) {
            SlotState::Indexed | SlotState::Tombstoned => {}
            state => {
                return Err(corrupted(format!(
                    "graph node {slot} refers to a {state:?} slot"
                )))
            }
        }
    }
    if let Some(slot) = store
        .slots_in(SlotState::Indexed)
        .find(|&s| !graph.contains(s))
    {
        return Err(corrupted(format!("indexed slot {slot} missing from graph")));
    }
    Ok(())
}
