//! Slot-addressed vector storage with a bidirectional id map.
//!
//! Vectors live in one contiguous arena per collection (f32, int8 codes or packed
//! bits depending on the [`QuantizationMode`]), addressed by dense `u32` slots.
//! The graph index and the write buffer refer to vectors only by slot.
//!
//! Slot lifecycle: `Free → Buffered → Indexed`, and on delete either straight back
//! to `Free` (when nothing references the slot) or `Tombstoned` until the graph is
//! compacted. Freed slots are reused LIFO.

use crate::distance::{simd, DistanceMetric};
use crate::error::{DatabaseError, Result, ValidationError};
use crate::hnsw::VectorSource;
use crate::quantization::{
    binary, decode_binary_into, decode_scalar_into, encode_binary_into, encode_scalar_into,
    BinaryParams, QuantizationMode, ScalarParams,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;

/// String key/value metadata attached to a vector.
pub type Metadata = HashMap<String, String>;

/// A vector with its id and metadata, as passed in by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

impl Record {
    pub fn new(id: impl Into<String>, vector: Vec<f32>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata,
        }
    }
}

thread_local! {
    /// Scratch buffer for decoding quantized vectors during distance computation.
    static DECODE_BUF: RefCell<Vec<f32>> = const { RefCell::new(Vec::new()) };
}

/// Where a slot currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Free,
    /// Live, waiting in the write buffer.
    Buffered,
    /// Live, flushed into the main index.
    Indexed,
    /// Deleted, but still referenced by graph edges.
    Tombstoned,
}

impl SlotState {
    #[inline]
    pub fn is_live(self) -> bool {
        matches!(self, SlotState::Buffered | SlotState::Indexed)
    }
}

/// Vector payload arena, one row per slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Arena {
    Full(Vec<f32>),
    Scalar {
        codes: Vec<i8>,
        params: Vec<ScalarParams>,
    },
    Binary {
        bits: Vec<u64>,
        params: Vec<BinaryParams>,
    },
}

impl Arena {
    fn new(mode: QuantizationMode) -> Self {
        match mode {
            QuantizationMode::None => Arena::Full(Vec::new()),
            QuantizationMode::Scalar => Arena::Scalar {
                codes: Vec::new(),
                params: Vec::new(),
            },
            QuantizationMode::Binary => Arena::Binary {
                bits: Vec::new(),
                params: Vec::new(),
            },
        }
    }

    fn mode(&self) -> QuantizationMode {
        match self {
            Arena::Full(_) => QuantizationMode::None,
            Arena::Scalar { .. } => QuantizationMode::Scalar,
            Arena::Binary { .. } => QuantizationMode::Binary,
        }
    }

    /// Number of complete rows for `dim`, or `None` if the arena is ragged.
    fn rows(&self, dim: usize) -> Option<usize> {
        let (len, width, params) = match self {
            Arena::Full(data) => (data.len(), dim, None),
            Arena::Scalar { codes, params } => (codes.len(), dim, Some(params.len())),
            Arena::Binary { bits, params } => {
                (bits.len(), binary::words_for(dim), Some(params.len()))
            }
        };
        if width == 0 {
            return if len == 0 { Some(params.unwrap_or(0)) } else { None };
        }
        if len % width != 0 {
            return None;
        }
        let rows = len / width;
        match params {
            Some(p) if p != rows => None,
            _ => Some(rows),
        }
    }

    fn push_zeroed(&mut self, dim: usize) {
        match self {
            Arena::Full(data) => data.resize(data.len() + dim, 0.0),
            Arena::Scalar { codes, params } => {
                codes.resize(codes.len() + dim, 0);
                params.push(ScalarParams {
                    scale: 0.0,
                    offset: 0.0,
                });
            }
            Arena::Binary { bits, params } => {
                bits.resize(bits.len() + binary::words_for(dim), 0);
                params.push(BinaryParams {
                    low: 0.0,
                    high: 0.0,
                });
            }
        }
    }

    fn write(&mut self, slot: usize, dim: usize, vector: &[f32]) {
        match self {
            Arena::Full(data) => {
                data[slot * dim..(slot + 1) * dim].copy_from_slice(vector);
            }
            Arena::Scalar { codes, params } => {
                params[slot] = encode_scalar_into(vector, &mut codes[slot * dim..(slot + 1) * dim]);
            }
            Arena::Binary { bits, params } => {
                let w = binary::words_for(dim);
                params[slot] = encode_binary_into(vector, &mut bits[slot * w..(slot + 1) * w]);
            }
        }
    }

    fn copy_row(&mut self, dst: usize, src: &Arena, src_slot: usize, dim: usize) {
        match (self, src) {
            (Arena::Full(d), Arena::Full(s)) => {
                d[dst * dim..(dst + 1) * dim]
                    .copy_from_slice(&s[src_slot * dim..(src_slot + 1) * dim]);
            }
            (
                Arena::Scalar { codes, params },
                Arena::Scalar {
                    codes: sc,
                    params: sp,
                },
            ) => {
                codes[dst * dim..(dst + 1) * dim]
                    .copy_from_slice(&sc[src_slot * dim..(src_slot + 1) * dim]);
                params[dst] = sp[src_slot];
            }
            (
                Arena::Binary { bits, params },
                Arena::Binary {
                    bits: sb,
                    params: sp,
                },
            ) => {
                let w = binary::words_for(dim);
                bits[dst * w..(dst + 1) * w].copy_from_slice(&sb[src_slot * w..(src_slot + 1) * w]);
                params[dst] = sp[src_slot];
            }
            _ => {}
        }
    }

    fn decode_into(&self, slot: usize, dim: usize, out: &mut [f32]) {
        match self {
            Arena::Full(data) => out.copy_from_slice(&data[slot * dim..(slot + 1) * dim]),
            Arena::Scalar { codes, params } => {
                decode_scalar_into(&codes[slot * dim..(slot + 1) * dim], params[slot], out)
            }
            Arena::Binary { bits, params } => {
                let w = binary::words_for(dim);
                decode_binary_into(&bits[slot * w..(slot + 1) * w], params[slot], out)
            }
        }
    }

    fn bytes(&self) -> usize {
        match self {
            Arena::Full(data) => data.len() * std::mem::size_of::<f32>(),
            Arena::Scalar { codes, params } => {
                codes.len() + params.len() * std::mem::size_of::<ScalarParams>()
            }
            Arena::Binary { bits, params } => {
                bits.len() * std::mem::size_of::<u64>()
                    + params.len() * std::mem::size_of::<BinaryParams>()
            }
        }
    }
}

/// Serialized form of the slot table and arena (snapshot "vectors" section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorsSection {
    pub dimension: Option<usize>,
    pub arena: Arena,
    pub ids: Vec<Option<String>>,
    pub metadata: Vec<Metadata>,
    pub states: Vec<SlotState>,
}

impl VectorsSection {
    pub fn arena_mode(&self) -> QuantizationMode {
        self.arena.mode()
    }
}

/// Borrowed twin of [`VectorsSection`]; encodes to the same bytes without cloning.
#[derive(Serialize)]
struct VectorsSectionRef<'a> {
    dimension: Option<usize>,
    arena: &'a Arena,
    ids: &'a [Option<String>],
    metadata: &'a [Metadata],
    states: &'a [SlotState],
}

/// Owns every vector, its id and metadata in a collection.
#[derive(Debug)]
pub struct VectorStore {
    dimension: Option<usize>,
    arena: Arena,
    ids: Vec<Option<String>>,
    metadata: Vec<Metadata>,
    states: Vec<SlotState>,
    id_map: HashMap<String, u32>,
    free: Vec<u32>,
    tombstoned: usize,
}

/// Rejects vectors that are empty, non-finite, too wide or of the wrong dimension.
pub fn validate_vector(
    vector: &[f32],
    expected: Option<usize>,
) -> std::result::Result<(), ValidationError> {
    if vector.is_empty() {
        return Err(ValidationError::EmptyVector);
    }
    if vector.len() > crate::config::MAX_DIMENSION {
        return Err(ValidationError::DimensionTooLarge {
            dimension: vector.len(),
            max: crate::config::MAX_DIMENSION,
        });
    }
    if let Some(dim) = expected {
        if vector.len() != dim {
            return Err(ValidationError::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }
    }
    if let Some(index) = vector.iter().position(|v| !v.is_finite()) {
        return Err(ValidationError::NonFiniteValue { index });
    }
    Ok(())
}

impl VectorStore {
    pub fn new(mode: QuantizationMode) -> Self {
        Self {
            dimension: None,
            arena: Arena::new(mode),
            ids: Vec::new(),
            metadata: Vec::new(),
            states: Vec::new(),
            id_map: HashMap::new(),
            free: Vec::new(),
            tombstoned: 0,
        }
    }

    /// Dimension fixed by the first insert, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn mode(&self) -> QuantizationMode {
        self.arena.mode()
    }

    /// Number of live vectors.
    pub fn count(&self) -> usize {
        self.id_map.len()
    }

    /// Number of allocated slots, including free and tombstoned ones.
    pub fn slot_count(&self) -> usize {
        self.states.len()
    }

    pub fn tombstoned_count(&self) -> usize {
        self.tombstoned
    }

    /// True when no slot has ever been allocated since the last clear.
    pub fn is_pristine(&self) -> bool {
        self.states.is_empty()
    }

    /// Switches the storage representation. Refused once any slot exists.
    pub fn set_mode(&mut self, mode: QuantizationMode) -> bool {
        if !self.is_pristine() {
            return false;
        }
        self.arena = Arena::new(mode);
        true
    }

    pub fn validate_input(
        &self,
        id: &str,
        vector: &[f32],
    ) -> std::result::Result<(), ValidationError> {
        if id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        validate_vector(vector, self.dimension)
    }

    /// Stores a new record in the `Buffered` state and returns its slot.
    pub fn insert(&mut self, id: &str, vector: &[f32], metadata: Metadata) -> Result<u32> {
        self.validate_input(id, vector)?;
        if self.id_map.contains_key(id) {
            return Err(ValidationError::DuplicateId(id.to_string()).into());
        }
        let dim = *self.dimension.get_or_insert(vector.len());
        let slot = self.allocate(id, metadata, dim);
        self.arena.write(slot as usize, dim, vector);
        Ok(slot)
    }

    fn allocate(&mut self, id: &str, metadata: Metadata, dim: usize) -> u32 {
        let slot = match self.free.pop() {
            Some(s) => s,
            None => {
                self.arena.push_zeroed(dim);
                self.ids.push(None);
                self.metadata.push(Metadata::new());
                self.states.push(SlotState::Free);
                (self.states.len() - 1) as u32
            }
        };
        let i = slot as usize;
        self.ids[i] = Some(id.to_string());
        self.metadata[i] = metadata;
        self.states[i] = SlotState::Buffered;
        self.id_map.insert(id.to_string(), slot);
        slot
    }

    pub fn slot_of(&self, id: &str) -> Option<u32> {
        self.id_map.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.id_map.contains_key(id)
    }

    pub fn id_of(&self, slot: u32) -> Option<&str> {
        self.ids.get(slot as usize).and_then(|s| s.as_deref())
    }

    pub fn metadata_of(&self, slot: u32) -> Option<&Metadata> {
        self.metadata.get(slot as usize)
    }

    pub fn state(&self, slot: u32) -> SlotState {
        self.states
            .get(slot as usize)
            .copied()
            .unwrap_or(SlotState::Free)
    }

    #[inline]
    pub fn is_live(&self, slot: u32) -> bool {
        self.state(slot).is_live()
    }

    /// Marks a buffered slot as flushed into the main index.
    pub fn mark_indexed(&mut self, slot: u32) {
        if let Some(s) = self.states.get_mut(slot as usize) {
            if *s == SlotState::Buffered {
                *s = SlotState::Indexed;
            }
        }
    }

    /// Returns the vector and metadata for `id`. Quantized vectors are reconstructed.
    pub fn get(&self, id: &str) -> Option<(Vec<f32>, Metadata)> {
        let slot = self.slot_of(id)?;
        Some((
            self.vector(slot).into_owned(),
            self.metadata[slot as usize].clone(),
        ))
    }

    /// The stored vector for `slot`: borrowed when unquantized, decoded otherwise.
    pub fn vector(&self, slot: u32) -> Cow<'_, [f32]> {
        let dim = self.dimension.unwrap_or(0);
        let i = slot as usize;
        match &self.arena {
            Arena::Full(data) => Cow::Borrowed(&data[i * dim..(i + 1) * dim]),
            _ => {
                let mut out = vec![0.0; dim];
                self.arena.decode_into(i, dim, &mut out);
                Cow::Owned(out)
            }
        }
    }

    /// Distance from `query` to the vector in `slot`.
    #[inline]
    pub fn distance_to(
        &self,
        metric: DistanceMetric,
        query: &[f32],
        query_norm_sq: f32,
        slot: u32,
    ) -> f32 {
        let dim = query.len();
        let i = slot as usize;
        match &self.arena {
            Arena::Full(data) => {
                metric.distance_prenorm(query, &data[i * dim..(i + 1) * dim], query_norm_sq)
            }
            arena => DECODE_BUF.with(|cell| {
                let mut buf = cell.borrow_mut();
                buf.resize(dim, 0.0);
                arena.decode_into(i, dim, &mut buf);
                metric.distance_prenorm(query, &buf, query_norm_sq)
            }),
        }
    }

    /// Unmaps `id` and tombstones its slot. Returns the slot and its previous state.
    ///
    /// The caller releases the slot with [`release`](Self::release) once nothing
    /// references it any more.
    pub fn delete(&mut self, id: &str) -> Option<(u32, SlotState)> {
        let slot = self.id_map.remove(id)?;
        let i = slot as usize;
        let prev = self.states[i];
        self.ids[i] = None;
        self.metadata[i] = Metadata::new();
        self.states[i] = SlotState::Tombstoned;
        self.tombstoned += 1;
        Some((slot, prev))
    }

    /// Returns a tombstoned slot to the free list.
    pub fn release(&mut self, slot: u32) {
        if self.state(slot) == SlotState::Tombstoned {
            self.states[slot as usize] = SlotState::Free;
            self.tombstoned -= 1;
            self.free.push(slot);
        }
    }

    /// Releases every tombstoned slot. Returns how many were freed.
    pub fn release_tombstones(&mut self) -> usize {
        let slots: Vec<u32> = self.slots_in(SlotState::Tombstoned).collect();
        for &s in &slots {
            self.release(s);
        }
        slots.len()
    }

    pub fn slots_in(&self, state: SlotState) -> impl Iterator<Item = u32> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter(move |(_, s)| **s == state)
            .map(|(i, _)| i as u32)
    }

    /// Live slots in slot order.
    pub fn live_slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_live())
            .map(|(i, _)| i as u32)
    }

    /// Drops every record. Dimension and quantization mode become settable again.
    pub fn clear(&mut self) {
        let mode = self.mode();
        *self = Self::new(mode);
    }

    // ── Memory accounting ──────────────────────────────────────────────

    pub fn vector_bytes(&self) -> usize {
        self.arena.bytes()
    }

    pub fn id_map_bytes(&self) -> usize {
        let per_entry = std::mem::size_of::<String>() + std::mem::size_of::<u32>() + 8;
        self.id_map
            .keys()
            .map(|k| 2 * k.len() + per_entry + std::mem::size_of::<Option<String>>())
            .sum::<usize>()
            + self.states.len() * std::mem::size_of::<SlotState>()
            + self.free.len() * std::mem::size_of::<u32>()
    }

    pub fn metadata_bytes(&self) -> usize {
        self.metadata
            .iter()
            .map(|m| {
                std::mem::size_of::<Metadata>()
                    + m.iter()
                        .map(|(k, v)| k.len() + v.len() + 2 * std::mem::size_of::<String>())
                        .sum::<usize>()
            })
            .sum()
    }

    // ── Persistence ────────────────────────────────────────────────────

    /// `(id, slot)` pairs for the snapshot hashmap section.
    pub fn hashmap_entries(&self) -> Vec<(String, u32)> {
        let mut entries: Vec<(String, u32)> =
            self.id_map.iter().map(|(k, &v)| (k.clone(), v)).collect();
        entries.sort_unstable_by_key(|&(_, slot)| slot);
        entries
    }

    pub fn to_section(&self) -> VectorsSection {
        VectorsSection {
            dimension: self.dimension,
            arena: self.arena.clone(),
            ids: self.ids.clone(),
            metadata: self.metadata.clone(),
            states: self.states.clone(),
        }
    }

    /// Bincode encoding of [`to_section`](Self::to_section), written without a copy.
    pub fn encode_section(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&VectorsSectionRef {
            dimension: self.dimension,
            arena: &self.arena,
            ids: &self.ids,
            metadata: &self.metadata,
            states: &self.states,
        })?)
    }

    /// Fast restore: the slot table is taken as-is and the id map is rebuilt in one
    /// pass from the hashmap section.
    pub fn from_sections(hashmap: Vec<(String, u32)>, section: VectorsSection) -> Result<Self> {
        let n = section.states.len();
        let corrupted = |msg: String| -> crate::error::Error { DatabaseError::Corrupted(msg).into() };

        if section.ids.len() != n || section.metadata.len() != n {
            return Err(corrupted(format!(
                "slot table lengths differ: states={} ids={} metadata={}",
                n,
                section.ids.len(),
                section.metadata.len()
            )));
        }
        let dim = match section.dimension {
            Some(d) => d,
            None if n == 0 => 0,
            None => return Err(corrupted("slots present without a dimension".into())),
        };
        if section.arena.rows(dim) != Some(n) {
            return Err(corrupted(format!(
                "vector arena does not hold {n} rows of dimension {dim}"
            )));
        }

        let live = section.states.iter().filter(|s| s.is_live()).count();
        if hashmap.len() != live {
            return Err(corrupted(format!(
                "hashmap has {} entries but {} slots are live",
                hashmap.len(),
                live
            )));
        }

        let mut id_map = HashMap::with_capacity(hashmap.len());
        for (id, slot) in hashmap {
            let i = slot as usize;
            if i >= n || !section.states[i].is_live() {
                return Err(corrupted(format!("hashmap entry '{id}' -> dead slot {slot}")));
            }
            if section.ids[i].as_deref() != Some(id.as_str()) {
                return Err(corrupted(format!("hashmap entry '{id}' disagrees with slot {slot}")));
            }
            if id_map.insert(id, slot).is_some() {
                return Err(corrupted(format!("slot {slot} mapped twice")));
            }
        }

        let mut free: Vec<u32> = Vec::new();
        let mut tombstoned = 0;
        for (i, s) in section.states.iter().enumerate().rev() {
            match s {
                SlotState::Free => free.push(i as u32),
                SlotState::Tombstoned => tombstoned += 1,
                _ => {}
            }
        }

        Ok(Self {
            dimension: section.dimension,
            arena: section.arena,
            ids: section.ids,
            metadata: section.metadata,
            states: section.states,
            id_map,
            free,
            tombstoned,
        })
    }

    /// Slow restore: re-inserts every live record one at a time into fresh slots.
    /// All restored records come back `Buffered`.
    pub fn rebuild_from_section(section: VectorsSection) -> Result<Self> {
        let n = section.states.len();
        let dim = section.dimension.unwrap_or(0);
        if section.ids.len() != n
            || section.metadata.len() != n
            || section.arena.rows(dim) != Some(n)
        {
            return Err(DatabaseError::Corrupted("vectors section is inconsistent".into()).into());
        }

        let mut store = Self::new(section.arena.mode());
        store.dimension = section.dimension;
        for (old, (id, meta)) in section.ids.iter().zip(&section.metadata).enumerate() {
            let Some(id) = id else { continue };
            if !section.states[old].is_live() {
                continue;
            }
            if id.is_empty() || store.id_map.contains_key(id) {
                return Err(DatabaseError::Corrupted(format!(
                    "duplicate or empty id '{id}' at slot {old}"
                ))
                .into());
            }
            let slot = store.allocate(id, meta.clone(), dim);
            store.arena.copy_row(slot as usize, &section.arena, old, dim);
        }
        if store.is_pristine() {
            store.dimension = None;
        }
        Ok(store)
    }
}

impl VectorSource for VectorStore {
    #[inline]
    fn distance(
        &self,
        metric: DistanceMetric,
        query: &[f32],
        query_norm_sq: f32,
        slot: u32,
    ) -> f32 {
        self.distance_to(metric, query, query_norm_sq, slot)
    }

    fn decode_into(&self, slot: u32, out: &mut [f32]) {
        let dim = self.dimension.unwrap_or(0);
        self.arena.decode_into(slot as usize, dim, out);
    }

    fn dimension(&self) -> usize {
        self.dimension.unwrap_or(0)
    }
}

/// Decoded copy of a subset of slots, for building a graph without holding the
/// collection lock.
#[derive(Debug)]
pub struct DetachedVectors {
    dim: usize,
    data: Vec<f32>,
    /// `slot -> row`, `u32::MAX` for slots not copied.
    rows: Vec<u32>,
}

const NO_ROW: u32 = u32::MAX;

impl DetachedVectors {
    #[inline]
    fn row(&self, slot: u32) -> Option<&[f32]> {
        match self.rows.get(slot as usize) {
            Some(&r) if r != NO_ROW => {
                let start = r as usize * self.dim;
                Some(&self.data[start..start + self.dim])
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dim.max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl VectorStore {
    /// Copies the (decoded) vectors of `slots` out of the store.
    pub fn detach(&self, slots: &[u32]) -> DetachedVectors {
        let dim = self.dimension.unwrap_or(0);
        let mut data = vec![0.0; slots.len() * dim];
        let mut rows = vec![NO_ROW; self.slot_count()];
        for (row, &slot) in slots.iter().enumerate() {
            if let Some(r) = rows.get_mut(slot as usize) {
                *r = row as u32;
                self.arena
                    .decode_into(slot as usize, dim, &mut data[row * dim..(row + 1) * dim]);
            }
        }
        DetachedVectors { dim, data, rows }
    }
}

impl VectorSource for DetachedVectors {
    #[inline]
    fn distance(
        &self,
        metric: DistanceMetric,
        query: &[f32],
        query_norm_sq: f32,
        slot: u32,
    ) -> f32 {
        match self.row(slot) {
            Some(v) => metric.distance_prenorm(query, v, query_norm_sq),
            None => f32::INFINITY,
        }
    }

    fn decode_into(&self, slot: u32, out: &mut [f32]) {
        match self.row(slot) {
            Some(v) => out.copy_from_slice(v),
            None => out.fill(0.0),
        }
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

/// Squared L2 norm of a query, for [`VectorStore::distance_to`].
#[inline]
pub fn query_norm_sq(query: &[f32]) -> f32 {
    simd::norm_sq_f32(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_insert_get_roundtrip() {
        let mut s = VectorStore::new(QuantizationMode::None);
        let slot = s.insert("a", &[1.0, 2.0, 3.0], meta(&[("k", "v")])).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(s.dimension(), Some(3));
        let (v, m) = s.get("a").unwrap();
        assert_eq!(v, vec![1.0, 2.0, 3.0]);
        assert_eq!(m.get("k").map(String::as_str), Some("v"));
        assert_eq!(s.state(slot), SlotState::Buffered);
    }

    #[test]
    fn test_validation() {
        let mut s = VectorStore::new(QuantizationMode::None);
        s.insert("a", &[1.0, 2.0], Metadata::new()).unwrap();
        let err = |r: Result<u32>| match r {
            Err(crate::error::Error::Validation(v)) => v,
            other => panic!("expected validation error, got {other:?}"),
        };
        assert_eq!(
            err(s.insert("b", &[1.0], Metadata::new())),
            ValidationError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(
            err(s.insert("", &[1.0, 2.0], Metadata::new())),
            ValidationError::EmptyId
        );
        assert_eq!(
            err(s.insert("c", &[1.0, f32::NAN], Metadata::new())),
            ValidationError::NonFiniteValue { index: 1 }
        );
        assert_eq!(
            err(s.insert("a", &[1.0, 2.0], Metadata::new())),
            ValidationError::DuplicateId("a".into())
        );
        assert_eq!(s.count(), 1);
        assert_eq!(s.slot_count(), 1);
    }

    #[test]
    fn test_delete_release_reuses_slot() {
        let mut s = VectorStore::new(QuantizationMode::None);
        s.insert("a", &[1.0], Metadata::new()).unwrap();
        s.insert("b", &[2.0], Metadata::new()).unwrap();
        let (slot, prev) = s.delete("a").unwrap();
        assert_eq!((slot, prev), (0, SlotState::Buffered));
        assert_eq!(s.tombstoned_count(), 1);
        assert!(s.delete("a").is_none());
        s.release(slot);
        assert_eq!(s.tombstoned_count(), 0);
        assert_eq!(s.insert("c", &[3.0], Metadata::new()).unwrap(), 0);
        assert_eq!(s.id_of(0), Some("c"));
        assert_eq!(s.count(), 2);
    }

    #[test]
    fn test_mode_frozen_after_insert() {
        let mut s = VectorStore::new(QuantizationMode::None);
        assert!(s.set_mode(QuantizationMode::Scalar));
        s.insert("a", &[1.0, 2.0], Metadata::new()).unwrap();
        assert!(!s.set_mode(QuantizationMode::Binary));
        assert_eq!(s.mode(), QuantizationMode::Scalar);
        s.clear();
        assert!(s.set_mode(QuantizationMode::Binary));
        assert_eq!(s.dimension(), None);
    }

    #[test]
    fn test_quantized_distance_uses_reconstruction() {
        let mut s = VectorStore::new(QuantizationMode::Scalar);
        let v = [0.1, -0.4, 0.9, 0.3];
        s.insert("a", &v, Metadata::new()).unwrap();
        let decoded = s.vector(0).into_owned();
        let metric = DistanceMetric::L2;
        let d = s.distance_to(metric, &v, query_norm_sq(&v), 0);
        assert_eq!(d.to_bits(), metric.distance(&v, &decoded).to_bits());
        assert!(d < 1e-4);
    }

    #[test]
    fn test_sections_fast_and_slow_paths() {
        let mut s = VectorStore::new(QuantizationMode::None);
        for i in 0..5 {
            s.insert(&format!("v{i}"), &[i as f32, 1.0], meta(&[("i", &i.to_string())]))
                .unwrap();
        }
        s.delete("v1");
        s.release(1);
        s.delete("v3");

        let fast = VectorStore::from_sections(s.hashmap_entries(), s.to_section()).unwrap();
        assert_eq!(fast.count(), 3);
        assert_eq!(fast.tombstoned_count(), 1);
        assert_eq!(fast.slot_of("v4"), Some(4));
        assert_eq!(fast.get("v2").unwrap().0, vec![2.0, 1.0]);

        let slow = VectorStore::rebuild_from_section(s.to_section()).unwrap();
        assert_eq!(slow.count(), 3);
        assert_eq!(slow.slot_count(), 3);
        assert_eq!(slow.get("v4").unwrap().0, vec![4.0, 1.0]);
        assert_eq!(slow.get("v4").unwrap().1.get("i").map(String::as_str), Some("4"));
    }

    #[test]
    fn test_encoded_section_matches_owned() {
        let mut s = VectorStore::new(QuantizationMode::Binary);
        s.insert("a", &[1.0, -1.0, 0.5], meta(&[("k", "v")])).unwrap();
        let owned = bincode::serialize(&s.to_section()).unwrap();
        assert_eq!(s.encode_section().unwrap(), owned);
    }

    #[test]
    fn test_detached_matches_store_distances() {
        let mut s = VectorStore::new(QuantizationMode::Scalar);
        for i in 0..6 {
            s.insert(&format!("v{i}"), &[i as f32, 1.0 - i as f32, 0.5], Metadata::new())
                .unwrap();
        }
        let d = s.detach(&[1, 4]);
        assert_eq!(d.len(), 2);
        let q = [0.3, 0.2, 0.1];
        let n = query_norm_sq(&q);
        for slot in [1u32, 4] {
            let a = VectorSource::distance(&d, DistanceMetric::Cosine, &q, n, slot);
            let b = s.distance_to(DistanceMetric::Cosine, &q, n, slot);
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(
            VectorSource::distance(&d, DistanceMetric::L2, &q, n, 2),
            f32::INFINITY
        );
    }

    #[test]
    fn test_from_sections_rejects_mismatch() {
        let mut s = VectorStore::new(QuantizationMode::None);
        s.insert("a", &[1.0], Metadata::new()).unwrap();
        let mut hashmap = s.hashmap_entries();
        hashmap[0].0 = "b".into();
        assert!(VectorStore::from_sections(hashmap, s.to_section()).is_err());
        assert!(VectorStore::from_sections(Vec::new(), s.to_section()).is_err());
    }
}
