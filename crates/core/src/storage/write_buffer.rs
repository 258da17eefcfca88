//! Bounded staging area for records not yet folded into the main index.

use crate::distance::DistanceMetric;
use crate::search::engine::flat_scan;
use crate::storage::vector_store::VectorStore;

/// Slots inserted since the last flush, in insertion order.
#[derive(Debug, Clone)]
pub struct WriteBuffer {
    slots: Vec<u32>,
    capacity: usize,
}

impl WriteBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity.min(1 << 16)),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn slots(&self) -> &[u32] {
        &self.slots
    }

    /// Appends a slot. Returns `true` when the buffer has reached capacity and must be flushed.
    pub fn push(&mut self, slot: u32) -> bool {
        self.slots.push(slot);
        self.is_full()
    }

    pub fn remove(&mut self, slot: u32) -> bool {
        match self.slots.iter().position(|&s| s == slot) {
            Some(pos) => {
                self.slots.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Empties the buffer and returns its slots in insertion order.
    pub fn take(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.slots)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Exact top-`k` over the buffered slots that pass `accept`.
    pub fn search_linear<F: Fn(u32) -> bool>(
        &self,
        store: &VectorStore,
        metric: DistanceMetric,
        query: &[f32],
        k: usize,
        accept: &F,
    ) -> Vec<(f32, u32)> {
        flat_scan(store, metric, query, self.slots.iter().copied(), k, accept)
    }

    pub fn memory_bytes(&self) -> usize {
        self.slots.len() * std::mem::size_of::<u32>()
    }
}
