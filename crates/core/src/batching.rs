//! Opt-in coalescing of single inserts.
//!
//! Inserts are validated synchronously and queued; the owning collection drains
//! the queue, in arrival order, once it reaches `max_pending` and before any
//! operation that reads or persists state. There is no timer.

use crate::error::ValidationError;
use crate::storage::vector_store::Record;
use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Debug, Default)]
struct Pending {
    records: Vec<Record>,
    ids: HashSet<String>,
}

/// FIFO queue of validated, not yet applied inserts.
#[derive(Debug)]
pub struct AutoBatcher {
    pending: Mutex<Pending>,
    max_pending: usize,
}

impl AutoBatcher {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            max_pending: max_pending.max(1),
        }
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    pub fn len(&self) -> usize {
        self.pending.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().records.is_empty()
    }

    /// Queues `record`. Returns `true` once the queue has reached `max_pending`.
    ///
    /// Rejects an id that is already queued, and a vector whose length differs
    /// from the first queued one.
    pub fn enqueue(&self, record: Record) -> Result<bool, ValidationError> {
        let mut p = self.pending.lock();
        if p.ids.contains(&record.id) {
            return Err(ValidationError::DuplicateId(record.id));
        }
        if let Some(first) = p.records.first() {
            if first.vector.len() != record.vector.len() {
                return Err(ValidationError::DimensionMismatch {
                    expected: first.vector.len(),
                    actual: record.vector.len(),
                });
            }
        }
        p.ids.insert(record.id.clone());
        p.records.push(record);
        Ok(p.records.len() >= self.max_pending)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.lock().ids.contains(id)
    }

    /// Removes and returns everything queued, oldest first.
    pub fn take(&self) -> Vec<Record> {
        let mut p = self.pending.lock();
        p.ids.clear();
        std::mem::take(&mut p.records)
    }

    /// Puts `records` back ahead of anything queued since they were taken.
    pub fn requeue(&self, mut records: Vec<Record>) {
        if records.is_empty() {
            return;
        }
        let mut p = self.pending.lock();
        p.ids.extend(records.iter().map(|r| r.id.clone()));
        records.append(&mut p.records);
        p.records = records;
    }
}
