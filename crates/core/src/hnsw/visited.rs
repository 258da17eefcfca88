//! Generation-stamped visited set.
//!
//! `clear()` bumps a generation counter instead of zeroing memory; the backing
//! array is only wiped when the counter wraps.

#[derive(Debug)]
pub struct VisitedSet {
    marks: Vec<u16>,
    generation: u16,
}

impl VisitedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            marks: vec![0u16; capacity],
            generation: 1,
        }
    }

    pub fn clear(&mut self) {
        if self.generation == u16::MAX {
            self.marks.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    /// Grows the set to cover ids below `cap`.
    pub fn ensure_capacity(&mut self, cap: usize) {
        if cap > self.marks.len() {
            self.marks.resize(cap, 0);
        }
    }

    /// Marks `id`. Returns `true` if it had not been visited in this generation.
    #[inline]
    pub fn insert(&mut self, id: u32) -> bool {
        let idx = id as usize;
        if idx >= self.marks.len() {
            self.marks.resize(idx + 1, 0);
        }
        if self.marks[idx] == self.generation {
            false
        } else {
            self.marks[idx] = self.generation;
            true
        }
    }

    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        self.marks.get(id as usize) == Some(&self.generation)
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_clear() {
        let mut vs = VisitedSet::new(8);
        assert!(vs.insert(3));
        assert!(!vs.insert(3));
        assert!(vs.contains(3));
        vs.clear();
        assert!(!vs.contains(3));
        assert!(vs.insert(3));
    }

    #[test]
    fn test_grows_past_capacity() {
        let mut vs = VisitedSet::new(2);
        assert!(vs.insert(100));
        assert!(vs.contains(100));
    }

    #[test]
    fn test_generation_wraps() {
        let mut vs = VisitedSet::new(4);
        for _ in 0..(u16::MAX as usize - 1) {
            vs.clear();
        }
        assert_eq!(vs.generation, u16::MAX);
        vs.insert(1);
        vs.clear();
        assert_eq!(vs.generation, 1);
        assert!(vs.insert(1));
    }
}
