use std::sync::atomic::{AtomicU32, Ordering};

use super::leaf::Leaf;

/// The number of slots in a ply, one per value of an address byte.
pub const PLY_SLOTS: usize = 256;

//------------ PlyLeaves -----------------------------------------------------
//
// The part of a ply that readers see: 256 packed leaves. Every slot is
// written with release and read with acquire ordering, so that a reader
// that finds a child ply also finds it fully initialized.

pub struct PlyLeaves([AtomicU32; PLY_SLOTS]);

impl PlyLeaves {
    pub fn new() -> Self {
        let empty = Leaf::EMPTY.encode();
        Self(std::array::from_fn(|_| AtomicU32::new(empty)))
    }

    // A u8 always indexes a 256 slot array.
    #[allow(clippy::indexing_slicing)]
    pub fn load(&self, slot: u8) -> Leaf {
        Leaf::decode(self.0[slot as usize].load(Ordering::Acquire))
    }

    #[allow(clippy::indexing_slicing)]
    pub fn store(&self, slot: u8, leaf: Leaf) {
        self.0[slot as usize].store(leaf.encode(), Ordering::Release);
    }

    // Used for plies that no reader can reach yet.
    pub fn fill(&self, leaf: Leaf) {
        let raw = leaf.encode();
        for slot in &self.0 {
            slot.store(raw, Ordering::Relaxed);
        }
    }
}

impl Default for PlyLeaves {
    fn default() -> Self {
        Self::new()
    }
}

//------------ PlyMeta -------------------------------------------------------
//
// The writer's bookkeeping for a ply. Readers never need it.

#[derive(Clone, Debug)]
pub struct PlyMeta {
    // The length of the prefix responsible for each slot, 0 for none.
    lens: [u8; PLY_SLOTS],
    // The number of slots that are not the empty leaf.
    pub n_non_empty: u16,
    // Depth in the trie, the root is 0. The ply decides on address byte
    // `depth`.
    pub depth: u8,
}

impl PlyMeta {
    pub fn new(depth: u8, fill: Leaf, fill_len: u8) -> Self {
        Self {
            lens: [fill_len; PLY_SLOTS],
            n_non_empty: if fill.is_empty() { 0 } else { PLY_SLOTS as u16 },
            depth,
        }
    }

    #[allow(clippy::indexing_slicing)]
    pub fn len(&self, slot: u8) -> u8 {
        self.lens[slot as usize]
    }

    #[allow(clippy::indexing_slicing)]
    pub fn set_len(&mut self, slot: u8, len: u8) {
        self.lens[slot as usize] = len;
    }

    /// Account for a slot going from `old` to `new`.
    pub fn update_count(&mut self, old: Leaf, new: Leaf) {
        match (old.is_empty(), new.is_empty()) {
            (true, false) => self.n_non_empty += 1,
            (false, true) => self.n_non_empty -= 1,
            _ => {}
        }
    }

    /// The number of address bits decided by this ply and its ancestors.
    pub fn covered_bits(&self) -> u8 {
        8 * (self.depth + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjacency::Adj;

    #[test]
    fn counting_non_empty_slots() {
        let mut meta = PlyMeta::new(1, Leaf::EMPTY, 0);
        assert_eq!(meta.n_non_empty, 0);
        assert_eq!(meta.covered_bits(), 16);
        meta.update_count(Leaf::EMPTY, Leaf::Terminal(Adj(4)));
        meta.update_count(Leaf::Terminal(Adj(4)), Leaf::Terminal(Adj(5)));
        assert_eq!(meta.n_non_empty, 1);
        meta.update_count(Leaf::Terminal(Adj(5)), Leaf::EMPTY);
        assert_eq!(meta.n_non_empty, 0);

        let full = PlyMeta::new(2, Leaf::Terminal(Adj(9)), 12);
        assert_eq!(full.n_non_empty, 256);
        assert_eq!(full.len(200), 12);
    }

    #[test]
    fn leaves() {
        let leaves = PlyLeaves::new();
        assert_eq!(leaves.load(255), Leaf::EMPTY);
        leaves.store(255, Leaf::Terminal(Adj(3)));
        assert_eq!(leaves.load(255), Leaf::Terminal(Adj(3)));
        leaves.fill(Leaf::Terminal(Adj(4)));
        assert_eq!(leaves.load(0), Leaf::Terminal(Adj(4)));
        assert_eq!(leaves.load(255), Leaf::Terminal(Adj(4)));
    }
}
