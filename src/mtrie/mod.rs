//! A multi-bit trie for longest prefix match lookups on the forwarding path.
//!
//! The trie decides one address byte per level: each node ("ply") has 256
//! slots, and a slot holds a [Leaf] that is either the final adjacency for
//! every address reaching it, or the index of the ply that decides on the
//! next byte. A lookup therefore touches at most four plies.
//!
//! Prefixes that do not end on a byte boundary occupy a range of slots.
//! Every slot remembers the length of the prefix responsible for it, so
//! that a shorter prefix never overwrites a longer one, whatever the order
//! they were installed in.
//!
//! There is one writer, the [Mtrie] itself, and any number of readers,
//! [MtrieReader]s, that may run lookups on other threads while the writer
//! mutates. Slots are single atomic words; a child ply is filled in before
//! the slot pointing to it is published. Freed plies are only handed out
//! again after every reader that was pinned at the time has unpinned its
//! epoch guard.
//!
//! The trie keeps no record of shadowed routes. When a prefix is removed,
//! the owner names the next less specific route, and [Mtrie::unset] writes
//! it straight into every vacated slot. A reader racing with a delete
//! therefore sees either the removed route or the one it uncovers, never a
//! miss in between. The default route (`/0`) is not stored here.

mod leaf;
mod ply;

pub use leaf::{Leaf, PlyIndex};
pub use ply::PLY_SLOTS;

use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_epoch::Guard;
use log::{error, log_enabled, trace};
use roaring::RoaringBitmap;

use crate::adjacency::Adj;
use crate::arena::ChunkedArena;
use crate::types::af::Address;
use crate::types::errors::{FatalError, FatalResult};
use crate::types::prefix::Prefix;

use ply::{PlyLeaves, PlyMeta};

// The address byte that a ply at `depth` decides on.
fn key_byte(key: u32, depth: u8) -> u8 {
    (key >> (24 - 8 * u32::from(depth.min(3)))) as u8
}

//------------ Shared --------------------------------------------------------

struct Shared {
    plies: ChunkedArena<PlyLeaves>,
}

impl Shared {
    fn lookup(&self, addr: Address, _guard: &Guard) -> FatalResult<Adj> {
        let mut ply = PlyIndex::ROOT;
        for byte in addr.octets() {
            let leaves = self.plies.get(ply.as_usize()).ok_or_else(|| {
                error!("lookup {} reached unallocated ply {}", addr, ply.0);
                FatalError
            })?;
            match leaves.load(byte) {
                Leaf::Terminal(adj) => return Ok(adj),
                Leaf::Ply(child) => ply = child,
            }
        }
        error!("lookup {} found no terminal leaf in 4 plies", addr);
        Err(FatalError)
    }
}

//------------ MtrieReader ---------------------------------------------------

/// A lookup handle on a trie, that can be cloned and sent to forwarding
/// threads.
#[derive(Clone)]
pub struct MtrieReader {
    shared: Arc<Shared>,
}

impl MtrieReader {
    /// The adjacency of the longest prefix in the trie matching `addr`, or
    /// [Adj::MISS]. The guard has to be pinned for the duration of the
    /// lookup.
    pub fn lookup(&self, addr: Address, guard: &Guard) -> FatalResult<Adj> {
        self.shared.lookup(addr, guard)
    }
}

impl std::fmt::Debug for MtrieReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MtrieReader").finish_non_exhaustive()
    }
}

//------------ Mtrie ---------------------------------------------------------

pub struct Mtrie {
    shared: Arc<Shared>,
    // Indexed by ply index, None for plies that have been freed.
    meta: Vec<Option<PlyMeta>>,
    live: RoaringBitmap,
    // Ply indexes that may be reused. Filled by deferred functions once no
    // reader can hold on to the ply anymore.
    free: Arc<Mutex<Vec<u32>>>,
}

impl Mtrie {
    /// Create a trie that can hold up to `ply_capacity` plies, with an
    /// empty root ply.
    pub fn new(ply_capacity: usize) -> FatalResult<Self> {
        let shared = Arc::new(Shared {
            plies: ChunkedArena::new(ply_capacity, PlyLeaves::new),
        });
        shared.plies.get_or_create(PlyIndex::ROOT.as_usize())?;
        let mut live = RoaringBitmap::new();
        live.insert(PlyIndex::ROOT.0);

        Ok(Self {
            shared,
            meta: vec![Some(PlyMeta::new(0, Leaf::EMPTY, 0))],
            live,
            free: Arc::new(Mutex::new(vec![])),
        })
    }

    pub fn reader(&self) -> MtrieReader {
        MtrieReader {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn lookup(&self, addr: Address, guard: &Guard) -> FatalResult<Adj> {
        self.shared.lookup(addr, guard)
    }

    /// The number of plies in use, including the root.
    pub fn ply_count(&self) -> u64 {
        self.live.len()
    }

    /// The number of non-empty slots in the root ply.
    pub fn root_non_empty(&self) -> FatalResult<u16> {
        Ok(self.meta(PlyIndex::ROOT)?.n_non_empty)
    }

    /// Whether the plies that installing `prefix` needs are available.
    pub fn has_room_for(&self, prefix: &Prefix) -> FatalResult<bool> {
        Ok(self.plies_needed(prefix)? <= self.plies_available())
    }

    // New plies on the path to `prefix`: one per address byte that is
    // still to be decided below the first terminal slot.
    fn plies_needed(&self, prefix: &Prefix) -> FatalResult<usize> {
        let key = prefix.key();
        let mut ply = PlyIndex::ROOT;
        loop {
            match self.slots(ply, key, prefix.len())? {
                Slots::Range(..) => return Ok(0),
                Slots::Descend(slot, depth) => {
                    match self.leaves(ply)?.load(slot) {
                        Leaf::Ply(child) => ply = child,
                        Leaf::Terminal(_) => {
                            let covered = 8 * (usize::from(depth) + 1);
                            return Ok((usize::from(prefix.len()) - covered)
                                .div_ceil(8));
                        }
                    }
                }
            }
        }
    }

    fn plies_available(&self) -> usize {
        let reusable = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let capacity = self
            .shared
            .plies
            .capacity()
            .min(Leaf::MAX_INDEX as usize + 1);
        reusable + capacity.saturating_sub(self.meta.len())
    }

    //-------- Mutations ----------------------------------------------------

    /// Install `adj` for `prefix`. Slots held by a more specific prefix
    /// are left alone.
    pub fn set(&mut self, prefix: &Prefix, adj: Adj) -> FatalResult<()> {
        let leaf = Self::terminal(adj)?;
        if log_enabled!(log::Level::Trace) {
            trace!("mtrie set {} {}", prefix, leaf);
        }
        self.paint(PlyIndex::ROOT, prefix.key(), prefix.len(), leaf)
    }

    /// Remove `adj` for `prefix`. Every slot in its range that holds `adj`
    /// on behalf of a prefix of the same length is handed to `less`, the
    /// length and adjacency of the next less specific route, or becomes
    /// empty if there is none. Each slot changes with a single store.
    pub fn unset(
        &mut self,
        prefix: &Prefix,
        adj: Adj,
        less: Option<(u8, Adj)>,
    ) -> FatalResult<()> {
        let leaf = Self::terminal(adj)?;
        let restore = match less {
            Some((len, _)) if len >= prefix.len() => {
                error!("{} is not less specific than {}", len, prefix);
                return Err(FatalError);
            }
            Some((len, adj)) => (Self::terminal(adj)?, len),
            None => (Leaf::EMPTY, 0),
        };
        if log_enabled!(log::Level::Trace) {
            trace!("mtrie unset {} {}, restore {}", prefix, leaf, restore.0);
        }
        self.clear(PlyIndex::ROOT, prefix.key(), prefix.len(), leaf, restore)
    }

    /// Collapse plies on the path to `prefix` whose slots all hold the same
    /// terminal leaf for a prefix that fits the parent slot. Returns the
    /// number of plies freed. The root ply is never freed.
    pub fn compact(
        &mut self,
        prefix: &Prefix,
        guard: &Guard,
    ) -> FatalResult<usize> {
        let key = prefix.key();
        let mut path = vec![];
        let mut ply = PlyIndex::ROOT;
        loop {
            let meta = self.meta(ply)?;
            if prefix.len() <= meta.covered_bits() {
                break;
            }
            let slot = key_byte(key, meta.depth);
            match self.leaves(ply)?.load(slot) {
                Leaf::Ply(child) => {
                    path.push((ply, slot, child));
                    ply = child;
                }
                Leaf::Terminal(_) => break,
            }
        }

        let mut freed = 0;
        for (parent, slot, child) in path.into_iter().rev() {
            let parent_bits = self.meta(parent)?.covered_bits();
            match self.uniform(child)? {
                Some((leaf, len)) if len <= parent_bits => {
                    self.store(parent, slot, leaf, len)?;
                    self.free_ply(child, guard);
                    freed += 1;
                }
                _ => break,
            }
        }
        Ok(freed)
    }

    /// Replace every terminal leaf for `from` with `to`. If `to` is
    /// [Adj::NIL] the slots become empty instead. Returns the number of
    /// slots changed.
    pub fn remap_adjacency(&mut self, from: Adj, to: Adj) -> FatalResult<usize> {
        let from = Self::terminal(from)?;
        let to = match to {
            Adj::NIL => None,
            adj => Some(Self::terminal(adj)?),
        };
        let plies = self.live.iter().map(PlyIndex).collect::<Vec<_>>();
        let mut n = 0;
        for ply in plies {
            for slot in 0..=u8::MAX {
                if self.leaves(ply)?.load(slot) != from {
                    continue;
                }
                match to {
                    Some(leaf) => {
                        let len = self.meta(ply)?.len(slot);
                        self.store(ply, slot, leaf, len)?;
                    }
                    None => self.store(ply, slot, Leaf::EMPTY, 0)?,
                }
                n += 1;
            }
        }
        Ok(n)
    }

    //-------- Internals ----------------------------------------------------

    fn terminal(adj: Adj) -> FatalResult<Leaf> {
        if adj.0 > Leaf::MAX_INDEX {
            error!("adjacency {} does not fit in a trie leaf", adj);
            return Err(FatalError);
        }
        Ok(Leaf::Terminal(adj))
    }

    fn leaves(&self, ply: PlyIndex) -> FatalResult<&PlyLeaves> {
        self.shared.plies.get(ply.as_usize()).ok_or_else(|| {
            error!("ply {} is not allocated", ply.0);
            FatalError
        })
    }

    fn meta(&self, ply: PlyIndex) -> FatalResult<&PlyMeta> {
        self.meta
            .get(ply.as_usize())
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                error!("ply {} is not live", ply.0);
                FatalError
            })
    }

    // Write one slot and keep the bookkeeping in step.
    fn store(
        &mut self,
        ply: PlyIndex,
        slot: u8,
        leaf: Leaf,
        len: u8,
    ) -> FatalResult<()> {
        let leaves =
            self.shared.plies.get(ply.as_usize()).ok_or(FatalError)?;
        let meta = self
            .meta
            .get_mut(ply.as_usize())
            .and_then(Option::as_mut)
            .ok_or(FatalError)?;
        meta.update_count(leaves.load(slot), leaf);
        meta.set_len(slot, len);
        leaves.store(slot, leaf);
        Ok(())
    }

    fn alloc_ply(
        &mut self,
        depth: u8,
        fill: Leaf,
        fill_len: u8,
    ) -> FatalResult<PlyIndex> {
        let reused = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let idx = reused.unwrap_or(self.meta.len() as u32);
        if idx > Leaf::MAX_INDEX {
            error!("out of ply indexes");
            return Err(FatalError);
        }

        // Not reachable by any reader until the parent slot is stored.
        self.shared.plies.get_or_create(idx as usize)?.fill(fill);

        let meta = PlyMeta::new(depth, fill, fill_len);
        match self.meta.get_mut(idx as usize) {
            Some(m) => *m = Some(meta),
            None => self.meta.push(Some(meta)),
        }
        self.live.insert(idx);
        trace!("new ply {} depth {} filled with {}", idx, depth, fill);
        Ok(PlyIndex(idx))
    }

    fn free_ply(&mut self, ply: PlyIndex, guard: &Guard) {
        trace!("free ply {}", ply.0);
        self.live.remove(ply.0);
        if let Some(m) = self.meta.get_mut(ply.as_usize()) {
            *m = None;
        }
        let free = Arc::clone(&self.free);
        let idx = ply.0;
        guard.defer(move || {
            free.lock().unwrap_or_else(PoisonError::into_inner).push(idx)
        });
    }

    // The slots of `ply` that the range of (key, range_len) covers, or the
    // single slot to descend through if the range is narrower than a slot.
    fn slots(
        &self,
        ply: PlyIndex,
        key: u32,
        range_len: u8,
    ) -> FatalResult<Slots> {
        let meta = self.meta(ply)?;
        let covered = meta.covered_bits();
        let byte = key_byte(key, meta.depth);
        if range_len > covered {
            return Ok(Slots::Descend(byte, meta.depth));
        }
        let n = 1_u16 << (covered - range_len).min(8);
        let start = u16::from(byte) & !(n - 1);
        Ok(Slots::Range(start, start + n))
    }

    fn paint(
        &mut self,
        ply: PlyIndex,
        key: u32,
        len: u8,
        leaf: Leaf,
    ) -> FatalResult<()> {
        match self.slots(ply, key, len)? {
            Slots::Range(start, end) => {
                for slot in start..end {
                    self.paint_slot(ply, slot as u8, len, leaf)?;
                }
                Ok(())
            }
            Slots::Descend(slot, depth) => {
                let child = match self.leaves(ply)?.load(slot) {
                    Leaf::Ply(child) => child,
                    old @ Leaf::Terminal(_) => {
                        // Split: the new ply starts out answering what the
                        // slot answered.
                        let old_len = self.meta(ply)?.len(slot);
                        let child = self.alloc_ply(depth + 1, old, old_len)?;
                        self.store(ply, slot, Leaf::Ply(child), old_len)?;
                        child
                    }
                };
                self.paint(child, key, len, leaf)
            }
        }
    }

    // Install `leaf` in `slot` if nothing more specific holds it, pushing
    // it down into the whole subtree if the slot is a ply.
    fn paint_slot(
        &mut self,
        ply: PlyIndex,
        slot: u8,
        resp_len: u8,
        leaf: Leaf,
    ) -> FatalResult<()> {
        match self.leaves(ply)?.load(slot) {
            Leaf::Ply(child) => {
                for s in 0..=u8::MAX {
                    self.paint_slot(child, s, resp_len, leaf)?;
                }
                Ok(())
            }
            Leaf::Terminal(_) => {
                if resp_len >= self.meta(ply)?.len(slot) {
                    self.store(ply, slot, leaf, resp_len)?;
                }
                Ok(())
            }
        }
    }

    fn clear(
        &mut self,
        ply: PlyIndex,
        key: u32,
        len: u8,
        leaf: Leaf,
        restore: (Leaf, u8),
    ) -> FatalResult<()> {
        match self.slots(ply, key, len)? {
            Slots::Range(start, end) => {
                for slot in start..end {
                    self.clear_slot(ply, slot as u8, len, leaf, restore)?;
                }
                Ok(())
            }
            Slots::Descend(slot, _) => match self.leaves(ply)?.load(slot) {
                Leaf::Ply(child) => self.clear(child, key, len, leaf, restore),
                // Nothing more specific than this slot was ever installed.
                Leaf::Terminal(_) => Ok(()),
            },
        }
    }

    fn clear_slot(
        &mut self,
        ply: PlyIndex,
        slot: u8,
        len: u8,
        leaf: Leaf,
        restore: (Leaf, u8),
    ) -> FatalResult<()> {
        match self.leaves(ply)?.load(slot) {
            Leaf::Ply(child) => {
                for s in 0..=u8::MAX {
                    self.clear_slot(child, s, len, leaf, restore)?;
                }
                Ok(())
            }
            current => {
                if current == leaf && self.meta(ply)?.len(slot) == len {
                    self.store(ply, slot, restore.0, restore.1)?;
                }
                Ok(())
            }
        }
    }

    // If every slot of `ply` holds the same terminal leaf for the same
    // length, return those.
    fn uniform(&self, ply: PlyIndex) -> FatalResult<Option<(Leaf, u8)>> {
        let leaves = self.leaves(ply)?;
        let meta = self.meta(ply)?;
        let first = leaves.load(0);
        let len = meta.len(0);
        if !first.is_terminal() {
            return Ok(None);
        }
        if (1..=u8::MAX).all(|s| leaves.load(s) == first && meta.len(s) == len)
        {
            Ok(Some((first, len)))
        } else {
            Ok(None)
        }
    }
}

enum Slots {
    // Half open range of slots.
    Range(u16, u16),
    // Slot and depth of the ply to descend through.
    Descend(u8, u8),
}

impl std::fmt::Debug for Mtrie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mtrie")
            .field("plies", &self.live.len())
            .field("arena", &self.shared.plies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::errors::FibError;

    fn p(s: &str) -> Result<Prefix, FibError> {
        s.parse()
    }

    fn a(s: &str) -> Address {
        s.parse().unwrap_or_default()
    }

    #[test]
    fn empty_trie_misses() -> Result<(), Box<dyn std::error::Error>> {
        let trie = Mtrie::new(1024)?;
        let guard = &crossbeam_epoch::pin();
        assert_eq!(trie.lookup(a("11.0.0.0"), guard)?, Adj::MISS);
        assert_eq!(trie.ply_count(), 1);
        Ok(())
    }

    #[test]
    fn short_prefix_takes_a_range() -> Result<(), Box<dyn std::error::Error>>
    {
        let mut trie = Mtrie::new(1024)?;
        let guard = &crossbeam_epoch::pin();
        trie.set(&p("128.0.0.0/1")?, Adj(4))?;
        assert_eq!(trie.root_non_empty()?, 128);
        assert_eq!(trie.lookup(a("200.1.1.1"), guard)?, Adj(4));
        assert_eq!(trie.lookup(a("127.1.1.1"), guard)?, Adj::MISS);
        assert_eq!(trie.ply_count(), 1);
        trie.unset(&p("128.0.0.0/1")?, Adj(4), None)?;
        assert_eq!(trie.root_non_empty()?, 0);
        Ok(())
    }

    #[test]
    fn more_specific_wins_in_any_order(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let guard = &crossbeam_epoch::pin();
        for order in [[0, 1, 2], [2, 1, 0], [1, 2, 0]] {
            let routes = [
                (p("10.0.0.0/8")?, Adj(5)),
                (p("10.1.0.0/16")?, Adj(7)),
                (p("10.1.1.128/25")?, Adj(9)),
            ];
            let mut trie = Mtrie::new(1024)?;
            for i in order {
                if let Some((prefix, adj)) = routes.get(i) {
                    trie.set(prefix, *adj)?;
                }
            }
            assert_eq!(trie.lookup(a("10.2.0.1"), guard)?, Adj(5));
            assert_eq!(trie.lookup(a("10.1.0.1"), guard)?, Adj(7));
            assert_eq!(trie.lookup(a("10.1.1.1"), guard)?, Adj(7));
            assert_eq!(trie.lookup(a("10.1.1.200"), guard)?, Adj(9));
            assert_eq!(trie.ply_count(), 4);
        }
        Ok(())
    }

    #[test]
    fn unset_restores_and_compacts() -> Result<(), Box<dyn std::error::Error>>
    {
        let guard = &crossbeam_epoch::pin();
        let mut trie = Mtrie::new(1024)?;
        let less = p("10.0.0.0/8")?;
        let more = p("10.1.1.0/24")?;
        trie.set(&less, Adj(5))?;
        trie.set(&more, Adj(7))?;
        assert_eq!(trie.ply_count(), 3);

        trie.unset(&more, Adj(7), Some((less.len(), Adj(5))))?;
        assert_eq!(trie.lookup(a("10.1.1.1"), guard)?, Adj(5));
        assert_eq!(trie.compact(&more, guard)?, 2);
        assert_eq!(trie.ply_count(), 1);
        assert_eq!(trie.lookup(a("10.1.1.1"), guard)?, Adj(5));
        assert_eq!(trie.lookup(a("10.200.1.1"), guard)?, Adj(5));

        // Without a less specific route the range misses.
        trie.set(&more, Adj(7))?;
        trie.unset(&more, Adj(7), None)?;
        trie.unset(&less, Adj(5), None)?;
        assert_eq!(trie.lookup(a("10.1.1.1"), guard)?, Adj::MISS);
        Ok(())
    }

    #[test]
    fn unset_keeps_more_specifics() -> Result<(), Box<dyn std::error::Error>>
    {
        let guard = &crossbeam_epoch::pin();
        let mut trie = Mtrie::new(1024)?;
        trie.set(&p("10.0.0.0/8")?, Adj(5))?;
        trie.set(&p("10.1.0.0/16")?, Adj(6))?;
        trie.set(&p("10.1.2.0/24")?, Adj(7))?;
        trie.unset(&p("10.1.0.0/16")?, Adj(6), Some((8, Adj(5))))?;
        assert_eq!(trie.lookup(a("10.1.2.3"), guard)?, Adj(7));
        assert_eq!(trie.lookup(a("10.1.3.3"), guard)?, Adj(5));
        // The less specific must be shorter.
        assert_eq!(
            trie.unset(&p("10.1.2.0/24")?, Adj(7), Some((24, Adj(5)))),
            Err(FatalError)
        );
        Ok(())
    }

    #[test]
    fn unset_needs_matching_length() -> Result<(), Box<dyn std::error::Error>>
    {
        let guard = &crossbeam_epoch::pin();
        let mut trie = Mtrie::new(1024)?;
        // Same adjacency on nested prefixes.
        trie.set(&p("10.0.0.0/8")?, Adj(5))?;
        trie.set(&p("10.1.0.0/16")?, Adj(5))?;
        trie.unset(&p("10.0.0.0/8")?, Adj(5), None)?;
        assert_eq!(trie.lookup(a("10.1.2.3"), guard)?, Adj(5));
        assert_eq!(trie.lookup(a("10.2.2.3"), guard)?, Adj::MISS);
        Ok(())
    }

    #[test]
    fn remap() -> Result<(), Box<dyn std::error::Error>> {
        let guard = &crossbeam_epoch::pin();
        let mut trie = Mtrie::new(1024)?;
        trie.set(&p("10.0.0.0/8")?, Adj(5))?;
        trie.set(&p("10.1.1.0/24")?, Adj(5))?;
        trie.set(&p("10.1.2.0/24")?, Adj(6))?;
        assert_eq!(trie.remap_adjacency(Adj(5), Adj(8))?, 255 + 255);
        assert_eq!(trie.lookup(a("10.1.1.1"), guard)?, Adj(8));
        assert_eq!(trie.lookup(a("10.9.1.1"), guard)?, Adj(8));
        assert_eq!(trie.lookup(a("10.1.2.1"), guard)?, Adj(6));
        trie.remap_adjacency(Adj(8), Adj::NIL)?;
        assert_eq!(trie.lookup(a("10.9.1.1"), guard)?, Adj::MISS);
        Ok(())
    }

    #[test]
    fn capacity_is_enforced() -> Result<(), Box<dyn std::error::Error>> {
        // One chunk of plies.
        let mut trie = Mtrie::new(1)?;
        let mut res = Ok(());
        for i in 0..=255_u8 {
            let prefix = Prefix::new(Address::new(i, 0, 0, 0), 16)?;
            res = trie.set(&prefix, Adj(3));
            if res.is_err() {
                break;
            }
        }
        assert_eq!(res, Err(FatalError));
        Ok(())
    }

    #[test]
    fn room_for_plies() -> Result<(), Box<dyn std::error::Error>> {
        let mut trie = Mtrie::new(1)?;
        assert_eq!(trie.plies_needed(&p("10.0.0.0/8")?)?, 0);
        assert_eq!(trie.plies_needed(&p("10.0.0.0/9")?)?, 1);
        assert_eq!(trie.plies_needed(&p("10.1.2.3/32")?)?, 3);
        trie.set(&p("10.1.0.0/16")?, Adj(3))?;
        assert_eq!(trie.plies_needed(&p("10.1.2.3/32")?)?, 2);
        assert_eq!(trie.plies_needed(&p("10.9.0.0/16")?)?, 0);

        // 64 plies, the root and 10/8's child are in use.
        assert!(trie.has_room_for(&p("11.1.2.0/24")?)?);
        for i in 0..62_u8 {
            trie.set(&Prefix::new(Address::new(20 + i, 0, 0, 0), 16)?, Adj(3))?;
        }
        assert_eq!(trie.ply_count(), 64);
        assert!(!trie.has_room_for(&p("90.1.0.0/16")?)?);
        assert!(trie.has_room_for(&p("20.7.0.0/16")?)?);
        Ok(())
    }
}
