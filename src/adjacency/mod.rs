//! Adjacencies: what to do with a packet once its route is known.
//!
//! Adjacencies live in a heap of contiguous blocks and are referred to by
//! the index of their first element, an [Adj]. A unipath route points at a
//! block of one; a multipath route points at a power of two sized block
//! that holds one replica of a next hop's adjacency per unit of its
//! normalized weight, so that the forwarding path can pick a replica by
//! flow hash. Identical next hop sets share one block, see the
//! [multipath](self::multipath) module.
//!
//! The first three adjacencies are created when the table is and are
//! never freed: [Adj::MISS], [Adj::DROP] and [Adj::PUNT].

mod counters;
mod heap;
mod multipath;

pub use counters::AdjacencyCounters;
pub use multipath::{normalize_pow2, MultipathAdjacency};

use std::fmt;
use std::sync::Arc;

use log::{debug, error, info};
use serde_derive::{Deserialize, Serialize};

use crate::config::FibConfig;
use crate::mtrie::Leaf;
use crate::types::errors::{FatalError, FibError};
use crate::types::stats::CombinedCounter;
use crate::types::{IfAddr, Si};

use heap::AdjacencyHeap;
use multipath::MultipathMain;

//------------ Adj -----------------------------------------------------------

/// The index of an adjacency in the adjacency heap.
#[derive(
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub struct Adj(pub u32);

impl Adj {
    /// No route. Always present at index 0.
    pub const MISS: Adj = Adj(0);
    pub const DROP: Adj = Adj(1);
    pub const PUNT: Adj = Adj(2);
    /// No adjacency at all. `NIL + 1` is still a valid value.
    pub const NIL: Adj = Adj(u32::MAX - 1);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The adjacency `i` elements into the block starting at self.
    pub fn offset(self, i: u32) -> Adj {
        Adj(self.0.wrapping_add(i))
    }

    pub fn is_special(self) -> bool {
        self.0 <= Adj::PUNT.0
    }
}

impl fmt::Display for Adj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Adj::NIL => write!(f, "nil"),
            Adj(i) => write!(f, "{}", i),
        }
    }
}

impl fmt::Debug for Adj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Adj({})", self)
    }
}

//------------ LookupNext ----------------------------------------------------

/// The node a packet goes to after the FIB lookup.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LookupNext {
    #[default]
    Miss,
    Drop,
    Punt,
    /// Deliver to this host.
    Local,
    /// Directly connected, but the link layer address is not known yet.
    Glean,
    /// Rewrite the link layer header and transmit.
    Rewrite,
}

impl fmt::Display for LookupNext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LookupNext::Miss => "miss",
            LookupNext::Drop => "drop",
            LookupNext::Punt => "punt",
            LookupNext::Local => "local",
            LookupNext::Glean => "glean",
            LookupNext::Rewrite => "rewrite",
        };
        f.write_str(s)
    }
}

//------------ Rewrite -------------------------------------------------------

/// The link layer header to prepend, built by the interface layer. Opaque
/// to the FIB.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Rewrite {
    pub data: Vec<u8>,
    pub max_packet_size: u16,
}

//------------ Adjacency -----------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Adjacency {
    /// The interface address a local or glean adjacency belongs to.
    pub if_addr: Option<IfAddr>,
    /// The size of the block this adjacency is part of. More than one
    /// means multipath.
    pub n_adj: u32,
    pub lookup_next: LookupNext,
    /// The interface to transmit on.
    pub si: Option<Si>,
    pub rewrite: Rewrite,
}

impl Adjacency {
    pub fn new(lookup_next: LookupNext) -> Self {
        Self {
            lookup_next,
            n_adj: 1,
            ..Default::default()
        }
    }

    pub fn is_rewrite(&self) -> bool {
        self.lookup_next == LookupNext::Rewrite
    }

    pub fn is_local(&self) -> bool {
        self.lookup_next == LookupNext::Local
    }

    pub fn is_glean(&self) -> bool {
        self.lookup_next == LookupNext::Glean
    }
}

impl fmt::Display for Adjacency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lookup_next)?;
        if let Some(si) = self.si {
            write!(f, " {}", si)?;
        }
        if let Some(ia) = self.if_addr {
            write!(f, " {}", ia)?;
        }
        if self.is_rewrite() {
            write!(f, " rewrite {} bytes", self.rewrite.data.len())?;
        }
        Ok(())
    }
}

//------------ NextHop -------------------------------------------------------

pub type NextHopWeight = u32;

/// A candidate adjacency and its relative weight.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct NextHop {
    pub adj: Adj,
    pub weight: NextHopWeight,
}

impl NextHop {
    pub fn new(adj: Adj, weight: NextHopWeight) -> Self {
        Self { adj, weight }
    }

    /// The canonical order of next hops: decreasing weight, then
    /// increasing adjacency index.
    pub fn canonical_cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .weight
            .cmp(&self.weight)
            .then(self.adj.cmp(&other.adj))
    }
}

//------------ Remap ---------------------------------------------------------

/// Routes pointing at `from` have to point at `to` instead, or be removed
/// if `to` is [Adj::NIL].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Remap {
    pub from: Adj,
    pub to: Adj,
}

//------------ Hooks ---------------------------------------------------------

/// Called with the base of a block and its adjacencies, after the block is
/// created (false) or before it is freed (true).
pub type AdjAddDelHook = Box<dyn FnMut(Adj, &[Adjacency], bool) + Send>;

/// Called to have a collaborator fold its own counters (e.g. from
/// hardware) into the software counters.
pub type AdjSyncCounterHook = Box<dyn FnMut(&AdjacencyCounters) + Send>;

/// Called to have a collaborator report extra counters for an adjacency.
pub type AdjGetCounterHook =
    Box<dyn Fn(Adj, u32, &mut dyn FnMut(&str, CombinedCounter)) + Send>;

//------------ AdjacencyMain -------------------------------------------------

pub struct AdjacencyMain {
    heap: AdjacencyHeap,
    multipath: MultipathMain,
    counters: Arc<AdjacencyCounters>,
    add_del_hooks: Vec<AdjAddDelHook>,
    sync_counter_hooks: Vec<AdjSyncCounterHook>,
    get_counter_hooks: Vec<AdjGetCounterHook>,
}

impl AdjacencyMain {
    pub fn new(config: &FibConfig) -> Result<Self, FatalError> {
        let mut main = Self {
            heap: AdjacencyHeap::new(Leaf::MAX_INDEX),
            multipath: MultipathMain::new(
                config.multipath_error_tolerance,
                config.max_multipath_block,
            ),
            counters: Arc::new(AdjacencyCounters::new(
                config.counter_threads,
                config.adjacency_counter_capacity,
            )),
            add_del_hooks: vec![],
            sync_counter_hooks: vec![],
            get_counter_hooks: vec![],
        };
        main.init_special()?;
        info!(
            "adjacency heap ready, {} counter banks",
            main.counters.n_threads()
        );
        Ok(main)
    }

    // Must land in order 0 1 2.
    fn init_special(&mut self) -> Result<(), FatalError> {
        for (want, next) in [
            (Adj::MISS, LookupNext::Miss),
            (Adj::DROP, LookupNext::Drop),
            (Adj::PUNT, LookupNext::Punt),
        ] {
            let got = self.heap.get(1, &Adjacency::new(next))?;
            if got != want {
                error!(
                    "special adjacency index mismatch got {} != want {}",
                    got, want
                );
                return Err(FatalError);
            }
            self.counters.clear(got);
        }
        Ok(())
    }

    //-------- Hooks --------------------------------------------------------

    /// Register a hook for block creation and deletion. The hook is called
    /// right away for the special adjacencies, as they already exist.
    pub fn register_adj_add_del_hook(&mut self, mut hook: AdjAddDelHook) {
        for adj in [Adj::MISS, Adj::DROP, Adj::PUNT] {
            if let Some(block) = self.heap.slice(adj) {
                hook(adj, block, false);
            }
        }
        self.add_del_hooks.push(hook);
    }

    pub fn register_adj_sync_counter_hook(&mut self, hook: AdjSyncCounterHook) {
        self.sync_counter_hooks.push(hook);
    }

    pub fn register_adj_get_counter_hook(&mut self, hook: AdjGetCounterHook) {
        self.get_counter_hooks.push(hook);
    }

    fn call_adj_add_del_hooks(&mut self, adj: Adj, is_del: bool) {
        if self.add_del_hooks.is_empty() {
            return;
        }
        let Some(block) = self.heap.slice(adj) else {
            return;
        };
        for hook in self.add_del_hooks.iter_mut() {
            hook(adj, block, is_del);
        }
    }

    /// Tell the add/delete hooks that the block at `adj` is ready for use.
    pub fn call_adj_add_hooks(&mut self, adj: Adj) {
        self.call_adj_add_del_hooks(adj, false)
    }

    pub fn call_adj_del_hooks(&mut self, adj: Adj) {
        self.call_adj_add_del_hooks(adj, true)
    }

    //-------- Blocks -------------------------------------------------------

    /// Reserve a block of `n` adjacencies, set to `template` if given.
    /// The caller fills in the block through [get_adj_mut] and then calls
    /// [call_adj_add_hooks].
    ///
    /// [get_adj_mut]: Self::get_adj_mut
    /// [call_adj_add_hooks]: Self::call_adj_add_hooks
    pub fn new_adj(
        &mut self,
        n: u32,
        template: Option<&Adjacency>,
    ) -> Result<Adj, FibError> {
        let mut template = template.cloned().unwrap_or_default();
        template.n_adj = n;
        let adj = self.heap.get(n, &template)?;
        for i in 0..n {
            self.counters.clear(adj.offset(i));
        }
        Ok(adj)
    }

    /// The block starting at `adj`.
    pub fn get_adj(&self, adj: Adj) -> Result<&[Adjacency], FibError> {
        self.heap
            .slice(adj)
            .ok_or(FibError::UnknownAdjacency(adj.0))
    }

    pub fn get_adj_mut(
        &mut self,
        adj: Adj,
    ) -> Result<&mut [Adjacency], FibError> {
        self.heap
            .slice_mut(adj)
            .ok_or(FibError::UnknownAdjacency(adj.0))
    }

    /// True if `adj` lies in no allocated block.
    pub fn is_adj_free(&self, adj: Adj) -> bool {
        self.heap.is_free(adj)
    }

    /// Free a unipath block. Multipath blocks referencing it are not
    /// touched; see [del_multipath_adj](Self::del_multipath_adj) for that.
    pub fn free_adj(&mut self, adj: Adj) -> Result<(), FibError> {
        if adj.is_special() {
            error!("attempt to free special adjacency {}", adj);
            return Err(FibError::UnknownAdjacency(adj.0));
        }
        if self.is_mp_adj(adj) {
            return self.free_mp_adj(adj);
        }
        self.release_block(adj)
    }

    fn release_block(&mut self, adj: Adj) -> Result<(), FibError> {
        if self.heap.slice(adj).is_none() {
            return Err(FibError::UnknownAdjacency(adj.0));
        }
        self.call_adj_del_hooks(adj);
        self.heap.put(adj)?;
        debug!("freed adjacency {}", adj);
        Ok(())
    }

    /// The number of allocated blocks, the special ones included.
    pub fn n_blocks(&self) -> usize {
        self.heap.n_blocks()
    }

    //-------- Counters -----------------------------------------------------

    pub fn counters(&self) -> &Arc<AdjacencyCounters> {
        &self.counters
    }

    /// Ask the sync hooks to fold their counters into ours.
    pub fn sync_counters(&mut self) {
        let counters = Arc::clone(&self.counters);
        for hook in self.sync_counter_hooks.iter_mut() {
            hook(&counters);
        }
    }

    /// Report the counter of the adjacency `offset` into the block at
    /// `adj`: first the software counter, tagged with the empty string,
    /// then whatever the get counter hooks add.
    pub fn foreach_adj_counter(
        &self,
        adj: Adj,
        offset: u32,
        mut f: impl FnMut(&str, CombinedCounter),
    ) {
        f("", self.counters.get(adj.offset(offset)));
        for hook in &self.get_counter_hooks {
            hook(adj, offset, &mut f);
        }
    }
}

impl fmt::Debug for AdjacencyMain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdjacencyMain")
            .field("heap", &self.heap.len())
            .field("blocks", &self.heap.n_blocks())
            .field("multipath", &self.multipath.len())
            .finish()
    }
}
