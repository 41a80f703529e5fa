//! Forwarding tables and the context that ties them to adjacencies.
//!
//! A [Fib] is one routing table: the route map holds the truth about
//! which prefix points where, the trie answers lookups. The default route
//! lives outside of the trie, in a word that readers fall back to when the
//! trie misses.
//!
//! [Main] owns every table, the adjacencies, the interface addresses and
//! the next hops that routes were given by address.

mod interface;
mod main;
mod next_hop;

pub use interface::{IfAddrAddDelHook, IfAddress};
pub use main::{FibAddDelHook, Main};
pub use next_hop::{NextHopAddress, NextHopState};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_epoch::{self as epoch, Guard};
use log::{debug, log_enabled, trace, warn};
use serde_derive::Serialize;

use crate::adjacency::{Adj, LookupNext, NextHop};
use crate::config::FibConfig;
use crate::mtrie::{Mtrie, MtrieReader};
use crate::route_map::MapFib;
use crate::types::af::Address;
use crate::types::errors::{FatalResult, FibError};
use crate::types::prefix::Prefix;
use crate::types::stats::{Counters, FibStats, PrefixLenCount};
use crate::types::FibIndex;

//------------ Fib -----------------------------------------------------------

pub struct Fib {
    index: FibIndex,
    routes: MapFib,
    mtrie: Mtrie,
    default: Arc<AtomicU32>,
    counters: Counters,
}

impl Fib {
    pub(crate) fn new(index: FibIndex, config: &FibConfig) -> FatalResult<Self> {
        Ok(Self {
            index,
            routes: MapFib::new(),
            mtrie: Mtrie::new(config.ply_capacity)?,
            default: Arc::new(AtomicU32::new(Adj::MISS.0)),
            counters: Counters::default(),
        })
    }

    pub fn index(&self) -> FibIndex {
        self.index
    }

    /// Install `adj` for `prefix`, or remove the route for `prefix`.
    ///
    /// Returns the adjacency the prefix pointed at before, if any. Removing
    /// a route that does not exist is an error. Adjacency reference counts
    /// are not touched here.
    pub(crate) fn add_del(
        &mut self,
        prefix: &Prefix,
        adj: Adj,
        is_del: bool,
    ) -> Result<Option<Adj>, FibError> {
        let prefix = prefix.masked();
        if is_del {
            self.del(&prefix).map(Some)
        } else {
            self.add(&prefix, adj)
        }
    }

    fn add(&mut self, prefix: &Prefix, adj: Adj) -> Result<Option<Adj>, FibError> {
        if adj == Adj::NIL {
            return Err(FibError::UnknownAdjacency(adj.0));
        }
        if prefix.is_default() {
            self.default.store(adj.0, Ordering::Release);
        } else {
            if !self.mtrie.has_room_for(prefix)? {
                warn!(
                    "{} add {}: trie full at {} plies",
                    self.index,
                    prefix,
                    self.mtrie.ply_count()
                );
                return Err(FibError::TableFull(self.index));
            }
            self.mtrie.set(prefix, adj)?;
        }
        let old = self.routes.set(prefix, adj);
        if old.is_none() {
            self.counters.inc_prefixes_count(prefix.len());
        }
        self.counters.set_plies_count(self.mtrie.ply_count() as usize);
        debug!("{} add {} -> {} (was {:?})", self.index, prefix, adj, old);
        Ok(old)
    }

    fn del(&mut self, prefix: &Prefix) -> Result<Adj, FibError> {
        let old = self.routes.unset(prefix).ok_or(FibError::PrefixNotFound)?;
        self.counters.dec_prefixes_count(prefix.len());

        if prefix.is_default() {
            self.default.store(Adj::MISS.0, Ordering::Release);
        } else {
            let less = self.routes.less_specific(prefix);
            if let Some((less, _)) = less.filter(|_| log_enabled!(log::Level::Trace)) {
                trace!("{} restore {} over {}", self.index, less, prefix);
            }
            self.mtrie
                .unset(prefix, old, less.map(|(less, adj)| (less.len(), adj)))?;
            let guard = &epoch::pin();
            self.mtrie.compact(prefix, guard)?;
        }
        self.counters.set_plies_count(self.mtrie.ply_count() as usize);
        debug!("{} del {} (was {})", self.index, prefix, old);
        Ok(old)
    }

    /// Point every route using `from` at `to` instead. Returns the
    /// prefixes that were changed.
    pub(crate) fn remap_adjacency(
        &mut self,
        from: Adj,
        to: Adj,
    ) -> Result<Vec<Prefix>, FibError> {
        if to == Adj::NIL {
            return Err(FibError::UnknownAdjacency(to.0));
        }
        let prefixes = self.routes.prefixes_with_adj(from);
        for prefix in &prefixes {
            self.routes.set(prefix, to);
            if prefix.is_default() {
                self.default.store(to.0, Ordering::Release);
            }
        }
        let n = self.mtrie.remap_adjacency(from, to)?;
        trace!("{} remap {} -> {}: {} slots", self.index, from, to, n);
        Ok(prefixes)
    }

    //-------- Queries ------------------------------------------------------

    /// The adjacency installed for exactly `prefix`.
    pub fn get(&self, prefix: &Prefix) -> Option<Adj> {
        self.routes.get(&prefix.masked())
    }

    /// The number of routes, the default route included.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Longest prefix match through the trie, falling back to the default
    /// route.
    pub fn lookup(&self, addr: Address) -> FatalResult<Adj> {
        let guard = &epoch::pin();
        match self.mtrie.lookup(addr, guard)? {
            Adj::MISS => Ok(Adj(self.default.load(Ordering::Acquire))),
            adj => Ok(adj),
        }
    }

    /// The route that a lookup for `addr` uses, taken from the route map.
    pub fn lookup_route(&self, addr: Address) -> Option<(Prefix, Adj)> {
        self.routes.longest_match(addr)
    }

    /// Every route, sorted by prefix.
    pub fn foreach(&self, f: impl FnMut(&Prefix, Adj)) {
        self.routes.foreach(f)
    }

    /// Every route strictly more specific than `key`.
    pub fn foreach_matching_prefix(
        &self,
        key: &Prefix,
        f: impl FnMut(&Prefix, Adj),
    ) {
        self.routes.foreach_matching_prefix(&key.masked(), f)
    }

    pub(crate) fn prefixes_with_adj(&self, adj: Adj) -> Vec<Prefix> {
        self.routes.prefixes_with_adj(adj)
    }

    pub fn reader(&self) -> FibReader {
        FibReader {
            trie: self.mtrie.reader(),
            default: Arc::clone(&self.default),
        }
    }

    pub fn stats(&self) -> FibStats {
        FibStats::from(&self.counters)
    }

    pub fn prefix_stats(&self) -> Vec<PrefixLenCount> {
        self.counters.prefix_stats()
    }
}

impl std::fmt::Debug for Fib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fib")
            .field("index", &self.index)
            .field("routes", &self.routes.len())
            .field("mtrie", &self.mtrie)
            .finish()
    }
}

//------------ FibReader -----------------------------------------------------

/// The forwarding path's view of a table. Cheap to clone, and lookups
/// may run on any thread while the table is being changed.
#[derive(Clone, Debug)]
pub struct FibReader {
    trie: MtrieReader,
    default: Arc<AtomicU32>,
}

impl FibReader {
    pub fn lookup(&self, addr: Address, guard: &Guard) -> FatalResult<Adj> {
        match self.trie.lookup(addr, guard)? {
            Adj::MISS => Ok(Adj(self.default.load(Ordering::Acquire))),
            adj => Ok(adj),
        }
    }
}

//------------ RouteEntry ----------------------------------------------------

/// One route as exported by [Main::export_routes].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub fib: FibIndex,
    pub prefix: Prefix,
    pub adj: Adj,
    pub lookup_next: LookupNext,
    /// The normalized next hops for a multipath route, empty otherwise.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub next_hops: Vec<NextHop>,
}
