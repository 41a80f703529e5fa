//! Routes given by next hop address.
//!
//! The control plane hands us routes as a prefix plus next hop addresses.
//! A next hop is usable once its address resolves, in the table of its
//! interface, to a route whose adjacencies are all rewrites; until then it
//! is parked. Every next hop is tracked with the route it resolved
//! through, so that when that route goes away or a more specific one
//! shows up, the next hop is resolved again and the multipath block of
//! the route it serves follows.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use log::{debug, log_enabled, warn};
use serde_derive::Serialize;

use super::Main;
use crate::adjacency::{Adj, Adjacency, NextHop, NextHopWeight};
use crate::types::af::Address;
use crate::types::errors::FibError;
use crate::types::prefix::Prefix;
use crate::types::{FibIndex, Si};

// How deep route changes may set off further route changes.
const MAX_REACTION_DEPTH: usize = 8;

//------------ NextHopAddress ------------------------------------------------

/// A next hop as given by the control plane.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NextHopAddress {
    pub address: Address,
    /// The interface the next hop is reached through. Its table is where
    /// both the route and the next hop address live.
    pub si: Si,
    pub weight: NextHopWeight,
}

impl NextHopAddress {
    pub fn new(address: Address, si: Si, weight: NextHopWeight) -> Self {
        Self {
            address,
            si,
            weight,
        }
    }
}

//------------ NextHopState --------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum NextHopState {
    /// Resolved through the route for `via`, contributing `adj` to the
    /// multipath block of its route.
    Reachable { via: Prefix, adj: Adj },
    /// Parked until a route covering the address shows up.
    Unreachable,
}

impl NextHopState {
    pub fn adj(&self) -> Option<Adj> {
        match self {
            NextHopState::Reachable { adj, .. } => Some(*adj),
            NextHopState::Unreachable => None,
        }
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self, NextHopState::Reachable { .. })
    }
}

enum Resolution {
    Reachable { via: Prefix, adj: Adj },
    Local,
    Unreachable,
}

//------------ NextHopTracker ------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(super) struct NextHopKey {
    fib: FibIndex,
    prefix: Prefix,
    nh_fib: FibIndex,
    address: Address,
}

#[derive(Copy, Clone, Debug)]
struct Tracked {
    weight: NextHopWeight,
    state: NextHopState,
}

#[derive(Debug, Default)]
pub(super) struct NextHopTracker {
    entries: BTreeMap<NextHopKey, Tracked>,
    // (next hop table, next hop address) -> routes using it
    by_address: BTreeMap<(FibIndex, Address), BTreeSet<(FibIndex, Prefix)>>,
    depth: usize,
}

impl NextHopTracker {
    fn insert(&mut self, key: NextHopKey, tracked: Tracked) {
        self.entries.insert(key, tracked);
        self.by_address
            .entry((key.nh_fib, key.address))
            .or_default()
            .insert((key.fib, key.prefix));
    }

    fn remove(&mut self, key: &NextHopKey) -> Option<Tracked> {
        let tracked = self.entries.remove(key)?;
        if let Entry::Occupied(mut routes) =
            self.by_address.entry((key.nh_fib, key.address))
        {
            routes.get_mut().remove(&(key.fib, key.prefix));
            if routes.get().is_empty() {
                routes.remove();
            }
        }
        Some(tracked)
    }

    fn get(&self, key: &NextHopKey) -> Option<Tracked> {
        self.entries.get(key).copied()
    }

    fn set_state(&mut self, key: &NextHopKey, state: NextHopState) {
        if let Some(tracked) = self.entries.get_mut(key) {
            tracked.state = state;
        }
    }

    fn route_entries(
        &self,
        fib: FibIndex,
        prefix: &Prefix,
    ) -> impl Iterator<Item = (&NextHopKey, &Tracked)> + '_ {
        let from = NextHopKey {
            fib,
            prefix: *prefix,
            nh_fib: FibIndex(0),
            address: Address::from_u32(0),
        };
        let to = NextHopKey {
            nh_fib: FibIndex(u32::MAX),
            address: Address::from_u32(u32::MAX),
            ..from
        };
        self.entries.range(from..=to)
    }

    /// Stop tracking every next hop of a route.
    pub(super) fn forget_route(&mut self, fib: FibIndex, prefix: &Prefix) {
        let keys: Vec<NextHopKey> =
            self.route_entries(fib, prefix).map(|(k, _)| *k).collect();
        for key in keys {
            self.remove(&key);
        }
    }

    // Tracked next hops in table `nh_fib` whose address lies in `prefix`.
    fn in_span(&self, nh_fib: FibIndex, prefix: &Prefix) -> Vec<NextHopKey> {
        let first = Address::from_u32(prefix.key());
        let last = Address::from_u32(prefix.key() | !prefix.mask());
        self.by_address
            .range((nh_fib, first)..=(nh_fib, last))
            .flat_map(|((nh_fib, address), routes)| {
                routes.iter().map(move |(fib, prefix)| NextHopKey {
                    fib: *fib,
                    prefix: *prefix,
                    nh_fib: *nh_fib,
                    address: *address,
                })
            })
            .collect()
    }

    // Next hops that resolved through the route for `prefix`.
    fn reachable_via(&self, nh_fib: FibIndex, prefix: &Prefix) -> Vec<NextHopKey> {
        self.in_span(nh_fib, prefix)
            .into_iter()
            .filter(|key| {
                matches!(
                    self.entries.get(key).map(|t| t.state),
                    Some(NextHopState::Reachable { via, .. }) if via == *prefix
                )
            })
            .collect()
    }

    // Next hops that a new route for `prefix` might serve better: those that
    // are parked and those resolved through a route not more specific.
    fn affected_by_add(&self, nh_fib: FibIndex, prefix: &Prefix) -> Vec<NextHopKey> {
        self.in_span(nh_fib, prefix)
            .into_iter()
            .filter(|key| match self.entries.get(key).map(|t| t.state) {
                Some(NextHopState::Unreachable) => true,
                Some(NextHopState::Reachable { via, .. }) => {
                    via.len() <= prefix.len()
                }
                None => false,
            })
            .collect()
    }

    /// Park every next hop that resolved to `adj`.
    pub(super) fn park_via_adj(&mut self, adj: Adj) {
        for tracked in self.entries.values_mut() {
            if tracked.state.adj() == Some(adj) {
                tracked.state = NextHopState::Unreachable;
            }
        }
    }

    // The next hops the block of a route is made of: every adjacency its
    // reachable next hops resolved to, weighted by the sum of their
    // weights.
    fn resolved_next_hops(&self, fib: FibIndex, prefix: &Prefix) -> Vec<NextHop> {
        let mut weights = BTreeMap::<Adj, NextHopWeight>::new();
        for (_, tracked) in self.route_entries(fib, prefix) {
            if let Some(adj) = tracked.state.adj() {
                let w = weights.entry(adj).or_default();
                *w = w.saturating_add(tracked.weight);
            }
        }
        weights
            .into_iter()
            .map(|(adj, weight)| NextHop::new(adj, weight))
            .collect()
    }

    /// Whether any next hop of the route is tracked.
    pub(super) fn has_route(&self, fib: FibIndex, prefix: &Prefix) -> bool {
        self.route_entries(fib, prefix).next().is_some()
    }
}

//------------ Main: next hops -----------------------------------------------

impl Main {
    /// Add a next hop to the route for `prefix`, change its weight, or
    /// remove it.
    ///
    /// The route lives in the table of the next hop's interface. With
    /// `is_replace` all next hops the route had are dropped first; deletes
    /// ignore it. Routes that point at something other than a multipath
    /// block (interface and neighbor routes) are left alone.
    ///
    /// A next hop that cannot be resolved yet is accepted and parked. A
    /// next hop inside the prefix it is meant to reach, or one that is our
    /// own address, is refused, and the route stays as it was.
    pub fn add_del_route_next_hop(
        &mut self,
        prefix: &Prefix,
        nh: &NextHopAddress,
        is_del: bool,
        is_replace: bool,
    ) -> Result<(), FibError> {
        let prefix = prefix.masked();
        let fib = self.fib_index_for_si(nh.si);
        if let Some(adj) = self.fib(fib).and_then(|f| f.get(&prefix)) {
            if !self.adjacencies.is_mp_adj(adj) {
                warn!(
                    "{} {} points at {}, next hop {} ignored",
                    fib, prefix, adj, nh.address
                );
                return Ok(());
            }
        }

        let key = NextHopKey {
            fib,
            prefix,
            nh_fib: fib,
            address: nh.address,
        };

        if is_del {
            let Some(tracked) = self.next_hops.remove(&key) else {
                warn!("{} {}: no next hop {}", fib, prefix, nh.address);
                return Err(FibError::NextHopNotFound);
            };
            debug!("{} {} del next hop {}", fib, prefix, nh.address);
            if tracked.state.is_reachable() {
                self.sync_route_next_hops(fib, &prefix)?;
            }
            return Ok(());
        }

        if !prefix.is_default() && prefix.contains(nh.address) {
            return Err(FibError::NextHopMatchesPrefix {
                prefix,
                next_hop: nh.address,
            });
        }
        let mut resolution = self.resolve(&key)?;
        if let Resolution::Local = resolution {
            return Err(FibError::UnreachableNextHop(nh.address));
        }
        if is_replace {
            self.release_route_next_hops(fib, &prefix)?;
            resolution = self.resolve(&key)?;
        }
        let state = match resolution {
            Resolution::Reachable { via, adj } => {
                NextHopState::Reachable { via, adj }
            }
            Resolution::Local => {
                return Err(FibError::UnreachableNextHop(nh.address))
            }
            Resolution::Unreachable => NextHopState::Unreachable,
        };

        let previous = self.next_hops.get(&key).map(|t| t.state);
        self.next_hops.insert(
            key,
            Tracked {
                weight: nh.weight,
                state,
            },
        );
        match state.adj() {
            Some(adj) => debug!(
                "{} {} add next hop {} weight {} via {}",
                fib, prefix, nh.address, nh.weight, adj
            ),
            None => debug!(
                "{} {} next hop {} unreachable, parked",
                fib, prefix, nh.address
            ),
        }
        if state.is_reachable() || previous.is_some_and(|p| p.is_reachable()) {
            self.sync_route_next_hops(fib, &prefix)?;
        }
        Ok(())
    }

    /// The state of a next hop of a route, if it is tracked.
    pub fn next_hop_state(
        &self,
        prefix: &Prefix,
        nh: &NextHopAddress,
    ) -> Option<NextHopState> {
        let fib = self.fib_index_for_si(nh.si);
        let key = NextHopKey {
            fib,
            prefix: prefix.masked(),
            nh_fib: fib,
            address: nh.address,
        };
        self.next_hops.get(&key).map(|t| t.state)
    }

    /// All tracked next hops of the route for `prefix` in table `index`.
    pub fn route_next_hops(
        &self,
        index: FibIndex,
        prefix: &Prefix,
    ) -> Vec<(Address, NextHopWeight, NextHopState)> {
        self.next_hops
            .route_entries(index, &prefix.masked())
            .map(|(k, t)| (k.address, t.weight, t.state))
            .collect()
    }

    /// Drop every next hop of a route, and the route itself if it points
    /// at a multipath block.
    pub(super) fn release_route_next_hops(
        &mut self,
        fib: FibIndex,
        prefix: &Prefix,
    ) -> Result<(), FibError> {
        self.next_hops.forget_route(fib, prefix);
        let adj = self.fib(fib).and_then(|f| f.get(prefix));
        if let Some(adj) = adj.filter(|adj| self.adjacencies.is_mp_adj(*adj)) {
            self.fib_add_del(fib, prefix, Adj::MISS, true)?;
            self.adjacencies.release_mp_ref(adj)?;
            debug!("{} {} released next hops of {}", fib, prefix, adj);
        }
        Ok(())
    }

    // Resolve a next hop address in its table. Routes through a multipath
    // block resolve to the block's first next hop, whose adjacency outlives
    // the block.
    fn resolve(&self, key: &NextHopKey) -> Result<Resolution, FibError> {
        let Some((via, adj)) = self
            .fib(key.nh_fib)
            .and_then(|fib| fib.lookup_route(key.address))
        else {
            return Ok(Resolution::Unreachable);
        };
        if key.nh_fib == key.fib && via == key.prefix {
            return Ok(Resolution::Unreachable);
        }
        let block = self.adjacencies.get_adj(adj)?;
        if block.iter().any(Adjacency::is_local) {
            return Ok(Resolution::Local);
        }
        if block.is_empty() || !block.iter().all(Adjacency::is_rewrite) {
            return Ok(Resolution::Unreachable);
        }
        let adj = match self.adjacencies.next_hops_for_adj(adj) {
            Ok(nhs) => nhs.first().map(|nh| nh.adj).unwrap_or(adj),
            Err(_) => adj,
        };
        Ok(Resolution::Reachable { via, adj })
    }

    /// Point the route for `prefix` at the block made of its reachable
    /// next hops, or delete it when none is left. A block shared with
    /// other routes is never changed: the route moves to another block,
    /// taking a reference there and dropping the one it had.
    pub(super) fn sync_route_next_hops(
        &mut self,
        fib: FibIndex,
        prefix: &Prefix,
    ) -> Result<(), FibError> {
        let old = match self.fib(fib).and_then(|f| f.get(prefix)) {
            None => None,
            Some(adj) if self.adjacencies.is_mp_adj(adj) => Some(adj),
            Some(adj) => {
                debug!("{} {} points at {}, next hops left alone", fib, prefix, adj);
                return Ok(());
            }
        };
        let next_hops = self.next_hops.resolved_next_hops(fib, prefix);
        let new = if next_hops.is_empty() {
            None
        } else {
            self.adjacencies.create_mp_adj(&next_hops)?
        };
        if new == old {
            return Ok(());
        }
        if log_enabled!(log::Level::Debug) {
            debug!("{} {} next hops {:?}: {:?} -> {:?}", fib, prefix, next_hops, old, new);
        }

        let res = match new {
            Some(new) => {
                self.adjacencies.take_mp_ref(new);
                self.fib_add_del(fib, prefix, new, false)
            }
            None => self.fib_add_del(fib, prefix, Adj::MISS, true),
        };
        if let Err(err) = res {
            if let Some(new) = new {
                self.adjacencies.release_mp_ref(new)?;
            }
            return Err(err);
        }
        if let Some(old) = old {
            self.adjacencies.release_mp_ref(old)?;
        }
        Ok(())
    }

    /// Re-resolve the next hops that a route change in table `fib` may
    /// affect.
    pub(super) fn next_hop_reactions(
        &mut self,
        fib: FibIndex,
        prefix: &Prefix,
        is_del: bool,
    ) -> Result<(), FibError> {
        let keys = if is_del {
            self.next_hops.reachable_via(fib, prefix)
        } else {
            self.next_hops.affected_by_add(fib, prefix)
        };
        if keys.is_empty() {
            return Ok(());
        }
        if self.next_hops.depth >= MAX_REACTION_DEPTH {
            warn!(
                "{} {}: next hop resolution nested too deep, {} next hops left",
                fib,
                prefix,
                keys.len()
            );
            return Ok(());
        }
        self.next_hops.depth += 1;
        let res = keys.into_iter().try_for_each(|key| self.re_resolve(key));
        self.next_hops.depth -= 1;
        res
    }

    fn re_resolve(&mut self, key: NextHopKey) -> Result<(), FibError> {
        let Some(tracked) = self.next_hops.get(&key) else {
            return Ok(());
        };
        let state = match self.resolve(&key)? {
            Resolution::Reachable { via, adj } => {
                NextHopState::Reachable { via, adj }
            }
            Resolution::Local => {
                warn!(
                    "{} {}: next hop {} is a local address now, parked",
                    key.fib, key.prefix, key.address
                );
                NextHopState::Unreachable
            }
            Resolution::Unreachable => NextHopState::Unreachable,
        };
        if state == tracked.state {
            return Ok(());
        }
        self.next_hops.set_state(&key, state);
        if log_enabled!(log::Level::Debug) {
            debug!(
                "{} {} next hop {}: {:?} -> {:?}",
                key.fib, key.prefix, key.address, tracked.state, state
            );
        }

        if tracked.state.adj() == state.adj() {
            return Ok(());
        }
        self.sync_route_next_hops(key.fib, &key.prefix)
    }
}
