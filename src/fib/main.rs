use log::{debug, info, log_enabled, warn};

use super::interface::InterfaceMain;
use super::next_hop::NextHopTracker;
use super::{Fib, FibReader, RouteEntry};
use crate::adjacency::{Adj, AdjacencyMain};
use crate::config::FibConfig;
use crate::types::af::Address;
use crate::types::errors::FibError;
use crate::types::prefix::Prefix;
use crate::types::{FibIndex, Si};

//------------ FibAddDelHook -------------------------------------------------

/// Called for every route change: with the new adjacency after a route is
/// added or replaced (false), with the old one before it is deleted
/// (true).
pub type FibAddDelHook = Box<dyn FnMut(FibIndex, &Prefix, Adj, bool) + Send>;

//------------ Main ----------------------------------------------------------

/// The IPv4 forwarding context: all tables, the adjacencies their routes
/// point at, interface addresses, and next hops given by address.
///
/// `Main` is the single writer. The forwarding path works on
/// [FibReader]s handed out by [Main::reader].
pub struct Main {
    config: FibConfig,
    fibs: Vec<Option<Fib>>,
    pub(super) adjacencies: AdjacencyMain,
    fib_hooks: Vec<FibAddDelHook>,
    pub(super) interfaces: InterfaceMain,
    pub(super) next_hops: NextHopTracker,
}

impl Main {
    /// A context with the default configuration and an empty default
    /// table.
    pub fn new() -> Result<Self, FibError> {
        Self::new_with_config(FibConfig::default())
    }

    pub fn new_with_config(config: FibConfig) -> Result<Self, FibError> {
        let config = config.validated()?;
        let adjacencies = AdjacencyMain::new(&config)?;
        let default = Fib::new(FibIndex::DEFAULT, &config)?;
        info!(
            "ip4 fib ready, multipath tolerance {}",
            config.multipath_error_tolerance
        );
        Ok(Self {
            config,
            fibs: vec![Some(default)],
            adjacencies,
            fib_hooks: vec![],
            interfaces: InterfaceMain::default(),
            next_hops: NextHopTracker::default(),
        })
    }

    pub fn config(&self) -> &FibConfig {
        &self.config
    }

    //-------- Tables -------------------------------------------------------

    pub fn fib(&self, index: FibIndex) -> Option<&Fib> {
        self.fibs.get(index.as_usize()).and_then(Option::as_ref)
    }

    /// The table at `index`, created if it does not exist yet.
    pub(crate) fn fib_or_create(
        &mut self,
        index: FibIndex,
    ) -> Result<&mut Fib, FibError> {
        let i = index.as_usize();
        if i >= self.config.max_fibs {
            warn!("table {} beyond the limit of {}", index, self.config.max_fibs);
            return Err(FibError::UnknownFib(index.0));
        }
        if self.fibs.len() <= i {
            self.fibs.resize_with(i + 1, || None);
        }
        let slot = self
            .fibs
            .get_mut(i)
            .ok_or(FibError::UnknownFib(index.0))?;
        if slot.is_none() {
            info!("new table {}", index);
            *slot = Some(Fib::new(index, &self.config)?);
        }
        slot.as_mut().ok_or(FibError::UnknownFib(index.0))
    }

    /// The indexes of all existing tables.
    pub fn fib_indexes(&self) -> Vec<FibIndex> {
        self.fibs
            .iter()
            .flatten()
            .map(|fib| fib.index())
            .collect()
    }

    /// A lookup handle for the forwarding path.
    pub fn reader(&self, index: FibIndex) -> Result<FibReader, FibError> {
        self.fib(index)
            .map(Fib::reader)
            .ok_or(FibError::UnknownFib(index.0))
    }

    /// Longest prefix match in table `index`. A table that does not exist
    /// misses everything.
    pub fn lookup(&self, index: FibIndex, addr: Address) -> Result<Adj, FibError> {
        match self.fib(index) {
            Some(fib) => Ok(fib.lookup(addr)?),
            None => Ok(Adj::MISS),
        }
    }

    /// The route installed for exactly `prefix` in the table of `si`.
    pub fn get_route(&self, prefix: &Prefix, si: Si) -> Option<Adj> {
        self.fib(self.fib_index_for_si(si))?.get(prefix)
    }

    //-------- Adjacencies --------------------------------------------------

    pub fn adjacencies(&self) -> &AdjacencyMain {
        &self.adjacencies
    }

    /// For collaborators that build rewrite adjacencies and register
    /// adjacency hooks.
    pub fn adjacencies_mut(&mut self) -> &mut AdjacencyMain {
        &mut self.adjacencies
    }

    //-------- Hooks --------------------------------------------------------

    pub fn register_fib_add_del_hook(&mut self, hook: FibAddDelHook) {
        self.fib_hooks.push(hook);
    }

    fn call_fib_hooks(
        &mut self,
        index: FibIndex,
        prefix: &Prefix,
        adj: Adj,
        is_del: bool,
    ) {
        for hook in self.fib_hooks.iter_mut() {
            hook(index, prefix, adj, is_del);
        }
    }

    //-------- Route changes ------------------------------------------------

    /// Every route change goes through here: hooks before a delete, the
    /// table itself, hooks after an add, and then the next hops that the
    /// change makes reachable or unreachable.
    pub(super) fn fib_add_del(
        &mut self,
        index: FibIndex,
        prefix: &Prefix,
        adj: Adj,
        is_del: bool,
    ) -> Result<Option<Adj>, FibError> {
        let prefix = prefix.masked();
        let old = if is_del {
            let old = self
                .fib(index)
                .and_then(|fib| fib.get(&prefix))
                .ok_or(FibError::PrefixNotFound)?;
            self.call_fib_hooks(index, &prefix, old, true);
            self.fib_or_create(index)?.add_del(&prefix, adj, true)?
        } else {
            let old = self.fib_or_create(index)?.add_del(&prefix, adj, false)?;
            self.call_fib_hooks(index, &prefix, adj, false);
            old
        };
        self.next_hop_reactions(index, &prefix, is_del)?;
        Ok(old)
    }

    /// Add or delete a route to an adjacency the caller owns, e.g. a
    /// neighbor host route once its link layer address is known.
    ///
    /// A multipath route at `prefix` is taken apart first, releasing all
    /// of its next hops. Deleting a route that is not there is not an
    /// error. Returns the adjacency the route pointed at before.
    pub fn add_del_route(
        &mut self,
        prefix: &Prefix,
        index: FibIndex,
        adj: Adj,
        is_del: bool,
    ) -> Result<Option<Adj>, FibError> {
        if !is_del && self.adjacencies.get_adj(adj).is_err() {
            return Err(FibError::UnknownAdjacency(adj.0));
        }
        let prefix = prefix.masked();
        let old = self.fib(index).and_then(|fib| fib.get(&prefix));
        if let Some(mp) = old.filter(|old| self.adjacencies.is_mp_adj(*old)) {
            self.release_route_next_hops(index, &prefix)?;
            if is_del {
                return Ok(Some(mp));
            }
        }
        match self.fib_add_del(index, &prefix, adj, is_del) {
            Err(FibError::PrefixNotFound) if is_del => {
                debug!("{} del {}: no such route", index, prefix);
                Ok(None)
            }
            res => res.map(|res| res.or(old)),
        }
    }

    /// Free the adjacency `adj` for good.
    ///
    /// Every multipath block using it is replaced by one without it, and
    /// every route in every table follows: routes of blocks that are left
    /// with other next hops are rewritten in place, routes of blocks that
    /// are left with nothing are deleted. Next hops that resolved to `adj`
    /// are parked as unreachable. Routes pointing at `adj` directly are
    /// deleted as well.
    pub fn del_adj(&mut self, adj: Adj) -> Result<(), FibError> {
        if adj.is_special() {
            return Err(FibError::UnknownAdjacency(adj.0));
        }
        let remaps = self.adjacencies.del_multipath_adj(adj)?;
        self.next_hops.park_via_adj(adj);

        let mut tracked = vec![];
        for remap in &remaps {
            for index in self.fib_indexes() {
                if remap.to == Adj::NIL {
                    self.delete_routes_with_adj(index, remap.from)?;
                    continue;
                }
                let changed = match self.fibs.get_mut(index.as_usize()) {
                    Some(Some(fib)) => fib.remap_adjacency(remap.from, remap.to)?,
                    _ => continue,
                };
                for prefix in changed {
                    self.call_fib_hooks(index, &prefix, remap.to, false);
                    if self.next_hops.has_route(index, &prefix) {
                        tracked.push((index, prefix));
                    }
                }
            }
        }
        self.adjacencies.release_remapped(&remaps)?;

        for index in self.fib_indexes() {
            self.delete_routes_with_adj(index, adj)?;
        }
        if !self.adjacencies.is_adj_free(adj) {
            self.adjacencies.free_adj(adj)?;
        }
        // A block shared by several routes was rebuilt from the weights of
        // just one of them.
        for (index, prefix) in tracked {
            self.sync_route_next_hops(index, &prefix)?;
        }
        if log_enabled!(log::Level::Debug) {
            debug!("del adj {}: {} blocks remapped", adj, remaps.len());
        }
        Ok(())
    }

    fn delete_routes_with_adj(
        &mut self,
        index: FibIndex,
        adj: Adj,
    ) -> Result<(), FibError> {
        let prefixes = self
            .fib(index)
            .map(|fib| fib.prefixes_with_adj(adj))
            .unwrap_or_default();
        for prefix in prefixes {
            self.next_hops.forget_route(index, &prefix);
            // An earlier delete may have restored a less specific route.
            if self.fib(index).and_then(|fib| fib.get(&prefix)) == Some(adj) {
                self.fib_add_del(index, &prefix, Adj::MISS, true)?;
            }
        }
        Ok(())
    }

    //-------- Export -------------------------------------------------------

    /// Every route of every table, in table and prefix order.
    pub fn export_routes(&self) -> Vec<RouteEntry> {
        let mut res = vec![];
        for fib in self.fibs.iter().flatten() {
            fib.foreach(|prefix, adj| {
                let lookup_next = self
                    .adjacencies
                    .get_adj(adj)
                    .ok()
                    .and_then(|block| block.first())
                    .map(|a| a.lookup_next)
                    .unwrap_or_default();
                let next_hops = self
                    .adjacencies
                    .next_hops_for_adj(adj)
                    .map(|nhs| nhs.to_vec())
                    .unwrap_or_default();
                res.push(RouteEntry {
                    fib: fib.index(),
                    prefix: *prefix,
                    adj,
                    lookup_next,
                    next_hops,
                });
            });
        }
        res
    }

    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.export_routes())
    }
}

impl std::fmt::Debug for Main {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Main")
            .field("fibs", &self.fib_indexes())
            .field("adjacencies", &self.adjacencies)
            .finish()
    }
}
