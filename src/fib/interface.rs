use std::collections::{BTreeMap, HashMap};

use log::{debug, info};
use serde_derive::Serialize;

use super::Main;
use crate::adjacency::{Adj, Adjacency, LookupNext};
use crate::types::errors::FibError;
use crate::types::prefix::Prefix;
use crate::types::{FibIndex, IfAddr, Si};

//------------ IfAddress -----------------------------------------------------

/// An address configured on an interface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IfAddress {
    /// The address with the length of the connected network, host bits
    /// included.
    pub prefix: Prefix,
    pub si: Si,
    /// The glean adjacency of the connected network route, while it is
    /// installed.
    pub glean_adj: Option<Adj>,
}

/// Called after an interface address is created (false) or deleted
/// (true).
pub type IfAddrAddDelHook = Box<dyn FnMut(IfAddr, &IfAddress, bool) + Send>;

//------------ InterfaceMain -------------------------------------------------

#[derive(Clone, Copy, Debug, Default)]
struct Interface {
    fib: FibIndex,
    admin_up: bool,
}

#[derive(Default)]
pub(super) struct InterfaceMain {
    interfaces: HashMap<Si, Interface>,
    addresses: BTreeMap<IfAddr, IfAddress>,
    free: Vec<IfAddr>,
    next: u32,
    hooks: Vec<IfAddrAddDelHook>,
}

impl InterfaceMain {
    fn alloc(&mut self) -> IfAddr {
        self.free.pop().unwrap_or_else(|| {
            self.next += 1;
            IfAddr(self.next - 1)
        })
    }

    fn on_si(
        &self,
        si: Si,
    ) -> impl Iterator<Item = (&IfAddr, &IfAddress)> + '_ {
        self.addresses.iter().filter(move |(_, ifa)| ifa.si == si)
    }
}

//------------ Main: interfaces ----------------------------------------------

impl Main {
    /// The table interface `si` is bound to.
    pub fn fib_index_for_si(&self, si: Si) -> FibIndex {
        self.interfaces
            .interfaces
            .get(&si)
            .map(|i| i.fib)
            .unwrap_or(FibIndex::DEFAULT)
    }

    pub fn is_admin_up(&self, si: Si) -> bool {
        self.interfaces
            .interfaces
            .get(&si)
            .is_some_and(|i| i.admin_up)
    }

    /// Bind interface `si` to table `index`, creating the table if needed.
    /// The routes of an interface that is up move along.
    pub fn set_interface_fib(
        &mut self,
        si: Si,
        index: FibIndex,
    ) -> Result<(), FibError> {
        if self.fib_index_for_si(si) == index {
            self.fib_or_create(index)?;
            return Ok(());
        }
        self.fib_or_create(index)?;
        let up = self.is_admin_up(si);
        if up {
            self.add_del_interface_routes_on_si(si, true)?;
        }
        self.interfaces.interfaces.entry(si).or_default().fib = index;
        if up {
            self.add_del_interface_routes_on_si(si, false)?;
        }
        info!("{} bound to {}", si, index);
        Ok(())
    }

    /// Install or remove the routes of every address on interface `si`.
    pub fn sw_if_admin_up_down(
        &mut self,
        si: Si,
        is_up: bool,
    ) -> Result<(), FibError> {
        let index = self.fib_index_for_si(si);
        self.fib_or_create(index)?;
        if self.is_admin_up(si) == is_up {
            return Ok(());
        }
        self.interfaces.interfaces.entry(si).or_default().admin_up = is_up;
        self.add_del_interface_routes_on_si(si, !is_up)?;
        info!("{} admin {}", si, if is_up { "up" } else { "down" });
        Ok(())
    }

    fn add_del_interface_routes_on_si(
        &mut self,
        si: Si,
        is_del: bool,
    ) -> Result<(), FibError> {
        let ias: Vec<IfAddr> =
            self.interfaces.on_si(si).map(|(ia, _)| *ia).collect();
        for ia in ias {
            self.add_del_interface_address_routes(ia, is_del)?;
        }
        Ok(())
    }

    //-------- Addresses ----------------------------------------------------

    /// Add or delete an interface address.
    ///
    /// An address that overlaps with a different address on the same
    /// interface is refused. If the interface is up, the connected network
    /// and the local host route are installed, or removed together with
    /// every route nested in the network. Adding an address twice returns
    /// the existing handle.
    pub fn add_del_interface_address(
        &mut self,
        si: Si,
        prefix: &Prefix,
        is_del: bool,
    ) -> Result<IfAddr, FibError> {
        if !is_del {
            let conflict = self.interfaces.on_si(si).find(|(_, ifa)| {
                let p = ifa.prefix;
                p != *prefix
                    && (p.contains(prefix.addr()) || prefix.contains(p.addr()))
            });
            if let Some((_, existing)) = conflict {
                return Err(FibError::AddressConflict {
                    new: *prefix,
                    existing: existing.prefix,
                });
            }
        }

        let up = self.is_admin_up(si);
        let existing = self.if_addr_for_prefix(prefix, si);

        if is_del {
            let ia =
                existing.ok_or(FibError::InterfaceAddressNotFound(*prefix))?;
            if up {
                self.add_del_interface_address_routes(ia, true)?;
            }
            if let Some(ifa) = self.interfaces.addresses.remove(&ia) {
                self.interfaces.free.push(ia);
                for hook in self.interfaces.hooks.iter_mut() {
                    hook(ia, &ifa, true);
                }
            }
            info!("{} del address {}", si, prefix);
            return Ok(ia);
        }

        if let Some(ia) = existing {
            return Ok(ia);
        }
        let ia = self.interfaces.alloc();
        let ifa = IfAddress {
            prefix: *prefix,
            si,
            glean_adj: None,
        };
        self.interfaces.addresses.insert(ia, ifa.clone());
        if up {
            self.add_del_interface_address_routes(ia, false)?;
        }
        for hook in self.interfaces.hooks.iter_mut() {
            hook(ia, &ifa, false);
        }
        info!("{} add address {} as {}", si, prefix, ia);
        Ok(ia)
    }

    pub fn if_address(&self, ia: IfAddr) -> Option<&IfAddress> {
        self.interfaces.addresses.get(&ia)
    }

    /// The handle of the address `prefix` on `si`, host bits included.
    pub fn if_addr_for_prefix(&self, prefix: &Prefix, si: Si) -> Option<IfAddr> {
        self.interfaces
            .on_si(si)
            .find(|(_, ifa)| ifa.prefix == *prefix)
            .map(|(ia, _)| *ia)
    }

    pub fn if_addresses(&self, si: Si) -> Vec<(IfAddr, &IfAddress)> {
        self.interfaces.on_si(si).map(|(ia, ifa)| (*ia, ifa)).collect()
    }

    pub fn register_if_addr_add_del_hook(&mut self, hook: IfAddrAddDelHook) {
        self.interfaces.hooks.push(hook);
    }

    // The connected network via a glean adjacency (unless it is a /32),
    // and the address itself via a local adjacency.
    fn add_del_interface_address_routes(
        &mut self,
        ia: IfAddr,
        is_del: bool,
    ) -> Result<(), FibError> {
        let Some(ifa) = self.interfaces.addresses.get(&ia).cloned() else {
            return Ok(());
        };
        let index = self.fib_index_for_si(ifa.si);
        self.fib_or_create(index)?;
        let net = ifa.prefix.masked();

        if net.len() < 32 {
            let adj = if is_del {
                Adj::NIL
            } else {
                self.new_interface_adj(LookupNext::Glean, ifa.si, ia)?
            };
            self.add_del_replace(index, &net, adj, is_del)?;
            if let Some(ifa) = self.interfaces.addresses.get_mut(&ia) {
                ifa.glean_adj = (!is_del).then_some(adj);
            }
        }

        let adj = if is_del {
            Adj::NIL
        } else {
            self.new_interface_adj(LookupNext::Local, ifa.si, ia)?
        };
        self.add_del_replace(index, &Prefix::host(ifa.prefix.addr()), adj, is_del)?;

        if is_del {
            let mut nested = vec![];
            if let Some(fib) = self.fib(index) {
                fib.foreach_matching_prefix(&net, |p, _| nested.push(*p));
            }
            for prefix in nested {
                self.add_del_route(&prefix, index, Adj::MISS, true)?;
            }
        }
        debug!(
            "{} {} routes for {}",
            index,
            if is_del { "removed" } else { "installed" },
            ifa.prefix
        );
        Ok(())
    }

    fn new_interface_adj(
        &mut self,
        lookup_next: LookupNext,
        si: Si,
        ia: IfAddr,
    ) -> Result<Adj, FibError> {
        let template = Adjacency {
            if_addr: Some(ia),
            si: Some(si),
            ..Adjacency::new(lookup_next)
        };
        let adj = self.adjacencies.new_adj(1, Some(&template))?;
        self.adjacencies.call_adj_add_hooks(adj);
        Ok(adj)
    }

    // Install or remove a route that owns its adjacency. Whatever the route
    // pointed at before goes: next hops are released, an adjacency of its
    // own is freed.
    fn add_del_replace(
        &mut self,
        index: FibIndex,
        prefix: &Prefix,
        adj: Adj,
        is_del: bool,
    ) -> Result<(), FibError> {
        let old = self.fib(index).and_then(|fib| fib.get(prefix));
        if old.is_some_and(|old| self.adjacencies.is_mp_adj(old)) {
            self.release_route_next_hops(index, prefix)?;
            if !is_del {
                self.fib_add_del(index, prefix, adj, false)?;
            }
            return Ok(());
        }

        let old = match (is_del, old) {
            (true, None) => {
                debug!("{} del {}: no such route", index, prefix);
                return Ok(());
            }
            _ => self.fib_add_del(index, prefix, adj, is_del)?,
        };
        if let Some(old) = old.filter(|old| {
            !old.is_special() && *old != adj && !self.adjacencies.is_adj_free(*old)
        }) {
            self.del_adj(old)?;
        }
        Ok(())
    }
}
