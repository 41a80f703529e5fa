//! The authoritative per table route map.
//!
//! [MapFib] maps `(length, masked address)` to an adjacency, one hash map
//! per prefix length. It is the ground truth the trie is derived from, and
//! it is what the control plane asks when it needs to know whether a route
//! exists. Lookups here scan all 33 lengths and are meant for
//! reconciliation, never for forwarding.

use std::collections::HashMap;

use crate::adjacency::Adj;
use crate::types::af::{Address, BITS};
use crate::types::prefix::Prefix;

//------------ MapFib --------------------------------------------------------

#[derive(Debug)]
pub struct MapFib {
    // Index is the prefix length, key the masked host order address.
    by_len: [HashMap<u32, Adj>; BITS as usize + 1],
}

impl MapFib {
    pub fn new() -> Self {
        Self {
            by_len: std::array::from_fn(|_| HashMap::new()),
        }
    }

    fn map(&self, len: u8) -> Option<&HashMap<u32, Adj>> {
        self.by_len.get(len as usize)
    }

    /// Install `adj` for `prefix`, returning the adjacency it replaced.
    pub fn set(&mut self, prefix: &Prefix, adj: Adj) -> Option<Adj> {
        self.by_len
            .get_mut(prefix.len() as usize)?
            .insert(prefix.key(), adj)
    }

    /// Remove the route for `prefix`, returning its adjacency if it was
    /// there.
    pub fn unset(&mut self, prefix: &Prefix) -> Option<Adj> {
        self.by_len
            .get_mut(prefix.len() as usize)?
            .remove(&prefix.key())
    }

    pub fn get(&self, prefix: &Prefix) -> Option<Adj> {
        self.map(prefix.len())?.get(&prefix.key()).copied()
    }

    /// The longest matching route for `addr`, scanning from /32 down to /0.
    pub fn longest_match(&self, addr: Address) -> Option<(Prefix, Adj)> {
        self.longest_match_below(addr, BITS + 1, 0)
    }

    /// The adjacency of the longest match for `addr`, or [Adj::MISS].
    pub fn lookup(&self, addr: Address) -> Adj {
        self.longest_match(addr)
            .map(|(_, adj)| adj)
            .unwrap_or(Adj::MISS)
    }

    /// The most specific route that is strictly less specific than
    /// `prefix` and covers its address. The default route is not
    /// considered: it lives outside of the trie.
    pub fn less_specific(&self, prefix: &Prefix) -> Option<(Prefix, Adj)> {
        self.longest_match_below(prefix.addr(), prefix.len(), 1)
    }

    // Scan lengths `below - 1` down to `min_len` (inclusive).
    fn longest_match_below(
        &self,
        addr: Address,
        below: u8,
        min_len: u8,
    ) -> Option<(Prefix, Adj)> {
        (min_len..below).rev().find_map(|len| {
            let p = Prefix::host(addr).with_len(len).masked();
            self.map(len)?.get(&p.key()).map(|adj| (p, *adj))
        })
    }

    /// Call `f` for every installed prefix strictly more specific than
    /// `key` that lies inside it, shortest first.
    pub fn foreach_matching_prefix(
        &self,
        key: &Prefix,
        mut f: impl FnMut(&Prefix, Adj),
    ) {
        for len in (key.len() + 1)..=BITS {
            let Some(map) = self.map(len) else {
                continue;
            };
            let mut found = map
                .iter()
                .filter(|(k, _)| key.contains(Address::from_u32(**k)))
                .map(|(k, adj)| (Address::from_u32(*k), *adj))
                .collect::<Vec<_>>();
            found.sort();
            for (addr, adj) in found {
                f(&Prefix::host(addr).with_len(len), adj);
            }
        }
    }

    /// Call `f` for every route, in prefix order.
    pub fn foreach(&self, mut f: impl FnMut(&Prefix, Adj)) {
        let mut all = self
            .by_len
            .iter()
            .enumerate()
            .flat_map(|(len, map)| {
                map.iter().map(move |(k, adj)| {
                    (Prefix::host(Address::from_u32(*k)).with_len(len as u8), *adj)
                })
            })
            .collect::<Vec<_>>();
        all.sort();
        for (p, adj) in all {
            f(&p, adj);
        }
    }

    /// All prefixes routed to `adj`, in prefix order.
    pub fn prefixes_with_adj(&self, adj: Adj) -> Vec<Prefix> {
        let mut res = vec![];
        self.foreach(|p, a| {
            if a == adj {
                res.push(*p);
            }
        });
        res
    }

    pub fn len(&self) -> usize {
        self.by_len.iter().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_len.iter().all(|m| m.is_empty())
    }
}

impl Default for MapFib {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::errors::FibError;

    fn p(s: &str) -> Result<Prefix, FibError> {
        s.parse()
    }

    #[test]
    fn set_get_unset() -> Result<(), FibError> {
        let mut m = MapFib::new();
        assert_eq!(m.set(&p("10.0.0.0/8")?, Adj(5)), None);
        assert_eq!(m.set(&p("10.0.0.0/8")?, Adj(6)), Some(Adj(5)));
        // Host bits do not matter.
        assert_eq!(m.get(&p("10.9.9.9/8")?), Some(Adj(6)));
        assert_eq!(m.len(), 1);
        assert_eq!(m.unset(&p("10.0.0.0/8")?), Some(Adj(6)));
        assert_eq!(m.unset(&p("10.0.0.0/8")?), None);
        assert!(m.is_empty());
        Ok(())
    }

    #[test]
    fn longest_match_and_less_specific() -> Result<(), FibError> {
        let mut m = MapFib::new();
        m.set(&p("0.0.0.0/0")?, Adj(3));
        m.set(&p("10.0.0.0/8")?, Adj(5));
        m.set(&p("10.1.0.0/16")?, Adj(7));

        assert_eq!(m.lookup(Address::new(10, 1, 5, 5)), Adj(7));
        assert_eq!(m.lookup(Address::new(10, 2, 5, 5)), Adj(5));
        assert_eq!(m.lookup(Address::new(11, 0, 0, 0)), Adj(3));

        assert_eq!(
            m.less_specific(&p("10.1.0.0/16")?),
            Some((p("10.0.0.0/8")?, Adj(5)))
        );
        // The default route is never a less specific.
        assert_eq!(m.less_specific(&p("10.0.0.0/8")?), None);
        m.unset(&p("0.0.0.0/0")?);
        assert_eq!(m.lookup(Address::new(11, 0, 0, 0)), Adj::MISS);
        Ok(())
    }

    #[test]
    fn matching_prefixes() -> Result<(), FibError> {
        let mut m = MapFib::new();
        m.set(&p("10.0.0.0/8")?, Adj(5));
        m.set(&p("10.0.0.1/32")?, Adj(8));
        m.set(&p("10.0.0.9/32")?, Adj(9));
        m.set(&p("10.3.0.0/16")?, Adj(10));
        m.set(&p("11.0.0.1/32")?, Adj(11));

        let mut seen = vec![];
        m.foreach_matching_prefix(&p("10.0.0.0/8")?, |p, a| {
            seen.push((p.to_string(), a))
        });
        assert_eq!(
            seen,
            vec![
                ("10.3.0.0/16".to_string(), Adj(10)),
                ("10.0.0.1/32".to_string(), Adj(8)),
                ("10.0.0.9/32".to_string(), Adj(9)),
            ]
        );

        let mut all = vec![];
        m.foreach(|p, _| all.push(p.to_string()));
        assert_eq!(
            all,
            vec![
                "10.0.0.0/8",
                "10.0.0.1/32",
                "10.0.0.9/32",
                "10.3.0.0/16",
                "11.0.0.1/32"
            ]
        );
        assert_eq!(m.prefixes_with_adj(Adj(9)), vec![p("10.0.0.9/32")?]);
        Ok(())
    }
}
