use std::collections::{BTreeMap, HashMap};

use log::{debug, error, log_enabled, trace, warn};

use super::{Adj, AdjacencyMain, NextHop, NextHopWeight, Remap};
use crate::types::errors::{FatalError, FibError};

//------------ Normalization -------------------------------------------------

/// Turn a list of weighted next hops into integer replica counts that sum
/// up to a power of two.
///
/// The result is in canonical order (decreasing weight, then increasing
/// adjacency). The block is doubled, starting from the smallest power of
/// two that holds every next hop, until the sum over all next hops of the
/// difference between the requested and the provided share of traffic is
/// below `tolerance`, or until `max_block` is reached. Next hops whose
/// count rounds to zero are dropped.
///
/// All zero weights count as all equal. Returns `(0, [])` for an empty
/// list.
pub fn normalize_pow2(
    raw: &[NextHop],
    tolerance: f64,
    max_block: u32,
) -> (u32, Vec<NextHop>) {
    match raw {
        [] => return (0, vec![]),
        [only] => return (1, vec![NextHop::new(only.adj, 1)]),
        [a, b] if a.weight == b.weight => {
            let mut t = vec![NextHop::new(a.adj, 1), NextHop::new(b.adj, 1)];
            t.sort_by(NextHop::canonical_cmp);
            return (2, t);
        }
        _ => {}
    }

    let mut want = raw.to_vec();
    want.sort_by(NextHop::canonical_cmp);
    let mut sum: f64 = want.iter().map(|nh| f64::from(nh.weight)).sum();
    if sum == 0.0 {
        want.iter_mut().for_each(|nh| nh.weight = 1);
        sum = want.len() as f64;
    }

    let mut t = want.clone();
    let mut n_adj = u32::try_from(want.len())
        .unwrap_or(u32::MAX)
        .checked_next_power_of_two()
        .unwrap_or(max_block);
    loop {
        let scale = f64::from(n_adj) / sum;
        let mut left = n_adj;
        for (got, nh) in t.iter_mut().zip(&want) {
            let n = ((scale * f64::from(nh.weight) + 0.5) as u32).min(left);
            left -= n;
            got.weight = n;
        }
        if let Some(first) = t.first_mut() {
            first.weight += left;
        }

        let error: f64 = t
            .iter()
            .zip(&want)
            .map(|(got, nh)| {
                (f64::from(nh.weight) / sum
                    - f64::from(got.weight) / f64::from(n_adj))
                .abs()
            })
            .sum();
        trace!("normalize {} next hops into {}: error {}", t.len(), n_adj, error);

        if error < tolerance || n_adj >= max_block {
            if error >= tolerance {
                warn!(
                    "multipath block capped at {} with error {}",
                    n_adj, error
                );
            }
            let keep = t.iter().position(|nh| nh.weight == 0).unwrap_or(t.len());
            t.truncate(keep);
            return (n_adj, t);
        }
        n_adj *= 2;
    }
}

//------------ MultipathAdjacency --------------------------------------------

/// A multipath block and the next hop lists it was made from.
#[derive(Clone, Debug)]
pub struct MultipathAdjacency {
    adj: Adj,
    n_adj: u32,
    reference_count: u32,
    // Replica counts, canonical order. Also the dedup key.
    normalized: Box<[NextHop]>,
    // As requested by the caller, in insertion order.
    unnormalized: Box<[NextHop]>,
}

impl MultipathAdjacency {
    pub fn adj(&self) -> Adj {
        self.adj
    }

    pub fn n_adj(&self) -> u32 {
        self.n_adj
    }

    /// The number of routes that point at this block.
    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }

    pub fn normalized_next_hops(&self) -> &[NextHop] {
        &self.normalized
    }

    pub fn unnormalized_next_hops(&self) -> &[NextHop] {
        &self.unnormalized
    }
}

//------------ MultipathMain -------------------------------------------------

#[derive(Debug)]
pub(crate) struct MultipathMain {
    tolerance: f64,
    max_block: u32,
    by_adj: BTreeMap<Adj, MultipathAdjacency>,
    by_key: HashMap<Box<[NextHop]>, Adj>,
}

impl MultipathMain {
    pub fn new(tolerance: f64, max_block: usize) -> Self {
        Self {
            tolerance,
            max_block: u32::try_from(max_block).unwrap_or(1 << 31),
            by_adj: BTreeMap::new(),
            by_key: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_adj.len()
    }
}

//------------ AdjacencyMain: multipath --------------------------------------

impl AdjacencyMain {
    pub fn is_mp_adj(&self, adj: Adj) -> bool {
        self.multipath.by_adj.contains_key(&adj)
    }

    pub fn mp_adj(&self, adj: Adj) -> Option<&MultipathAdjacency> {
        self.multipath.by_adj.get(&adj)
    }

    /// The normalized next hops of the multipath block at `adj`.
    pub fn next_hops_for_adj(&self, adj: Adj) -> Result<&[NextHop], FibError> {
        self.multipath
            .by_adj
            .get(&adj)
            .map(|ma| ma.normalized_next_hops())
            .ok_or(FibError::UnknownAdjacency(adj.0))
    }

    /// Find the block for a next hop list, without creating one.
    pub fn find_mp_adj(&self, next_hops: &[NextHop]) -> Option<Adj> {
        let (_, norm) = normalize_pow2(
            next_hops,
            self.multipath.tolerance,
            self.multipath.max_block,
        );
        self.multipath.by_key.get(norm.as_slice()).copied()
    }

    /// Find or create the block for a next hop list. A new block starts
    /// with a reference count of zero; taking a reference is up to the
    /// caller. Returns `None` if nothing is left after normalization.
    pub fn create_mp_adj(
        &mut self,
        next_hops: &[NextHop],
    ) -> Result<Option<Adj>, FibError> {
        let (n_adj, norm) = normalize_pow2(
            next_hops,
            self.multipath.tolerance,
            self.multipath.max_block,
        );
        if norm.is_empty() {
            return Ok(None);
        }
        if let Some(adj) = self.multipath.by_key.get(norm.as_slice()) {
            return Ok(Some(*adj));
        }

        let mut replicas = Vec::with_capacity(norm.len());
        for nh in &norm {
            let record = self
                .get_adj(nh.adj)?
                .first()
                .cloned()
                .ok_or(FibError::UnknownAdjacency(nh.adj.0))?;
            replicas.push((record, nh.weight));
        }

        let adj = self.new_adj(n_adj, None)?;
        let block = self.get_adj_mut(adj)?;
        let mut slots = block.iter_mut();
        for (record, weight) in replicas {
            for slot in slots.by_ref().take(weight as usize) {
                *slot = record.clone();
                slot.n_adj = n_adj;
            }
        }

        let norm: Box<[NextHop]> = norm.into();
        self.multipath.by_key.insert(norm.clone(), adj);
        self.multipath.by_adj.insert(
            adj,
            MultipathAdjacency {
                adj,
                n_adj,
                reference_count: 0,
                normalized: norm,
                unnormalized: next_hops.into(),
            },
        );
        if log_enabled!(log::Level::Debug) {
            debug!(
                "new multipath adjacency {} of {} for {:?}",
                adj, n_adj, next_hops
            );
        }
        self.call_adj_add_hooks(adj);
        Ok(Some(adj))
    }

    pub(crate) fn take_mp_ref(&mut self, adj: Adj) {
        if let Some(ma) = self.multipath.by_adj.get_mut(&adj) {
            ma.reference_count += 1;
        }
    }

    /// Drop one reference to a multipath block, freeing it on the last.
    pub(crate) fn release_mp_ref(&mut self, adj: Adj) -> Result<(), FibError> {
        let Some(ma) = self.multipath.by_adj.get_mut(&adj) else {
            return Ok(());
        };
        ma.reference_count = ma.reference_count.saturating_sub(1);
        if ma.reference_count == 0 {
            self.free_mp_adj(adj)?;
        }
        Ok(())
    }

    pub(super) fn free_mp_adj(&mut self, adj: Adj) -> Result<(), FibError> {
        let Some(ma) = self.multipath.by_adj.remove(&adj) else {
            return Err(FibError::UnknownAdjacency(adj.0));
        };
        if self.multipath.by_key.remove(&ma.normalized).is_none() {
            error!("multipath adjacency {} missing from dedup table", adj);
            return Err(FibError::Fatal(FatalError));
        }
        self.release_block(adj)
    }

    /// Add `nh_adj` with `weight` to the next hops of the block `old_adj`,
    /// or change its weight if it is there already, or remove it.
    ///
    /// `old_adj` may be [Adj::NIL] or a unipath adjacency, both of which
    /// count as no next hops. If the resulting block differs from the old
    /// one, a reference moves from old to new and the old block is freed
    /// when that was its last. Returns the new block, or [Adj::NIL] when
    /// no next hop is left.
    pub fn add_del_next_hop(
        &mut self,
        old_adj: Adj,
        is_del: bool,
        nh_adj: Adj,
        weight: NextHopWeight,
    ) -> Result<Adj, FibError> {
        let old = self.is_mp_adj(old_adj).then_some(old_adj);
        let mut next_hops = old
            .and_then(|adj| self.mp_adj(adj))
            .map(|ma| ma.unnormalized_next_hops().to_vec())
            .unwrap_or_default();
        let found = next_hops.iter().position(|nh| nh.adj == nh_adj);

        match (is_del, found) {
            (true, None) => {
                warn!("next hop {} not part of adjacency {}", nh_adj, old_adj);
                return Err(FibError::NextHopNotFound);
            }
            (true, Some(i)) => {
                next_hops.remove(i);
            }
            (false, Some(i)) => match next_hops.get_mut(i) {
                Some(nh) if nh.weight == weight => return Ok(old_adj),
                Some(nh) => nh.weight = weight,
                None => {}
            },
            (false, None) => next_hops.push(NextHop::new(nh_adj, weight)),
        }

        let new = if next_hops.is_empty() {
            None
        } else {
            self.create_mp_adj(&next_hops)?
        };

        if new != old {
            if let Some(new) = new {
                self.take_mp_ref(new);
            }
            if let Some(old) = old {
                self.release_mp_ref(old)?;
            }
        } else if let Some(ma) = new
            .and_then(|adj| self.multipath.by_adj.get_mut(&adj))
            .filter(|ma| ma.reference_count <= 1)
        {
            // Same block, the requested weights may still have changed.
            // A block other routes share keeps the weights it was made
            // with.
            ma.unnormalized = next_hops.into();
        }

        let new = new.unwrap_or(Adj::NIL);
        debug!(
            "{} next hop {} weight {}: {} -> {}",
            if is_del { "del" } else { "add" },
            nh_adj,
            weight,
            old_adj,
            new
        );
        Ok(new)
    }

    /// Remove `adj` from every multipath block that uses it.
    ///
    /// Each such block gets a replacement made from its remaining next
    /// hops, and its references move over to it. The returned table says
    /// which block replaces which, [Adj::NIL] meaning that nothing is left.
    /// The old blocks stay allocated until
    /// [release_remapped](Self::release_remapped) is called, so the caller
    /// can point its routes away from them first.
    pub fn del_multipath_adj(&mut self, adj: Adj) -> Result<Vec<Remap>, FibError> {
        let users: Vec<Adj> = self
            .multipath
            .by_adj
            .values()
            .filter(|ma| ma.unnormalized.iter().any(|nh| nh.adj == adj))
            .map(|ma| ma.adj)
            .collect();

        let mut remaps = Vec::with_capacity(users.len());
        for old in users {
            let Some(ma) = self.multipath.by_adj.get(&old) else {
                continue;
            };
            let refs = ma.reference_count;
            let left: Vec<NextHop> = ma
                .unnormalized
                .iter()
                .filter(|nh| nh.adj != adj)
                .copied()
                .collect();

            let new = if left.is_empty() {
                None
            } else {
                self.create_mp_adj(&left)?
            };
            match new {
                Some(new) if new == old => {
                    // The removed next hop had rounded away to nothing.
                    if let Some(ma) = self.multipath.by_adj.get_mut(&old) {
                        ma.unnormalized = left.into();
                    }
                    continue;
                }
                Some(new) => {
                    if let Some(ma) = self.multipath.by_adj.get_mut(&new) {
                        ma.reference_count += refs;
                    }
                }
                None => {}
            }
            if let Some(ma) = self.multipath.by_adj.get_mut(&old) {
                ma.reference_count = 0;
            }
            remaps.push(Remap {
                from: old,
                to: new.unwrap_or(Adj::NIL),
            });
        }
        if !remaps.is_empty() {
            debug!("adjacency {} removed from {} blocks", adj, remaps.len());
        }
        Ok(remaps)
    }

    /// Free the blocks replaced by a [del_multipath_adj] table.
    ///
    /// [del_multipath_adj]: Self::del_multipath_adj
    pub fn release_remapped(&mut self, remaps: &[Remap]) -> Result<(), FibError> {
        for remap in remaps {
            if self.is_mp_adj(remap.from) {
                self.free_mp_adj(remap.from)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjacency::{Adjacency, LookupNext};
    use crate::config::FibConfig;

    fn nh(adj: u32, weight: u32) -> NextHop {
        NextHop::new(Adj(adj), weight)
    }

    fn weights(t: &[NextHop]) -> Vec<u32> {
        t.iter().map(|nh| nh.weight).collect()
    }

    #[test]
    fn normalize_unequal_pair() {
        let (n, t) = normalize_pow2(&[nh(5, 1), nh(4, 3)], 0.01, 1 << 16);
        assert_eq!(n, 4);
        assert_eq!(t, vec![nh(4, 3), nh(5, 1)]);
    }

    #[test]
    fn normalize_trivial() {
        assert_eq!(normalize_pow2(&[], 0.01, 1 << 16), (0, vec![]));
        assert_eq!(normalize_pow2(&[nh(7, 9)], 0.01, 1 << 16), (1, vec![nh(7, 1)]));
        assert_eq!(
            normalize_pow2(&[nh(9, 5), nh(7, 5)], 0.01, 1 << 16),
            (2, vec![nh(7, 1), nh(9, 1)])
        );
    }

    #[test]
    fn normalize_three_equal() {
        let (n, t) = normalize_pow2(&[nh(3, 1), nh(4, 1), nh(5, 1)], 0.01, 1 << 16);
        assert_eq!(n, 256);
        assert_eq!(weights(&t), vec![86, 85, 85]);

        let (n, t) = normalize_pow2(&[nh(3, 1), nh(4, 1), nh(5, 1)], 0.34, 1 << 16);
        assert_eq!(n, 4);
        assert_eq!(t, vec![nh(3, 2), nh(4, 1), nh(5, 1)]);
    }

    #[test]
    fn normalize_zero_weights_and_cap() {
        let (n, t) = normalize_pow2(&[nh(3, 0), nh(4, 0), nh(5, 0), nh(6, 0)], 0.01, 1 << 16);
        assert_eq!(n, 4);
        assert_eq!(weights(&t), vec![1, 1, 1, 1]);

        let (n, t) = normalize_pow2(&[nh(3, 1), nh(4, 1), nh(5, 1)], 0.01, 8);
        assert_eq!(n, 8);
        assert_eq!(weights(&t).iter().sum::<u32>(), 8);
    }

    #[test]
    fn normalize_drops_rounded_away() {
        let (n, t) = normalize_pow2(&[nh(3, 1000), nh(4, 1000), nh(5, 1)], 0.01, 1 << 16);
        assert_eq!(n, 4);
        assert_eq!(t, vec![nh(3, 2), nh(4, 2)]);
    }

    fn main_with_rewrites(
        n: usize,
    ) -> Result<(AdjacencyMain, Vec<Adj>), FibError> {
        let mut m = AdjacencyMain::new(&FibConfig::default())?;
        let mut adjs = vec![];
        for _ in 0..n {
            adjs.push(m.new_adj(1, Some(&Adjacency::new(LookupNext::Rewrite)))?);
        }
        Ok((m, adjs))
    }

    #[test]
    fn block_layout() -> Result<(), FibError> {
        let (mut m, a) = main_with_rewrites(2)?;
        let mp = m.add_del_next_hop(Adj::NIL, false, a[0], 1)?;
        assert_eq!(m.mp_adj(mp).map(|ma| ma.n_adj()), Some(1));
        let mp = m.add_del_next_hop(mp, false, a[1], 3)?;
        assert!(m.is_mp_adj(mp));
        let block = m.get_adj(mp)?;
        assert_eq!(block.len(), 4);
        assert!(block.iter().all(|adj| adj.n_adj == 4 && adj.is_rewrite()));
        assert_eq!(m.next_hops_for_adj(mp)?, &[nh(a[1].0, 3), nh(a[0].0, 1)]);
        assert_eq!(m.mp_adj(mp).map(|ma| ma.reference_count()), Some(1));
        Ok(())
    }

    #[test]
    fn dedup_and_reference_counts() -> Result<(), FibError> {
        let (mut m, a) = main_with_rewrites(2)?;
        let p = m.add_del_next_hop(Adj::NIL, false, a[0], 1)?;
        let p = m.add_del_next_hop(p, false, a[1], 1)?;
        // Same set, other order, other absolute weights.
        let q = m.add_del_next_hop(Adj::NIL, false, a[1], 2)?;
        let q = m.add_del_next_hop(q, false, a[0], 2)?;
        assert_eq!(p, q);
        assert_eq!(m.mp_adj(p).map(|ma| ma.reference_count()), Some(2));
        assert_eq!(m.find_mp_adj(&[nh(a[0].0, 7), nh(a[1].0, 7)]), Some(p));

        // Same weight again is a no-op.
        assert_eq!(m.add_del_next_hop(p, false, a[0], 1)?, p);

        let r = m.add_del_next_hop(p, true, a[1], 0)?;
        assert_ne!(r, p);
        assert_eq!(m.mp_adj(p).map(|ma| ma.reference_count()), Some(1));
        let r = m.add_del_next_hop(r, true, a[0], 0)?;
        assert_eq!(r, Adj::NIL);

        let s = m.add_del_next_hop(q, true, a[1], 0)?;
        assert!(!m.is_mp_adj(p));
        assert!(m.is_adj_free(p));
        assert!(m.add_del_next_hop(s, true, a[1], 0).is_err());
        Ok(())
    }

    #[test]
    fn shared_block_keeps_its_request() -> Result<(), FibError> {
        let config = FibConfig {
            multipath_error_tolerance: 0.34,
            ..Default::default()
        };
        let mut m = AdjacencyMain::new(&config)?;
        let mut a = vec![];
        for _ in 0..3 {
            a.push(m.new_adj(1, Some(&Adjacency::new(LookupNext::Rewrite)))?);
        }
        let requested = |m: &AdjacencyMain, adj: Adj| -> Vec<u32> {
            m.mp_adj(adj)
                .map(|ma| weights(ma.unnormalized_next_hops()))
                .unwrap_or_default()
        };

        let mut p = Adj::NIL;
        for adj in &a {
            p = m.add_del_next_hop(p, false, *adj, 1)?;
        }
        assert_eq!(m.next_hops_for_adj(p)?, &[nh(a[0].0, 2), nh(a[1].0, 1), nh(a[2].0, 1)]);

        // Normalizes to the same block, which only p uses.
        assert_eq!(m.add_del_next_hop(p, false, a[0], 2)?, p);
        assert_eq!(requested(&m, p), vec![2, 1, 1]);

        let mut q = Adj::NIL;
        for adj in &a {
            q = m.add_del_next_hop(q, false, *adj, 1)?;
        }
        assert_eq!(q, p);
        assert_eq!(m.mp_adj(p).map(|ma| ma.reference_count()), Some(2));
        assert_eq!(m.add_del_next_hop(q, false, a[0], 1)?, p);
        assert_eq!(requested(&m, p), vec![2, 1, 1]);
        Ok(())
    }

    #[test]
    fn purge_remaps_blocks() -> Result<(), FibError> {
        let (mut m, a) = main_with_rewrites(3)?;
        let mut p = Adj::NIL;
        for adj in &a {
            p = m.add_del_next_hop(p, false, *adj, 1)?;
        }
        let mut q = Adj::NIL;
        for adj in &a[1..] {
            q = m.add_del_next_hop(q, false, *adj, 1)?;
        }
        let r = m.add_del_next_hop(Adj::NIL, false, a[2], 1)?;
        let r = m.add_del_next_hop(r, false, a[0], 1)?;

        let remaps = m.del_multipath_adj(a[0])?;
        assert_eq!(remaps.len(), 2);
        // p loses a[0] and becomes q, so q now carries both references.
        assert!(remaps.contains(&Remap { from: p, to: q }));
        assert_eq!(m.mp_adj(q).map(|ma| ma.reference_count()), Some(2));
        let to_r = remaps.iter().find(|rm| rm.from == r).map(|rm| rm.to);
        let single = to_r.and_then(|adj| m.mp_adj(adj).map(|ma| ma.n_adj()));
        assert_eq!(single, Some(1));

        m.release_remapped(&remaps)?;
        assert!(!m.is_mp_adj(p));
        assert!(!m.is_mp_adj(r));
        assert!(m.is_mp_adj(q));
        Ok(())
    }
}
