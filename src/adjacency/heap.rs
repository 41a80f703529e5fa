use std::collections::BTreeMap;

use log::{error, trace};

use super::{Adj, Adjacency};
use crate::types::errors::{FatalError, FatalResult};

//------------ AdjacencyHeap -------------------------------------------------
//
// Contiguous blocks of adjacencies, addressed by the index of their first
// element. Freed ranges are kept sorted by offset, coalesced with their
// neighbours, and handed out again first fit.

#[derive(Debug)]
pub(crate) struct AdjacencyHeap {
    elts: Vec<Adjacency>,
    // offset -> length of every allocated block
    blocks: BTreeMap<u32, u32>,
    // offset -> length of every free range inside `elts`
    free: BTreeMap<u32, u32>,
    max: u32,
}

impl AdjacencyHeap {
    pub fn new(max: u32) -> Self {
        Self {
            elts: vec![],
            blocks: BTreeMap::new(),
            free: BTreeMap::new(),
            max,
        }
    }

    /// Reserve a block of `n` adjacencies, all set to `template`.
    pub fn get(&mut self, n: u32, template: &Adjacency) -> FatalResult<Adj> {
        if n == 0 {
            error!("request for an empty adjacency block");
            return Err(FatalError);
        }
        let offset = match self.first_fit(n) {
            Some((offset, len)) => {
                self.free.remove(&offset);
                if len > n {
                    self.free.insert(offset + n, len - n);
                }
                offset
            }
            None => {
                let offset = self.elts.len() as u32;
                if u64::from(offset) + u64::from(n) > u64::from(self.max) {
                    error!("adjacency heap full: {} + {}", offset, n);
                    return Err(FatalError);
                }
                self.elts.resize(
                    self.elts.len() + n as usize,
                    Adjacency::default(),
                );
                offset
            }
        };
        self.blocks.insert(offset, n);
        if let Some(block) = self.block_mut(offset, n) {
            block.fill(template.clone());
        }
        trace!("adjacency block {} + {}", offset, n);
        Ok(Adj(offset))
    }

    fn first_fit(&self, n: u32) -> Option<(u32, u32)> {
        self.free
            .iter()
            .find(|(_, len)| **len >= n)
            .map(|(o, l)| (*o, *l))
    }

    /// Return the block starting at `adj`. Returns its size.
    pub fn put(&mut self, adj: Adj) -> FatalResult<u32> {
        let Some(n) = self.blocks.remove(&adj.0) else {
            error!("free of unknown adjacency block {}", adj);
            return Err(FatalError);
        };
        if let Some(block) = self.block_mut(adj.0, n) {
            block.fill(Adjacency::default());
        }

        let mut offset = adj.0;
        let mut len = n;
        // Merge with the free range ending where this one starts.
        if let Some((&o, &l)) = self.free.range(..offset).next_back() {
            if o + l == offset {
                self.free.remove(&o);
                offset = o;
                len += l;
            }
        }
        // And with the one starting where this one ends.
        if let Some(l) = self.free.remove(&(offset + len)) {
            len += l;
        }

        if (offset + len) as usize == self.elts.len() {
            self.elts.truncate(offset as usize);
        } else {
            self.free.insert(offset, len);
        }
        trace!("freed adjacency block {} + {}", adj, n);
        Ok(n)
    }

    fn block_mut(&mut self, offset: u32, n: u32) -> Option<&mut [Adjacency]> {
        self.elts
            .get_mut(offset as usize..offset as usize + n as usize)
    }

    /// The whole block starting at `adj`.
    pub fn slice(&self, adj: Adj) -> Option<&[Adjacency]> {
        let n = *self.blocks.get(&adj.0)?;
        self.elts.get(adj.0 as usize..adj.0 as usize + n as usize)
    }

    pub fn slice_mut(&mut self, adj: Adj) -> Option<&mut [Adjacency]> {
        let n = *self.blocks.get(&adj.0)?;
        self.block_mut(adj.0, n)
    }

    /// The base of the block `adj` lies in, if it lies in one.
    pub fn block_of(&self, adj: Adj) -> Option<Adj> {
        let (&o, &l) = self.blocks.range(..=adj.0).next_back()?;
        (adj.0 < o + l).then_some(Adj(o))
    }

    pub fn is_free(&self, adj: Adj) -> bool {
        self.block_of(adj).is_none()
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn len(&self) -> usize {
        self.elts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjacency::LookupNext;

    fn rewrite() -> Adjacency {
        Adjacency {
            lookup_next: LookupNext::Rewrite,
            ..Default::default()
        }
    }

    #[test]
    fn first_fit_and_coalescing() -> FatalResult<()> {
        let mut heap = AdjacencyHeap::new(1 << 20);
        let a = heap.get(1, &rewrite())?;
        let b = heap.get(4, &rewrite())?;
        let c = heap.get(2, &rewrite())?;
        let d = heap.get(1, &rewrite())?;
        assert_eq!((a, b, c, d), (Adj(0), Adj(1), Adj(5), Adj(7)));
        assert_eq!(heap.slice(b).map(|s| s.len()), Some(4));
        assert_eq!(heap.block_of(Adj(3)), Some(b));

        assert_eq!(heap.put(b)?, 4);
        assert!(heap.is_free(Adj(3)));
        assert!(heap.slice(b).is_none());
        assert_eq!(heap.put(c)?, 2);
        // 1..7 is one free range now, a block of 6 fits exactly.
        assert_eq!(heap.get(6, &rewrite())?, Adj(1));
        assert!(heap.put(Adj(2)).is_err());
        Ok(())
    }

    #[test]
    fn tail_is_released() -> FatalResult<()> {
        let mut heap = AdjacencyHeap::new(1 << 20);
        let a = heap.get(1, &rewrite())?;
        let b = heap.get(8, &rewrite())?;
        heap.put(b)?;
        assert_eq!(heap.len(), 1);
        heap.put(a)?;
        assert_eq!(heap.len(), 0);
        assert_eq!(heap.n_blocks(), 0);
        Ok(())
    }

    #[test]
    fn freed_blocks_are_cleared() -> FatalResult<()> {
        let mut heap = AdjacencyHeap::new(1 << 20);
        let a = heap.get(2, &rewrite())?;
        let _b = heap.get(1, &rewrite())?;
        heap.put(a)?;
        let c = heap.get(1, &Adjacency::default())?;
        assert_eq!(c, a);
        assert_eq!(
            heap.slice(c).and_then(|s| s.first()).map(|a| a.lookup_next),
            Some(LookupNext::Miss)
        );
        Ok(())
    }

    #[test]
    fn capacity() {
        let mut heap = AdjacencyHeap::new(4);
        assert!(heap.get(4, &rewrite()).is_ok());
        assert!(heap.get(1, &rewrite()).is_err());
    }
}
