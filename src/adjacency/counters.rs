use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use log::trace;

use super::Adj;
use crate::arena::ChunkedArena;
use crate::types::stats::CombinedCounter;

//------------ CounterCell ---------------------------------------------------

#[derive(Debug, Default)]
pub struct CounterCell {
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl CounterCell {
    fn load(&self) -> CombinedCounter {
        CombinedCounter {
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

//------------ AdjacencyCounters ---------------------------------------------

/// Packet and byte counters per adjacency, with one bank per forwarding
/// worker so that workers never contend on a counter. Reading a counter
/// sums the banks; the result is eventually consistent only.
pub struct AdjacencyCounters {
    banks: Vec<CachePadded<ChunkedArena<CounterCell>>>,
}

impl AdjacencyCounters {
    pub fn new(n_threads: usize, capacity: usize) -> Self {
        let banks = (0..n_threads.max(1))
            .map(|_| {
                CachePadded::new(ChunkedArena::new(
                    capacity,
                    CounterCell::default,
                ))
            })
            .collect();
        Self { banks }
    }

    pub fn n_threads(&self) -> usize {
        self.banks.len()
    }

    /// Count a packet of `bytes` bytes forwarded through `adj` by worker
    /// `thread`. Adjacencies beyond the counter capacity are not counted.
    pub fn increment(&self, thread: usize, adj: Adj, packets: u64, bytes: u64) {
        let Some(bank) = self.banks.get(thread) else {
            return;
        };
        match bank.get_or_create(adj.index()) {
            Ok(cell) => {
                cell.packets.fetch_add(packets, Ordering::Relaxed);
                cell.bytes.fetch_add(bytes, Ordering::Relaxed);
            }
            Err(_) => trace!("no counter for adjacency {}", adj),
        }
    }

    /// The sum over all workers.
    pub fn get(&self, adj: Adj) -> CombinedCounter {
        let mut res = CombinedCounter::default();
        for bank in &self.banks {
            if let Some(cell) = bank.get(adj.index()) {
                res.add(&cell.load());
            }
        }
        res
    }

    pub(crate) fn clear(&self, adj: Adj) {
        for bank in &self.banks {
            if let Some(cell) = bank.get(adj.index()) {
                cell.packets.store(0, Ordering::Relaxed);
                cell.bytes.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Every adjacency with a non-zero counter, in index order.
    pub fn non_zero(&self) -> Vec<(Adj, CombinedCounter)> {
        let mut sums = std::collections::BTreeMap::<usize, CombinedCounter>::new();
        for bank in &self.banks {
            for (idx, cell) in bank.iter() {
                let c = cell.load();
                if !c.is_zero() {
                    sums.entry(idx).or_default().add(&c);
                }
            }
        }
        sums.into_iter()
            .map(|(idx, c)| (Adj(idx as u32), c))
            .collect()
    }
}

impl std::fmt::Debug for AdjacencyCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdjacencyCounters")
            .field("threads", &self.banks.len())
            .finish()
    }
}
