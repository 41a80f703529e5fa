//------------ Table statistics ----------------------------------------------

use std::fmt::{Debug, Display};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_derive::Serialize;

use super::af::BITS;

//------------ PrefixLenCount ------------------------------------------------

#[derive(Copy, Clone, Serialize)]
pub struct PrefixLenCount {
    pub len: u8,
    pub count: usize,
}

impl Debug for PrefixLenCount {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_fmt(format_args!("/{}: {}", &self.len, &self.count))
    }
}

//------------ Counters -----------------------------------------------------
//
// This is the struct that's part of every FIB. It counts the routes per
// prefix length, plus the plies the trie holds.

#[derive(Debug)]
pub(crate) struct Counters {
    // number of unique prefixes in the route map, per length
    prefixes: [AtomicUsize; BITS as usize + 1],
    // number of plies allocated in the trie, including the root
    plies: AtomicUsize,
}

impl Counters {
    pub fn routes_count(&self) -> usize {
        self.prefixes
            .iter()
            .map(|pc| pc.load(Ordering::Relaxed))
            .sum()
    }

    pub fn prefixes_count(&self) -> Vec<usize> {
        self.prefixes
            .iter()
            .map(|pc| pc.load(Ordering::Relaxed))
            .collect::<Vec<_>>()
    }

    pub fn inc_prefixes_count(&self, len: u8) {
        if let Some(p) = self.prefixes.get(len as usize) {
            p.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dec_prefixes_count(&self, len: u8) {
        if let Some(p) = self.prefixes.get(len as usize) {
            p.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn prefix_stats(&self) -> Vec<PrefixLenCount> {
        self.prefixes
            .iter()
            .enumerate()
            .filter_map(|(len, count)| -> Option<PrefixLenCount> {
                let count = count.load(Ordering::Relaxed);
                if count != 0 {
                    Some(PrefixLenCount {
                        len: len as u8,
                        count,
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn set_plies_count(&self, plies: usize) {
        self.plies.store(plies, Ordering::Relaxed);
    }

    pub fn plies_count(&self) -> usize {
        self.plies.load(Ordering::Relaxed)
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            prefixes: std::array::from_fn(|_| AtomicUsize::new(0)),
            plies: AtomicUsize::new(1),
        }
    }
}

//------------ FibStats ------------------------------------------------------
//
// A plain copy of `Counters`, taken with relaxed loads, for callers that
// want to keep or serialize the numbers.

#[derive(Clone, Serialize)]
pub struct FibStats {
    pub routes: usize,
    pub prefixes: Vec<PrefixLenCount>,
    pub plies: usize,
}

impl From<&Counters> for FibStats {
    fn from(value: &Counters) -> Self {
        Self {
            routes: value.routes_count(),
            prefixes: value.prefix_stats(),
            plies: value.plies_count(),
        }
    }
}

impl Debug for FibStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "routes:{:>8} plies:{:>6} {:?}",
            self.routes, self.plies, self.prefixes
        )
    }
}

impl Display for FibStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "routes: {}", self.routes)?;
        writeln!(f, "plies:  {}", self.plies)?;
        for p in &self.prefixes {
            writeln!(f, "  /{:<2} {}", p.len, p.count)?;
        }
        Ok(())
    }
}

//------------ CombinedCounter -----------------------------------------------

/// A packet and byte counter pair, as kept for every adjacency.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CombinedCounter {
    pub packets: u64,
    pub bytes: u64,
}

impl CombinedCounter {
    pub fn add(&mut self, other: &CombinedCounter) {
        self.packets = self.packets.wrapping_add(other.packets);
        self.bytes = self.bytes.wrapping_add(other.bytes);
    }

    pub fn is_zero(&self) -> bool {
        self.packets == 0 && self.bytes == 0
    }
}

impl Display for CombinedCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} packets, {} bytes", self.packets, self.bytes)
    }
}
