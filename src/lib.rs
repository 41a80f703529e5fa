#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

//! An IPv4 forwarding information base (FIB) for a switch dataplane.
//!
//! Given a destination address, a FIB resolves what to do with a packet:
//! drop it, punt it, deliver it locally, resolve the neighbor (glean), or
//! rewrite its link layer header and send it on, possibly picking one of
//! several weighted next hops.
//!
//! Three structures are kept consistent with each other:
//!
//! * a route map per table, the authoritative record of which prefix
//!   points at which adjacency,
//! * a multi-bit trie per table, an 8-8-8-8 stride trie that the
//!   forwarding path queries, lock-free, from any number of threads,
//! * an adjacency heap with reference counted, deduplicated multipath
//!   blocks, whose sizes are powers of two so that a flow hash can pick a
//!   replica with a mask.
//!
//! Everything is driven through [fib::Main]. Forwarding threads hold a
//! [fib::FibReader] and an epoch [Guard] instead.
//!
//! ```
//! use ip4_fib::adjacency::{Adjacency, LookupNext};
//! use ip4_fib::{epoch, FibIndex, Main};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut main = Main::new()?;
//! let adj = main
//!     .adjacencies_mut()
//!     .new_adj(1, Some(&Adjacency::new(LookupNext::Rewrite)))?;
//! main.add_del_route(&"10.0.0.0/8".parse()?, FibIndex::DEFAULT, adj, false)?;
//!
//! let reader = main.reader(FibIndex::DEFAULT)?;
//! let guard = &epoch::pin();
//! assert_eq!(reader.lookup("10.1.2.3".parse()?, guard)?, adj);
//! # Ok(())
//! # }
//! ```

mod arena;
mod types;

pub mod adjacency;
pub mod config;
pub mod fib;
pub mod mtrie;
pub mod route_map;

// re-exports
pub use crossbeam_epoch::{self as epoch, Guard};
pub use inetnum::addr;

/// Error types returned by the FIB
pub use types::errors;

/// Statistics and counter types
pub use types::stats;

pub use adjacency::{Adj, Adjacency, LookupNext, NextHop};
pub use fib::{Fib, FibReader, Main, NextHopAddress, RouteEntry};
pub use types::af::Address;
pub use types::prefix::Prefix;
pub use types::{FibIndex, IfAddr, Si};
