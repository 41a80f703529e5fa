//------------ Config --------------------------------------------------------

//! Configuration options for the FIB main context.
//!
//! A configuration is created by instantiating [FibConfig], setting some
//! fields on it, and passing it in as an argument to
//! [new_with_config](crate::fib::Main::new_with_config).
//!
//! ```
//! use ip4_fib::config::FibConfig;
//! use ip4_fib::fib::Main;
//!
//! let config = FibConfig {
//!     multipath_error_tolerance: 0.05,
//!     ..Default::default()
//! };
//! let main = Main::new_with_config(config);
//! ```

use serde_derive::{Deserialize, Serialize};

use crate::types::errors::FatalError;

/// Tunables for the trie arenas and the multipath normalization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FibConfig {
    /// The maximum allowed sum of the per next hop differences between the
    /// requested share of traffic and the share a normalized block gives
    /// it. A block is grown (doubled) until it is within this tolerance.
    pub multipath_error_tolerance: f64,
    /// The largest block a multipath adjacency may be normalized into. When
    /// no block up to this size is within tolerance, the best effort block
    /// of this size is used.
    pub max_multipath_block: usize,
    /// The maximum number of plies per trie.
    pub ply_capacity: usize,
    /// Table indexes must be below this. Tables are kept in a dense
    /// vector.
    pub max_fibs: usize,
    /// The maximum adjacency index that has packet counters.
    pub adjacency_counter_capacity: usize,
    /// The number of forwarding workers that keep their own counter bank.
    pub counter_threads: usize,
}

impl FibConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Check the values for things that can never work, and fix the ones
    /// that can be fixed.
    pub(crate) fn validated(mut self) -> Result<Self, FatalError> {
        if self.multipath_error_tolerance.is_nan()
            || self.multipath_error_tolerance <= 0.0
        {
            log::warn!(
                "multipath error tolerance {} is not positive, using 0.01",
                self.multipath_error_tolerance
            );
            self.multipath_error_tolerance = 0.01;
        }
        self.max_multipath_block = self
            .max_multipath_block
            .max(1)
            .checked_next_power_of_two()
            .ok_or(FatalError)?;
        if self.ply_capacity == 0 || self.ply_capacity > u32::MAX as usize / 2
        {
            log::error!("ply capacity {} out of range", self.ply_capacity);
            return Err(FatalError);
        }
        if self.max_fibs == 0 || self.max_fibs > u32::MAX as usize {
            log::error!("table limit {} out of range", self.max_fibs);
            return Err(FatalError);
        }
        self.counter_threads = self.counter_threads.max(1);
        Ok(self)
    }
}

impl Default for FibConfig {
    fn default() -> Self {
        Self {
            multipath_error_tolerance: 0.01,
            max_multipath_block: 1 << 16,
            ply_capacity: 1 << 20,
            max_fibs: 1 << 16,
            adjacency_counter_capacity: 1 << 20,
            counter_threads: 1,
        }
    }
}
