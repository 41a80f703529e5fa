use std::fmt;

use serde_derive::{Deserialize, Serialize};

//------------ FibIndex ------------------------------------------------------

/// The dense index of a routing table (VRF). Table 0 is the default table
/// that every interface is bound to unless told otherwise.
#[derive(
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub struct FibIndex(pub u32);

impl FibIndex {
    pub const DEFAULT: FibIndex = FibIndex(0);

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FibIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "default"),
            i => write!(f, "table-{}", i),
        }
    }
}

impl fmt::Debug for FibIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FibIndex({})", self.0)
    }
}

//------------ Si ------------------------------------------------------------

/// A software interface index, as handed out by interface management.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub struct Si(pub u32);

impl fmt::Display for Si {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "si{}", self.0)
    }
}

//------------ IfAddr --------------------------------------------------------

/// A handle to an interface address record.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub struct IfAddr(pub u32);

impl fmt::Display for IfAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ifaddr{}", self.0)
    }
}
