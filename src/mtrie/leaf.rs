use std::fmt;

use crate::adjacency::Adj;

//------------ PlyIndex ------------------------------------------------------

/// The arena index of a ply. The root ply is always index 0.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlyIndex(pub u32);

impl PlyIndex {
    pub const ROOT: PlyIndex = PlyIndex(0);

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

//------------ Leaf ----------------------------------------------------------

/// The value of one ply slot: either the adjacency for every address that
/// reaches it, or the child ply that decides on the next byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Leaf {
    Terminal(Adj),
    Ply(PlyIndex),
}

impl Leaf {
    /// The leaf of a slot no route is responsible for.
    pub const EMPTY: Leaf = Leaf::Terminal(Adj::MISS);

    // Adjacencies and ply indexes both have to fit in 31 bits.
    pub(crate) const MAX_INDEX: u32 = (1 << 31) - 1;

    pub fn is_empty(self) -> bool {
        self == Leaf::EMPTY
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Leaf::Terminal(_))
    }

    // Slots store the leaf packed in a single word so that it can be
    // swapped atomically: the low bit set marks a terminal.
    pub(crate) fn encode(self) -> u32 {
        match self {
            Leaf::Terminal(adj) => (adj.0 << 1) | 1,
            Leaf::Ply(ply) => ply.0 << 1,
        }
    }

    pub(crate) fn decode(raw: u32) -> Leaf {
        if raw & 1 == 1 {
            Leaf::Terminal(Adj(raw >> 1))
        } else {
            Leaf::Ply(PlyIndex(raw >> 1))
        }
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leaf::Terminal(adj) => write!(f, "adj {}", adj),
            Leaf::Ply(ply) => write!(f, "ply {}", ply.0),
        }
    }
}
