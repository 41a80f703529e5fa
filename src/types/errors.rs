use std::fmt;

use super::af::Address;
use super::ids::FibIndex;
use super::prefix::Prefix;

/// Possible errors returned by methods on a FIB. Most of these errors are
// recoverable, there is one variant [FibError::Fatal] that is unrecoverable,
// like the stand-alone type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FibError {
    /// The prefix has no route in the FIB.
    PrefixNotFound,
    /// The requested prefix length cannot exist.
    PrefixLengthInvalid,
    /// A string or inetnum prefix could not be turned into an IPv4 prefix.
    PrefixParse,
    /// A next hop was to be removed from a multipath route, but it is not
    /// part of it.
    NextHopNotFound,
    /// The next hop address lies inside the prefix it is meant to reach.
    /// Only the default route may do this.
    NextHopMatchesPrefix { prefix: Prefix, next_hop: Address },
    /// The next hop resolves to one of our own interface addresses, so
    /// packets could never be forwarded to it.
    UnreachableNextHop(Address),
    /// The adjacency index does not refer to an allocated adjacency.
    UnknownAdjacency(u32),
    /// An interface address overlaps with a different address that is
    /// already configured on the same interface.
    AddressConflict { new: Prefix, existing: Prefix },
    /// The interface address to delete is not configured.
    InterfaceAddressNotFound(Prefix),
    /// There is no FIB with that index.
    UnknownFib(u32),
    /// The trie of the table has no plies left for the route. Nothing
    /// was changed.
    TableFull(FibIndex),
    /// An unrecoverable error occurred, the trie or the adjacency heap is
    /// inconsistent. The caller should drop the FIB.
    Fatal(FatalError),
}

impl std::error::Error for FibError {}

impl fmt::Display for FibError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FibError::PrefixNotFound => {
                write!(f, "Error: The Prefix cannot be found.")
            }
            FibError::PrefixLengthInvalid => {
                write!(f, "Error: The specified Prefix length is invalid.")
            }
            FibError::PrefixParse => {
                write!(f, "Error: Not a valid IPv4 prefix.")
            }
            FibError::NextHopNotFound => {
                write!(f, "Error: The next hop is not part of the route.")
            }
            FibError::NextHopMatchesPrefix { prefix, next_hop } => write!(
                f,
                "Error: prefix {} matches next-hop {}",
                prefix, next_hop
            ),
            FibError::UnreachableNextHop(addr) => {
                write!(f, "Error: unreachable next-hop {}, it is local", addr)
            }
            FibError::UnknownAdjacency(adj) => {
                write!(f, "Error: unknown adjacency {}", adj)
            }
            FibError::AddressConflict { new, existing } => write!(
                f,
                "Error: add {} conflicts with existing address {}",
                new, existing
            ),
            FibError::InterfaceAddressNotFound(p) => {
                write!(f, "Error: interface address {} not found", p)
            }
            FibError::UnknownFib(idx) => {
                write!(f, "Error: no FIB with index {}", idx)
            }
            FibError::TableFull(idx) => {
                write!(f, "Error: no room left in the trie of {}", idx)
            }
            FibError::Fatal(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl From<FatalError> for FibError {
    fn from(value: FatalError) -> Self {
        FibError::Fatal(value)
    }
}

/// An unrecoverable error, that can occur when the trie or the adjacency
/// heap references memory that was never allocated. All data in the FIB
/// should be considered corrupt and the application receiving this error
/// should probably drop it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FatalError;

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FATAL: An unrecoverable error has occurred. The FIB must be \
             considered corrupted."
        )
    }
}

pub type FatalResult<T> = Result<T, FatalError>;

impl std::error::Error for FatalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
