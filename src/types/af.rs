use zerocopy::{FromBytes, NetworkEndian, U32};

//------------ IPv4 ----------------------------------------------------------

/// Exactly fitting IPv4 bytes (4 octets), in network byte order.
pub type IPv4 = U32<NetworkEndian>;

/// The number of bits in an IPv4 address.
pub const BITS: u8 = 32;

// Network masks for every prefix length, entry LEN has the high LEN bits
// set. So, 10/8 has the top 8 bits set.
const MASKS: [u32; 33] = compute_masks();

const fn compute_masks() -> [u32; 33] {
    let mut masks = [0_u32; 33];
    let mut len = 1;
    while len <= 32 {
        masks[len] = u32::MAX << (32 - len);
        len += 1;
    }
    masks
}

/// The host order network mask for a prefix length. Lengths beyond 32 are
/// treated as 32.
#[allow(clippy::indexing_slicing)]
pub fn net_mask(len: u8) -> u32 {
    MASKS[len.min(BITS) as usize]
}

//------------ Address -------------------------------------------------------

/// An IPv4 address, compared and masked as a 32-bit big-endian quantity.
///
/// The layout is exactly the four octets as they appear on the wire, so an
/// address can be read straight out of a packet header.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    zerocopy::FromBytes,
    zerocopy::IntoBytes,
    zerocopy::KnownLayout,
    zerocopy::Immutable,
    zerocopy::Unaligned,
)]
#[repr(transparent)]
pub struct Address(IPv4);

impl Address {
    pub const UNSPECIFIED: Address = Address(U32::ZERO);

    pub fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self::from_octets([a, b, c, d])
    }

    pub fn from_octets(octets: [u8; 4]) -> Self {
        Self(IPv4::from(octets))
    }

    /// Read an address from the first four bytes of `bytes`, e.g. the
    /// destination field of an IPv4 header.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let (addr, _) = Self::read_from_prefix(bytes).ok()?;
        Some(addr)
    }

    /// The address as a host order integer.
    pub fn as_u32(self) -> u32 {
        self.0.get()
    }

    pub fn from_u32(value: u32) -> Self {
        Self(IPv4::new(value))
    }

    pub fn octets(self) -> [u8; 4] {
        self.as_u32().to_be_bytes()
    }

    /// Fill the bits after the specified len with zeros.
    pub fn truncate_to_len(self, len: u8) -> Self {
        Self::from_u32(self.as_u32() & net_mask(len))
    }

    /// True if self and other agree on the first `len` bits.
    pub fn matches(self, other: Address, len: u8) -> bool {
        (self.as_u32() ^ other.as_u32()) & net_mask(len) == 0
    }

    /// If self is a contiguous network mask, return its length.
    pub fn mask_len(self) -> Option<u8> {
        let inverted = !self.as_u32();
        if inverted & inverted.wrapping_add(1) != 0 {
            return None;
        }
        Some(BITS - (32 - inverted.leading_zeros()) as u8)
    }

    pub fn mask_for_len(len: u8) -> Self {
        Self::from_u32(net_mask(len))
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::UNSPECIFIED
    }
}

impl From<std::net::Ipv4Addr> for Address {
    fn from(value: std::net::Ipv4Addr) -> Self {
        Self::from_octets(value.octets())
    }
}

impl From<Address> for std::net::Ipv4Addr {
    fn from(value: Address) -> Self {
        std::net::Ipv4Addr::from(value.octets())
    }
}

impl std::str::FromStr for Address {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.parse::<std::net::Ipv4Addr>()?.into())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d] = self.octets();
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks() {
        assert_eq!(net_mask(0), 0);
        assert_eq!(net_mask(8), 0xff00_0000);
        assert_eq!(net_mask(31), 0xffff_fffe);
        assert_eq!(net_mask(32), u32::MAX);
        assert_eq!(net_mask(40), u32::MAX);
    }

    #[test]
    fn mask_len() {
        for len in 0..=32 {
            assert_eq!(Address::mask_for_len(len).mask_len(), Some(len));
        }
        assert_eq!(Address::new(255, 0, 255, 0).mask_len(), None);
    }

    #[test]
    fn octets_are_network_order() {
        let a = Address::new(10, 1, 2, 3);
        assert_eq!(a.as_u32(), 0x0a01_0203);
        assert_eq!(a.octets(), [10, 1, 2, 3]);
        assert_eq!(a.to_string(), "10.1.2.3");
        assert_eq!(a.truncate_to_len(16), Address::new(10, 1, 0, 0));
    }

    #[test]
    fn read_from_header_bytes() {
        let hdr = [192, 168, 1, 7, 0xff];
        assert_eq!(Address::from_slice(&hdr), Some(Address::new(192, 168, 1, 7)));
        assert_eq!(Address::from_slice(&hdr[..3]), None);
    }
}
