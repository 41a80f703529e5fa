use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::af::{net_mask, Address, BITS};
use super::errors::FibError;

//------------ Prefix --------------------------------------------------------

/// An IPv4 prefix: an address and a length in `0..=32`.
///
/// The address is stored as given; bits beyond the length are ignored by
/// every comparison that matters for routing (see [Prefix::key]), but they
/// are kept so that e.g. an interface address `10.0.0.1/24` keeps its host
/// part.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Prefix {
    addr: Address,
    len: u8,
}

impl Prefix {
    pub fn new(addr: Address, len: u8) -> Result<Self, FibError> {
        if len > BITS {
            return Err(FibError::PrefixLengthInvalid);
        }
        Ok(Self { addr, len })
    }

    /// A `/32` host prefix for `addr`.
    pub fn host(addr: Address) -> Self {
        Self { addr, len: BITS }
    }

    pub fn addr(&self) -> Address {
        self.addr
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_default(&self) -> bool {
        self.len == 0
    }

    /// The host order network mask of this prefix.
    pub fn mask(&self) -> u32 {
        net_mask(self.len)
    }

    /// The masked network address as a host order integer. This is the key
    /// under which the route map stores this prefix.
    pub fn key(&self) -> u32 {
        self.addr.as_u32() & self.mask()
    }

    /// The same prefix with all host bits cleared.
    pub fn masked(&self) -> Self {
        Self {
            addr: Address::from_u32(self.key()),
            len: self.len,
        }
    }

    pub fn with_len(&self, len: u8) -> Self {
        Self {
            addr: self.addr,
            len: len.min(BITS),
        }
    }

    /// True if the given destination falls inside this prefix.
    pub fn contains(&self, dst: Address) -> bool {
        dst.matches(self.addr, self.len)
    }

    /// True if both prefixes have the same network under the mask of each,
    /// i.e. one of them covers the other's base address.
    pub fn matches(&self, other: &Prefix) -> bool {
        self.key() == other.addr.as_u32() & other.mask()
    }

    /// Offset the prefix by a number of prefixes of the same length. For
    /// example, `1.2.3.0/24 + 1 = 1.2.4.0/24`.
    pub fn add(&self, offset: u32) -> Self {
        let step = match self.len {
            0 => 0,
            len => offset.wrapping_shl(u32::from(BITS - len)),
        };
        Self {
            addr: Address::from_u32(self.addr.as_u32().wrapping_add(step)),
            len: self.len,
        }
    }
}

// Order by address difference first, then by length, so that iterating a
// sorted set of prefixes visits an aggregate before its more specifics.
impl Ord for Prefix {
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr
            .as_u32()
            .cmp(&other.addr.as_u32())
            .then(self.len.cmp(&other.len))
    }
}

impl PartialOrd for Prefix {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl serde::Serialize for Prefix {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for Prefix {
    type Err = FibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => {
                (addr, len.parse::<u8>().map_err(|_| FibError::PrefixParse)?)
            }
            None => (s, BITS),
        };
        let addr = addr.parse::<Address>().map_err(|_| FibError::PrefixParse)?;
        Prefix::new(addr, len)
    }
}

impl TryFrom<inetnum::addr::Prefix> for Prefix {
    type Error = FibError;

    fn try_from(value: inetnum::addr::Prefix) -> Result<Self, Self::Error> {
        match value.addr() {
            std::net::IpAddr::V4(addr) => Prefix::new(addr.into(), value.len()),
            std::net::IpAddr::V6(_) => Err(FibError::PrefixParse),
        }
    }
}

impl TryFrom<Prefix> for inetnum::addr::Prefix {
    type Error = FibError;

    fn try_from(value: Prefix) -> Result<Self, Self::Error> {
        let masked = value.masked();
        Self::new(std::net::IpAddr::V4(masked.addr.into()), masked.len)
            .map_err(|_| FibError::PrefixParse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() -> Result<(), FibError> {
        let p: Prefix = "10.1.0.0/16".parse()?;
        assert_eq!(p.addr(), Address::new(10, 1, 0, 0));
        assert_eq!(p.len(), 16);
        assert_eq!(p.to_string(), "10.1.0.0/16");
        assert_eq!("1.2.3.4".parse::<Prefix>()?.len(), 32);
        assert_eq!("1.2.3.4/33".parse::<Prefix>(), Err(FibError::PrefixLengthInvalid));
        assert_eq!("1.2.3/8".parse::<Prefix>(), Err(FibError::PrefixParse));
        Ok(())
    }

    #[test]
    fn add_offsets_by_prefix_size() -> Result<(), FibError> {
        let p: Prefix = "1.2.3.0/24".parse()?;
        assert_eq!(p.add(1), "1.2.4.0/24".parse()?);
        assert_eq!(p.add(256), "1.3.3.0/24".parse()?);
        let d: Prefix = "0.0.0.0/0".parse()?;
        assert_eq!(d.add(5), d);
        Ok(())
    }

    #[test]
    fn ordering_is_address_then_length() -> Result<(), FibError> {
        let mut v: Vec<Prefix> = ["10.1.0.0/16", "10.0.0.0/8", "9.0.0.0/8", "10.0.0.0/16"]
            .iter()
            .map(|s| s.parse())
            .collect::<Result<_, _>>()?;
        v.sort();
        let s: Vec<String> = v.iter().map(|p| p.to_string()).collect();
        assert_eq!(s, vec!["9.0.0.0/8", "10.0.0.0/8", "10.0.0.0/16", "10.1.0.0/16"]);
        Ok(())
    }

    #[test]
    fn containment() -> Result<(), FibError> {
        let p: Prefix = "10.0.0.1/8".parse()?;
        assert_eq!(p.key(), 0x0a00_0000);
        assert_eq!(p.masked().to_string(), "10.0.0.0/8");
        assert!(p.contains(Address::new(10, 200, 1, 1)));
        assert!(!p.contains(Address::new(11, 0, 0, 0)));
        assert!(p.matches(&"10.3.0.0/16".parse()?));
        Ok(())
    }

    #[test]
    fn inetnum_round_trip() -> Result<(), FibError> {
        let p: Prefix = "192.168.0.9/24".parse()?;
        let i = inetnum::addr::Prefix::try_from(p)?;
        assert_eq!(i.len(), 24);
        assert_eq!(Prefix::try_from(i)?, p.masked());
        let host = inetnum::addr::Prefix::try_from(Prefix::host(Address::new(10, 0, 0, 1)))?;
        assert_eq!(host.len(), 32);
        Ok(())
    }
}
