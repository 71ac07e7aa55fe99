use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IpamError;

/// The canonical numeric form of an IPv4 address.
///
/// The on-wire form used everywhere else in this crate (topology documents,
/// saved snapshots, error messages) is the dotted-quad string; `Address` is
/// what the allocator actually does arithmetic on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub u32);

impl Address {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// `self + offset`, saturating rather than wrapping past `u32::MAX`.
    pub fn offset(self, offset: u32) -> Self {
        Self(self.0.saturating_add(offset))
    }
}

impl FromStr for Address {
    type Err = IpamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ip: Ipv4Addr = s
            .parse()
            .map_err(|_| IpamError::bad_cidr(s, "not a dotted-quad IPv4 address"))?;
        Ok(Self(u32::from(ip)))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Ipv4Addr::from(self.0))
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Self(u32::from(ip))
    }
}

impl From<Address> for Ipv4Addr {
    fn from(addr: Address) -> Self {
        Ipv4Addr::from(addr.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_quad() {
        let addr: Address = "10.0.0.1".parse().unwrap();
        assert_eq!(addr.as_u32(), 0x0a000001);
        assert_eq!(addr.to_string(), "10.0.0.1");
    }

    #[test]
    fn rejects_garbage() {
        assert!("not-an-ip".parse::<Address>().is_err());
        assert!("10.0.0.1/24".parse::<Address>().is_err());
    }

    #[test]
    fn offset_saturates() {
        let addr = Address::new(u32::MAX - 1);
        assert_eq!(addr.offset(5), Address::new(u32::MAX));
    }
}
