use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::IpamError;

/// An immutable IPv4 prefix `A.B.C.D/L`.
///
/// `Cidr` is always normalized: host bits below `length` are zeroed at
/// construction, so two `Cidr`s with the same `(prefix, length)` always
/// denote the same range and `Eq`/`Ord` compare ranges, not raw bit patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    prefix: Address,
    length: u8,
}

impl Cidr {
    /// Construct a `Cidr` from a prefix address and length, rejecting lengths outside `0..=32`
    /// and any set host bits.
    pub fn new(prefix: Address, length: u8) -> Result<Self, IpamError> {
        if length > 32 {
            return Err(IpamError::bad_cidr(
                format!("{}/{}", prefix, length),
                "length must be in 0..=32",
            ));
        }
        let mask = Self::mask_for(length);
        if prefix.as_u32() & !mask != 0 {
            return Err(IpamError::bad_cidr(
                format!("{}/{}", prefix, length),
                "prefix has non-zero host bits",
            ));
        }
        Ok(Self { prefix, length })
    }

    /// Construct a `Cidr` covering the whole address space containing `addr` at `length`,
    /// truncating host bits rather than rejecting them. Used internally when carving ranges
    /// whose alignment is already known to be correct.
    fn aligned(addr: Address, length: u8) -> Self {
        let mask = Self::mask_for(length);
        Self {
            prefix: Address::new(addr.as_u32() & mask),
            length,
        }
    }

    fn mask_for(length: u8) -> u32 {
        if length == 0 {
            0
        } else {
            u32::MAX << (32 - length)
        }
    }

    pub fn length(&self) -> u8 {
        self.length
    }

    pub fn prefix(&self) -> Address {
        self.prefix
    }

    /// Number of addresses covered: `2^(32-length)`.
    pub fn size(&self) -> u64 {
        1u64 << (32 - self.length as u32)
    }

    pub fn start(&self) -> Address {
        self.prefix
    }

    /// The last address in the range (inclusive).
    pub fn end(&self) -> Address {
        Address::new(self.prefix.as_u32() | !Self::mask_for(self.length))
    }

    /// True iff `self`'s range is a superset of `other`'s (including equality).
    pub fn contains(&self, other: &Cidr) -> bool {
        self.length <= other.length
            && self.start().as_u32() <= other.start().as_u32()
            && self.end().as_u32() >= other.end().as_u32()
    }

    /// True iff the ranges share at least one address.
    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.start().as_u32() <= other.end().as_u32() && other.start().as_u32() <= self.end().as_u32()
    }

    pub fn contains_address(&self, addr: Address) -> bool {
        addr.as_u32() >= self.start().as_u32() && addr.as_u32() <= self.end().as_u32()
    }

    /// The address at `offset` within this CIDR, or `None` if out of range.
    pub fn address_at(&self, offset: u64) -> Option<Address> {
        if offset >= self.size() {
            return None;
        }
        Some(self.prefix.offset(offset as u32))
    }

    /// `addr`'s zero-based offset within this CIDR, or `None` if `addr` isn't contained.
    pub fn offset_of(&self, addr: Address) -> Option<u64> {
        if !self.contains_address(addr) {
            return None;
        }
        Some((addr.as_u32() - self.prefix.as_u32()) as u64)
    }

    /// Split into the two half-ranges of length `self.length() + 1`. Fails only for a
    /// single-host `/32`, which has no half.
    pub fn split(&self) -> Result<(Cidr, Cidr), IpamError> {
        if self.length >= 32 {
            return Err(IpamError::bad_cidr(self.to_string(), "cannot split a /32"));
        }
        let half_len = self.length + 1;
        let half_size = 1u32 << (32 - half_len as u32);
        let lower = Cidr::aligned(self.prefix, half_len);
        let upper = Cidr::aligned(self.prefix.offset(half_size), half_len);
        Ok((lower, upper))
    }

    /// Split into `2^bits` equal sub-ranges of length `self.length() + bits`, in ascending
    /// address order.
    pub fn split_into(&self, bits: u32) -> Result<Vec<Cidr>, IpamError> {
        let new_len = self.length as u32 + bits;
        if new_len > 32 {
            return Err(IpamError::bad_cidr(
                self.to_string(),
                format!("cannot split into 2^{} slots, not enough host bits", bits),
            ));
        }
        let slot_size = 1u32.checked_shl(32 - new_len).unwrap_or(0);
        let count = 1u64 << bits;
        let mut out = Vec::with_capacity(count as usize);
        for i in 0..count {
            let addr = self.prefix.offset((i as u32).wrapping_mul(slot_size));
            out.push(Cidr::aligned(addr, new_len as u8));
        }
        Ok(out)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.prefix, self.length)
    }
}

impl FromStr for Cidr {
    type Err = IpamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_part, len_part) = s
            .split_once('/')
            .ok_or_else(|| IpamError::bad_cidr(s, "missing '/length'"))?;
        let prefix: Address = addr_part.parse()?;
        let length: u8 = len_part
            .parse()
            .map_err(|_| IpamError::bad_cidr(s, "length is not a valid integer"))?;
        Cidr::new(prefix, length)
    }
}

impl TryFrom<String> for Cidr {
    type Error = IpamError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cidr> for String {
    fn from(cidr: Cidr) -> Self {
        cidr.to_string()
    }
}
