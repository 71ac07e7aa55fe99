use serde::{Deserialize, Serialize};

use crate::bitmap::Bitmap;
use crate::cidr::Cidr;
use crate::error::{IpamError, Result};

/// One allocation unit: a CIDR-aligned range of size `2^(32-block_mask)`, plus the bitmap
/// tracking which addresses within it are taken.
///
/// A block is pinned to exactly one `(tenant, segment)` pair for its life — retagging only
/// happens when a fully-released block is reused for a different pair (§4.4 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub cidr: Cidr,
    pub bitmap: Bitmap,
    pub revision: u64,
    pub tenant: String,
    pub segment: String,
}

impl Block {
    /// A fresh, fully-released block for `(tenant, segment)` covering `cidr`.
    pub fn new(cidr: Cidr, tenant: impl Into<String>, segment: impl Into<String>) -> Self {
        Self {
            bitmap: Bitmap::new(cidr.size() as usize),
            cidr,
            revision: 0,
            tenant: tenant.into(),
            segment: segment.into(),
        }
    }

    pub fn tenant_segment(&self) -> (&str, &str) {
        (&self.tenant, &self.segment)
    }

    /// Reserve the first free bit, returning its index. Bumps `revision`.
    pub fn allocate(&mut self) -> Result<usize> {
        let i = self
            .bitmap
            .first_zero()
            .ok_or_else(|| IpamError::no_available_ip(format!("block {} is full", self.cidr)))?;
        self.bitmap.set(i);
        self.revision += 1;
        Ok(i)
    }

    /// Release bit `i`. Bumps `revision`. Requires the bit to currently be set.
    pub fn release(&mut self, i: usize) -> Result<()> {
        if !self.bitmap.bit(i) {
            return Err(IpamError::unknown_owner(format!(
                "bit {i} in block {} is not allocated",
                self.cidr
            )));
        }
        self.bitmap.clear(i);
        self.revision += 1;
        Ok(())
    }

    /// Set every bit whose address lies inside `blackout`. Idempotent. Bumps `revision` if this
    /// call actually flips a bit, so callers don't need to bump it themselves.
    pub fn mask_blackout(&mut self, blackout: &Cidr) {
        let overlap_start = self.cidr.start().as_u32().max(blackout.start().as_u32());
        let overlap_end = self.cidr.end().as_u32().min(blackout.end().as_u32());
        if overlap_start > overlap_end {
            return;
        }
        let mut changed = false;
        for addr in overlap_start..=overlap_end {
            if let Some(offset) = self.cidr.offset_of(crate::address::Address::new(addr)) {
                let offset = offset as usize;
                if !self.bitmap.bit(offset) {
                    self.bitmap.set(offset);
                    changed = true;
                }
            }
        }
        if changed {
            self.revision += 1;
        }
    }

    /// Recompute the blackout mask from scratch given the *current* set of blackouts for this
    /// block's network, without disturbing bits held by live allocations (passed in as offsets
    /// already reserved outside of blackout bookkeeping). Bumps `revision` if the resulting
    /// bitmap differs from the one this call started with.
    pub fn recompute_mask(&mut self, allocated_offsets: &[usize], blackouts: &[Cidr]) {
        let before = self.bitmap.clone();
        self.bitmap = Bitmap::new(self.cidr.size() as usize);
        for &i in allocated_offsets {
            self.bitmap.set(i);
        }
        for b in blackouts {
            let overlap_start = self.cidr.start().as_u32().max(b.start().as_u32());
            let overlap_end = self.cidr.end().as_u32().min(b.end().as_u32());
            if overlap_start > overlap_end {
                continue;
            }
            for addr in overlap_start..=overlap_end {
                if let Some(offset) = self.cidr.offset_of(crate::address::Address::new(addr)) {
                    self.bitmap.set(offset as usize);
                }
            }
        }
        if self.bitmap != before {
            self.revision += 1;
        }
    }

    pub fn is_fully_released(&self) -> bool {
        self.bitmap.is_all_clear()
    }

    /// Retag a fully-released block with a new `(tenant, segment)` pair (§4.4 step 3).
    pub fn retag(&mut self, tenant: impl Into<String>, segment: impl Into<String>) {
        debug_assert!(self.is_fully_released());
        self.tenant = tenant.into();
        self.segment = segment.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Cidr {
        s.parse().unwrap()
    }

    #[test]
    fn allocate_and_release_roundtrip() {
        let mut b = Block::new(cidr("10.0.0.0/30"), "t1", "s1");
        let i0 = b.allocate().unwrap();
        assert_eq!(i0, 0);
        assert_eq!(b.revision, 1);
        let i1 = b.allocate().unwrap();
        assert_eq!(i1, 1);
        b.release(i0).unwrap();
        assert_eq!(b.revision, 3);
        assert!(!b.is_fully_released());
        b.release(i1).unwrap();
        assert!(b.is_fully_released());
    }

    #[test]
    fn release_unallocated_bit_fails() {
        let mut b = Block::new(cidr("10.0.0.0/30"), "t1", "s1");
        assert!(b.release(0).is_err());
    }

    #[test]
    fn block_full_signals_no_available_ip() {
        let mut b = Block::new(cidr("10.0.0.0/31"), "t1", "s1");
        b.allocate().unwrap();
        b.allocate().unwrap();
        assert!(matches!(b.allocate(), Err(IpamError::NoAvailableIp { .. })));
    }

    #[test]
    fn mask_blackout_is_idempotent() {
        let mut b = Block::new(cidr("10.0.0.0/30"), "t1", "s1");
        let bo = cidr("10.0.0.0/31");
        b.mask_blackout(&bo);
        assert!(b.bitmap.bit(0));
        assert!(b.bitmap.bit(1));
        assert!(!b.bitmap.bit(2));
        assert_eq!(b.revision, 1);
        b.mask_blackout(&bo);
        assert!(b.bitmap.bit(0));
        assert!(b.bitmap.bit(1));
        assert_eq!(b.revision, 1, "a no-op remask must not bump revision again");
    }

    #[test]
    fn recompute_mask_bumps_revision_only_on_change() {
        let mut b = Block::new(cidr("10.0.0.0/31"), "t1", "s1");
        b.recompute_mask(&[], &[]);
        assert_eq!(b.revision, 0, "recomputing to the same all-clear state is a no-op");

        b.recompute_mask(&[], &[cidr("10.0.0.0/31")]);
        assert!(b.bitmap.bit(0));
        assert!(b.bitmap.bit(1));
        assert_eq!(b.revision, 1);

        b.recompute_mask(&[], &[]);
        assert!(!b.bitmap.bit(0));
        assert_eq!(b.revision, 2, "clearing the mask is itself a bit flip");
    }
}
