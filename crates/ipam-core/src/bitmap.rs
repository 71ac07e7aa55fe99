use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A fixed-length bitset backing one [`crate::block::Block`].
///
/// Bit `i` set means address `i` within the block's CIDR is taken (either by a live
/// allocation or by a blackout mask). Packed into `u64` words; the logical length is
/// tracked separately so `all_set`/iteration never look past it.
///
/// Serializes as `{len, data}` with `data` being the words' little-endian bytes as base64, per
/// the persisted-snapshot format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    len: usize,
    words: Vec<u64>,
}

#[derive(Serialize, Deserialize)]
struct BitmapShadow {
    len: usize,
    data: String,
}

impl Serialize for Bitmap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let bytes: Vec<u8> = self.words.iter().flat_map(|w| w.to_le_bytes()).collect();
        BitmapShadow {
            len: self.len,
            data: BASE64.encode(bytes),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Bitmap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let shadow = BitmapShadow::deserialize(deserializer)?;
        let bytes = BASE64
            .decode(shadow.data.as_bytes())
            .map_err(serde::de::Error::custom)?;
        let words = bytes
            .chunks(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf[..chunk.len()].copy_from_slice(chunk);
                u64::from_le_bytes(buf)
            })
            .collect();
        Ok(Bitmap { len: shadow.len, words })
    }
}

const WORD_BITS: usize = u64::BITS as usize;

impl Bitmap {
    /// A bitmap of logical length `len`, all bits clear.
    pub fn new(len: usize) -> Self {
        let word_count = len.div_ceil(WORD_BITS);
        Self {
            len,
            words: vec![0u64; word_count],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bit(&self, i: usize) -> bool {
        assert!(i < self.len, "bit index {i} out of range (len {})", self.len);
        let (word, mask) = Self::locate(i);
        self.words[word] & mask != 0
    }

    pub fn set(&mut self, i: usize) {
        assert!(i < self.len, "bit index {i} out of range (len {})", self.len);
        let (word, mask) = Self::locate(i);
        self.words[word] |= mask;
    }

    pub fn clear(&mut self, i: usize) {
        assert!(i < self.len, "bit index {i} out of range (len {})", self.len);
        let (word, mask) = Self::locate(i);
        self.words[word] &= !mask;
    }

    /// Index of the lowest clear bit, or `None` if every bit is set.
    pub fn first_zero(&self) -> Option<usize> {
        for (word_idx, &word) in self.words.iter().enumerate() {
            if word == u64::MAX {
                continue;
            }
            let bit = (!word).trailing_zeros() as usize;
            let i = word_idx * WORD_BITS + bit;
            if i < self.len {
                return Some(i);
            }
        }
        None
    }

    pub fn popcount(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum::<usize>().min(self.len)
    }

    pub fn all_set(&self) -> bool {
        self.first_zero().is_none()
    }

    pub fn is_all_clear(&self) -> bool {
        self.popcount() == 0
    }

    fn locate(i: usize) -> (usize, u64) {
        (i / WORD_BITS, 1u64 << (i % WORD_BITS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let bm = Bitmap::new(10);
        assert_eq!(bm.popcount(), 0);
        assert!(!bm.all_set());
        assert_eq!(bm.first_zero(), Some(0));
    }

    #[test]
    fn set_and_clear_roundtrip() {
        let mut bm = Bitmap::new(4);
        bm.set(1);
        assert!(bm.bit(1));
        assert_eq!(bm.first_zero(), Some(0));
        bm.set(0);
        assert_eq!(bm.first_zero(), Some(2));
        bm.clear(0);
        assert_eq!(bm.first_zero(), Some(0));
    }

    #[test]
    fn all_set_across_word_boundary() {
        let mut bm = Bitmap::new(70);
        for i in 0..70 {
            bm.set(i);
        }
        assert!(bm.all_set());
        assert_eq!(bm.first_zero(), None);
        assert_eq!(bm.popcount(), 70);
    }

    #[test]
    fn first_zero_ignores_bits_past_len() {
        // len=3 means only one word is logically in play even though it backs 64 bits.
        let mut bm = Bitmap::new(3);
        bm.set(0);
        bm.set(1);
        bm.set(2);
        assert!(bm.all_set());
    }

    #[test]
    fn serde_roundtrip_as_base64() {
        let mut bm = Bitmap::new(70);
        bm.set(0);
        bm.set(69);
        let json = serde_json::to_string(&bm).unwrap();
        assert!(json.contains("\"data\""));
        let back: Bitmap = serde_json::from_str(&json).unwrap();
        assert_eq!(bm, back);
        assert!(back.bit(0));
        assert!(back.bit(69));
    }
}
