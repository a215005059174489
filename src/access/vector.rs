//! Fixed-width access bit vectors
//!
//! Bit `n` stands for the privileged entity holding `acvec_offset = n`.
//! Offset 0 means "public" and never owns a bit. The top bit is reserved as
//! the sentinel stamped on objects that reference no privileged entity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Vector width in bits
pub const WIDTH: usize = 2048;

const WORDS: usize = WIDTH / 64;

/// Reserved bit set on objects without privileged references
pub const SENTINEL_BIT: u32 = (WIDTH - 1) as u32;

/// Highest offset that may be handed to an entity
pub const MAX_OFFSET: u32 = SENTINEL_BIT - 1;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct AccessVector {
    words: [u64; WORDS],
}

impl AccessVector {
    /// No bits set: visible to everyone
    pub const fn empty() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Only the reserved sentinel bit
    pub fn sentinel() -> Self {
        let mut v = Self::empty();
        v.set(SENTINEL_BIT);
        v
    }

    /// Vector holding the bit of a single entity offset.
    ///
    /// `None` for offset 0 (public) and for offsets outside `1..=MAX_OFFSET`.
    pub fn single_bit(offset: u32) -> Option<Self> {
        if offset == 0 || offset > MAX_OFFSET {
            return None;
        }
        let mut v = Self::empty();
        v.set(offset);
        Some(v)
    }

    /// OR of the single-bit vectors of `offsets`; public offsets contribute nothing
    pub fn from_offsets(offsets: impl IntoIterator<Item = u32>) -> Self {
        offsets
            .into_iter()
            .filter_map(Self::single_bit)
            .fold(Self::empty(), |acc, v| acc | v)
    }

    /// Note vector: OR of privileged offsets, or the sentinel when there are none
    pub fn composite(offsets: impl IntoIterator<Item = u32>) -> Self {
        let v = Self::from_offsets(offsets);
        if v.is_empty() {
            Self::sentinel()
        } else {
            v
        }
    }

    /// Everything a privileged principal may hold, sentinel included
    pub fn full() -> Self {
        Self {
            words: [u64::MAX; WORDS],
        }
    }

    pub fn set(&mut self, bit: u32) {
        let bit = bit as usize;
        if bit < WIDTH {
            self.words[bit / 64] |= 1u64 << (bit % 64);
        }
    }

    pub fn contains(&self, bit: u32) -> bool {
        let bit = bit as usize;
        bit < WIDTH && self.words[bit / 64] & (1u64 << (bit % 64)) != 0
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut words = self.words;
        for (w, o) in words.iter_mut().zip(other.words.iter()) {
            *w |= o;
        }
        Self { words }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// `(self & !privileges) == 0`: every bit this object requires is held
    pub fn covered_by(&self, privileges: &Self) -> bool {
        self.words
            .iter()
            .zip(privileges.words.iter())
            .all(|(v, p)| v & !p == 0)
    }

    /// Set bit indices, ascending
    pub fn bits(&self) -> Vec<u32> {
        let mut out = Vec::new();
        for (i, word) in self.words.iter().enumerate() {
            let mut w = *word;
            while w != 0 {
                let tz = w.trailing_zeros();
                out.push((i * 64) as u32 + tz);
                w &= w - 1;
            }
        }
        out
    }

    /// Lowercase hex, little-endian bit order (bit 0 is the low bit of byte 0)
    pub fn to_hex(&self) -> String {
        let bytes: Vec<u8> = self.words.iter().flat_map(|w| w.to_le_bytes()).collect();
        hex::encode(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s.trim()).map_err(|e| format!("Invalid access vector: {}", e))?;
        if bytes.len() != WIDTH / 8 {
            return Err(format!(
                "Invalid access vector length: expected {} bytes, got {}",
                WIDTH / 8,
                bytes.len()
            ));
        }
        let mut words = [0u64; WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            *word = u64::from_le_bytes(buf);
        }
        Ok(Self { words })
    }
}

impl Default for AccessVector {
    fn default() -> Self {
        Self::empty()
    }
}

impl BitOr for AccessVector {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(&rhs)
    }
}

impl BitOrAssign for AccessVector {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(&rhs);
    }
}

impl fmt::Debug for AccessVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AccessVector").field(&self.bits()).finish()
    }
}

impl From<AccessVector> for String {
    fn from(v: AccessVector) -> Self {
        v.to_hex()
    }
}

impl TryFrom<String> for AccessVector {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}
