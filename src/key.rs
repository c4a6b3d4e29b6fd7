//! 160-bit identifiers and the XOR distance metric.
//!
//! Node ids and content infohashes share a single 160-bit key space. Routing
//! decisions compare keys by their XOR distance to a lookup target,
//! interpreted as an unsigned big-endian integer.

use std::cmp::Ordering;
use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Width of a key in bytes.
pub const KEY_BYTES: usize = 20;

/// A 160-bit identifier for nodes and infohashes.
///
/// Equality is bitwise. The derived `Ord` compares keys as unsigned
/// big-endian integers, which doubles as the comparison between XOR
/// distances produced by [`Key::distance`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key([u8; KEY_BYTES]);

impl Key {
    /// The all-zero key.
    pub const MIN: Key = Key([0u8; KEY_BYTES]);

    /// The all-ones key, farther from any target than every other key.
    pub const MAX: Key = Key([0xff; KEY_BYTES]);

    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        Key(bytes)
    }

    /// Parse a key from its 40-character hex representation.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != KEY_BYTES * 2 {
            bail!("expected {} hex characters, got {}", KEY_BYTES * 2, s.len());
        }
        let raw = hex::decode(s)?;
        let mut bytes = [0u8; KEY_BYTES];
        bytes.copy_from_slice(&raw);
        Ok(Key(bytes))
    }

    /// Generate a uniformly random key.
    pub fn random() -> Self {
        Key(rand::random())
    }

    /// XOR distance to another key.
    pub fn distance(&self, other: &Key) -> Key {
        let mut out = self.0;
        for (byte, other_byte) in out.iter_mut().zip(other.0.iter()) {
            *byte ^= other_byte;
        }
        Key(out)
    }

    /// Order two keys by their distance to `self`.
    ///
    /// All ordered candidate containers in a lookup use this comparison with
    /// the lookup target as `self`.
    pub fn cmp_by_distance(&self, a: &Key, b: &Key) -> Ordering {
        self.distance(a).cmp(&self.distance(b))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
