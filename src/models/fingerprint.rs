//! Perceptual fingerprints and the records that tie them to posts.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, Result};

use super::post::PostId;

/// Default maximum Hamming distance at which two fingerprints are the same
/// underlying content (5 of 64 bits).
pub const DEFAULT_THRESHOLD: u32 = 5;

/// A fixed-length perceptual fingerprint.
///
/// Stored and exchanged as a lower-case hex string, so a 64-bit fingerprint
/// is 16 hex characters.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    bytes: Vec<u8>,
}

impl Fingerprint {
    /// Wraps raw fingerprint bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Builds a 64-bit fingerprint, most significant bit first.
    pub fn from_u64(value: u64) -> Self {
        Self::from_bytes(value.to_be_bytes().to_vec())
    }

    /// Parses a hex string produced by [`Fingerprint::to_hex`].
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| AppError::InvalidInput(format!("invalid fingerprint {:?}: {}", s, e)))?;
        if bytes.is_empty() {
            return Err(AppError::InvalidInput("empty fingerprint".to_string()));
        }
        Ok(Self { bytes })
    }

    /// Hex encoding used for storage.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bits in the fingerprint.
    pub fn bits(&self) -> usize {
        self.bytes.len() * 8
    }

    /// Hamming distance: the number of bit positions that differ.
    ///
    /// Fails with [`AppError::DistanceMismatch`] when the fingerprints have
    /// different lengths; that only happens if hasher versions were mixed.
    pub fn distance(&self, other: &Fingerprint) -> Result<u32> {
        if self.bytes.len() != other.bytes.len() {
            return Err(AppError::DistanceMismatch {
                left: self.bits(),
                right: other.bits(),
            });
        }
        Ok(self
            .bytes
            .iter()
            .zip(other.bytes.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum())
    }

    /// Fraction of matching bits, 1.0 meaning identical.
    pub fn similarity(&self, other: &Fingerprint) -> Result<f64> {
        let distance = self.distance(other)?;
        Ok(1.0 - distance as f64 / self.bits() as f64)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A stored fingerprint belonging to one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// The owning post.
    pub post_id: PostId,
    /// Fingerprint of the post's current media.
    pub fingerprint: Fingerprint,
}

impl FingerprintRecord {
    /// Creates a record.
    pub fn new(post_id: PostId, fingerprint: Fingerprint) -> Self {
        Self {
            post_id,
            fingerprint,
        }
    }
}
