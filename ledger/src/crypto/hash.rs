//! # Hashing Utilities
//!
//! SHA-256 is the only content digest in the ledger. Transaction ids,
//! signing digests, receipt digests, Merkle nodes and block ids all go
//! through here, and all of them are consensus-critical: one byte of drift
//! and a node forks itself off the network.
//!
//! [`Digest`] is the 32-byte output type. It renders as lowercase hex in
//! logs and JSON and as raw bytes in binary encodings.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

use crate::chain::codec::Pack;

/// Compute the SHA-256 hash of the input data.
///
/// # Example
///
/// ```
/// use eos_ledger::crypto::sha256;
///
/// let hash = sha256(b"eosio");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash multiple byte slices as if they were concatenated.
pub fn sha256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Digest(pub [u8; 32]);

/// Errors parsing a digest from its hex form.
#[derive(Debug, thiserror::Error)]
pub enum DigestParseError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("digest must be 32 bytes, got {0}")]
    Length(usize),
}

impl Digest {
    /// All-zero digest. Used as the "no previous block" marker.
    pub const ZERO: Digest = Digest([0u8; 32]);

    /// Hash raw bytes.
    pub fn hash(data: &[u8]) -> Self {
        Digest(sha256(data))
    }

    /// Hash a sequence of byte slices as one stream.
    pub fn hash_parts(parts: &[&[u8]]) -> Self {
        Digest(sha256_multi(parts))
    }

    /// Hash the canonical wire encoding of a value.
    pub fn of<T: Pack + ?Sized>(value: &T) -> Self {
        Self::hash(&value.packed())
    }

    /// SHA-256 of the zero-length input.
    ///
    /// This is the nil sentinel: the Merkle root of nothing, and the
    /// context-free-data digest of a transaction that carries none.
    pub fn empty_hash() -> Self {
        Self::hash(&[])
    }

    /// View the digest as bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, DigestParseError> {
        let bytes = hex::decode(s)?;
        let len = bytes.len();
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DigestParseError::Length(len))?;
        Ok(Digest(arr))
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Digest(bytes)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Digest::from_hex(&s).map_err(D::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Digest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        let hash = sha256(b"");
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash.as_slice(), expected.as_slice());
    }

    #[test]
    fn empty_hash_is_sha256_of_nothing() {
        assert_eq!(
            Digest::empty_hash().to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn multi_part_equals_concatenation() {
        let multi = sha256_multi(&[b"hello", b" world"]);
        assert_eq!(multi, sha256(b"hello world"));
    }

    #[test]
    fn hex_roundtrip() {
        let d = Digest::hash(b"block");
        let parsed: Digest = d.to_hex().parse().unwrap();
        assert_eq!(parsed, d);
    }

    #[test]
    fn rejects_short_hex() {
        assert!(matches!(
            Digest::from_hex("abcd"),
            Err(DigestParseError::Length(2))
        ));
    }

    #[test]
    fn json_uses_hex_and_bincode_uses_bytes() {
        let d = Digest::hash(b"x");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", d.to_hex()));
        assert_eq!(serde_json::from_str::<Digest>(&json).unwrap(), d);

        let bin = bincode::serialize(&d).unwrap();
        assert_eq!(bin.len(), 32);
        assert_eq!(bincode::deserialize::<Digest>(&bin).unwrap(), d);
    }
}
