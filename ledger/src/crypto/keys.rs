//! # Keys & Signatures
//!
//! secp256k1 keys in the `K1` flavour the EOS wire format uses. Only the
//! digest is ever signed; callers compute it (see
//! `transaction::signing`) and pass it in prehashed.
//!
//! Wire layout:
//!
//! | Type        | Encoding                                          |
//! |-------------|---------------------------------------------------|
//! | `PublicKey` | varuint tag `0`, 33-byte compressed SEC1 point    |
//! | `Signature` | varuint tag `0`, `27 + 4 + recid`, `r` (32), `s` (32) |
//!
//! Private key bytes are never logged and never serialized implicitly.

use std::fmt;

use bytes::BufMut;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::hash::{sha256, Digest};
use crate::chain::codec::{CodecError, Pack, Unpack, VarUint32};

/// Variant tag of the secp256k1 key type on the wire.
const K1_KEY_TYPE: u32 = 0;

/// Header byte offset for compressed-key recoverable signatures.
const COMPACT_HEADER_BASE: u8 = 27 + 4;

/// Errors that can occur during key operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("invalid private key bytes")]
    InvalidPrivateKey,

    #[error("invalid public key bytes")]
    InvalidPublicKey,

    #[error("malformed signature")]
    InvalidSignature,

    #[error("signing failed")]
    SigningFailed,

    #[error("public key recovery failed")]
    RecoveryFailed,
}

// ---------------------------------------------------------------------------
// PrivateKey
// ---------------------------------------------------------------------------

/// A secp256k1 signing key.
///
/// Intentionally not `Serialize`. Use [`PrivateKey::to_bytes`] when key
/// material has to leave the process.
#[derive(Clone)]
pub struct PrivateKey {
    signing_key: SigningKey,
}

impl PrivateKey {
    /// Fresh key from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Key from a 32-byte big-endian scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let signing_key = SigningKey::from_slice(bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Deterministic key derived from a seed phrase. Handy for test
    /// fixtures and local bootstrap; never use it for real funds.
    pub fn from_seed(seed: &[u8]) -> Result<Self, KeyError> {
        Self::from_bytes(&sha256(seed))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_verifying_key(self.signing_key.verifying_key())
    }

    /// Sign a 32-byte digest, producing a recoverable signature.
    pub fn sign(&self, digest: &Digest) -> Result<Signature, KeyError> {
        let (sig, recid) = self
            .signing_key
            .sign_prehash_recoverable(digest.as_bytes())
            .map_err(|_| KeyError::SigningFailed)?;

        let mut out = [0u8; 65];
        out[0] = COMPACT_HEADER_BASE + recid.to_byte();
        out[1..].copy_from_slice(&sig.to_bytes());
        Ok(Signature(out))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", self.public_key())
    }
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// A compressed secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; 33]);

impl PublicKey {
    fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        PublicKey(out)
    }

    /// Parse a 33-byte compressed SEC1 point, validating it is on the curve.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let key = VerifyingKey::from_sec1_bytes(bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self::from_verifying_key(&key))
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PUB_K1_{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl Pack for PublicKey {
    fn pack<B: BufMut>(&self, out: &mut B) {
        VarUint32(K1_KEY_TYPE).pack(out);
        out.put_slice(&self.0);
    }
}

impl Unpack for PublicKey {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let tag = VarUint32::unpack(buf)?.0;
        if tag != K1_KEY_TYPE {
            return Err(CodecError::InvalidTag {
                what: "public key type",
                tag: u64::from(tag),
            });
        }
        <[u8; 33]>::unpack(buf).map(PublicKey)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            PublicKey::from_hex(s.trim_start_matches("PUB_K1_")).map_err(D::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            let arr: [u8; 33] = bytes
                .try_into()
                .map_err(|_| D::Error::custom("public key must be 33 bytes"))?;
            Ok(PublicKey(arr))
        }
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// A 65-byte recoverable signature: header byte, then `r` and `s`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 65]);

impl Signature {
    /// Recover the public key that produced this signature over `digest`.
    pub fn recover(&self, digest: &Digest) -> Result<PublicKey, KeyError> {
        let recid_byte = self.0[0]
            .checked_sub(COMPACT_HEADER_BASE)
            .ok_or(KeyError::InvalidSignature)?;
        let recid = RecoveryId::from_byte(recid_byte).ok_or(KeyError::InvalidSignature)?;
        let sig = EcdsaSignature::from_slice(&self.0[1..]).map_err(|_| KeyError::InvalidSignature)?;

        let key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &sig, recid)
            .map_err(|_| KeyError::RecoveryFailed)?;
        Ok(PublicKey::from_verifying_key(&key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIG_K1_{}", self.to_hex())
    }
}

impl Pack for Signature {
    fn pack<B: BufMut>(&self, out: &mut B) {
        VarUint32(K1_KEY_TYPE).pack(out);
        out.put_slice(&self.0);
    }
}

impl Unpack for Signature {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let tag = VarUint32::unpack(buf)?.0;
        if tag != K1_KEY_TYPE {
            return Err(CodecError::InvalidTag {
                what: "signature type",
                tag: u64::from(tag),
            });
        }
        <[u8; 65]>::unpack(buf).map(Signature)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(s.trim_start_matches("SIG_K1_")).map_err(D::Error::custom)?
        } else {
            <Vec<u8>>::deserialize(deserializer)?
        };
        let arr: [u8; 65] = bytes
            .try_into()
            .map_err(|_| D::Error::custom("signature must be 65 bytes"))?;
        Ok(Signature(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_recover() {
        let key = PrivateKey::generate();
        let digest = Digest::hash(b"transfer 1.0000 EOS");
        let sig = key.sign(&digest).unwrap();
        assert_eq!(sig.recover(&digest).unwrap(), key.public_key());
    }

    #[test]
    fn header_byte_encodes_compressed_recid() {
        let key = PrivateKey::from_seed(b"alice").unwrap();
        let sig = key.sign(&Digest::hash(b"x")).unwrap();
        assert!((31..=34).contains(&sig.0[0]));
    }

    #[test]
    fn different_digest_recovers_different_key() {
        let key = PrivateKey::generate();
        let sig = key.sign(&Digest::hash(b"one")).unwrap();
        let recovered = sig.recover(&Digest::hash(b"two"));
        assert_ne!(recovered.ok(), Some(key.public_key()));
    }

    #[test]
    fn garbage_header_is_rejected() {
        let mut sig = Signature([0u8; 65]);
        sig.0[0] = 3;
        assert_eq!(
            sig.recover(&Digest::ZERO),
            Err(KeyError::InvalidSignature)
        );
    }

    #[test]
    fn seeded_keys_are_stable() {
        let a = PrivateKey::from_seed(b"bob").unwrap();
        let b = PrivateKey::from_seed(b"bob").unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn public_key_wire_layout() {
        let pk = PrivateKey::from_seed(b"carol").unwrap().public_key();
        let packed = pk.packed();
        assert_eq!(packed.len(), 34);
        assert_eq!(packed[0], 0);
        assert_eq!(PublicKey::unpack_exact(&packed).unwrap(), pk);
    }

    #[test]
    fn signature_wire_layout() {
        let key = PrivateKey::from_seed(b"carol").unwrap();
        let sig = key.sign(&Digest::ZERO).unwrap();
        let packed = sig.packed();
        assert_eq!(packed.len(), 66);
        assert_eq!(Signature::unpack_exact(&packed).unwrap(), sig);
    }

    #[test]
    fn unknown_key_type_is_rejected() {
        let mut packed = PrivateKey::generate().public_key().packed();
        packed[0] = 1;
        assert!(matches!(
            PublicKey::unpack_exact(&packed),
            Err(CodecError::InvalidTag { .. })
        ));
    }

    #[test]
    fn public_key_json_is_hex() {
        let pk = PrivateKey::from_seed(b"dave").unwrap().public_key();
        let json = serde_json::to_string(&pk).unwrap();
        assert_eq!(json, format!("\"{}\"", pk.to_hex()));
        assert_eq!(serde_json::from_str::<PublicKey>(&json).unwrap(), pk);
    }
}
