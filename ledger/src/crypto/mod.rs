//! # Cryptographic Primitives
//!
//! SHA-256 digests, the canonical Merkle tree, and secp256k1 keys.
//!
//! ```text
//! hash.rs: sha256 helpers and the 32-byte Digest type
//! merkle.rs: canonical-pair Merkle root over ordered digests
//! keys.rs: K1 private/public keys and recoverable signatures
//! ```

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{sha256, sha256_multi, Digest, DigestParseError};
pub use keys::{KeyError, PrivateKey, PublicKey, Signature};
pub use merkle::{canonical_pair, make_canonical_left, make_canonical_right, merkle};
