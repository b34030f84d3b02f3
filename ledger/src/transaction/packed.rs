//! Packed transactions: the signed, optionally compressed wire form.
//!
//! The transaction body and its context-free data are carried as separate
//! byte strings so the prunable part (signatures and context-free data) can
//! be dropped without changing the transaction id.

use std::fmt;
use std::io::{Read, Write};
use std::sync::OnceLock;

use bytes::BufMut;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{SignedTransaction, Transaction};
use crate::chain::{CodecError, Pack, Unpack};
use crate::config::{FIXED_NET_OVERHEAD_OF_PACKED_TRX, MAX_DECOMPRESSED_BYTES};
use crate::crypto::hash::{sha256_multi, Digest};
use crate::crypto::keys::Signature;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("unknown compression tag {0}")]
    UnknownCompression(u8),

    #[error("zlib: {0}")]
    Zlib(#[from] std::io::Error),

    #[error("decompressed payload exceeds {limit} bytes")]
    DecompressedTooLarge { limit: usize },

    #[error("malformed packed transaction: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Compression {
    #[default]
    None = 0,
    Zlib = 1,
}

impl Compression {
    fn compress(self, raw: Vec<u8>) -> Result<Vec<u8>, PackError> {
        match self {
            Compression::None => Ok(raw),
            Compression::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&raw)?;
                Ok(encoder.finish()?)
            }
        }
    }

    fn decompress(self, bytes: &[u8]) -> Result<Vec<u8>, PackError> {
        match self {
            Compression::None => Ok(bytes.to_vec()),
            Compression::Zlib => {
                let mut out = Vec::new();
                ZlibDecoder::new(bytes)
                    .take(MAX_DECOMPRESSED_BYTES as u64 + 1)
                    .read_to_end(&mut out)?;
                if out.len() > MAX_DECOMPRESSED_BYTES {
                    return Err(PackError::DecompressedTooLarge {
                        limit: MAX_DECOMPRESSED_BYTES,
                    });
                }
                Ok(out)
            }
        }
    }
}

impl TryFrom<u8> for Compression {
    type Error = PackError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Zlib),
            other => Err(PackError::UnknownCompression(other)),
        }
    }
}

/// A signed transaction as circulated and stored.
///
/// The decoded [`Transaction`] is materialised on first use and cached.
#[derive(Clone, Serialize, Deserialize)]
pub struct PackedTransaction {
    signatures: Vec<Signature>,
    compression: Compression,
    #[serde(with = "hex::serde")]
    packed_context_free_data: Vec<u8>,
    #[serde(with = "hex::serde")]
    packed_trx: Vec<u8>,
    #[serde(skip)]
    unpacked: OnceLock<Transaction>,
}

impl PackedTransaction {
    /// Pack `signed` with the given compression. Empty context-free data
    /// packs to an empty byte string.
    pub fn new(signed: &SignedTransaction, compression: Compression) -> Result<Self, PackError> {
        let packed_trx = compression.compress(signed.transaction.packed())?;
        let packed_context_free_data = if signed.context_free_data.is_empty() {
            Vec::new()
        } else {
            compression.compress(signed.context_free_data.packed())?
        };
        let unpacked = OnceLock::new();
        let _ = unpacked.set(signed.transaction.clone());
        Ok(Self {
            signatures: signed.signatures.clone(),
            compression,
            packed_context_free_data,
            packed_trx,
            unpacked,
        })
    }

    /// Assemble from wire parts. Nothing is decoded until asked for.
    pub fn from_parts(
        signatures: Vec<Signature>,
        compression: Compression,
        packed_context_free_data: Vec<u8>,
        packed_trx: Vec<u8>,
    ) -> Self {
        Self {
            signatures,
            compression,
            packed_context_free_data,
            packed_trx,
            unpacked: OnceLock::new(),
        }
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn packed_trx(&self) -> &[u8] {
        &self.packed_trx
    }

    pub fn packed_context_free_data(&self) -> &[u8] {
        &self.packed_context_free_data
    }

    /// Whether the transaction body has been decoded already.
    pub fn is_unpacked(&self) -> bool {
        self.unpacked.get().is_some()
    }

    /// The decoded transaction, decoding it on first call.
    pub fn transaction(&self) -> Result<&Transaction, PackError> {
        if let Some(trx) = self.unpacked.get() {
            return Ok(trx);
        }
        let raw = self.compression.decompress(&self.packed_trx)?;
        let trx = Transaction::unpack_exact(&raw)?;
        Ok(self.unpacked.get_or_init(|| trx))
    }

    pub fn context_free_data(&self) -> Result<Vec<Vec<u8>>, PackError> {
        if self.packed_context_free_data.is_empty() {
            return Ok(Vec::new());
        }
        let raw = self.compression.decompress(&self.packed_context_free_data)?;
        Ok(Vec::unpack_exact(&raw)?)
    }

    pub fn signed_transaction(&self) -> Result<SignedTransaction, PackError> {
        Ok(SignedTransaction {
            transaction: self.transaction()?.clone(),
            signatures: self.signatures.clone(),
            context_free_data: self.context_free_data()?,
        })
    }

    pub fn id(&self) -> Result<Digest, PackError> {
        Ok(self.transaction()?.id())
    }

    /// `sha256(compression ‖ packed_trx ‖ sha256(signatures ‖ packed cfd))`.
    ///
    /// Commits to the prunable data through its own digest so receipts stay
    /// verifiable after pruning.
    pub fn packed_digest(&self) -> Digest {
        let mut prunable = Vec::new();
        self.signatures.pack(&mut prunable);
        self.packed_context_free_data.pack(&mut prunable);
        let prunable_digest = Digest::hash(&prunable);

        let mut core = Vec::with_capacity(self.packed_trx.len() + 6);
        (self.compression as u8).pack(&mut core);
        self.packed_trx.pack(&mut core);
        Digest(sha256_multi(&[&core[..], &prunable_digest.as_bytes()[..]]))
    }

    /// Bytes billed regardless of pruning.
    pub fn unprunable_size(&self) -> u64 {
        FIXED_NET_OVERHEAD_OF_PACKED_TRX + self.packed_trx.len() as u64
    }

    /// Bytes of signatures and context-free data.
    pub fn prunable_size(&self) -> u64 {
        (self.signatures.packed_size() + self.packed_context_free_data.len()) as u64
    }
}

impl PartialEq for PackedTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.signatures == other.signatures
            && self.compression == other.compression
            && self.packed_context_free_data == other.packed_context_free_data
            && self.packed_trx == other.packed_trx
    }
}

impl Eq for PackedTransaction {}

impl fmt::Debug for PackedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackedTransaction")
            .field("signatures", &self.signatures.len())
            .field("compression", &self.compression)
            .field("packed_trx", &self.packed_trx.len())
            .field("packed_context_free_data", &self.packed_context_free_data.len())
            .field("unpacked", &self.is_unpacked())
            .finish()
    }
}

impl Pack for PackedTransaction {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.signatures.pack(out);
        (self.compression as u8).pack(out);
        self.packed_context_free_data.pack(out);
        self.packed_trx.pack(out);
    }
}

impl Unpack for PackedTransaction {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let signatures = Vec::unpack(buf)?;
        let tag = u8::unpack(buf)?;
        let compression = Compression::try_from(tag).map_err(|_| CodecError::InvalidTag {
            what: "compression",
            tag: u64::from(tag),
        })?;
        Ok(Self::from_parts(
            signatures,
            compression,
            Vec::unpack(buf)?,
            Vec::unpack(buf)?,
        ))
    }
}
