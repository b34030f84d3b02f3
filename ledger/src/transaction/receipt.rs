//! Transaction and action receipts.
//!
//! Receipts are what blocks commit to. Their digests are the Merkle leaves
//! of `transaction_mroot` and `action_mroot`, so every field below is part
//! of consensus.

use std::collections::BTreeMap;

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use super::packed::PackedTransaction;
use crate::chain::{CodecError, Name, Pack, Unpack, VarUint32};
use crate::crypto::hash::{sha256_multi, Digest};

/// Outcome of a transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TransactionStatus {
    /// Succeeded, no error handler executed.
    #[default]
    Executed = 0,
    /// Objectively failed, error handler executed.
    SoftFail = 1,
    /// Objectively failed and error handler failed.
    HardFail = 2,
    /// Scheduled for later execution.
    Delayed = 3,
    /// Expired and storage refunded to the payer.
    Expired = 4,
}

impl TryFrom<u8> for TransactionStatus {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => Self::Executed,
            1 => Self::SoftFail,
            2 => Self::HardFail,
            3 => Self::Delayed,
            4 => Self::Expired,
            other => {
                return Err(CodecError::InvalidTag {
                    what: "transaction status",
                    tag: u64::from(other),
                })
            }
        })
    }
}

impl Pack for TransactionStatus {
    fn pack<B: BufMut>(&self, out: &mut B) {
        (*self as u8).pack(out);
    }
}

impl Unpack for TransactionStatus {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Self::try_from(u8::unpack(buf)?)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceiptHeader {
    pub status: TransactionStatus,
    pub cpu_usage_us: u32,
    pub net_usage_words: VarUint32,
}

impl Pack for TransactionReceiptHeader {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.status.pack(out);
        self.cpu_usage_us.pack(out);
        self.net_usage_words.pack(out);
    }
}

impl Unpack for TransactionReceiptHeader {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            status: TransactionStatus::unpack(buf)?,
            cpu_usage_us: u32::unpack(buf)?,
            net_usage_words: VarUint32::unpack(buf)?,
        })
    }
}

/// What a receipt carries: the id of a deferred transaction, or the full
/// packed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptTrx {
    Id(Digest),
    Packed(PackedTransaction),
}

impl Pack for ReceiptTrx {
    fn pack<B: BufMut>(&self, out: &mut B) {
        match self {
            ReceiptTrx::Id(id) => {
                VarUint32(0).pack(out);
                id.pack(out);
            }
            ReceiptTrx::Packed(trx) => {
                VarUint32(1).pack(out);
                trx.pack(out);
            }
        }
    }
}

impl Unpack for ReceiptTrx {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        match VarUint32::unpack(buf)?.0 {
            0 => Digest::unpack(buf).map(ReceiptTrx::Id),
            1 => PackedTransaction::unpack(buf).map(ReceiptTrx::Packed),
            tag => Err(CodecError::InvalidTag {
                what: "receipt transaction",
                tag: u64::from(tag),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    #[serde(flatten)]
    pub header: TransactionReceiptHeader,
    pub trx: ReceiptTrx,
}

impl TransactionReceipt {
    /// `sha256(status ‖ cpu_usage_us ‖ net_usage_words ‖ id-or-packed-digest)`.
    pub fn digest(&self) -> Digest {
        let mut head = Vec::with_capacity(10);
        self.header.pack(&mut head);
        let tail = match &self.trx {
            ReceiptTrx::Id(id) => *id,
            ReceiptTrx::Packed(packed) => packed.packed_digest(),
        };
        Digest(sha256_multi(&[&head[..], &tail.as_bytes()[..]]))
    }
}

impl Pack for TransactionReceipt {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.header.pack(out);
        self.trx.pack(out);
    }
}

impl Unpack for TransactionReceipt {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            header: TransactionReceiptHeader::unpack(buf)?,
            trx: ReceiptTrx::unpack(buf)?,
        })
    }
}

/// Record of one executed action.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub receiver: Name,
    pub act_digest: Digest,
    /// Chain-wide action counter.
    pub global_sequence: u64,
    /// Actions received by `receiver` so far.
    pub recv_sequence: u64,
    /// Per authorizer, actions authorized by it so far.
    pub auth_sequence: BTreeMap<Name, u64>,
    pub code_sequence: VarUint32,
    pub abi_sequence: VarUint32,
}

impl ActionReceipt {
    pub fn digest(&self) -> Digest {
        Digest::of(self)
    }
}

impl Pack for ActionReceipt {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.receiver.pack(out);
        self.act_digest.pack(out);
        self.global_sequence.pack(out);
        self.recv_sequence.pack(out);
        self.auth_sequence.pack(out);
        self.code_sequence.pack(out);
        self.abi_sequence.pack(out);
    }
}

impl Unpack for ActionReceipt {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            receiver: Name::unpack(buf)?,
            act_digest: Digest::unpack(buf)?,
            global_sequence: u64::unpack(buf)?,
            recv_sequence: u64::unpack(buf)?,
            auth_sequence: BTreeMap::unpack(buf)?,
            code_sequence: VarUint32::unpack(buf)?,
            abi_sequence: VarUint32::unpack(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::merkle::merkle;

    fn receipt(cpu: u32, net: u32, id: Digest) -> TransactionReceipt {
        TransactionReceipt {
            header: TransactionReceiptHeader {
                status: TransactionStatus::Executed,
                cpu_usage_us: cpu,
                net_usage_words: VarUint32(net),
            },
            trx: ReceiptTrx::Id(id),
        }
    }

    #[test]
    fn header_bytes() {
        let header = receipt(268, 16, Digest::ZERO).header;
        assert_eq!(header.packed(), vec![0, 0x0c, 0x01, 0, 0, 16]);
    }

    #[test]
    fn receipt_digest_vector() {
        // sha256(00 0c010000 10 ‖ 32 zero bytes)
        let digest = receipt(268, 16, Digest::ZERO).digest();
        assert_eq!(
            digest.to_hex(),
            "c43a076c313db54d6fa97967522a566b57f84bcb75dc97494bf4bcd9ec560fee"
        );
    }

    #[test]
    fn receipt_digests_feed_the_merkle_root() {
        let a = receipt(268, 16, Digest::hash(b"a")).digest();
        let b = receipt(213, 15, Digest::hash(b"b")).digest();
        assert_ne!(merkle(&[a, b]), merkle(&[b, a]));
    }

    #[test]
    fn status_tags() {
        assert_eq!(TransactionStatus::try_from(4).unwrap(), TransactionStatus::Expired);
        assert!(TransactionStatus::try_from(5).is_err());
    }

    #[test]
    fn receipt_round_trip() {
        let r = receipt(1, 2, Digest::hash(b"x"));
        assert_eq!(TransactionReceipt::unpack_exact(&r.packed()).unwrap(), r);
    }

    #[test]
    fn action_receipt_layout() {
        let mut auth = BTreeMap::new();
        auth.insert(Name::new("bob"), 2);
        auth.insert(Name::new("alice"), 1);
        let receipt = ActionReceipt {
            receiver: Name::new("eosio"),
            act_digest: Digest::ZERO,
            global_sequence: 1,
            recv_sequence: 2,
            auth_sequence: auth,
            code_sequence: VarUint32(0),
            abi_sequence: VarUint32(0),
        };
        let bytes = receipt.packed();
        // name + digest + 2 * u64 + (count + 2 * (name + u64)) + 2 varuints
        assert_eq!(bytes.len(), 8 + 32 + 16 + 1 + 32 + 2);
        // alice sorts before bob
        assert_eq!(&bytes[57..65], &Name::new("alice").value().to_le_bytes());
        assert_eq!(ActionReceipt::unpack_exact(&bytes).unwrap(), receipt);
        assert_eq!(receipt.digest(), Digest::hash(&bytes));
    }
}
