//! # Block Structure
//!
//! The header a producer signs and the receipts it commits to.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  BlockHeader                                 │
//! │  ├── timestamp: BlockTimestamp (slot)        │
//! │  ├── producer: Name                          │
//! │  ├── confirmed: u16                          │
//! │  ├── previous: Digest        (parent id)     │
//! │  ├── transaction_mroot: Digest               │
//! │  ├── action_mroot: Digest                    │
//! │  ├── schedule_version: u32                   │
//! │  ├── new_producers: Option<ProducerSchedule> │
//! │  └── header_extensions: Vec<(u16, bytes)>    │
//! ├──────────────────────────────────────────────┤
//! │  transactions: Vec<TransactionReceipt>       │
//! │  action_receipts: Vec<ActionReceipt>         │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Block id
//!
//! The id is the header digest with its first four bytes overwritten by the
//! big-endian block number, so the number of any block can be read straight
//! off its id. A header's own number is one more than its parent's.

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::chain::{BlockTimestamp, CodecError, Name, Pack, Unpack};
use crate::crypto::hash::Digest;
use crate::crypto::keys::PublicKey;
use crate::crypto::merkle::merkle;
use crate::transaction::{ActionReceipt, TransactionReceipt};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerKey {
    pub producer_name: Name,
    pub block_signing_key: PublicKey,
}

impl Pack for ProducerKey {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.producer_name.pack(out);
        self.block_signing_key.pack(out);
    }
}

impl Unpack for ProducerKey {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            producer_name: Name::unpack(buf)?,
            block_signing_key: PublicKey::unpack(buf)?,
        })
    }
}

/// Ordered set of producers allowed to sign blocks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerSchedule {
    pub version: u32,
    pub producers: Vec<ProducerKey>,
}

impl Pack for ProducerSchedule {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.version.pack(out);
        self.producers.pack(out);
    }
}

impl Unpack for ProducerSchedule {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            version: u32::unpack(buf)?,
            producers: Vec::unpack(buf)?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub timestamp: BlockTimestamp,
    pub producer: Name,
    /// Number of prior blocks this producer confirms.
    pub confirmed: u16,
    /// Id of the parent block.
    pub previous: Digest,
    pub transaction_mroot: Digest,
    pub action_mroot: Digest,
    pub schedule_version: u32,
    pub new_producers: Option<ProducerSchedule>,
    pub header_extensions: Vec<(u16, Vec<u8>)>,
}

impl BlockHeader {
    /// SHA-256 of the packed header.
    pub fn digest(&self) -> Digest {
        Digest::of(self)
    }

    pub fn block_num(&self) -> u32 {
        num_from_id(&self.previous).wrapping_add(1)
    }

    pub fn calculate_id(&self) -> Digest {
        let mut id = self.digest();
        id.0[..4].copy_from_slice(&self.block_num().to_be_bytes());
        id
    }
}

/// The block number encoded in the first four bytes of a block id.
pub fn num_from_id(id: &Digest) -> u32 {
    u32::from_be_bytes([id.0[0], id.0[1], id.0[2], id.0[3]])
}

impl Pack for BlockHeader {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.timestamp.pack(out);
        self.producer.pack(out);
        self.confirmed.pack(out);
        self.previous.pack(out);
        self.transaction_mroot.pack(out);
        self.action_mroot.pack(out);
        self.schedule_version.pack(out);
        self.new_producers.pack(out);
        self.header_extensions.pack(out);
    }
}

impl Unpack for BlockHeader {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            timestamp: BlockTimestamp::unpack(buf)?,
            producer: Name::unpack(buf)?,
            confirmed: u16::unpack(buf)?,
            previous: Digest::unpack(buf)?,
            transaction_mroot: Digest::unpack(buf)?,
            action_mroot: Digest::unpack(buf)?,
            schedule_version: u32::unpack(buf)?,
            new_producers: Option::unpack(buf)?,
            header_extensions: Vec::unpack(buf)?,
        })
    }
}

/// A finalized block: header, id and everything its roots commit to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub id: Digest,
    pub transactions: Vec<TransactionReceipt>,
    pub action_receipts: Vec<ActionReceipt>,
}

impl Block {
    /// Fill in both Merkle roots of `header` and derive the id.
    pub fn new(
        mut header: BlockHeader,
        transactions: Vec<TransactionReceipt>,
        action_receipts: Vec<ActionReceipt>,
    ) -> Self {
        header.transaction_mroot = transaction_mroot(&transactions);
        header.action_mroot = action_mroot(&action_receipts);
        let id = header.calculate_id();
        Self {
            header,
            id,
            transactions,
            action_receipts,
        }
    }

    pub fn block_num(&self) -> u32 {
        self.header.block_num()
    }

    /// Whether the header's roots and id match the carried receipts.
    pub fn verify(&self) -> bool {
        self.header.transaction_mroot == transaction_mroot(&self.transactions)
            && self.header.action_mroot == action_mroot(&self.action_receipts)
            && self.id == self.header.calculate_id()
    }
}

pub fn transaction_mroot(receipts: &[TransactionReceipt]) -> Digest {
    let leaves: Vec<Digest> = receipts.iter().map(TransactionReceipt::digest).collect();
    merkle(&leaves)
}

pub fn action_mroot(receipts: &[ActionReceipt]) -> Digest {
    let leaves: Vec<Digest> = receipts.iter().map(ActionReceipt::digest).collect();
    merkle(&leaves)
}
