//! Transaction, action and header types with their canonical encodings.

use bytes::BufMut;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::{CodecError, Name, Pack, TimePointSec, Unpack, VarUint32};
use crate::crypto::hash::{sha256_multi, Digest};
use crate::crypto::keys::{KeyError, PrivateKey, Signature};

/// `actor@permission`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub actor: Name,
    pub permission: Name,
}

impl PermissionLevel {
    pub const fn new(actor: Name, permission: Name) -> Self {
        Self { actor, permission }
    }
}

impl Pack for PermissionLevel {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.actor.pack(out);
        self.permission.pack(out);
    }
}

impl Unpack for PermissionLevel {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            actor: Name::unpack(buf)?,
            permission: Name::unpack(buf)?,
        })
    }
}

/// A call of `name` on contract `account`, with packed arguments in `data`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub account: Name,
    pub name: Name,
    pub authorization: Vec<PermissionLevel>,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

impl Action {
    pub fn new<T: Pack>(
        account: Name,
        name: Name,
        authorization: Vec<PermissionLevel>,
        payload: &T,
    ) -> Self {
        Self {
            account,
            name,
            authorization,
            data: payload.packed(),
        }
    }

    /// Decode `data` as `T`, rejecting trailing bytes.
    pub fn data_as<T: Unpack>(&self) -> Result<T, CodecError> {
        T::unpack_exact(&self.data)
    }

    /// SHA-256 of the packed action, as recorded in action receipts.
    pub fn digest(&self) -> Digest {
        Digest::of(self)
    }
}

impl Pack for Action {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.account.pack(out);
        self.name.pack(out);
        self.authorization.pack(out);
        self.data.pack(out);
    }
}

impl Unpack for Action {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            account: Name::unpack(buf)?,
            name: Name::unpack(buf)?,
            authorization: Vec::unpack(buf)?,
            data: Vec::unpack(buf)?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHeader {
    /// Last second the transaction may be included.
    pub expiration: TimePointSec,
    /// Low 16 bits of a recent block number.
    pub ref_block_num: u16,
    /// Bytes 8..12 of that block's id, little-endian.
    pub ref_block_prefix: u32,
    /// NET cap in 8-byte words; zero means no cap beyond the chain's.
    pub max_net_usage_words: VarUint32,
    /// CPU cap in milliseconds; zero means no cap beyond the chain's.
    pub max_cpu_usage_ms: u8,
    pub delay_sec: VarUint32,
}

impl Pack for TransactionHeader {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.expiration.pack(out);
        self.ref_block_num.pack(out);
        self.ref_block_prefix.pack(out);
        self.max_net_usage_words.pack(out);
        self.max_cpu_usage_ms.pack(out);
        self.delay_sec.pack(out);
    }
}

impl Unpack for TransactionHeader {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            expiration: TimePointSec::unpack(buf)?,
            ref_block_num: u16::unpack(buf)?,
            ref_block_prefix: u32::unpack(buf)?,
            max_net_usage_words: VarUint32::unpack(buf)?,
            max_cpu_usage_ms: u8::unpack(buf)?,
            delay_sec: VarUint32::unpack(buf)?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(flatten)]
    pub header: TransactionHeader,
    pub context_free_actions: Vec<Action>,
    pub actions: Vec<Action>,
    pub transaction_extensions: Vec<(u16, Vec<u8>)>,
}

impl Transaction {
    /// SHA-256 of the packed transaction.
    pub fn id(&self) -> Digest {
        Digest::of(self)
    }

    /// Point the TaPoS fields at the block with id `block_id`.
    pub fn set_reference_block(&mut self, block_id: &Digest) {
        let bytes = block_id.as_bytes();
        let block_num = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        self.header.ref_block_num = (block_num & 0xffff) as u16;
        self.header.ref_block_prefix = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    }

    /// Whether the TaPoS fields match `block_id`.
    pub fn verify_reference_block(&self, block_id: &Digest) -> bool {
        let mut candidate = Transaction::default();
        candidate.set_reference_block(block_id);
        candidate.header.ref_block_num == self.header.ref_block_num
            && candidate.header.ref_block_prefix == self.header.ref_block_prefix
    }

    /// Digest the signatures of this transaction commit to.
    ///
    /// `sha256(chain_id ‖ packed transaction ‖ cfd digest)`, where the cfd
    /// digest is the SHA-256 of the packed context-free data, or
    /// [`Digest::empty_hash`] when there is none.
    pub fn sig_digest(&self, chain_id: &Digest, context_free_data: &[Vec<u8>]) -> Digest {
        let cfd_digest = if context_free_data.is_empty() {
            Digest::empty_hash()
        } else {
            Digest::of(context_free_data)
        };
        let packed = self.packed();
        Digest(sha256_multi(&[
            &chain_id.as_bytes()[..],
            &packed[..],
            &cfd_digest.as_bytes()[..],
        ]))
    }

    /// Every distinct actor named in the authorizations of `actions`.
    pub fn authorizers(&self) -> std::collections::BTreeSet<Name> {
        self.actions
            .iter()
            .flat_map(|a| a.authorization.iter().map(|p| p.actor))
            .collect()
    }

    pub fn total_actions(&self) -> usize {
        self.context_free_actions.len() + self.actions.len()
    }
}

impl Pack for Transaction {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.header.pack(out);
        self.context_free_actions.pack(out);
        self.actions.pack(out);
        self.transaction_extensions.pack(out);
    }
}

impl Unpack for Transaction {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            header: TransactionHeader::unpack(buf)?,
            context_free_actions: Vec::unpack(buf)?,
            actions: Vec::unpack(buf)?,
            transaction_extensions: Vec::unpack(buf)?,
        })
    }
}

/// A transaction with its signatures and context-free data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub signatures: Vec<Signature>,
    pub context_free_data: Vec<Vec<u8>>,
}

impl SignedTransaction {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            ..Self::default()
        }
    }

    /// Sign for `chain_id` and append the signature.
    pub fn sign(&mut self, key: &PrivateKey, chain_id: &Digest) -> Result<Signature, KeyError> {
        let digest = self
            .transaction
            .sig_digest(chain_id, &self.context_free_data);
        let signature = key.sign(&digest)?;
        self.signatures.push(signature);
        Ok(signature)
    }
}

impl Pack for SignedTransaction {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.transaction.pack(out);
        self.signatures.pack(out);
        self.context_free_data.pack(out);
    }
}

impl Unpack for SignedTransaction {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            transaction: Transaction::unpack(buf)?,
            signatures: Vec::unpack(buf)?,
            context_free_data: Vec::unpack(buf)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Fluent construction of unsigned transactions.
///
/// ```
/// use eos_ledger::chain::Name;
/// use eos_ledger::transaction::{PermissionLevel, TransactionBuilder};
///
/// let alice = PermissionLevel::new(Name::new("alice"), Name::new("active"));
/// let trx = TransactionBuilder::new()
///     .action(Name::new("eosio.token"), Name::new("transfer"), vec![alice], &7u64)
///     .build();
/// assert_eq!(trx.actions.len(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct TransactionBuilder {
    trx: Transaction,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expiration(mut self, at: DateTime<Utc>) -> Self {
        self.trx.header.expiration = TimePointSec::from_datetime(at);
        self
    }

    /// Expire `seconds` after `now`.
    pub fn expires_in(self, now: DateTime<Utc>, seconds: i64) -> Self {
        self.expiration(now + Duration::seconds(seconds))
    }

    pub fn reference_block(mut self, block_id: &Digest) -> Self {
        self.trx.set_reference_block(block_id);
        self
    }

    pub fn max_net_usage_words(mut self, words: u32) -> Self {
        self.trx.header.max_net_usage_words = VarUint32(words);
        self
    }

    pub fn max_cpu_usage_ms(mut self, ms: u8) -> Self {
        self.trx.header.max_cpu_usage_ms = ms;
        self
    }

    pub fn action<T: Pack>(
        mut self,
        account: Name,
        name: Name,
        authorization: Vec<PermissionLevel>,
        payload: &T,
    ) -> Self {
        self.trx
            .actions
            .push(Action::new(account, name, authorization, payload));
        self
    }

    pub fn context_free_action(mut self, account: Name, name: Name, data: Vec<u8>) -> Self {
        self.trx.context_free_actions.push(Action {
            account,
            name,
            authorization: Vec::new(),
            data,
        });
        self
    }

    pub fn build(self) -> Transaction {
        self.trx
    }
}

/// Hex rendering of opaque byte payloads in JSON.
mod hex_bytes {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(s).map_err(D::Error::custom)
        } else {
            <Vec<u8>>::deserialize(deserializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice_active() -> PermissionLevel {
        PermissionLevel::new(Name::new("alice"), Name::new("active"))
    }

    fn sample() -> Transaction {
        TransactionBuilder::new()
            .expiration(TimePointSec(1_600_000_000).to_datetime())
            .action(
                Name::new("eosio.token"),
                Name::new("transfer"),
                vec![alice_active()],
                &(Name::new("alice"), Name::new("bob")),
            )
            .build()
    }

    #[test]
    fn header_layout() {
        let header = TransactionHeader {
            expiration: TimePointSec(0x0102_0304),
            ref_block_num: 0x0506,
            ref_block_prefix: 0x0708_090a,
            max_net_usage_words: VarUint32(300),
            max_cpu_usage_ms: 9,
            delay_sec: VarUint32(0),
        };
        assert_eq!(
            header.packed(),
            vec![0x04, 0x03, 0x02, 0x01, 0x06, 0x05, 0x0a, 0x09, 0x08, 0x07, 0xac, 0x02, 9, 0]
        );
    }

    #[test]
    fn transaction_round_trip() {
        let trx = sample();
        let back = Transaction::unpack_exact(&trx.packed()).unwrap();
        assert_eq!(back, trx);
        assert_eq!(back.id(), trx.id());
    }

    #[test]
    fn action_payload_decodes() {
        let trx = sample();
        let (from, to): (Name, Name) = trx.actions[0].data_as().unwrap();
        assert_eq!((from, to), (Name::new("alice"), Name::new("bob")));
        assert!(trx.actions[0].data_as::<u8>().is_err());
    }

    #[test]
    fn reference_block_fields() {
        let mut id = [0u8; 32];
        id[..4].copy_from_slice(&0x0001_2345u32.to_be_bytes());
        id[8..12].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd]);
        let id = Digest(id);

        let mut trx = sample();
        trx.set_reference_block(&id);
        assert_eq!(trx.header.ref_block_num, 0x2345);
        assert_eq!(trx.header.ref_block_prefix, 0xddcc_bbaa);
        assert!(trx.verify_reference_block(&id));
        assert!(!trx.verify_reference_block(&Digest::ZERO));
    }

    #[test]
    fn sig_digest_uses_empty_hash_without_cfd() {
        let trx = sample();
        let chain_id = Digest::hash(b"chain");
        let packed = trx.packed();
        let expected = Digest::hash_parts(&[
            &chain_id.as_bytes()[..],
            &packed[..],
            &Digest::empty_hash().as_bytes()[..],
        ]);
        assert_eq!(trx.sig_digest(&chain_id, &[]), expected);
        assert_ne!(trx.sig_digest(&chain_id, &[vec![1]]), expected);
        assert_ne!(trx.sig_digest(&Digest::ZERO, &[]), expected);
    }

    #[test]
    fn signing_appends_recoverable_signature() {
        let key = PrivateKey::from_seed(b"alice").unwrap();
        let chain_id = Digest::hash(b"chain");
        let mut signed = SignedTransaction::new(sample());
        let sig = signed.sign(&key, &chain_id).unwrap();
        assert_eq!(signed.signatures, vec![sig]);
        let digest = signed.transaction.sig_digest(&chain_id, &[]);
        assert_eq!(sig.recover(&digest).unwrap(), key.public_key());
    }

    #[test]
    fn authorizers_are_deduplicated() {
        let trx = TransactionBuilder::new()
            .action(Name::new("a"), Name::new("x"), vec![alice_active()], &0u8)
            .action(Name::new("b"), Name::new("y"), vec![alice_active()], &0u8)
            .build();
        assert_eq!(trx.authorizers().len(), 1);
        assert_eq!(trx.total_actions(), 2);
    }
}
