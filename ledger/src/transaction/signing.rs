//! Deadline-bounded signature recovery.
//!
//! Recovery is the one expensive step of admitting a transaction, so it runs
//! against an explicit [`Deadline`] checked before every signature. Running
//! out of time discards everything recovered so far.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::trace;

use super::packed::{PackError, PackedTransaction};
use crate::crypto::hash::Digest;
use crate::crypto::keys::{KeyError, PublicKey, Signature};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature recovery deadline exceeded after {recovered} of {total} signatures")]
    DeadlineExceeded { recovered: usize, total: usize },

    #[error("duplicate signature for key {0}")]
    DuplicateSignatureKey(PublicKey),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Pack(#[from] PackError),
}

/// A point in time after which work should stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now().checked_add(budget))
    }

    pub fn never() -> Self {
        Self(None)
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl PackedTransaction {
    /// Recover the key behind every signature for `chain_id`.
    ///
    /// Fails with `DeadlineExceeded` if `deadline` passes before any
    /// recovery step, and with `DuplicateSignatureKey` when two signatures
    /// recover the same key unless `allow_duplicates` is set.
    pub fn recover_keys(
        &self,
        chain_id: &Digest,
        deadline: &Deadline,
        allow_duplicates: bool,
    ) -> Result<BTreeSet<PublicKey>, SignatureError> {
        let cfd = self.context_free_data()?;
        let digest = self.transaction()?.sig_digest(chain_id, &cfd);
        recover_digest_keys(&digest, self.signatures(), deadline, allow_duplicates)
    }
}

/// Recover the signers of `digest`.
pub fn recover_digest_keys(
    digest: &Digest,
    signatures: &[Signature],
    deadline: &Deadline,
    allow_duplicates: bool,
) -> Result<BTreeSet<PublicKey>, SignatureError> {
    let mut keys = BTreeSet::new();
    for (recovered, signature) in signatures.iter().enumerate() {
        if deadline.is_expired() {
            return Err(SignatureError::DeadlineExceeded {
                recovered,
                total: signatures.len(),
            });
        }
        let key = signature.recover(digest)?;
        if !keys.insert(key) && !allow_duplicates {
            return Err(SignatureError::DuplicateSignatureKey(key));
        }
    }
    trace!(signatures = signatures.len(), keys = keys.len(), "signatures recovered");
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Name;
    use crate::crypto::keys::PrivateKey;
    use crate::transaction::packed::Compression;
    use crate::transaction::types::{PermissionLevel, SignedTransaction, TransactionBuilder};

    fn chain_id() -> Digest {
        Digest::hash(b"test chain")
    }

    fn signed_by(seeds: &[&[u8]]) -> PackedTransaction {
        let trx = TransactionBuilder::new()
            .action(
                Name::new("eosio"),
                Name::new("noop"),
                vec![PermissionLevel::new(Name::new("alice"), Name::new("active"))],
                &0u64,
            )
            .build();
        let mut signed = SignedTransaction::new(trx);
        for seed in seeds {
            signed
                .sign(&PrivateKey::from_seed(seed).unwrap(), &chain_id())
                .unwrap();
        }
        PackedTransaction::new(&signed, Compression::None).unwrap()
    }

    #[test]
    fn recovers_every_signer() {
        let packed = signed_by(&[b"alice", b"bob"]);
        let keys = packed
            .recover_keys(&chain_id(), &Deadline::never(), false)
            .unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&PrivateKey::from_seed(b"alice").unwrap().public_key()));
        assert!(keys.contains(&PrivateKey::from_seed(b"bob").unwrap().public_key()));
    }

    #[test]
    fn wrong_chain_recovers_other_keys() {
        let packed = signed_by(&[b"alice"]);
        let keys = packed
            .recover_keys(&Digest::ZERO, &Deadline::never(), false)
            .unwrap();
        assert!(!keys.contains(&PrivateKey::from_seed(b"alice").unwrap().public_key()));
    }

    #[test]
    fn duplicate_signers() {
        let packed = signed_by(&[b"alice", b"alice"]);
        assert!(matches!(
            packed.recover_keys(&chain_id(), &Deadline::never(), false),
            Err(SignatureError::DuplicateSignatureKey(_))
        ));
        let keys = packed
            .recover_keys(&chain_id(), &Deadline::never(), true)
            .unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn expired_deadline_recovers_nothing() {
        let packed = signed_by(&[b"alice"]);
        let past = Deadline::at(Instant::now());
        assert!(past.is_expired());
        assert!(matches!(
            packed.recover_keys(&chain_id(), &past, false),
            Err(SignatureError::DeadlineExceeded { recovered: 0, total: 1 })
        ));
    }

    #[test]
    fn never_has_no_remaining_bound() {
        assert!(!Deadline::never().is_expired());
        assert_eq!(Deadline::never().remaining(), None);
        assert!(Deadline::after(Duration::from_secs(60)).remaining().is_some());
    }
}
