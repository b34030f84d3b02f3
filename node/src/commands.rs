//! Subcommand implementations. Each returns what `main` prints to stdout.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::info;

use eos_ledger::chain::{Name, Unpack};
use eos_ledger::crypto::{merkle, Digest, PrivateKey, PublicKey};
use eos_ledger::storage::{Authority, ChainStore, Schema};
use eos_ledger::transaction::{Deadline, PackedTransaction};
use eos_ledger::{ChainConfig, Controller};

use crate::cli::{InitArgs, InspectTxArgs, MerkleArgs, NameArgs};

const SYSTEM_ACCOUNT: Name = Name::new("eosio");

fn load_config(args: &InitArgs) -> Result<ChainConfig> {
    match &args.config {
        Some(path) => ChainConfig::from_json_file(path)
            .with_context(|| format!("failed to load chain config {}", path.display())),
        None => Ok(ChainConfig::default()),
    }
}

fn system_key(args: &InitArgs) -> Result<PublicKey> {
    if let Some(hex) = &args.system_key {
        return PublicKey::from_hex(hex).context("invalid --system-key");
    }
    if let Some(seed) = &args.system_seed {
        return Ok(PrivateKey::from_seed(seed.as_bytes())?.public_key());
    }
    bail!("one of --system-key or --system-seed is required")
}

/// Open the store, validate the config and create the system and token
/// accounts if they are missing.
pub fn init(args: &InitArgs) -> Result<Value> {
    let config = load_config(args)?;
    let key = system_key(args)?;

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("failed to create data directory {}", args.data_dir.display()))?;
    let schema = Schema::chain()?;
    let store = ChainStore::open(&args.data_dir, schema)
        .with_context(|| format!("failed to open chain store at {}", args.data_dir.display()))?;

    let mut chain = Controller::open(store, config, eos_ledger_contracts::handlers())?;
    let mut created = Vec::new();
    for account in [SYSTEM_ACCOUNT, eos_ledger_contracts::TOKEN_ACCOUNT] {
        if chain.get_account(account)?.is_none() {
            let auth = Authority::single_key(key);
            chain.create_account(account, auth.clone(), auth)?;
            created.push(account.to_string());
        }
    }
    chain.store().flush()?;
    info!(data_dir = %args.data_dir.display(), created = created.len(), "store initialized");

    Ok(json!({
        "data_dir": args.data_dir.display().to_string(),
        "chain_id": chain.config().chain_id,
        "system_key": key.to_string(),
        "created_accounts": created,
    }))
}

pub fn name(args: &NameArgs) -> Result<String> {
    if args.decode {
        let value: u64 = args
            .value
            .parse()
            .with_context(|| format!("not a 64-bit value: {}", args.value))?;
        return Ok(Name::from(value).to_string());
    }
    let name: Name = args.value.parse()?;
    Ok(name.value().to_string())
}

pub fn merkle_root(args: &MerkleArgs) -> Result<String> {
    let leaves = args
        .digests
        .iter()
        .map(|d| Digest::from_hex(d).with_context(|| format!("bad digest {d}")))
        .collect::<Result<Vec<_>>>()?;
    Ok(merkle(&leaves).to_hex())
}

pub fn inspect_tx(args: &InspectTxArgs) -> Result<Value> {
    let raw = hex::decode(args.packed.trim()).context("packed transaction is not hex")?;
    let packed = PackedTransaction::unpack_exact(&raw)?;
    let chain_id = match &args.chain_id {
        Some(hex) => Digest::from_hex(hex).context("invalid --chain-id")?,
        None => Digest::ZERO,
    };

    let trx = packed.transaction()?;
    let keys = packed.recover_keys(&chain_id, &Deadline::never(), true)?;
    Ok(json!({
        "id": packed.id()?,
        "packed_digest": packed.packed_digest(),
        "compression": packed.compression(),
        "unprunable_size": packed.unprunable_size(),
        "prunable_size": packed.prunable_size(),
        "transaction": trx,
        "signatures": packed.signatures().len(),
        "recovered_keys": keys.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eos_ledger::chain::Pack;
    use eos_ledger::transaction::{Compression, PermissionLevel, SignedTransaction, TransactionBuilder};

    fn init_args(dir: &std::path::Path) -> InitArgs {
        InitArgs {
            data_dir: dir.to_path_buf(),
            config: None,
            system_key: None,
            system_seed: Some("dev".into()),
        }
    }

    #[test]
    fn init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = init(&init_args(dir.path())).unwrap();
        assert_eq!(first["created_accounts"].as_array().unwrap().len(), 2);

        let second = init(&init_args(dir.path())).unwrap();
        assert!(second["created_accounts"].as_array().unwrap().is_empty());
    }

    #[test]
    fn init_requires_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = init_args(dir.path());
        args.system_seed = None;
        assert!(init(&args).is_err());
    }

    #[test]
    fn names_both_ways() {
        let encoded = name(&NameArgs {
            value: "eosio".into(),
            decode: false,
        })
        .unwrap();
        assert_eq!(encoded, "6138663577826885632");
        let decoded = name(&NameArgs {
            value: encoded,
            decode: true,
        })
        .unwrap();
        assert_eq!(decoded, "eosio");
    }

    #[test]
    fn merkle_of_two() {
        let a = Digest::hash(b"a").to_hex();
        let b = Digest::hash(b"b").to_hex();
        let root = merkle_root(&MerkleArgs {
            digests: vec![a, b],
        })
        .unwrap();
        assert_eq!(
            root,
            "39cd7110283b5980c22c81cbfc13698f0991d4d5d9fd2ef5d198ba2352bfb007"
        );
    }

    #[test]
    fn inspect_recovers_signer() {
        let key = PrivateKey::from_seed(b"alice").unwrap();
        let trx = TransactionBuilder::new()
            .action(
                Name::new("eosio"),
                Name::new("noop"),
                vec![PermissionLevel::new(Name::new("alice"), Name::new("active"))],
                &0u64,
            )
            .build();
        let mut signed = SignedTransaction::new(trx);
        signed.sign(&key, &Digest::ZERO).unwrap();
        let packed = PackedTransaction::new(&signed, Compression::Zlib).unwrap();

        let report = inspect_tx(&InspectTxArgs {
            packed: hex::encode(packed.packed()),
            chain_id: None,
        })
        .unwrap();
        assert_eq!(report["recovered_keys"][0], key.public_key().to_string());
        assert_eq!(report["id"], json!(packed.id().unwrap()));
    }
}
