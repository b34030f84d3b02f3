//! End-to-end tests for the ledger write path.
//!
//! Each test builds its own controller over a fresh store, registers a small
//! native contract, and drives whole blocks through it: account creation,
//! signed and packed transactions, table writes with secondary indexes, RAM
//! billing, resource charges, rollbacks and block sealing.

use eos_ledger::block::num_from_id;
use eos_ledger::chain::{BlockTimestamp, Name, TimePointSec};
use eos_ledger::controller::{check, ActionHandler, ApplyContext, ApplyError, Controller, ControllerError, HandlerRegistry};
use eos_ledger::crypto::{Digest, PrivateKey};
use eos_ledger::resource::ResourceError;
use eos_ledger::storage::{Authority, ChainStore, Direction, Schema};
use eos_ledger::transaction::{
    Compression, PackedTransaction, PermissionLevel, ReceiptTrx, SignedTransaction,
    TransactionBuilder,
};
use eos_ledger::ChainConfig;

// ---------------------------------------------------------------------------
// Test contract
// ---------------------------------------------------------------------------

const NOTES: Name = Name::new("notes");
const ALICE: Name = Name::new("alice");
const BOB: Name = Name::new("bob");
const ACTIVE: Name = Name::new("active");
const TABLE: Name = Name::new("notes");

/// `add(key, value)` stores a row in the actor's scope indexed by value,
/// `erase(key)` removes it, `ping()` notifies bob.
struct Notes;

impl ActionHandler for Notes {
    fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<(), ApplyError> {
        if ctx.receiver() != NOTES {
            return Ok(());
        }
        let actor = ctx.action().authorization[0].actor;
        ctx.require_auth(actor)?;
        match ctx.action().name {
            n if n == Name::new("add") => {
                let (key, value): (u64, u64) = ctx.data_as()?;
                let mut tables = ctx.tables()?;
                tables.store(NOTES, actor, TABLE, actor, key, &value.to_le_bytes())?;
                tables.idx64().store(NOTES, actor, TABLE, actor, key, value)?;
            }
            n if n == Name::new("erase") => {
                let key: u64 = ctx.data_as()?;
                let mut tables = ctx.tables()?;
                let table = tables.find_table(NOTES, actor, TABLE)?;
                let row = match table {
                    Some(t) => tables.find(t.id, key)?,
                    None => None,
                };
                check(row.is_some(), "no such note")?;
                if let Some(row) = row {
                    tables.remove(row.id)?;
                }
            }
            n if n == Name::new("ping") => ctx.require_recipient(BOB)?,
            other => return Err(ApplyError::Assert(format!("unknown action {other}"))),
        }
        Ok(())
    }
}

/// Counts how often it is notified, in its own table.
struct Counter;

impl ActionHandler for Counter {
    fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<(), ApplyError> {
        let receiver = ctx.receiver();
        let mut tables = ctx.tables()?;
        let table = tables.find_table(receiver, receiver, Name::new("count"))?;
        let existing = match table {
            Some(t) => tables.find(t.id, 0)?,
            None => None,
        };
        match existing {
            Some(row) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&row.value);
                let next = u64::from_le_bytes(raw) + 1;
                tables.update(row.id, None, &next.to_le_bytes())?;
            }
            None => {
                tables.store(receiver, receiver, Name::new("count"), receiver, 0, &1u64.to_le_bytes())?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn chain_id() -> Digest {
    Digest::hash(b"e2e chain")
}

fn key(account: Name) -> PrivateKey {
    PrivateKey::from_seed(account.to_string().as_bytes()).unwrap()
}

fn config() -> ChainConfig {
    ChainConfig {
        chain_id: chain_id(),
        ..ChainConfig::default()
    }
}

fn open(store: ChainStore) -> Controller {
    let handlers = HandlerRegistry::new().with(NOTES, Notes).with(BOB, Counter);
    Controller::open(store, config(), handlers).unwrap()
}

fn setup() -> Controller {
    let store = ChainStore::open_temporary(Schema::chain().unwrap()).unwrap();
    let mut chain = open(store);
    for account in [NOTES, ALICE, BOB] {
        let auth = Authority::single_key(key(account).public_key());
        chain.create_account(account, auth.clone(), auth).unwrap();
    }
    chain
}

fn slot(n: u32) -> BlockTimestamp {
    BlockTimestamp::new(10_000 + n)
}

fn transaction<T: eos_ledger::chain::Pack>(
    actor: Name,
    action: &str,
    data: &T,
    at: BlockTimestamp,
    compression: Compression,
) -> PackedTransaction {
    let mut trx = TransactionBuilder::new()
        .action(
            NOTES,
            Name::new(action),
            vec![PermissionLevel::new(actor, ACTIVE)],
            data,
        )
        .build();
    trx.header.expiration = TimePointSec(TimePointSec::from(at).0 + 60);
    let mut signed = SignedTransaction::new(trx);
    signed.sign(&key(actor), &chain_id()).unwrap();
    PackedTransaction::new(&signed, compression).unwrap()
}

fn ram(chain: &Controller, account: Name) -> u64 {
    chain.resources().get_account_ram_usage(account).unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn blocks_chain_by_id() {
    let mut chain = setup();

    chain.start_block(slot(1), NOTES, Digest::ZERO).unwrap();
    chain
        .push_transaction(&transaction(ALICE, "add", &(1u64, 10u64), slot(1), Compression::None), 0)
        .unwrap();
    let first = chain.finalize_block().unwrap();
    assert_eq!(first.block_num(), 1);
    assert_eq!(num_from_id(&first.id), 1);

    chain.start_block(slot(2), NOTES, first.id).unwrap();
    chain
        .push_transaction(&transaction(ALICE, "add", &(2u64, 20u64), slot(2), Compression::None), 0)
        .unwrap();
    let second = chain.finalize_block().unwrap();
    assert_eq!(second.block_num(), 2);
    assert_eq!(second.header.previous, first.id);
    assert!(second.verify());
    assert_eq!(second.action_receipts[0].global_sequence, 2);
    assert_eq!(second.action_receipts[0].recv_sequence, 2);
}

#[test]
fn rows_and_secondaries_are_billed_and_refunded() {
    let mut chain = setup();
    let baseline = ram(&chain, ALICE);

    chain.start_block(slot(1), NOTES, Digest::ZERO).unwrap();
    chain
        .push_transaction(&transaction(ALICE, "add", &(7u64, 70u64), slot(1), Compression::None), 0)
        .unwrap();
    // table 112 + row (32 + 8 -> 48) + 2 * 32 = 112 + index64 144
    assert_eq!(ram(&chain, ALICE), baseline + 112 + 112 + 144);

    chain
        .push_transaction(&transaction(ALICE, "erase", &7u64, slot(1), Compression::None), 0)
        .unwrap();
    assert_eq!(ram(&chain, ALICE), baseline);
    chain.finalize_block().unwrap();
}

#[test]
fn ram_quota_rejects_and_rolls_back() {
    let mut chain = setup();
    let baseline = ram(&chain, ALICE);
    chain
        .resources()
        .set_account_limits(ALICE, baseline as i64 + 200, -1, -1)
        .unwrap();

    chain.start_block(slot(1), NOTES, Digest::ZERO).unwrap();
    let err = chain
        .push_transaction(&transaction(ALICE, "add", &(1u64, 1u64), slot(1), Compression::None), 0)
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Resource(ResourceError::RamUsageExceeded { .. })
    ));
    assert_eq!(ram(&chain, ALICE), baseline);

    let block = chain.finalize_block().unwrap();
    assert!(block.transactions.is_empty());
    assert_eq!(block.header.transaction_mroot, Digest::empty_hash());
}

#[test]
fn failed_assertion_keeps_earlier_transactions() {
    let mut chain = setup();
    chain.start_block(slot(1), NOTES, Digest::ZERO).unwrap();
    chain
        .push_transaction(&transaction(ALICE, "add", &(1u64, 1u64), slot(1), Compression::None), 0)
        .unwrap();
    let err = chain
        .push_transaction(&transaction(ALICE, "erase", &99u64, slot(1), Compression::None), 0)
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Apply {
            source: ApplyError::Assert(_),
            ..
        }
    ));
    let block = chain.finalize_block().unwrap();
    assert_eq!(block.transactions.len(), 1);
}

#[test]
fn notifications_run_recipient_handlers() {
    let mut chain = setup();
    chain.start_block(slot(1), NOTES, Digest::ZERO).unwrap();
    chain
        .push_transaction(&transaction(ALICE, "ping", &0u64, slot(1), Compression::None), 0)
        .unwrap();
    let block = chain.finalize_block().unwrap();

    let receivers: Vec<Name> = block.action_receipts.iter().map(|r| r.receiver).collect();
    assert_eq!(receivers, vec![NOTES, BOB]);
    assert_eq!(
        block.action_receipts[0].act_digest,
        block.action_receipts[1].act_digest
    );
    assert_eq!(block.action_receipts[1].global_sequence, 2);
    // bob pays for its own counter row
    assert!(ram(&chain, BOB) > chain.config().billing.overhead_per_account);
}

#[test]
fn compressed_transactions_are_accepted() {
    let mut chain = setup();
    chain.start_block(slot(1), NOTES, Digest::ZERO).unwrap();
    let packed = transaction(ALICE, "add", &(3u64, 30u64), slot(1), Compression::Zlib);
    assert_eq!(packed.compression(), Compression::Zlib);
    let receipt = chain.push_transaction(&packed, 250).unwrap();
    assert_eq!(receipt.header.cpu_usage_us, 250);
    match &receipt.trx {
        ReceiptTrx::Packed(p) => assert_eq!(p.packed_digest(), packed.packed_digest()),
        ReceiptTrx::Id(_) => panic!("expected the packed transaction"),
    }
    chain.finalize_block().unwrap();
}

#[test]
fn cpu_and_net_are_charged_to_authorizers() {
    let mut chain = setup();
    chain
        .resources()
        .set_account_limits(ALICE, -1, 100, 100)
        .unwrap();
    let before = chain.resources().get_account_cpu_limit(ALICE).unwrap();
    assert_eq!(before.used, 0);

    chain.start_block(slot(1), NOTES, Digest::ZERO).unwrap();
    chain
        .push_transaction(&transaction(ALICE, "add", &(1u64, 1u64), slot(1), Compression::None), 500)
        .unwrap();
    chain.finalize_block().unwrap();

    let cpu = chain.resources().get_account_cpu_limit(ALICE).unwrap();
    let net = chain.resources().get_account_net_limit(ALICE).unwrap();
    // 500us, rounded up through the scaled window average
    assert_eq!(cpu.used, 501);
    assert!(net.used > 0);
    assert!(cpu.available < cpu.max);
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let first_id = {
        let store = ChainStore::open(dir.path(), Schema::chain().unwrap()).unwrap();
        let mut chain = open(store);
        for account in [NOTES, ALICE, BOB] {
            let auth = Authority::single_key(key(account).public_key());
            chain.create_account(account, auth.clone(), auth).unwrap();
        }
        chain.start_block(slot(1), NOTES, Digest::ZERO).unwrap();
        chain
            .push_transaction(&transaction(ALICE, "add", &(5u64, 50u64), slot(1), Compression::None), 0)
            .unwrap();
        let block = chain.finalize_block().unwrap();
        chain.store().flush().unwrap();
        block.id
    };

    let store = ChainStore::open(dir.path(), Schema::chain().unwrap()).unwrap();
    let mut chain = open(store);
    assert!(chain.get_account(ALICE).unwrap().is_some());

    // the note is still there: adding it again collides
    chain.start_block(slot(2), NOTES, first_id).unwrap();
    assert!(chain
        .push_transaction(&transaction(ALICE, "add", &(5u64, 50u64), slot(2), Compression::None), 0)
        .is_err());
    chain.abort_block().unwrap();

    let rows: Vec<_> = chain
        .store()
        .iterate::<eos_ledger::tables::KeyValue>("id", &[], Direction::Forward)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].primary_key, 5);
}
