//! # Controller
//!
//! The ledger's write path. A block is opened with [`Controller::start_block`],
//! filled with [`Controller::push_transaction`] and sealed with
//! [`Controller::finalize_block`].
//!
//! ## Atomicity
//!
//! ```text
//! store ── block session ──┬── trx session (pushed on success)
//!                          ├── trx session (undone on any error)
//!                          └── ...
//! ```
//!
//! The pending block owns an undo session and every transaction nests its
//! own inside it. A failed transaction leaves no trace: table rows, RAM
//! charges, usage accumulators and action sequences all roll back together.
//! Aborting the block rolls back everything applied since `start_block`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::block::{Block, BlockHeader};
use crate::chain::{BlockTimestamp, CodecError, Name, TimePointSec, Unpack, VarUint32};
use crate::config::{
    ChainConfig, ConfigError, BASE_PER_TRANSACTION_NET_USAGE, MAX_TRANSACTION_LIFETIME_SECS,
};
use crate::crypto::hash::Digest;
use crate::resource::{ResourceError, ResourceLimitsManager};
use crate::storage::{
    Account, AccountSequence, Authority, ChainStore, GlobalSequence, KeyEncoder, Permission,
    Session, StoreError,
};
use crate::tables::{BillingConfig, RamBilling, TableError, TableStore};
use crate::transaction::{
    check_authorization, initialize_permissions, Action, ActionReceipt, AuthorizationError,
    Deadline, PackError, PackedTransaction, ReceiptTrx, SignatureError, Transaction,
    TransactionReceipt, TransactionReceiptHeader, TransactionStatus,
};

const OWNER: Name = Name::new("owner");
const ACTIVE: Name = Name::new("active");

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures raised by an action handler.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("missing authority of {0}")]
    MissingAuthority(Name),

    #[error("assertion failure: {0}")]
    Assert(String),

    #[error("account {0} does not exist")]
    UnknownAccount(Name),

    #[error("context-free actions cannot access tables")]
    ContextFree,

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fail the action with `message` unless `condition` holds.
pub fn check(condition: bool, message: impl Into<String>) -> std::result::Result<(), ApplyError> {
    if condition {
        Ok(())
    } else {
        Err(ApplyError::Assert(message.into()))
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("no block in progress")]
    NoPendingBlock,

    #[error("block {0} is already in progress")]
    BlockInProgress(u32),

    #[error("transaction expired at {expiration}, block time is {now}")]
    Expired { expiration: u32, now: u32 },

    #[error("transaction expiration {expiration} is too far past block time {now}")]
    ExpirationTooFar { expiration: u32, now: u32 },

    #[error("transaction NET usage {used} exceeds limit {limit}")]
    NetLimitExceeded { used: u64, limit: u64 },

    #[error("transaction CPU bill {billed}us exceeds limit {limit}us")]
    CpuLimitExceeded { billed: u64, limit: u64 },

    #[error("account {0} already exists")]
    AccountExists(Name),

    #[error("account {0} does not exist")]
    UnknownAccount(Name),

    #[error("account name must not be empty")]
    EmptyAccountName,

    #[error("invalid {permission} authority for {account}")]
    InvalidAuthority { account: Name, permission: Name },

    #[error("{receiver} failed to apply {account}::{action}: {source}")]
    Apply {
        receiver: Name,
        account: Name,
        action: Name,
        #[source]
        source: ApplyError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
}

type Result<T> = std::result::Result<T, ControllerError>;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Native code run when an action reaches its receiver.
pub trait ActionHandler: Send + Sync {
    fn apply(&self, ctx: &mut ApplyContext<'_>) -> std::result::Result<(), ApplyError>;
}

/// Receiver account to handler. Built once and handed to the controller.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<Name, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, receiver: Name, handler: impl ActionHandler + 'static) -> Self {
        self.insert(receiver, handler);
        self
    }

    /// Register `handler` for `receiver`, replacing any previous one.
    pub fn insert(&mut self, receiver: Name, handler: impl ActionHandler + 'static) {
        self.handlers.insert(receiver, Arc::new(handler));
    }

    pub fn get(&self, receiver: Name) -> Option<&dyn ActionHandler> {
        self.handlers.get(&receiver).map(|h| h.as_ref())
    }

    pub fn contains(&self, receiver: Name) -> bool {
        self.handlers.contains_key(&receiver)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// Forwards RAM charges to the metering engine and remembers who paid.
struct RamTracker<'a> {
    resources: &'a ResourceLimitsManager,
    touched: &'a mut BTreeSet<Name>,
}

impl RamBilling for RamTracker<'_> {
    fn update_ram_usage(
        &mut self,
        payer: Name,
        delta: i64,
    ) -> std::result::Result<(), ResourceError> {
        self.resources.add_pending_ram_usage(payer, delta)?;
        self.touched.insert(payer);
        Ok(())
    }
}

/// What a handler sees while applying one action for one receiver.
pub struct ApplyContext<'a> {
    receiver: Name,
    action: &'a Action,
    context_free: bool,
    store: &'a ChainStore,
    billing: &'a BillingConfig,
    ram: RamTracker<'a>,
    notified: Vec<Name>,
}

impl<'a> ApplyContext<'a> {
    /// Account whose handler is running. Differs from `action().account`
    /// when the handler was notified.
    pub fn receiver(&self) -> Name {
        self.receiver
    }

    pub fn action(&self) -> &Action {
        self.action
    }

    pub fn is_context_free(&self) -> bool {
        self.context_free
    }

    /// Decode the action payload.
    pub fn data_as<T: Unpack>(&self) -> std::result::Result<T, ApplyError> {
        Ok(self.action.data_as()?)
    }

    pub fn has_auth(&self, account: Name) -> bool {
        self.action.authorization.iter().any(|level| level.actor == account)
    }

    pub fn require_auth(&self, account: Name) -> std::result::Result<(), ApplyError> {
        if self.has_auth(account) {
            Ok(())
        } else {
            Err(ApplyError::MissingAuthority(account))
        }
    }

    pub fn is_account(&self, account: Name) -> std::result::Result<bool, ApplyError> {
        Ok(find_account(self.store, account)?.is_some())
    }

    /// Also deliver the action to `account` once this handler returns.
    pub fn require_recipient(&mut self, account: Name) -> std::result::Result<(), ApplyError> {
        if !self.is_account(account)? {
            return Err(ApplyError::UnknownAccount(account));
        }
        if account != self.receiver && !self.notified.contains(&account) {
            self.notified.push(account);
        }
        Ok(())
    }

    /// Table access billed to row payers.
    pub fn tables(&mut self) -> std::result::Result<TableStore<'_>, ApplyError> {
        if self.context_free {
            return Err(ApplyError::ContextFree);
        }
        Ok(TableStore::new(self.store, &mut self.ram, self.billing))
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

struct PendingBlock {
    session: Session,
    header: BlockHeader,
    receipts: Vec<TransactionReceipt>,
    action_receipts: Vec<ActionReceipt>,
}

/// Everything one transaction produced before it is committed.
struct AppliedTransaction {
    receipt: TransactionReceipt,
    action_receipts: Vec<ActionReceipt>,
}

pub struct Controller {
    store: ChainStore,
    config: ChainConfig,
    resources: ResourceLimitsManager,
    handlers: HandlerRegistry,
    pending: Option<PendingBlock>,
}

impl Controller {
    /// Validate `config` and prepare `store`. A store that was prepared
    /// before is reused as is.
    pub fn open(store: ChainStore, config: ChainConfig, handlers: HandlerRegistry) -> Result<Self> {
        config.validate()?;
        let resources = ResourceLimitsManager::new(store.clone());
        resources.initialize_database(&config.resource_limits)?;
        initialize_permissions(&store)?;
        if store.get::<GlobalSequence>(0)?.is_none() {
            store.insert(&GlobalSequence::default())?;
        }
        info!(chain_id = %config.chain_id, handlers = ?handlers, "controller opened");
        Ok(Self {
            store,
            config,
            resources,
            handlers,
            pending: None,
        })
    }

    pub fn store(&self) -> &ChainStore {
        &self.store
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn resources(&self) -> &ResourceLimitsManager {
        &self.resources
    }

    pub fn pending_block(&self) -> Option<&BlockHeader> {
        self.pending.as_ref().map(|p| &p.header)
    }

    pub fn get_account(&self, name: Name) -> Result<Option<Account>> {
        Ok(find_account(&self.store, name)?)
    }

    pub fn get_permission(&self, owner: Name, name: Name) -> Result<Option<Permission>> {
        let mut key = KeyEncoder::new();
        key.name(owner).name(name);
        Ok(self.store.find_by("by_owner", &key)?)
    }

    /// Register `name` with `owner` and `active` permissions, unlimited
    /// resource quotas and the per-account RAM overhead.
    pub fn create_account(&mut self, name: Name, owner: Authority, active: Authority) -> Result<Account> {
        if name.is_empty() {
            return Err(ControllerError::EmptyAccountName);
        }
        for (permission, auth) in [(OWNER, &owner), (ACTIVE, &active)] {
            if !auth.is_valid() {
                return Err(ControllerError::InvalidAuthority {
                    account: name,
                    permission,
                });
            }
        }
        if find_account(&self.store, name)?.is_some() {
            return Err(ControllerError::AccountExists(name));
        }

        let now = self.pending_timestamp();
        let session = self.store.start_session();
        let account = self.store.create(|a: &mut Account| {
            a.name = name;
            a.creation_date = now;
        })?;
        let owner_perm = self.store.create(|p: &mut Permission| {
            p.owner = name;
            p.name = OWNER;
            p.last_updated = now;
            p.auth = owner;
        })?;
        self.store.create(|p: &mut Permission| {
            p.owner = name;
            p.name = ACTIVE;
            p.parent = owner_perm.id;
            p.last_updated = now;
            p.auth = active;
        })?;
        self.store.create(|s: &mut AccountSequence| s.name = name)?;
        self.resources.initialize_account(name)?;
        let overhead = i64::try_from(self.config.billing.overhead_per_account)
            .map_err(|_| ResourceError::RamUsageOverflow(name))?;
        self.resources.add_pending_ram_usage(name, overhead)?;
        session.push();

        debug!(account = %name, "account created");
        Ok(account)
    }

    /// Open a block on top of `previous`.
    pub fn start_block(&mut self, timestamp: BlockTimestamp, producer: Name, previous: Digest) -> Result<()> {
        if let Some(pending) = &self.pending {
            return Err(ControllerError::BlockInProgress(pending.header.block_num()));
        }
        let header = BlockHeader {
            timestamp,
            producer,
            previous,
            ..BlockHeader::default()
        };
        debug!(block_num = header.block_num(), %timestamp, %producer, "block started");
        self.pending = Some(PendingBlock {
            session: self.store.start_session(),
            header,
            receipts: Vec::new(),
            action_receipts: Vec::new(),
        });
        Ok(())
    }

    /// Apply `trx` to the pending block and bill `billed_cpu_us` of CPU to
    /// its authorizers. On error nothing the transaction did survives.
    pub fn push_transaction(
        &mut self,
        trx: &PackedTransaction,
        billed_cpu_us: u32,
    ) -> Result<TransactionReceipt> {
        let header = self
            .pending
            .as_ref()
            .map(|p| p.header.clone())
            .ok_or(ControllerError::NoPendingBlock)?;

        let session = self.store.start_session();
        match self.apply_transaction(trx, billed_cpu_us, &header) {
            Ok(applied) => {
                session.push();
                let pending = self.pending.as_mut().ok_or(ControllerError::NoPendingBlock)?;
                debug!(
                    cpu_us = applied.receipt.header.cpu_usage_us,
                    net_words = applied.receipt.header.net_usage_words.0,
                    actions = applied.action_receipts.len(),
                    "transaction applied"
                );
                pending.receipts.push(applied.receipt.clone());
                pending.action_receipts.extend(applied.action_receipts);
                Ok(applied.receipt)
            }
            Err(e) => {
                warn!(error = %e, "transaction rolled back");
                session.undo()?;
                Err(e)
            }
        }
    }

    /// Seal the pending block: compute its roots and id and fold its usage
    /// into the block averages.
    pub fn finalize_block(&mut self) -> Result<Block> {
        let PendingBlock {
            session,
            header,
            receipts,
            action_receipts,
        } = self.pending.take().ok_or(ControllerError::NoPendingBlock)?;

        let block = Block::new(header, receipts, action_receipts);
        self.resources.process_block_usage(block.block_num())?;
        session.push();

        info!(
            block_num = block.block_num(),
            id = %block.id,
            transactions = block.transactions.len(),
            actions = block.action_receipts.len(),
            "block finalized"
        );
        Ok(block)
    }

    /// Drop the pending block and everything applied in it.
    pub fn abort_block(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            let block_num = pending.header.block_num();
            pending.session.undo()?;
            info!(block_num, "block aborted");
        }
        Ok(())
    }

    fn pending_timestamp(&self) -> BlockTimestamp {
        self.pending
            .as_ref()
            .map(|p| p.header.timestamp)
            .unwrap_or_default()
    }

    fn apply_transaction(
        &self,
        packed: &PackedTransaction,
        billed_cpu_us: u32,
        header: &BlockHeader,
    ) -> Result<AppliedTransaction> {
        let trx = packed.transaction()?;
        check_expiration(trx, header.timestamp)?;

        let deadline = Deadline::after(self.config.signature_recovery_budget());
        let keys = packed.recover_keys(
            &self.config.chain_id,
            &deadline,
            self.config.allow_duplicate_signature_keys,
        )?;
        check_authorization(&self.store, trx, &keys)?;

        let mut touched = BTreeSet::new();
        let mut action_receipts = Vec::new();
        for action in &trx.context_free_actions {
            self.execute_action(action, true, &mut touched, &mut action_receipts)?;
        }
        for action in &trx.actions {
            self.execute_action(action, false, &mut touched, &mut action_receipts)?;
        }

        let net_usage_words = self.bill_net(packed, trx)?;
        let cpu_usage_us = self.bill_cpu(trx, billed_cpu_us)?;
        self.resources.add_transaction_usage(
            &trx.authorizers(),
            u64::from(cpu_usage_us),
            u64::from(net_usage_words) * 8,
            header.timestamp.slot,
        )?;
        for payer in &touched {
            self.resources.verify_account_ram_usage(*payer)?;
        }

        Ok(AppliedTransaction {
            receipt: TransactionReceipt {
                header: TransactionReceiptHeader {
                    status: TransactionStatus::Executed,
                    cpu_usage_us,
                    net_usage_words: VarUint32(net_usage_words),
                },
                trx: ReceiptTrx::Packed(packed.clone()),
            },
            action_receipts,
        })
    }

    /// NET in 8-byte words: receipt overhead plus both halves of the packed
    /// transaction, rounded up.
    fn bill_net(&self, packed: &PackedTransaction, trx: &Transaction) -> Result<u32> {
        let bytes =
            BASE_PER_TRANSACTION_NET_USAGE + packed.unprunable_size() + packed.prunable_size();
        let words = bytes.div_ceil(8);
        let billed = words * 8;

        let mut limit = u64::from(self.config.max_transaction_net_usage);
        if trx.header.max_net_usage_words.0 > 0 {
            limit = limit.min(u64::from(trx.header.max_net_usage_words.0) * 8);
        }
        if billed > limit {
            return Err(ControllerError::NetLimitExceeded {
                used: billed,
                limit,
            });
        }
        u32::try_from(words).map_err(|_| ControllerError::NetLimitExceeded {
            used: billed,
            limit,
        })
    }

    fn bill_cpu(&self, trx: &Transaction, billed_cpu_us: u32) -> Result<u32> {
        let billed = billed_cpu_us.max(self.config.min_transaction_cpu_usage_us);
        let mut limit = u64::from(self.config.max_transaction_cpu_usage_us);
        if trx.header.max_cpu_usage_ms > 0 {
            limit = limit.min(u64::from(trx.header.max_cpu_usage_ms) * 1_000);
        }
        if u64::from(billed) > limit {
            return Err(ControllerError::CpuLimitExceeded {
                billed: u64::from(billed),
                limit,
            });
        }
        Ok(billed)
    }

    /// Run `action` for its account and every account notified along the
    /// way, recording one receipt per receiver.
    fn execute_action(
        &self,
        action: &Action,
        context_free: bool,
        touched: &mut BTreeSet<Name>,
        receipts: &mut Vec<ActionReceipt>,
    ) -> Result<()> {
        if find_account(&self.store, action.account)?.is_none() {
            return Err(ControllerError::UnknownAccount(action.account));
        }

        let mut queue = VecDeque::from([action.account]);
        let mut delivered = BTreeSet::from([action.account]);
        while let Some(receiver) = queue.pop_front() {
            let notified = match self.handlers.get(receiver) {
                Some(handler) => {
                    let mut ctx = ApplyContext {
                        receiver,
                        action,
                        context_free,
                        store: &self.store,
                        billing: &self.config.billing,
                        ram: RamTracker {
                            resources: &self.resources,
                            touched: &mut *touched,
                        },
                        notified: Vec::new(),
                    };
                    handler
                        .apply(&mut ctx)
                        .map_err(|source| ControllerError::Apply {
                            receiver,
                            account: action.account,
                            action: action.name,
                            source,
                        })?;
                    ctx.notified
                }
                None => Vec::new(),
            };
            receipts.push(self.record_action(receiver, action)?);
            for account in notified {
                if delivered.insert(account) {
                    queue.push_back(account);
                }
            }
        }
        Ok(())
    }

    /// Advance the global, receiver and authorizer sequences and build the
    /// receipt for `receiver`.
    fn record_action(&self, receiver: Name, action: &Action) -> Result<ActionReceipt> {
        let global = self.store.modify(0, |g: &mut GlobalSequence| {
            g.global_action_sequence += 1;
        })?;

        let recv = self.find_sequence(receiver)?;
        let recv = self.store.modify(recv.id, |s: &mut AccountSequence| {
            s.recv_sequence += 1;
        })?;

        let mut auth_sequence = BTreeMap::new();
        for level in &action.authorization {
            let seq = self.find_sequence(level.actor)?;
            let seq = self.store.modify(seq.id, |s: &mut AccountSequence| {
                s.auth_sequence += 1;
            })?;
            auth_sequence.insert(level.actor, seq.auth_sequence);
        }

        Ok(ActionReceipt {
            receiver,
            act_digest: action.digest(),
            global_sequence: global.global_action_sequence,
            recv_sequence: recv.recv_sequence,
            auth_sequence,
            code_sequence: VarUint32(truncate_sequence(recv.code_sequence)),
            abi_sequence: VarUint32(truncate_sequence(recv.abi_sequence)),
        })
    }

    fn find_sequence(&self, account: Name) -> Result<AccountSequence> {
        let mut key = KeyEncoder::new();
        key.name(account);
        self.store
            .find_by("by_name", &key)?
            .ok_or(ControllerError::UnknownAccount(account))
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("chain_id", &self.config.chain_id)
            .field("handlers", &self.handlers)
            .field("pending", &self.pending.as_ref().map(|p| p.header.block_num()))
            .finish()
    }
}

fn find_account(store: &ChainStore, name: Name) -> std::result::Result<Option<Account>, StoreError> {
    let mut key = KeyEncoder::new();
    key.name(name);
    store.find_by("by_name", &key)
}

fn check_expiration(trx: &Transaction, block_time: BlockTimestamp) -> Result<()> {
    let now = TimePointSec::from(block_time).0;
    let expiration = trx.header.expiration.0;
    if expiration < now {
        return Err(ControllerError::Expired { expiration, now });
    }
    if expiration > now.saturating_add(MAX_TRANSACTION_LIFETIME_SECS) {
        return Err(ControllerError::ExpirationTooFar { expiration, now });
    }
    Ok(())
}

fn truncate_sequence(sequence: u64) -> u32 {
    u32::try_from(sequence).unwrap_or(u32::MAX)
}
