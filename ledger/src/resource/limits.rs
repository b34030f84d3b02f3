//! # Resource Limits Manager
//!
//! Per-account CPU/NET averages, RAM usage and quotas, and the block-level
//! elastic capacity they are measured against. All state lives in the
//! [`ChainStore`], so every change made while a transaction is applied is
//! rolled back with that transaction's undo session.
//!
//! An account's CPU (or NET) allowance over one averaging window is its
//! share of the window's virtual capacity:
//!
//! ```text
//! allowed = virtual_limit * window * weight / total_weight
//! used    = value_ex * window / precision
//! ```
//!
//! A weight of `-1` means unlimited.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::accumulator::UsageAccumulator;
use super::elastic::{update_elastic_limit, ElasticLimitParameters};
use super::ratio::{downgrade_cast, integer_divide_ceil};
use super::ResourceError;
use crate::chain::Name;
use crate::config::{
    default_elastic_parameters, ConfigError, ACCOUNT_USAGE_AVERAGE_WINDOW_SLOTS,
    DEFAULT_MAX_BLOCK_CPU_USAGE, DEFAULT_MAX_BLOCK_NET_USAGE, RATE_LIMITING_PRECISION,
};
use crate::storage::{primary_index, ChainStore, Entity, IndexSpec, KeyEncoder, ObjectType};

type Result<T> = std::result::Result<T, ResourceError>;

/// Id of the singleton config and state records.
const SINGLETON_ID: u64 = 0;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Staked weights and RAM quota of one account. `-1` means unlimited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub id: u64,
    pub owner: Name,
    pub net_weight: i64,
    pub cpu_weight: i64,
    pub ram_bytes: i64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            id: 0,
            owner: Name::default(),
            net_weight: -1,
            cpu_weight: -1,
            ram_bytes: -1,
        }
    }
}

fn owner_key(owner: Name, key: &mut KeyEncoder) {
    key.name(owner);
}

impl Entity for ResourceLimits {
    const OBJECT_TYPE: ObjectType = ObjectType::ResourceLimits;
    const INDEXES: &'static [IndexSpec<Self>] = &[
        primary_index::<Self>(),
        IndexSpec {
            name: "by_owner",
            fields: &["owner"],
            unique: true,
            extract: |row, key| owner_key(row.owner, key),
        },
    ];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// Measured usage of one account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub id: u64,
    pub owner: Name,
    pub net_usage: UsageAccumulator,
    pub cpu_usage: UsageAccumulator,
    pub ram_usage: u64,
}

impl Entity for ResourceUsage {
    const OBJECT_TYPE: ObjectType = ObjectType::ResourceUsage;
    const INDEXES: &'static [IndexSpec<Self>] = &[
        primary_index::<Self>(),
        IndexSpec {
            name: "by_owner",
            fields: &["owner"],
            unique: true,
            extract: |row, key| owner_key(row.owner, key),
        },
    ];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// Chain-wide metering parameters. Stored as a singleton.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimitsConfig {
    #[serde(skip)]
    pub id: u64,
    pub cpu_limit_parameters: ElasticLimitParameters,
    pub net_limit_parameters: ElasticLimitParameters,
    pub account_cpu_usage_average_window: u32,
    pub account_net_usage_average_window: u32,
}

impl Default for ResourceLimitsConfig {
    fn default() -> Self {
        Self {
            id: SINGLETON_ID,
            cpu_limit_parameters: default_elastic_parameters(DEFAULT_MAX_BLOCK_CPU_USAGE),
            net_limit_parameters: default_elastic_parameters(DEFAULT_MAX_BLOCK_NET_USAGE),
            account_cpu_usage_average_window: ACCOUNT_USAGE_AVERAGE_WINDOW_SLOTS,
            account_net_usage_average_window: ACCOUNT_USAGE_AVERAGE_WINDOW_SLOTS,
        }
    }
}

impl ResourceLimitsConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.cpu_limit_parameters.validate()?;
        self.net_limit_parameters.validate()?;
        if self.account_cpu_usage_average_window == 0 {
            return Err(ConfigError::invalid(
                "account_cpu_usage_average_window",
                "must be greater than zero",
            ));
        }
        if self.account_net_usage_average_window == 0 {
            return Err(ConfigError::invalid(
                "account_net_usage_average_window",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Entity for ResourceLimitsConfig {
    const OBJECT_TYPE: ObjectType = ObjectType::ResourceLimitsConfig;
    const INDEXES: &'static [IndexSpec<Self>] = &[primary_index::<Self>()];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// Block-level averages, pending usage and totals. Stored as a singleton.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimitsState {
    pub id: u64,
    pub average_block_net_usage: UsageAccumulator,
    pub average_block_cpu_usage: UsageAccumulator,
    /// Usage added by transactions of the block being built.
    pub pending_net_usage: u64,
    pub pending_cpu_usage: u64,
    pub total_net_weight: u64,
    pub total_cpu_weight: u64,
    pub total_ram_bytes: u64,
    /// Elastic capacity accounts are billed against.
    pub virtual_net_limit: u64,
    pub virtual_cpu_limit: u64,
}

impl Entity for ResourceLimitsState {
    const OBJECT_TYPE: ObjectType = ObjectType::ResourceLimitsState;
    const INDEXES: &'static [IndexSpec<Self>] = &[primary_index::<Self>()];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

/// Quota triple of an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLimits {
    pub ram_bytes: i64,
    pub net_weight: i64,
    pub cpu_weight: i64,
}

/// Window usage report for one resource. All `-1` when unlimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountResourceLimit {
    pub used: i64,
    pub available: i64,
    pub max: i64,
}

impl AccountResourceLimit {
    pub const UNLIMITED: Self = Self {
        used: -1,
        available: -1,
        max: -1,
    };
}

#[derive(Clone, Copy)]
enum Resource {
    Cpu,
    Net,
}

// ---------------------------------------------------------------------------
// ResourceLimitsManager
// ---------------------------------------------------------------------------

/// Metering engine over the chain store.
#[derive(Clone, Debug)]
pub struct ResourceLimitsManager {
    store: ChainStore,
}

impl ResourceLimitsManager {
    pub fn new(store: ChainStore) -> Self {
        Self { store }
    }

    /// Create the config and state singletons. A store that already has
    /// them is left untouched.
    pub fn initialize_database(&self, config: &ResourceLimitsConfig) -> Result<()> {
        if self.is_initialized()? {
            return Ok(());
        }
        self.store.insert(&ResourceLimitsConfig {
            id: SINGLETON_ID,
            ..config.clone()
        })?;
        self.store.insert(&ResourceLimitsState {
            id: SINGLETON_ID,
            virtual_cpu_limit: config.cpu_limit_parameters.max,
            virtual_net_limit: config.net_limit_parameters.max,
            ..ResourceLimitsState::default()
        })?;
        info!(
            cpu_max = config.cpu_limit_parameters.max,
            net_max = config.net_limit_parameters.max,
            "resource limits initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.store.get::<ResourceLimitsState>(SINGLETON_ID)?.is_some())
    }

    pub fn config(&self) -> Result<ResourceLimitsConfig> {
        self.store
            .get(SINGLETON_ID)?
            .ok_or(ResourceError::NotInitialized)
    }

    /// Replace the metering parameters. Takes effect at the next block.
    pub fn set_config(&self, config: &ResourceLimitsConfig) -> Result<()> {
        self.config()?;
        self.store.put(&ResourceLimitsConfig {
            id: SINGLETON_ID,
            ..config.clone()
        })?;
        Ok(())
    }

    pub fn state(&self) -> Result<ResourceLimitsState> {
        self.store
            .get(SINGLETON_ID)?
            .ok_or(ResourceError::NotInitialized)
    }

    fn find_limits(&self, account: Name) -> Result<ResourceLimits> {
        let mut key = KeyEncoder::new();
        owner_key(account, &mut key);
        self.store
            .find_by("by_owner", &key)?
            .ok_or(ResourceError::UnknownAccount(account))
    }

    fn find_usage(&self, account: Name) -> Result<ResourceUsage> {
        let mut key = KeyEncoder::new();
        owner_key(account, &mut key);
        self.store
            .find_by("by_owner", &key)?
            .ok_or(ResourceError::UnknownAccount(account))
    }

    /// Create unlimited quota and empty usage records for a new account.
    pub fn initialize_account(&self, account: Name) -> Result<()> {
        if self.find_limits(account).is_ok() {
            return Err(ResourceError::AlreadyInitialized(account));
        }
        self.store.create::<ResourceLimits>(|row| row.owner = account)?;
        self.store.create::<ResourceUsage>(|row| row.owner = account)?;
        debug!(%account, "resource records created");
        Ok(())
    }

    /// Set quotas and keep the chain-wide totals in step. Returns whether the
    /// RAM quota went down, in which case the caller should re-verify usage.
    pub fn set_account_limits(
        &self,
        account: Name,
        ram_bytes: i64,
        net_weight: i64,
        cpu_weight: i64,
    ) -> Result<bool> {
        let limits = self.find_limits(account)?;
        let mut state = self.state()?;

        let positive = |v: i64| v.max(0) as u64;
        let rebalance = |total: u64, old: i64, new: i64| {
            total.saturating_sub(positive(old)).saturating_add(positive(new))
        };
        state.total_ram_bytes = rebalance(state.total_ram_bytes, limits.ram_bytes, ram_bytes);
        state.total_net_weight = rebalance(state.total_net_weight, limits.net_weight, net_weight);
        state.total_cpu_weight = rebalance(state.total_cpu_weight, limits.cpu_weight, cpu_weight);

        let decreased = ram_bytes >= 0 && (limits.ram_bytes < 0 || ram_bytes < limits.ram_bytes);

        self.store.put(&ResourceLimits {
            ram_bytes,
            net_weight,
            cpu_weight,
            ..limits
        })?;
        self.store.put(&state)?;
        debug!(%account, ram_bytes, net_weight, cpu_weight, "account limits set");
        Ok(decreased)
    }

    pub fn get_account_limits(&self, account: Name) -> Result<AccountLimits> {
        let limits = self.find_limits(account)?;
        Ok(AccountLimits {
            ram_bytes: limits.ram_bytes,
            net_weight: limits.net_weight,
            cpu_weight: limits.cpu_weight,
        })
    }

    /// Bill a transaction's CPU and NET to every account in `accounts` at
    /// time slot `ordinal`, then add it to the block's pending usage.
    pub fn add_transaction_usage(
        &self,
        accounts: &BTreeSet<Name>,
        cpu_usage: u64,
        net_usage: u64,
        ordinal: u32,
    ) -> Result<()> {
        let config = self.config()?;
        let mut state = self.state()?;
        let mut updated = Vec::with_capacity(accounts.len());

        for &account in accounts {
            let mut usage = self.find_usage(account)?;
            let limits = self.find_limits(account)?;

            usage
                .net_usage
                .add(net_usage, ordinal, config.account_net_usage_average_window)?;
            usage
                .cpu_usage
                .add(cpu_usage, ordinal, config.account_cpu_usage_average_window)?;

            check_window(
                account,
                Resource::Cpu,
                &usage.cpu_usage,
                limits.cpu_weight,
                state.total_cpu_weight,
                state.virtual_cpu_limit,
                config.account_cpu_usage_average_window,
            )?;
            check_window(
                account,
                Resource::Net,
                &usage.net_usage,
                limits.net_weight,
                state.total_net_weight,
                state.virtual_net_limit,
                config.account_net_usage_average_window,
            )?;

            updated.push(usage);
        }

        state.pending_cpu_usage = state
            .pending_cpu_usage
            .checked_add(cpu_usage)
            .ok_or(ResourceError::ValueOverflow)?;
        state.pending_net_usage = state
            .pending_net_usage
            .checked_add(net_usage)
            .ok_or(ResourceError::ValueOverflow)?;

        if state.pending_cpu_usage > config.cpu_limit_parameters.max {
            return Err(ResourceError::BlockResourceExhausted {
                resource: "cpu",
                pending: state.pending_cpu_usage,
                limit: config.cpu_limit_parameters.max,
            });
        }
        if state.pending_net_usage > config.net_limit_parameters.max {
            return Err(ResourceError::BlockResourceExhausted {
                resource: "net",
                pending: state.pending_net_usage,
                limit: config.net_limit_parameters.max,
            });
        }

        // Nothing is written until every check has passed.
        for usage in &updated {
            self.store.put(usage)?;
        }
        self.store.put(&state)?;
        Ok(())
    }

    /// Adjust an account's RAM usage by `delta` bytes.
    pub fn add_pending_ram_usage(&self, account: Name, delta: i64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        let mut usage = self.find_usage(account)?;
        usage.ram_usage = if delta > 0 {
            usage
                .ram_usage
                .checked_add(delta.unsigned_abs())
                .ok_or(ResourceError::RamUsageOverflow(account))?
        } else {
            usage
                .ram_usage
                .checked_sub(delta.unsigned_abs())
                .ok_or(ResourceError::RamUsageUnderflow(account))?
        };
        self.store.put(&usage)?;
        Ok(())
    }

    /// Fail if the account holds more RAM than its quota allows.
    pub fn verify_account_ram_usage(&self, account: Name) -> Result<()> {
        let limits = self.find_limits(account)?;
        let usage = self.find_usage(account)?;
        if limits.ram_bytes >= 0 && usage.ram_usage > limits.ram_bytes as u64 {
            return Err(ResourceError::RamUsageExceeded {
                account,
                usage: usage.ram_usage,
                quota: limits.ram_bytes,
            });
        }
        Ok(())
    }

    pub fn get_account_ram_usage(&self, account: Name) -> Result<u64> {
        Ok(self.find_usage(account)?.ram_usage)
    }

    /// Fold the finished block's pending usage into the block averages and
    /// move the virtual limits.
    pub fn process_block_usage(&self, block_num: u32) -> Result<()> {
        let config = self.config()?;
        let mut state = self.state()?;

        state.average_block_cpu_usage.add(
            state.pending_cpu_usage,
            block_num,
            config.cpu_limit_parameters.periods,
        )?;
        state.virtual_cpu_limit = update_elastic_limit(
            state.virtual_cpu_limit,
            state.average_block_cpu_usage.average(),
            &config.cpu_limit_parameters,
        )?;
        state.pending_cpu_usage = 0;

        state.average_block_net_usage.add(
            state.pending_net_usage,
            block_num,
            config.net_limit_parameters.periods,
        )?;
        state.virtual_net_limit = update_elastic_limit(
            state.virtual_net_limit,
            state.average_block_net_usage.average(),
            &config.net_limit_parameters,
        )?;
        state.pending_net_usage = 0;

        self.store.put(&state)?;
        debug!(
            block_num,
            virtual_cpu_limit = state.virtual_cpu_limit,
            virtual_net_limit = state.virtual_net_limit,
            "block usage processed"
        );
        Ok(())
    }

    pub fn get_virtual_block_cpu_limit(&self) -> Result<u64> {
        Ok(self.state()?.virtual_cpu_limit)
    }

    pub fn get_virtual_block_net_limit(&self) -> Result<u64> {
        Ok(self.state()?.virtual_net_limit)
    }

    /// CPU still available in the block being built.
    pub fn get_block_cpu_limit(&self) -> Result<u64> {
        let config = self.config()?;
        let state = self.state()?;
        Ok(config
            .cpu_limit_parameters
            .max
            .saturating_sub(state.pending_cpu_usage))
    }

    /// NET still available in the block being built.
    pub fn get_block_net_limit(&self) -> Result<u64> {
        let config = self.config()?;
        let state = self.state()?;
        Ok(config
            .net_limit_parameters
            .max
            .saturating_sub(state.pending_net_usage))
    }

    pub fn get_total_cpu_weight(&self) -> Result<u64> {
        Ok(self.state()?.total_cpu_weight)
    }

    pub fn get_total_net_weight(&self) -> Result<u64> {
        Ok(self.state()?.total_net_weight)
    }

    pub fn get_account_cpu_limit(&self, account: Name) -> Result<AccountResourceLimit> {
        let config = self.config()?;
        let state = self.state()?;
        let limits = self.find_limits(account)?;
        let usage = self.find_usage(account)?;
        window_report(
            &usage.cpu_usage,
            limits.cpu_weight,
            state.total_cpu_weight,
            state.virtual_cpu_limit,
            config.account_cpu_usage_average_window,
        )
    }

    pub fn get_account_net_limit(&self, account: Name) -> Result<AccountResourceLimit> {
        let config = self.config()?;
        let state = self.state()?;
        let limits = self.find_limits(account)?;
        let usage = self.find_usage(account)?;
        window_report(
            &usage.net_usage,
            limits.net_weight,
            state.total_net_weight,
            state.virtual_net_limit,
            config.account_net_usage_average_window,
        )
    }
}

/// `(used, allowed)` for one account over one window, or `None` when the
/// account is unmetered.
fn window_usage(
    usage: &UsageAccumulator,
    weight: i64,
    total_weight: u64,
    virtual_limit: u64,
    window: u32,
) -> Option<(u128, u128)> {
    if weight < 0 || total_weight == 0 {
        return None;
    }
    let window = u128::from(window);
    let capacity = u128::from(virtual_limit) * window;
    let allowed = capacity * weight as u128 / u128::from(total_weight);
    let used = integer_divide_ceil(
        u128::from(usage.value_ex) * window,
        u128::from(RATE_LIMITING_PRECISION),
    );
    Some((used, allowed))
}

fn check_window(
    account: Name,
    resource: Resource,
    usage: &UsageAccumulator,
    weight: i64,
    total_weight: u64,
    virtual_limit: u64,
    window: u32,
) -> Result<()> {
    let Some((used, allowed)) = window_usage(usage, weight, total_weight, virtual_limit, window)
    else {
        return Ok(());
    };
    if used > allowed {
        return Err(match resource {
            Resource::Cpu => ResourceError::TxCpuUsageExceeded {
                account,
                used,
                allowed,
            },
            Resource::Net => ResourceError::TxNetUsageExceeded {
                account,
                used,
                allowed,
            },
        });
    }
    Ok(())
}

fn window_report(
    usage: &UsageAccumulator,
    weight: i64,
    total_weight: u64,
    virtual_limit: u64,
    window: u32,
) -> Result<AccountResourceLimit> {
    let Some((used, allowed)) = window_usage(usage, weight, total_weight, virtual_limit, window)
    else {
        return Ok(AccountResourceLimit::UNLIMITED);
    };
    let available = if allowed <= used { 0 } else { downgrade_cast(allowed - used)? };
    Ok(AccountResourceLimit {
        used: downgrade_cast(used)?,
        available,
        max: downgrade_cast(allowed)?,
    })
}

/// RAM charges from table mutations flow straight into pending usage.
impl crate::tables::RamBilling for ResourceLimitsManager {
    fn update_ram_usage(&mut self, payer: Name, delta: i64) -> Result<()> {
        self.add_pending_ram_usage(payer, delta)
    }
}
