//! # Chain Configuration & Constants
//!
//! Every consensus-visible number in the ledger lives here. Changing any of
//! them changes what validators compute for the same block, so treat edits
//! the way you would treat a hard fork: versioned, announced, migrated.
//!
//! [`ChainConfig`] is the runtime bundle loaded from a JSON file at startup.
//! It is validated once at load; a failure there is fatal to the process,
//! unlike every other error in this crate which is scoped to a transaction.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::hash::Digest;
use crate::resource::{ElasticLimitParameters, Ratio, ResourceLimitsConfig};
use crate::tables::BillingConfig;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Block production interval. Block timestamps are counted in slots of
/// this length.
pub const BLOCK_INTERVAL_MS: u64 = 500;

/// Unix time (ms) of slot zero: 2000-01-01T00:00:00Z.
pub const BLOCK_TIMESTAMP_EPOCH_MS: i64 = 946_684_800_000;

// ---------------------------------------------------------------------------
// Resource metering
// ---------------------------------------------------------------------------

/// Fixed-point scale applied to usage accumulators.
pub const RATE_LIMITING_PRECISION: u64 = 1_000 * 1_000;

/// Averaging window for per-account CPU/NET usage (24h worth of slots).
pub const ACCOUNT_USAGE_AVERAGE_WINDOW_SLOTS: u32 =
    (24 * 60 * 60 * 1000 / BLOCK_INTERVAL_MS) as u32;

/// Averaging window (in blocks) for block-level CPU and NET usage (1 minute).
pub const BLOCK_USAGE_AVERAGE_WINDOW_BLOCKS: u32 = (60 * 1000 / BLOCK_INTERVAL_MS) as u32;

/// Default hard ceiling of CPU microseconds per block.
pub const DEFAULT_MAX_BLOCK_CPU_USAGE: u64 = 200_000;

/// Default hard ceiling of NET bytes per block.
pub const DEFAULT_MAX_BLOCK_NET_USAGE: u64 = 1024 * 1024;

/// Target utilisation as a percentage of the maximum, in basis points.
pub const DEFAULT_TARGET_BLOCK_USAGE_PCT: u64 = 1_000;

/// Maximum factor by which an elastic limit may grow above its max.
pub const MAXIMUM_ELASTIC_RESOURCE_MULTIPLIER: u32 = 1_000;

/// Shrink rate applied while the network is congested.
pub const DEFAULT_CONTRACT_RATE: Ratio = Ratio::new(99, 100);

/// Growth rate applied while the network is under target.
pub const DEFAULT_EXPAND_RATE: Ratio = Ratio::new(1_000, 999);

/// Smallest CPU bill any transaction pays, in microseconds.
pub const MIN_TRANSACTION_CPU_USAGE_US: u32 = 100;

/// Default per-transaction CPU cap, in microseconds.
pub const DEFAULT_MAX_TRANSACTION_CPU_USAGE_US: u32 = 150_000;

/// Default per-transaction NET cap, in bytes.
pub const DEFAULT_MAX_TRANSACTION_NET_USAGE: u32 = (DEFAULT_MAX_BLOCK_NET_USAGE / 2) as u32;

/// Bytes every packed transaction is billed on top of its payload.
pub const FIXED_NET_OVERHEAD_OF_PACKED_TRX: u64 = 16;

/// Bytes every transaction receipt adds to a block.
pub const BASE_PER_TRANSACTION_NET_USAGE: u64 = 12;

/// Latest expiration a transaction may carry, in seconds past block time.
pub const MAX_TRANSACTION_LIFETIME_SECS: u32 = 60 * 60;

// ---------------------------------------------------------------------------
// RAM billing
// ---------------------------------------------------------------------------

/// Version of the billing constants below. Bump together with any of them.
pub const BILLING_VERSION: u16 = 1;

/// Bytes charged per index a stored row participates in.
pub const OVERHEAD_PER_ROW_PER_INDEX_RAM_BYTES: u64 = 32;

/// Row footprints are rounded up to this many bytes.
pub const ROW_ALIGNMENT_BYTES: u64 = 16;

/// Bytes charged to an account for its own bookkeeping records.
pub const OVERHEAD_PER_ACCOUNT_RAM_BYTES: u64 = 2 * 1024;

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Upper bound on a decompressed transaction or context-free payload.
pub const MAX_DECOMPRESSED_BYTES: usize = 10 * 1024 * 1024;

/// Default wall-clock budget for recovering all signature keys of one
/// transaction.
pub const DEFAULT_SIGNATURE_RECOVERY_BUDGET: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Configuration problems detected at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ChainConfig
// ---------------------------------------------------------------------------

/// Everything a node needs to agree with its peers on billing and digests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Chain identifier mixed into every signing digest.
    pub chain_id: Digest,
    /// Elastic limits and averaging windows.
    pub resource_limits: ResourceLimitsConfig,
    /// RAM billing constants.
    pub billing: BillingConfig,
    /// Per-transaction CPU ceiling in microseconds.
    pub max_transaction_cpu_usage_us: u32,
    /// Per-transaction NET ceiling in bytes.
    pub max_transaction_net_usage: u32,
    /// Smallest CPU bill in microseconds.
    pub min_transaction_cpu_usage_us: u32,
    /// Budget for signature recovery, in milliseconds.
    pub signature_recovery_budget_ms: u64,
    /// Whether two signatures may recover the same key.
    pub allow_duplicate_signature_keys: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: Digest::ZERO,
            resource_limits: ResourceLimitsConfig::default(),
            billing: BillingConfig::default(),
            max_transaction_cpu_usage_us: DEFAULT_MAX_TRANSACTION_CPU_USAGE_US,
            max_transaction_net_usage: DEFAULT_MAX_TRANSACTION_NET_USAGE,
            min_transaction_cpu_usage_us: MIN_TRANSACTION_CPU_USAGE_US,
            signature_recovery_budget_ms: DEFAULT_SIGNATURE_RECOVERY_BUDGET.as_millis() as u64,
            allow_duplicate_signature_keys: false,
        }
    }
}

impl ChainConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the metering engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resource_limits.validate()?;
        self.billing.validate()?;
        if self.min_transaction_cpu_usage_us > self.max_transaction_cpu_usage_us {
            return Err(ConfigError::invalid(
                "min_transaction_cpu_usage_us",
                "exceeds max_transaction_cpu_usage_us",
            ));
        }
        if self.signature_recovery_budget_ms == 0 {
            return Err(ConfigError::invalid(
                "signature_recovery_budget_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Signature recovery budget as a `Duration`.
    pub fn signature_recovery_budget(&self) -> Duration {
        Duration::from_millis(self.signature_recovery_budget_ms)
    }
}

/// Default elastic parameters for a resource whose block maximum is `max`.
pub const fn default_elastic_parameters(max: u64) -> ElasticLimitParameters {
    ElasticLimitParameters {
        target: max * DEFAULT_TARGET_BLOCK_USAGE_PCT / 10_000,
        max,
        periods: BLOCK_USAGE_AVERAGE_WINDOW_BLOCKS,
        max_multiplier: MAXIMUM_ELASTIC_RESOURCE_MULTIPLIER,
        contract_rate: DEFAULT_CONTRACT_RATE,
        expand_rate: DEFAULT_EXPAND_RATE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        ChainConfig::default().validate().expect("defaults must be valid");
    }

    #[test]
    fn window_constants() {
        assert_eq!(ACCOUNT_USAGE_AVERAGE_WINDOW_SLOTS, 172_800);
        assert_eq!(BLOCK_USAGE_AVERAGE_WINDOW_BLOCKS, 120);
    }

    #[test]
    fn default_targets_are_ten_percent() {
        let cpu = default_elastic_parameters(DEFAULT_MAX_BLOCK_CPU_USAGE);
        assert_eq!(cpu.target, 20_000);
        let net = default_elastic_parameters(DEFAULT_MAX_BLOCK_NET_USAGE);
        assert_eq!(net.target, 104_857);
    }

    #[test]
    fn json_roundtrip_with_partial_document() {
        let config = ChainConfig::from_json_str(r#"{ "max_transaction_cpu_usage_us": 5000 }"#)
            .expect("partial config should fill defaults");
        assert_eq!(config.max_transaction_cpu_usage_us, 5_000);
        assert_eq!(config.billing, BillingConfig::default());
    }

    #[test]
    fn zero_period_rejected_at_load() {
        let mut config = ChainConfig::default();
        config.resource_limits.cpu_limit_parameters.periods = 0;
        let json = serde_json::to_string(&config).unwrap();
        let err = ChainConfig::from_json_str(&json).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn zero_denominator_rejected_at_load() {
        let mut config = ChainConfig::default();
        config.resource_limits.net_limit_parameters.expand_rate = Ratio::new(1, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn min_cpu_above_max_rejected() {
        let config = ChainConfig {
            min_transaction_cpu_usage_us: 10,
            max_transaction_cpu_usage_us: 5,
            ..ChainConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
