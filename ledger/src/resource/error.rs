use thiserror::Error;

use crate::chain::Name;
use crate::storage::StoreError;

/// Metering failures. Every variant is fatal to the transaction that
/// triggered it; nothing here is retried or saturated away.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("usage of {units} units exceeds the accumulator range")]
    UsageOverflow { units: u64 },

    #[error("consumed usage would overflow")]
    ConsumedOverflow,

    #[error("scaled usage value would overflow")]
    ValueOverflow,

    #[error("ratio multiplication would overflow")]
    RatioOverflow,

    #[error("ratio has a zero denominator")]
    ZeroDenominator,

    #[error("value {0} does not fit in a signed 64-bit integer")]
    DowngradeOverflow(u128),

    #[error("ordinal {ordinal} is before the last recorded ordinal {last}")]
    NonMonotonicOrdinal { last: u32, ordinal: u32 },

    #[error("averaging window must be non-zero")]
    InvalidWindow,

    #[error("elastic ceiling max * max_multiplier overflows")]
    ElasticCeilingOverflow,

    #[error("{account} exceeded its CPU allowance: used {used}, allowed {allowed} in window")]
    TxCpuUsageExceeded { account: Name, used: u128, allowed: u128 },

    #[error("{account} exceeded its NET allowance: used {used}, allowed {allowed} in window")]
    TxNetUsageExceeded { account: Name, used: u128, allowed: u128 },

    #[error("block {resource} exhausted: pending {pending}, limit {limit}")]
    BlockResourceExhausted {
        resource: &'static str,
        pending: u64,
        limit: u64,
    },

    #[error("{account} uses {usage} bytes of RAM, quota is {quota}")]
    RamUsageExceeded { account: Name, usage: u64, quota: i64 },

    #[error("RAM usage of {0} would overflow")]
    RamUsageOverflow(Name),

    #[error("RAM usage of {0} would go negative")]
    RamUsageUnderflow(Name),

    #[error("{0} has no resource records")]
    UnknownAccount(Name),

    #[error("{0} already has resource records")]
    AlreadyInitialized(Name),

    #[error("resource limits are not initialized")]
    NotInitialized,

    #[error(transparent)]
    Store(#[from] StoreError),
}
