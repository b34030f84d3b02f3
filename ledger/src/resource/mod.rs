//! Resource metering: windowed usage averages, elastic block capacity,
//! and per-account CPU/NET/RAM accounting.

mod accumulator;
mod elastic;
mod error;
mod limits;
mod ratio;

pub use accumulator::UsageAccumulator;
pub use elastic::{update_elastic_limit, ElasticLimitParameters};
pub use error::ResourceError;
pub use limits::{
    AccountLimits, AccountResourceLimit, ResourceLimits, ResourceLimitsConfig,
    ResourceLimitsManager, ResourceLimitsState, ResourceUsage,
};
pub use ratio::{downgrade_cast, integer_divide_ceil, integer_multiply_ceil, Ratio};
