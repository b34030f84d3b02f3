//! Elastic block capacity.
//!
//! The virtual limit shrinks by `contract_rate` while the block average is
//! above target and grows by `expand_rate` otherwise, always staying within
//! `[max, max * max_multiplier]`.

use serde::{Deserialize, Serialize};

use super::ratio::Ratio;
use super::ResourceError;
use crate::config::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElasticLimitParameters {
    /// Desired average usage per block.
    pub target: u64,
    /// Hard per-block maximum, also the floor of the virtual limit.
    pub max: u64,
    /// Averaging window of the block usage EMA, in blocks.
    pub periods: u32,
    pub max_multiplier: u32,
    pub contract_rate: Ratio,
    pub expand_rate: Ratio,
}

impl ElasticLimitParameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.periods == 0 {
            return Err(ConfigError::invalid("elastic periods", "must be greater than zero"));
        }
        if self.contract_rate.denominator == 0 {
            return Err(ConfigError::invalid(
                "elastic contract_rate",
                "denominator must be greater than zero",
            ));
        }
        if self.expand_rate.denominator == 0 {
            return Err(ConfigError::invalid(
                "elastic expand_rate",
                "denominator must be greater than zero",
            ));
        }
        if self.max_multiplier == 0 {
            return Err(ConfigError::invalid(
                "elastic max_multiplier",
                "must be greater than zero",
            ));
        }
        if self.ceiling().is_none() {
            return Err(ConfigError::invalid(
                "elastic max",
                format!("{} * {} overflows", self.max, self.max_multiplier),
            ));
        }
        Ok(())
    }

    /// `max * max_multiplier`, if representable.
    pub fn ceiling(&self) -> Option<u64> {
        self.max.checked_mul(u64::from(self.max_multiplier))
    }
}

/// Next virtual limit given the current one and the block usage average.
pub fn update_elastic_limit(
    current_limit: u64,
    average_usage: u64,
    params: &ElasticLimitParameters,
) -> Result<u64, ResourceError> {
    let scaled = if average_usage > params.target {
        params.contract_rate.mul(current_limit)?
    } else {
        params.expand_rate.mul(current_limit)?
    };
    let ceiling = params.ceiling().ok_or(ResourceError::ElasticCeilingOverflow)?;
    Ok(scaled.max(params.max).min(ceiling))
}
