//! Fixed-point helpers shared by the accumulators and elastic limits.

use serde::{Deserialize, Serialize};

use super::ResourceError;

/// A `numerator / denominator` scaling factor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratio {
    pub numerator: u64,
    pub denominator: u64,
}

impl Ratio {
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// `value * numerator / denominator`, rounding down.
    ///
    /// Fails instead of wrapping when `value * numerator` leaves `u64`.
    pub fn mul(&self, value: u64) -> Result<u64, ResourceError> {
        if self.denominator == 0 {
            return Err(ResourceError::ZeroDenominator);
        }
        if self.numerator != 0 && u64::MAX / self.numerator < value {
            return Err(ResourceError::RatioOverflow);
        }
        Ok(value * self.numerator / self.denominator)
    }
}

/// `ceil(num / den)`. `den` must be non-zero.
pub fn integer_divide_ceil(num: u128, den: u128) -> u128 {
    num / den + u128::from(num % den > 0)
}

/// `ceil(value * numerator / denominator)` in 128-bit intermediates.
pub fn integer_multiply_ceil(value: u64, numerator: u64, denominator: u64) -> u128 {
    integer_divide_ceil(u128::from(value) * u128::from(numerator), u128::from(denominator))
}

/// Narrow a wide intermediate back to signed billing units.
pub fn downgrade_cast(value: u128) -> Result<i64, ResourceError> {
    i64::try_from(value).map_err(|_| ResourceError::DowngradeOverflow(value))
}
