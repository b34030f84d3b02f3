//! Exponential moving average of usage over a sliding window of ordinals.
//!
//! `value_ex` holds the average scaled by [`RATE_LIMITING_PRECISION`].
//! Each new ordinal decays it linearly by the fraction of the window that
//! has passed; a gap of a whole window or more clears it.

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::ratio::{integer_divide_ceil, integer_multiply_ceil, Ratio};
use super::ResourceError;
use crate::config::RATE_LIMITING_PRECISION;

/// Windowed usage average for one resource of one account (or the block).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageAccumulator {
    /// Ordinal of the most recent update.
    pub last_ordinal: u32,
    /// Average scaled by the precision factor.
    pub value_ex: u64,
    /// Decayed average at the last ordinal change plus everything added
    /// since.
    pub consumed: u64,
}

impl UsageAccumulator {
    /// `ceil(value_ex / precision)`.
    pub fn average(&self) -> u64 {
        integer_divide_ceil(
            u128::from(self.value_ex),
            u128::from(RATE_LIMITING_PRECISION),
        ) as u64
    }

    /// Record `units` of usage at `ordinal` over a `window_size`-ordinal
    /// window.
    ///
    /// Either every field is updated or, on error, none is. Repeated calls at
    /// the same ordinal accumulate without decaying.
    pub fn add(&mut self, units: u64, ordinal: u32, window_size: u32) -> Result<(), ResourceError> {
        if units > u64::MAX / RATE_LIMITING_PRECISION {
            return Err(ResourceError::UsageOverflow { units });
        }
        if window_size == 0 {
            return Err(ResourceError::InvalidWindow);
        }

        // Both sums are checked against the state before any decay.
        if self.consumed.checked_add(units).is_none() {
            return Err(ResourceError::ConsumedOverflow);
        }
        // units <= u64::MAX / precision and window_size >= 1, so this fits.
        let contribution =
            integer_multiply_ceil(units, RATE_LIMITING_PRECISION, u64::from(window_size)) as u64;
        if self.value_ex.checked_add(contribution).is_none() {
            return Err(ResourceError::ValueOverflow);
        }

        let mut next = *self;

        if ordinal != next.last_ordinal {
            if ordinal < next.last_ordinal {
                return Err(ResourceError::NonMonotonicOrdinal {
                    last: next.last_ordinal,
                    ordinal,
                });
            }
            let gap = ordinal - next.last_ordinal;
            next.value_ex = if gap < window_size {
                Ratio::new(u64::from(window_size - gap), u64::from(window_size)).mul(next.value_ex)?
            } else {
                0
            };
            next.last_ordinal = ordinal;
            next.consumed = next.average();
        }

        next.consumed = next
            .consumed
            .checked_add(units)
            .ok_or(ResourceError::ConsumedOverflow)?;

        next.value_ex = next
            .value_ex
            .checked_add(contribution)
            .ok_or(ResourceError::ValueOverflow)?;

        trace!(
            units,
            ordinal,
            window_size,
            value_ex = next.value_ex,
            consumed = next.consumed,
            "usage accumulated"
        );
        *self = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WINDOW: u32 = 100;

    #[test]
    fn single_add_spreads_over_window() {
        let mut acc = UsageAccumulator::default();
        acc.add(1_000, 1, WINDOW).unwrap();
        assert_eq!(acc.value_ex, 1_000 * RATE_LIMITING_PRECISION / 100);
        assert_eq!(acc.average(), 10);
        assert_eq!(acc.consumed, 1_000);
        assert_eq!(acc.last_ordinal, 1);
    }

    #[test]
    fn decay_is_linear_in_the_gap() {
        let mut acc = UsageAccumulator::default();
        acc.add(1_000, 1, WINDOW).unwrap();
        acc.add(0, 51, WINDOW).unwrap();
        assert_eq!(acc.value_ex, 5 * RATE_LIMITING_PRECISION);
        assert_eq!(acc.average(), 5);
        assert_eq!(acc.consumed, 5);
    }

    #[test]
    fn full_window_gap_resets() {
        let mut acc = UsageAccumulator::default();
        acc.add(1_000, 1, WINDOW).unwrap();
        acc.add(7, 1 + WINDOW, WINDOW).unwrap();
        assert_eq!(acc.consumed, 7);
        assert_eq!(acc.value_ex, integer_multiply_ceil(7, RATE_LIMITING_PRECISION, 100) as u64);
    }

    #[test]
    fn same_ordinal_accumulates_without_decay() {
        let mut acc = UsageAccumulator::default();
        acc.add(100, 5, WINDOW).unwrap();
        acc.add(100, 5, WINDOW).unwrap();
        assert_eq!(acc.consumed, 200);
        assert_eq!(acc.value_ex, 2 * RATE_LIMITING_PRECISION);
    }

    #[test]
    fn earlier_ordinal_fails_and_leaves_state() {
        let mut acc = UsageAccumulator::default();
        acc.add(100, 10, WINDOW).unwrap();
        let before = acc;
        let err = acc.add(1, 9, WINDOW).unwrap_err();
        assert!(matches!(
            err,
            ResourceError::NonMonotonicOrdinal { last: 10, ordinal: 9 }
        ));
        assert_eq!(acc, before);
    }

    #[test]
    fn usage_overflow_boundary() {
        let limit = u64::MAX / RATE_LIMITING_PRECISION;

        let mut acc = UsageAccumulator::default();
        let before = acc;
        assert!(matches!(
            acc.add(limit + 1, 1, 1),
            Err(ResourceError::UsageOverflow { .. })
        ));
        assert_eq!(acc, before);

        acc.add(limit, 1, 1).unwrap();
        assert_eq!(acc.consumed, limit);
    }

    #[test]
    fn value_overflow_leaves_state() {
        let limit = u64::MAX / RATE_LIMITING_PRECISION;
        let mut acc = UsageAccumulator::default();
        acc.add(limit, 1, 1).unwrap();
        let before = acc;
        assert!(matches!(
            acc.add(limit, 1, 1),
            Err(ResourceError::ValueOverflow)
        ));
        assert_eq!(acc, before);
    }

    #[test]
    fn consumed_overflow_leaves_state() {
        let mut acc = UsageAccumulator {
            last_ordinal: 1,
            value_ex: 0,
            consumed: u64::MAX - 1,
        };
        let before = acc;
        assert!(matches!(
            acc.add(2, 1, WINDOW),
            Err(ResourceError::ConsumedOverflow)
        ));
        assert_eq!(acc, before);
    }

    #[test]
    fn consumed_is_checked_before_decay() {
        // a full-window gap would reset consumed, but the sum is judged first
        let mut acc = UsageAccumulator {
            last_ordinal: 1,
            value_ex: 0,
            consumed: u64::MAX - 1,
        };
        let before = acc;
        assert!(matches!(
            acc.add(10, 1 + WINDOW, WINDOW),
            Err(ResourceError::ConsumedOverflow)
        ));
        assert_eq!(acc, before);
    }

    #[test]
    fn value_is_checked_before_decay() {
        let mut acc = UsageAccumulator {
            last_ordinal: 1,
            value_ex: u64::MAX - 1,
            consumed: 0,
        };
        let before = acc;
        assert!(matches!(
            acc.add(10, 1 + WINDOW, WINDOW),
            Err(ResourceError::ValueOverflow)
        ));
        assert_eq!(acc, before);
    }

    #[test]
    fn zero_window_is_rejected() {
        let mut acc = UsageAccumulator::default();
        assert!(matches!(acc.add(1, 1, 0), Err(ResourceError::InvalidWindow)));
    }

    proptest! {
        #[test]
        fn average_never_drops_within_one_ordinal(
            adds in proptest::collection::vec(0u64..1_000_000, 1..20)
        ) {
            let mut acc = UsageAccumulator::default();
            let mut last = 0;
            for units in adds {
                acc.add(units, 1, WINDOW).unwrap();
                prop_assert!(acc.average() >= last);
                last = acc.average();
            }
        }

        #[test]
        fn idle_ordinals_only_decay(
            units in 1u64..1_000_000,
            gaps in proptest::collection::vec(1u32..30, 1..10)
        ) {
            let mut acc = UsageAccumulator::default();
            acc.add(units, 1, WINDOW).unwrap();
            let mut ordinal = 1;
            let mut last = acc.value_ex;
            for gap in gaps {
                ordinal += gap;
                acc.add(0, ordinal, WINDOW).unwrap();
                prop_assert!(acc.value_ex <= last);
                last = acc.value_ex;
            }
        }
    }
}
