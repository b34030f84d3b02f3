//! Block slots and second-resolution time points.

use std::fmt;

use bytes::BufMut;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::codec::{CodecError, Pack, Unpack};
use crate::config::{BLOCK_INTERVAL_MS, BLOCK_TIMESTAMP_EPOCH_MS};

/// Half-second slot counter since 2000-01-01T00:00:00Z.
///
/// Slots double as the ordinal for per-account usage windows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockTimestamp {
    pub slot: u32,
}

impl BlockTimestamp {
    pub const fn new(slot: u32) -> Self {
        Self { slot }
    }

    /// Slot containing the given instant. Instants before the epoch map to
    /// slot zero.
    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        let since_epoch = time.timestamp_millis() - BLOCK_TIMESTAMP_EPOCH_MS;
        let slot = since_epoch.max(0) as u64 / BLOCK_INTERVAL_MS;
        Self {
            slot: u32::try_from(slot).unwrap_or(u32::MAX),
        }
    }

    /// Start of this slot.
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let ms = BLOCK_TIMESTAMP_EPOCH_MS + i64::from(self.slot) * BLOCK_INTERVAL_MS as i64;
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }

    pub fn next(&self) -> Self {
        Self {
            slot: self.slot.saturating_add(1),
        }
    }
}

impl fmt::Display for BlockTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%dT%H:%M:%S%.3f"))
    }
}

impl Pack for BlockTimestamp {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.slot.pack(out);
    }
}

impl Unpack for BlockTimestamp {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        u32::unpack(buf).map(BlockTimestamp::new)
    }
}

/// Seconds since the Unix epoch, as carried in transaction headers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimePointSec(pub u32);

impl TimePointSec {
    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        let secs = time.timestamp().clamp(0, i64::from(u32::MAX));
        TimePointSec(secs as u32)
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(i64::from(self.0), 0)
            .single()
            .unwrap_or_default()
    }
}

impl From<BlockTimestamp> for TimePointSec {
    fn from(ts: BlockTimestamp) -> Self {
        TimePointSec::from_datetime(ts.to_datetime())
    }
}

impl Pack for TimePointSec {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.0.pack(out);
    }
}

impl Unpack for TimePointSec {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        u32::unpack(buf).map(TimePointSec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_zero_is_the_epoch() {
        let ts = BlockTimestamp::new(0);
        assert_eq!(ts.to_datetime().timestamp_millis(), BLOCK_TIMESTAMP_EPOCH_MS);
        assert_eq!(ts.to_string(), "2000-01-01T00:00:00.000");
    }

    #[test]
    fn datetime_round_trip_on_slot_boundaries() {
        let ts = BlockTimestamp::new(1_162_425_600);
        assert_eq!(BlockTimestamp::from_datetime(ts.to_datetime()), ts);
    }

    #[test]
    fn mid_slot_instant_rounds_down() {
        let start = BlockTimestamp::new(10).to_datetime();
        let mid = start + chrono::Duration::milliseconds(250);
        assert_eq!(BlockTimestamp::from_datetime(mid).slot, 10);
    }

    #[test]
    fn pre_epoch_clamps_to_zero() {
        let early = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(BlockTimestamp::from_datetime(early).slot, 0);
    }

    #[test]
    fn block_timestamp_converts_to_seconds() {
        let ts = BlockTimestamp::new(4);
        let secs = TimePointSec::from(ts);
        assert_eq!(i64::from(secs.0), BLOCK_TIMESTAMP_EPOCH_MS / 1000 + 2);
    }
}
