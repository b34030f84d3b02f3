//! RAM billing of table rows.
//!
//! A row costs its field footprint rounded up to the alignment, plus a fixed
//! overhead for every index the row is kept in. Changing any of these
//! numbers changes consensus-visible billing, so they travel with a
//! `version`.

use serde::{Deserialize, Serialize};

use crate::chain::Name;
use crate::config::{
    ConfigError, BILLING_VERSION, OVERHEAD_PER_ACCOUNT_RAM_BYTES,
    OVERHEAD_PER_ROW_PER_INDEX_RAM_BYTES, ROW_ALIGNMENT_BYTES,
};
use crate::resource::ResourceError;
use crate::storage::Entity;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    pub version: u16,
    pub overhead_per_row_per_index: u64,
    pub alignment: u64,
    /// Charged to every new account for its own bookkeeping records.
    pub overhead_per_account: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            version: BILLING_VERSION,
            overhead_per_row_per_index: OVERHEAD_PER_ROW_PER_INDEX_RAM_BYTES,
            alignment: ROW_ALIGNMENT_BYTES,
            overhead_per_account: OVERHEAD_PER_ACCOUNT_RAM_BYTES,
        }
    }
}

impl BillingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alignment == 0 {
            return Err(ConfigError::invalid("billing alignment", "must be greater than zero"));
        }
        if self.version != BILLING_VERSION {
            return Err(ConfigError::invalid(
                "billing version",
                format!("unsupported version {}, expected {BILLING_VERSION}", self.version),
            ));
        }
        Ok(())
    }

    /// Billable size of one row.
    pub fn billable_size<E: Billable>(&self, row: &E) -> u64 {
        let aligned = align_up(row.footprint(), self.alignment);
        aligned + self.overhead_per_row_per_index * E::INDEXES.len() as u64
    }

    /// Same as [`billable_size`](Self::billable_size), as a signed RAM delta.
    pub(crate) fn charge<E: Billable>(&self, row: &E) -> Result<i64, ResourceError> {
        i64::try_from(self.billable_size(row))
            .map_err(|_| ResourceError::DowngradeOverflow(u128::from(self.billable_size(row))))
    }
}

fn align_up(size: u64, alignment: u64) -> u64 {
    size.div_ceil(alignment) * alignment
}

/// A row whose storage is charged to a payer.
pub trait Billable: Entity {
    /// Bytes of field data the row occupies before alignment.
    fn footprint(&self) -> u64;
    fn payer(&self) -> Name;
}

/// Sink for RAM charges and refunds. A positive delta charges `payer`, a
/// negative one refunds it.
pub trait RamBilling {
    fn update_ram_usage(&mut self, payer: Name, delta: i64) -> Result<(), ResourceError>;
}
