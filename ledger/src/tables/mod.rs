//! # Contract Multi-Index Tables
//!
//! Per-contract key/value tables with a `u64` primary key and typed
//! secondary indexes, billed by row size to a payer account.
//!
//! ```text
//! objects.rs: Table, KeyValue, SecondaryIndexRow<K> and the key flavours
//! billing.rs: billable sizes and the RamBilling sink
//! store.rs: TableStore / SecondaryIndex operations
//! ```

mod billing;
mod objects;
mod store;

use thiserror::Error;

use crate::chain::Name;
use crate::resource::ResourceError;
use crate::storage::StoreError;

pub use billing::{Billable, BillingConfig, RamBilling};
pub use objects::{
    F64Key, Index128, Index256, Index64, IndexDouble, IndexLongDouble, Key256, KeyValue,
    LongDouble, SecondaryIndexRow, SecondaryKey, Table,
};
pub use store::{SecondaryIndex, TableStore};

#[derive(Debug, Error)]
pub enum TableError {
    #[error("no primary row {primary_key} in {code}/{scope}/{table}")]
    MissingPrimaryRow {
        code: Name,
        scope: Name,
        table: Name,
        primary_key: u64,
    },

    #[error("NaN is not a valid secondary key")]
    NanSecondaryKey,

    #[error("table {0} not found")]
    TableNotFound(u64),

    #[error("row count of table {0} would overflow")]
    CountOverflow(u64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}
