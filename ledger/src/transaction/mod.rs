//! # Transactions
//!
//! Actions and transactions, their canonical packed form, signature
//! recovery, authorization and the receipts blocks commit to.
//!
//! ```text
//! types.rs: PermissionLevel, Action, Transaction, SignedTransaction
//! packed.rs: PackedTransaction, compression, packed digest
//! signing.rs: Deadline-bounded key recovery
//! authorization.rs: permission walk against recovered keys
//! receipt.rs: transaction and action receipts
//! ```

pub mod authorization;
pub mod packed;
pub mod receipt;
pub mod signing;
pub mod types;

pub use authorization::{check_authorization, initialize_permissions, AuthorizationError};
pub use packed::{Compression, PackError, PackedTransaction};
pub use receipt::{
    ActionReceipt, ReceiptTrx, TransactionReceipt, TransactionReceiptHeader, TransactionStatus,
};
pub use signing::{recover_digest_keys, Deadline, SignatureError};
pub use types::{
    Action, PermissionLevel, SignedTransaction, Transaction, TransactionBuilder,
    TransactionHeader,
};
