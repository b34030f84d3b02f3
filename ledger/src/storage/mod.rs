//! # Storage Layer
//!
//! Typed, indexed, undoable persistence for every ledger record.
//!
//! ```text
//! entity.rs: Entity trait, ObjectType partitions, Schema registry
//! key.rs: order-preserving composite key encoding
//! db.rs: ChainStore over sled, undo sessions, cursors
//! objects.rs: accounts, permissions, action sequence counters
//! ```

pub mod db;
pub mod entity;
pub mod key;
pub mod objects;

pub use db::{ChainStore, Direction, EntityIter, Session, StoreError, StoreResult};
pub use entity::{primary_index, Entity, IndexDecl, IndexSpec, ObjectType, Schema};
pub use key::KeyEncoder;
pub use objects::{Account, AccountSequence, Authority, GlobalSequence, KeyWeight, Permission};
