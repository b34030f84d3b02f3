// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # EOS Ledger Core
//!
//! The deterministic state machine underneath an EOS-compatible chain:
//! typed storage with undo, contract tables, resource metering, the
//! transaction wire format and the Merkle commitments blocks carry.
//! Everything here must agree byte for byte across nodes, so the wire
//! layout and every rounding rule are part of the API.
//!
//! ## Architecture
//!
//! - **chain**: Names, block timestamps and the fc-raw `Pack`/`Unpack` codec.
//! - **crypto**: SHA-256 digests, secp256k1 keys, canonical Merkle roots.
//! - **storage**: Indexed entity store over sled with nested undo sessions.
//! - **tables**: Contract multi-index tables and their RAM billing.
//! - **resource**: CPU/NET averaging windows, elastic block limits, RAM quotas.
//! - **transaction**: Actions, packed transactions, signature recovery,
//!   authorization and receipts.
//! - **block**: Block header, id and roots.
//! - **controller**: Opens blocks, applies transactions atomically, seals blocks.
//! - **config**: Consensus constants and the chain configuration file.
//!
//! ## Example
//!
//! ```
//! use eos_ledger::chain::Name;
//! use eos_ledger::crypto::{merkle, Digest};
//!
//! assert_eq!(Name::new("eosio").value(), 6138663577826885632);
//! assert_eq!(merkle(&[]), Digest::empty_hash());
//! ```

pub mod block;
pub mod chain;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod resource;
pub mod storage;
pub mod tables;
pub mod transaction;

pub use block::{Block, BlockHeader};
pub use chain::Name;
pub use config::ChainConfig;
pub use controller::{ActionHandler, ApplyContext, ApplyError, Controller, ControllerError, HandlerRegistry};
pub use crypto::Digest;
