//! # Native Contracts
//!
//! Contracts implemented in Rust and registered with the controller as
//! action handlers, instead of being loaded as WebAssembly.
//!
//! - **token**: an `eosio.token`-style fungible token with `create`,
//!   `issue` and `transfer`, keeping balances in multi-index tables.
//!
//! All monetary operations use checked arithmetic.

use eos_ledger::chain::Name;
use eos_ledger::HandlerRegistry;

pub mod token;

pub use token::{AccountBalance, Asset, CurrencyStats, Symbol, TokenContract, TokenError};

/// Account the token contract is registered under.
pub const TOKEN_ACCOUNT: Name = Name::new("eosio.token");

/// Every native contract, keyed by the account it runs as.
pub fn handlers() -> HandlerRegistry {
    HandlerRegistry::new().with(TOKEN_ACCOUNT, TokenContract)
}
