// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # EOS Ledger Node
//!
//! Entry point for the `ledger-node` binary. Parses CLI arguments,
//! initializes logging, and runs one subcommand:
//!
//! - `init`: open the chain store and bootstrap system accounts
//! - `name`: encode or decode account names
//! - `merkle`: Merkle root of hex digests
//! - `inspect-tx`: decode a packed transaction and recover its signers
//! - `version`: print build version information

mod cli;
mod commands;
mod logging;

use anyhow::Result;
use clap::Parser;

use cli::{Commands, LedgerNodeCli};

fn main() -> Result<()> {
    let cli = LedgerNodeCli::parse();
    logging::init_logging(&cli.log_level, cli.log_format);

    match cli.command {
        Commands::Init(args) => print_json(&commands::init(&args)?),
        Commands::Name(args) => println!("{}", commands::name(&args)?),
        Commands::Merkle(args) => println!("{}", commands::merkle_root(&args)?),
        Commands::InspectTx(args) => print_json(&commands::inspect_tx(&args)?),
        Commands::Version => print_version(),
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => tracing::error!(error = %e, "failed to render output"),
    }
}

fn print_version() {
    println!("ledger-node {}", env!("CARGO_PKG_VERSION"));
    println!("  billing version: {}", eos_ledger::config::BILLING_VERSION);
    println!("  target: {}", std::env::consts::ARCH);
}
