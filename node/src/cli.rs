//! # CLI Interface
//!
//! `ledger-node` argument structure, built with `clap` derive. Every flag
//! that names a path or key also reads an `EOS_LEDGER_*` environment
//! variable.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::logging::LogFormat;

/// Operator tooling for the EOS ledger core.
#[derive(Parser, Debug)]
#[command(
    name = "ledger-node",
    about = "EOS ledger core operator CLI",
    version,
    propagate_version = true
)]
pub struct LedgerNodeCli {
    /// Log output format.
    #[arg(long, global = true, value_enum, env = "EOS_LEDGER_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, global = true, env = "EOS_LEDGER_LOG", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or open a chain store and bootstrap the system account.
    Init(InitArgs),
    /// Convert between account names and their 64-bit values.
    Name(NameArgs),
    /// Merkle root of a list of hex digests.
    Merkle(MerkleArgs),
    /// Decode a hex packed transaction and recover its signers.
    InspectTx(InspectTxArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory holding the chain store.
    #[arg(long, short = 'd', env = "EOS_LEDGER_DATA_DIR", default_value = "./ledger-data")]
    pub data_dir: PathBuf,

    /// Chain configuration file (JSON). Defaults apply when omitted.
    #[arg(long, short = 'c', env = "EOS_LEDGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Hex compressed public key controlling the system account.
    #[arg(long, env = "EOS_LEDGER_SYSTEM_KEY", conflicts_with = "system_seed")]
    pub system_key: Option<String>,

    /// Derive the system key from a seed phrase. Development only.
    #[arg(long)]
    pub system_seed: Option<String>,
}

#[derive(Args, Debug)]
pub struct NameArgs {
    /// A name such as `eosio.token`, or a decimal value with `--decode`.
    pub value: String,

    /// Treat `value` as a 64-bit integer and print its name.
    #[arg(long)]
    pub decode: bool,
}

#[derive(Args, Debug)]
pub struct MerkleArgs {
    /// Leaf digests, 64 hex characters each, in order.
    pub digests: Vec<String>,
}

#[derive(Args, Debug)]
pub struct InspectTxArgs {
    /// Hex encoding of the packed transaction.
    pub packed: String,

    /// Chain id the signatures commit to.
    #[arg(long, env = "EOS_LEDGER_CHAIN_ID")]
    pub chain_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        LedgerNodeCli::command().debug_assert();
    }

    #[test]
    fn parses_name_decode() {
        let cli = LedgerNodeCli::try_parse_from(["ledger-node", "name", "--decode", "6138663577826885632"])
            .unwrap();
        match cli.command {
            Commands::Name(args) => {
                assert!(args.decode);
                assert_eq!(args.value, "6138663577826885632");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn key_and_seed_conflict() {
        let parsed = LedgerNodeCli::try_parse_from([
            "ledger-node",
            "init",
            "--system-key",
            "02aa",
            "--system-seed",
            "dev",
        ]);
        assert!(parsed.is_err());
    }
}
