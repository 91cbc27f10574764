//! # CLI Interface
//!
//! Argument structure for the `salvage` binary, via `clap` derive. Five
//! subcommands: `preview`, `simulate`, `eligibility`, `tier` and `version`.

use std::path::PathBuf;

use alloy_primitives::Address;
use clap::{Args, Parser, Subcommand};
use salvage_protocol::fees::TierMode;

use crate::logging::LogFormat;

/// Redemption previewer and simulator for value-recovery vaults.
///
/// Every command works offline against a vault snapshot (TOML), so a
/// redemption can be checked end to end before anything is signed.
#[derive(Parser, Debug)]
#[command(
    name = "salvage",
    about = "Preview and simulate vault redemptions",
    version,
    propagate_version = true
)]
pub struct SalvageCli {
    /// Log output format.
    #[arg(long, global = true, env = "SALVAGE_LOG_FORMAT", default_value = "pretty", value_parser = parse_log_format)]
    pub log_format: LogFormat,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, global = true, env = "SALVAGE_LOG", default_value = "salvage=info,salvage_protocol=info")]
    pub log_level: String,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a redeem plan and print it as JSON.
    Preview(PlanArgs),
    /// Prepare and execute against an in-memory copy of the snapshot.
    Simulate(SimulateArgs),
    /// Check an address against proof data and the snapshot root.
    Eligibility(EligibilityArgs),
    /// Resolve the fee tier for a USD value.
    Tier(TierArgs),
    /// Print version information and exit.
    Version,
}

/// Where the deployment and chain state come from.
#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Deployment configuration (TOML). Defaults apply when omitted.
    #[arg(long, short = 'c', env = "SALVAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Vault snapshot (TOML).
    #[arg(long, short = 's', env = "SALVAGE_SNAPSHOT")]
    pub snapshot: PathBuf,

    /// Distributed proof file (JSON). When omitted, proofs are derived from
    /// the snapshot's allow-list.
    #[arg(long, env = "SALVAGE_PROOFS")]
    pub proofs: Option<PathBuf>,

    /// File holding the root the proof file was generated against.
    #[arg(long, requires = "proofs")]
    pub root_file: Option<PathBuf>,
}

/// Arguments shared by `preview` and `simulate`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Redeeming wallet.
    #[arg(long)]
    pub user: Address,

    /// Claim token to redeem.
    #[arg(long)]
    pub token: Address,

    /// Human-readable amount, e.g. `250.5`.
    #[arg(long)]
    pub amount: String,

    /// Stable token to be paid in.
    #[arg(long)]
    pub target: Address,

    /// Explicit proof node (repeatable). Overrides the proof file.
    #[arg(long = "proof")]
    pub proof: Vec<String>,
}

/// Arguments for the `simulate` subcommand.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub plan: PlanArgs,

    /// Make the wallet refuse the first signature request.
    #[arg(long)]
    pub decline: bool,

    /// Make the first transaction revert on chain with this message.
    #[arg(long)]
    pub revert_with: Option<String>,
}

/// Arguments for the `eligibility` subcommand.
#[derive(Args, Debug)]
pub struct EligibilityArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Address to check.
    pub address: Address,
}

/// Arguments for the `tier` subcommand.
#[derive(Args, Debug)]
pub struct TierArgs {
    /// Gross value in whole USD.
    pub value: u64,

    /// Thresholds in whole USD, in any order.
    #[arg(long, value_delimiter = ',', required = true)]
    pub thresholds: Vec<u64>,

    /// Fee rates in basis points, parallel to `--thresholds`.
    #[arg(long, value_delimiter = ',', required = true)]
    pub bps: Vec<u32>,

    /// `cap` or `floor`.
    #[arg(long, default_value = "cap")]
    pub mode: TierMode,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    Ok(LogFormat::from_str_lossy(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        SalvageCli::command().debug_assert();
    }

    #[test]
    fn parses_tier_lists() {
        let cli = SalvageCli::try_parse_from([
            "salvage",
            "tier",
            "600",
            "--thresholds",
            "100,500,1000",
            "--bps",
            "50,30,10",
            "--mode",
            "floor",
        ])
        .unwrap();
        match cli.command {
            Commands::Tier(args) => {
                assert_eq!(args.thresholds, vec![100, 500, 1000]);
                assert_eq!(args.mode, TierMode::Floor);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn root_file_requires_proofs() {
        let res = SalvageCli::try_parse_from([
            "salvage",
            "eligibility",
            "--snapshot",
            "vault.toml",
            "--root-file",
            "root.txt",
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        ]);
        assert!(res.is_err());
    }
}
