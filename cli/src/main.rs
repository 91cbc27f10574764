// Copyright (c) 2026 Salvage Contributors. MIT License.
// See LICENSE for details.

//! # Salvage CLI
//!
//! Entry point for the `salvage` binary. Parses arguments, initializes
//! logging, and runs one subcommand against a vault snapshot:
//!
//! - `preview`     build a plan and print it
//! - `simulate`    prepare and execute against an in-memory vault
//! - `eligibility` check an address against proof data
//! - `tier`        resolve a fee tier
//! - `version`     print build version information
//!
//! Results go to stdout as JSON; logs go to stderr.

mod cli;
mod logging;
mod sources;

use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use clap::Parser;
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;

use salvage_protocol::chain::{MemoryVault, VaultReader, VaultSnapshot};
use salvage_protocol::config::RedeemConfig;
use salvage_protocol::eligibility::EligibilityVerifier;
use salvage_protocol::executor::{RefreshHook, SessionError};
use salvage_protocol::fees::{FeeSchedule, GasStrategy};
use salvage_protocol::math::Usd;
use salvage_protocol::{
    Categorized, RedeemExecutor, RedeemPlan, RedeemPlanner, RedeemRequest, RedeemSession,
};

use cli::{Commands, EligibilityArgs, PlanArgs, SalvageCli, SimulateArgs, TierArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = SalvageCli::parse();
    logging::init_logging(&cli.log_level, cli.log_format);

    match cli.command {
        Commands::Preview(args) => preview(args).await,
        Commands::Simulate(args) => simulate(args).await,
        Commands::Eligibility(args) => eligibility(args).await,
        Commands::Tier(args) => tier(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Everything a plan-building command needs.
struct Deployment {
    config: RedeemConfig,
    vault: Arc<MemoryVault>,
    planner: RedeemPlanner,
}

async fn deployment(args: &PlanArgs) -> Result<Deployment> {
    let config = sources::load_config(args.source.config.as_deref()).await?;
    let snapshot = sources::load_snapshot(&args.source.snapshot).await?;
    let proofs = sources::proof_source(&args.source, &snapshot);

    let vault = Arc::new(MemoryVault::new(snapshot));
    let verifier = EligibilityVerifier::new(vault.clone())
        .with_timeout(config.proof_timeout())
        .with_source(proofs);
    let planner = RedeemPlanner::new(vault.clone(), config.clone()).with_eligibility(verifier);

    tracing::info!(
        chain_id = config.chain_id,
        vault = %config.vault,
        snapshot = %args.source.snapshot.display(),
        "deployment loaded"
    );
    Ok(Deployment {
        config,
        vault,
        planner,
    })
}

fn request(args: &PlanArgs) -> Result<RedeemRequest> {
    Ok(RedeemRequest {
        user: args.user,
        token_in: args.token,
        amount: args.amount.clone(),
        redeem_target: args.target,
        proof: sources::explicit_proof(&args.proof)?,
    })
}

/// Plan JSON plus every reason and warning with its category.
fn plan_document(plan: &RedeemPlan) -> serde_json::Value {
    let reasons: Vec<_> = plan
        .reasons()
        .iter()
        .map(|r| json!({ "message": r.to_string(), "category": r.category() }))
        .collect();
    let warnings: Vec<_> = plan
        .warnings()
        .iter()
        .map(|w| json!({ "message": w.to_string(), "category": w.category() }))
        .collect();
    json!({ "plan": plan, "diagnostics": { "reasons": reasons, "warnings": warnings } })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("failed to encode output")?);
    Ok(())
}

async fn preview(args: PlanArgs) -> Result<()> {
    let deployment = deployment(&args).await?;
    let plan = deployment
        .planner
        .prepare(&request(&args)?)
        .await
        .context("could not build a plan")?;
    print_json(&plan_document(&plan))
}

async fn simulate(args: SimulateArgs) -> Result<()> {
    let Deployment {
        config,
        vault,
        planner,
    } = deployment(&args.plan).await?;
    let request = request(&args.plan)?;

    let executor = RedeemExecutor::new(
        vault.clone(),
        vault.clone(),
        config.chain_id,
        GasStrategy::from_config(&config.gas),
    )
    .with_refresh_hook(balance_refresh(vault.clone(), args.plan.user, args.plan.token));
    let session = RedeemSession::new(Arc::new(planner), Arc::new(executor));

    let plan = session.prepare(&request).await.context("could not build a plan")?;
    if args.decline {
        vault.decline_next();
    }
    if let Some(message) = &args.revert_with {
        vault.revert_on_confirm(message);
    }

    let outcome = if plan.ok() {
        match session.execute().await {
            Ok(report) => json!({ "report": report }),
            Err(e) => failure_document(&e),
        }
    } else {
        json!({ "skipped": "plan is blocked" })
    };

    let after = vault.snapshot();
    print_json(&json!({
        "session": session.id().to_string(),
        "state": session.state(),
        "trail": session.history(),
        "plan": plan_document(&plan),
        "outcome": outcome,
        "balances": balances(&after, args.plan.user),
    }))
}

fn failure_document(e: &SessionError) -> serde_json::Value {
    json!({ "error": e.to_string(), "category": e.category() })
}

/// Reloads the user's claim balance once approvals land.
fn balance_refresh(vault: Arc<MemoryVault>, user: Address, token: Address) -> RefreshHook {
    Arc::new(move || {
        let vault = vault.clone();
        async move {
            let balance = vault.token_balance(token, user).await?;
            tracing::info!(%user, %token, %balance, "balances refreshed");
            Ok::<(), anyhow::Error>(())
        }
        .boxed()
    })
}

fn balances(snapshot: &VaultSnapshot, user: Address) -> serde_json::Value {
    let entries: serde_json::Map<String, serde_json::Value> = snapshot
        .tokens
        .iter()
        .map(|t| {
            let label = if t.symbol.is_empty() {
                t.address.to_string()
            } else {
                t.symbol.clone()
            };
            let amount = salvage_protocol::math::format_units(t.balance_of(user), t.decimals);
            (label, serde_json::Value::String(amount))
        })
        .collect();
    serde_json::Value::Object(entries)
}

async fn eligibility(args: EligibilityArgs) -> Result<()> {
    let config = sources::load_config(args.source.config.as_deref()).await?;
    let snapshot = sources::load_snapshot(&args.source.snapshot).await?;
    let proofs = sources::proof_source(&args.source, &snapshot);

    let verifier = EligibilityVerifier::new(Arc::new(MemoryVault::new(snapshot)))
        .with_timeout(config.proof_timeout())
        .with_source(proofs);
    let check = verifier.check(args.address).await;
    print_json(&check)
}

fn tier(args: TierArgs) -> Result<()> {
    let thresholds: Vec<Usd> = args.thresholds.iter().map(|t| Usd::from_dollars(*t)).collect();
    let schedule = FeeSchedule::from_pairs(&thresholds, &args.bps).context("invalid fee table")?;
    let breakdown = schedule
        .breakdown(Usd::from_dollars(args.value), args.mode)
        .context("fee computation failed")?;
    print_json(&json!({
        "mode": args.mode,
        "breakdown": breakdown,
        "fee_percent": breakdown.tier.as_ref().map(|t| t.fee_percent_text()),
    }))
}

/// Prints version information to stdout.
fn print_version() {
    println!("salvage  {}", env!("CARGO_PKG_VERSION"));
    println!("rustc    {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}
