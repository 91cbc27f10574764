//! Loading deployment config, vault snapshots and proof data from disk.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use salvage_protocol::chain::VaultSnapshot;
use salvage_protocol::config::RedeemConfig;
use salvage_protocol::eligibility::merkle::MerkleTree;
use salvage_protocol::eligibility::proofs::parse_hash;
use salvage_protocol::eligibility::{FileProofSource, ProofBook, ProofSource, StaticProofSource};

use crate::cli::SourceArgs;

/// Reads a deployment config. No path means defaults.
pub async fn load_config(path: Option<&Path>) -> Result<RedeemConfig> {
    let Some(path) = path else {
        return Ok(RedeemConfig::default());
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

/// Reads a vault snapshot.
pub async fn load_snapshot(path: &Path) -> Result<VaultSnapshot> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid snapshot {}", path.display()))
}

/// The proof source the arguments describe: the proof file if given,
/// otherwise proofs derived from the snapshot's own allow-list.
pub fn proof_source(args: &SourceArgs, snapshot: &VaultSnapshot) -> Arc<dyn ProofSource> {
    match &args.proofs {
        Some(path) => {
            let mut source = FileProofSource::new(path);
            if let Some(root) = &args.root_file {
                source = source.with_root_file(root);
            }
            Arc::new(source)
        }
        None => Arc::new(StaticProofSource::new("snapshot", snapshot_book(snapshot))),
    }
}

/// Proofs for every allow-list member of `snapshot`.
pub fn snapshot_book(snapshot: &VaultSnapshot) -> ProofBook {
    if snapshot.allowlist.is_empty() {
        return ProofBook::new(HashMap::new(), Some(snapshot.allowlist_root));
    }
    let tree = MerkleTree::from_addresses(&snapshot.allowlist);
    let proofs: HashMap<Address, Vec<B256>> = tree
        .addresses()
        .iter()
        .filter_map(|a| tree.proof_for(*a).map(|p| (*a, p)))
        .collect();
    ProofBook::new(proofs, Some(tree.root()))
}

/// Parses `--proof` values. An empty list means "look it up".
pub fn explicit_proof(nodes: &[String]) -> Result<Option<Vec<B256>>> {
    if nodes.is_empty() {
        return Ok(None);
    }
    let proof = nodes
        .iter()
        .map(|n| parse_hash(n))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid --proof value")?;
    Ok(Some(proof))
}
