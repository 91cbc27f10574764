//! Allow-list membership checks.
//!
//! Membership in the proof book is not eligibility. An address is eligible
//! when its proof, folded up from its leaf, lands exactly on the root the
//! contract holds *right now*. The book's own root is only used to warn that
//! the distributed data looks stale.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::merkle;
use super::proofs::{ProofBook, ProofError, ProofSource};
use crate::chain::VaultReader;
use crate::config::DEFAULT_PROOF_TIMEOUT;
use crate::fallback::resolve_in_order;

/// Why an address is not eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ineligible {
    /// No proof for the address, neither supplied nor in the book.
    NotWhitelisted,
    /// A proof exists but does not reach the chain root.
    ProofInvalid,
    /// No proof was supplied and the book could not be loaded.
    ProofDataUnavailable,
    /// The chain root could not be read.
    RootUnavailable,
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Ineligible::NotWhitelisted => "not whitelisted",
            Ineligible::ProofInvalid => "proof invalid for current chain root",
            Ineligible::ProofDataUnavailable => "proof data unavailable",
            Ineligible::RootUnavailable => "allow-list root unavailable",
        };
        f.write_str(s)
    }
}

/// Result of an eligibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EligibilityCheck {
    /// The proof recomputes to the chain root.
    pub ok: bool,
    /// Proof nodes that were checked. Empty, never absent, when there is none.
    pub proof: Vec<B256>,
    /// Root read from the contract.
    pub chain_root: Option<B256>,
    /// Root the proof book claims.
    pub file_root: Option<B256>,
    /// `file_root` is known and differs from `chain_root`.
    pub root_mismatch: bool,
    /// Set when `ok` is false.
    pub reason: Option<Ineligible>,
}

/// Resolves allow-list proofs and checks them against the chain root.
///
/// The loaded proof book is cached for the lifetime of the verifier and
/// dropped by [`EligibilityVerifier::reset`].
pub struct EligibilityVerifier {
    reader: Arc<dyn VaultReader>,
    sources: Vec<Arc<dyn ProofSource>>,
    timeout: Duration,
    cache: Mutex<Option<Arc<ProofBook>>>,
}

impl EligibilityVerifier {
    /// A verifier with no proof sources. Only caller-supplied proofs can pass.
    pub fn new(reader: Arc<dyn VaultReader>) -> Self {
        Self {
            reader,
            sources: Vec::new(),
            timeout: DEFAULT_PROOF_TIMEOUT,
            cache: Mutex::new(None),
        }
    }

    /// Appends a proof source. Sources are tried in the order added.
    pub fn with_source(mut self, source: Arc<dyn ProofSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Per-source load timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The proof book, loading it on first use.
    pub async fn proof_book(&self) -> Result<Arc<ProofBook>, ProofError> {
        if let Some(book) = self.cache.lock().clone() {
            return Ok(book);
        }

        let resolved = resolve_in_order(
            "proof book",
            self.sources.as_slice(),
            self.timeout,
            |s| s.id(),
            |s| s.load(),
        )
        .await
        .map_err(|attempts| ProofError::Unavailable { attempts })?;

        let book = Arc::new(resolved.value);
        info!(
            source = %resolved.source_id,
            entries = book.len(),
            root = ?book.root(),
            "Proof book loaded"
        );
        *self.cache.lock() = Some(book.clone());
        Ok(book)
    }

    /// Checks `address` using the proof book.
    pub async fn check(&self, address: Address) -> EligibilityCheck {
        self.check_with_proof(address, None).await
    }

    /// Checks `address`, preferring `supplied` over the proof book.
    ///
    /// The book is still consulted for its root, so a stale distribution is
    /// reported even when the caller brings its own proof.
    pub async fn check_with_proof(
        &self,
        address: Address,
        supplied: Option<Vec<B256>>,
    ) -> EligibilityCheck {
        let (chain_root, book) = tokio::join!(self.reader.allowlist_root(), self.proof_book());

        let chain_root = match chain_root {
            Ok(root) => Some(root),
            Err(e) => {
                warn!(%address, error = %e, "Allow-list root read failed");
                None
            }
        };
        let book = match book {
            Ok(book) => Some(book),
            Err(e) => {
                warn!(%address, error = %e, "Proof book unavailable");
                None
            }
        };

        let file_root = book.as_ref().and_then(|b| b.root());
        let root_mismatch = matches!((file_root, chain_root), (Some(f), Some(c)) if f != c);

        let proof = match (&supplied, &book) {
            (Some(p), _) => Some(p.clone()),
            (None, Some(b)) => b.proof_for(address).map(<[B256]>::to_vec),
            (None, None) => None,
        };

        let reason = match (&proof, chain_root) {
            (_, None) => Some(Ineligible::RootUnavailable),
            (None, _) if book.is_none() => Some(Ineligible::ProofDataUnavailable),
            (None, _) => Some(Ineligible::NotWhitelisted),
            (Some(p), Some(root)) if !merkle::verify(address, p, root) => {
                Some(Ineligible::ProofInvalid)
            }
            (Some(_), Some(_)) => None,
        };

        let check = EligibilityCheck {
            ok: reason.is_none(),
            proof: proof.unwrap_or_default(),
            chain_root,
            file_root,
            root_mismatch,
            reason,
        };
        debug!(
            %address,
            ok = check.ok,
            root_mismatch,
            reason = ?check.reason,
            "Eligibility checked"
        );
        check
    }

    /// Drops the cached proof book.
    pub fn reset(&self) {
        *self.cache.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MemoryVault, VaultSnapshot};
    use crate::eligibility::merkle::MerkleTree;
    use crate::eligibility::proofs::{FileProofSource, StaticProofSource};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn members() -> Vec<Address> {
        (1..=5u8).map(Address::repeat_byte).collect()
    }

    fn book_for(tree: &MerkleTree, root: Option<B256>) -> ProofBook {
        let proofs: HashMap<Address, Vec<B256>> = tree
            .addresses()
            .iter()
            .map(|a| (*a, tree.proof_for(*a).unwrap()))
            .collect();
        ProofBook::new(proofs, root)
    }

    fn setup() -> (Arc<MemoryVault>, MerkleTree) {
        let vault = Arc::new(MemoryVault::new(VaultSnapshot {
            allowlist: members(),
            ..VaultSnapshot::default()
        }));
        (vault, MerkleTree::from_addresses(&members()))
    }

    fn verifier(vault: &Arc<MemoryVault>, book: ProofBook) -> EligibilityVerifier {
        EligibilityVerifier::new(vault.clone())
            .with_source(Arc::new(StaticProofSource::new("static", book)))
    }

    struct CountingSource {
        inner: StaticProofSource,
        loads: AtomicUsize,
    }

    #[async_trait]
    impl ProofSource for CountingSource {
        fn id(&self) -> String {
            "counting".into()
        }
        async fn load(&self) -> Result<ProofBook, ProofError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load().await
        }
    }

    struct StallingSource;

    #[async_trait]
    impl ProofSource for StallingSource {
        fn id(&self) -> String {
            "stalling".into()
        }
        async fn load(&self) -> Result<ProofBook, ProofError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ProofBook::default())
        }
    }

    // -----------------------------------------------------------------------
    // 1. Membership vs. recomputation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_member_is_eligible() {
        let (vault, tree) = setup();
        let v = verifier(&vault, book_for(&tree, Some(tree.root())));
        let check = v.check(Address::repeat_byte(3)).await;
        assert!(check.ok);
        assert_eq!(check.chain_root, Some(tree.root()));
        assert!(!check.root_mismatch);
        assert!(!check.proof.is_empty());
    }

    #[tokio::test]
    async fn test_absent_address_not_whitelisted() {
        let (vault, tree) = setup();
        let v = verifier(&vault, book_for(&tree, None));
        let check = v.check(Address::repeat_byte(0x99)).await;
        assert!(!check.ok);
        assert!(check.reason.unwrap().to_string().contains("not whitelisted"));
        assert!(check.proof.is_empty());
    }

    #[tokio::test]
    async fn test_listed_but_wrong_proof_is_invalid() {
        let (vault, tree) = setup();
        let mut book = book_for(&tree, None);
        // Swap in another member's proof.
        let wrong = tree.proof_for(Address::repeat_byte(1)).unwrap();
        let mut proofs: HashMap<Address, Vec<B256>> = HashMap::new();
        proofs.insert(Address::repeat_byte(4), wrong);
        book = ProofBook::new(proofs, book.root());

        let check = verifier(&vault, book).check(Address::repeat_byte(4)).await;
        assert!(!check.ok);
        assert_eq!(check.reason, Some(Ineligible::ProofInvalid));
        assert_eq!(
            check.reason.unwrap().to_string(),
            "proof invalid for current chain root"
        );
    }

    #[tokio::test]
    async fn test_stale_book_warns_but_revalidates() {
        let (vault, tree) = setup();
        let stale_root = B256::repeat_byte(0x42);
        let v = verifier(&vault, book_for(&tree, Some(stale_root)));

        // Proofs still reach the live root: mismatch flagged, still eligible.
        let check = v.check(Address::repeat_byte(2)).await;
        assert!(check.root_mismatch);
        assert!(check.ok);

        // The allow-list moves on without address 2.
        vault.update(|s| s.allowlist = vec![Address::repeat_byte(1), Address::repeat_byte(3)]);
        let check = v.check(Address::repeat_byte(2)).await;
        assert!(check.root_mismatch);
        assert!(!check.ok);
        assert_eq!(check.reason, Some(Ineligible::ProofInvalid));
    }

    #[tokio::test]
    async fn test_supplied_proof_wins() {
        let (vault, tree) = setup();
        let v = EligibilityVerifier::new(vault.clone());
        let a = Address::repeat_byte(5);
        let check = v.check_with_proof(a, tree.proof_for(a)).await;
        assert!(check.ok);
        // No sources configured, so there is no file root to compare.
        assert_eq!(check.file_root, None);
    }

    #[tokio::test]
    async fn test_root_read_failure() {
        let (vault, tree) = setup();
        vault.fail_reads("allowlist_root");
        let check = verifier(&vault, book_for(&tree, None))
            .check(Address::repeat_byte(1))
            .await;
        assert!(!check.ok);
        assert_eq!(check.reason, Some(Ineligible::RootUnavailable));
    }

    // -----------------------------------------------------------------------
    // 2. Loading, caching, fallback
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_book_cached_until_reset() {
        let (vault, tree) = setup();
        let source = Arc::new(CountingSource {
            inner: StaticProofSource::new("inner", book_for(&tree, None)),
            loads: AtomicUsize::new(0),
        });
        let v = EligibilityVerifier::new(vault.clone()).with_source(source.clone());

        v.check(Address::repeat_byte(1)).await;
        v.check(Address::repeat_byte(2)).await;
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        v.reset();
        v.check(Address::repeat_byte(1)).await;
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_source_falls_back() {
        let (vault, tree) = setup();
        let v = EligibilityVerifier::new(vault.clone())
            .with_source(Arc::new(StallingSource))
            .with_source(Arc::new(StaticProofSource::new("backup", book_for(&tree, None))))
            .with_timeout(Duration::from_secs(2));
        assert!(v.check(Address::repeat_byte(1)).await.ok);
    }

    #[tokio::test]
    async fn test_every_source_failing() {
        let (vault, _) = setup();
        let v = EligibilityVerifier::new(vault.clone())
            .with_source(Arc::new(FileProofSource::new("/no/such/proofs.json")));
        let check = v.check(Address::repeat_byte(1)).await;
        assert_eq!(check.reason, Some(Ineligible::ProofDataUnavailable));
        assert!(matches!(
            v.proof_book().await,
            Err(ProofError::Unavailable { attempts }) if attempts.len() == 1
        ));
    }
}
