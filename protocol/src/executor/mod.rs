//! # Redeem Executor
//!
//! Sends a plan's transactions: every approval in order, each confirmed
//! before the next is signed, then the redeem. Confirmation waits are not
//! bounded; once broadcast a transaction can only be observed.
//!
//! Between the last confirmed approval and the redeem submission an optional
//! refresh hook fires once. It is spawned onto the runtime and never awaited,
//! so a slow or failing hook cannot hold up or fail the redemption.
//!
//! [`RedeemSession`] wraps the executor and a planner in the session state
//! machine.

pub mod session;
pub mod state;

use std::sync::Arc;

use alloy_primitives::{Address, B256};
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::chain::{ChainError, TxReceipt, VaultReader, VaultWriter};
use crate::fees::{FeeModel, GasStrategy};
use crate::planner::{PlanStep, RedeemPlan, StepKind};

pub use session::{RedeemSession, SessionError};
pub use state::SessionState;

/// Side effect fired after the last approval confirms, e.g. a balance reload.
pub type RefreshHook = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Execution phase, reported as each begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Approving,
    Redeeming,
}

impl From<Phase> for SessionState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Approving => SessionState::Approving,
            Phase::Redeeming => SessionState::Redeeming,
        }
    }
}

/// Receipts of a completed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    /// One receipt per approval, in plan order.
    pub approvals: Vec<TxReceipt>,
    /// The redeem receipt.
    pub redeem: TxReceipt,
    /// Fee model the redeem was sent with.
    pub fee_model: FeeModel,
}

/// A failed execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The plan has blocking reasons.
    #[error("plan is blocked: {0} reason(s)")]
    Blocked(usize),

    /// The plan has no redeem step.
    #[error("plan has no redeem step")]
    MissingRedeem,

    /// A step was refused at submission or reverted on chain.
    #[error("step {index} ({kind:?}) failed: {source}")]
    Step {
        /// Position in the plan.
        index: usize,
        kind: StepKind,
        /// Set when the transaction was broadcast.
        hash: Option<B256>,
        #[source]
        source: ChainError,
    },
}

impl ExecutionError {
    /// The chain-side cause, for step failures.
    pub fn chain_error(&self) -> Option<&ChainError> {
        match self {
            ExecutionError::Step { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Submits plans through a [`VaultWriter`].
pub struct RedeemExecutor {
    reader: Arc<dyn VaultReader>,
    writer: Arc<dyn VaultWriter>,
    gas: GasStrategy,
    chain_id: u64,
    refresh_hook: Option<RefreshHook>,
}

impl RedeemExecutor {
    pub fn new(
        reader: Arc<dyn VaultReader>,
        writer: Arc<dyn VaultWriter>,
        chain_id: u64,
        gas: GasStrategy,
    ) -> Self {
        Self {
            reader,
            writer,
            gas,
            chain_id,
            refresh_hook: None,
        }
    }

    /// Sets the post-approval refresh hook.
    pub fn with_refresh_hook(mut self, hook: RefreshHook) -> Self {
        self.refresh_hook = Some(hook);
        self
    }

    /// Runs `plan` to completion, calling `on_phase` as each phase begins.
    ///
    /// A plan without approval steps goes straight to [`Phase::Redeeming`].
    pub async fn run<F>(&self, plan: &RedeemPlan, mut on_phase: F) -> Result<ExecutionReport, ExecutionError>
    where
        F: FnMut(Phase) + Send,
    {
        if !plan.ok() {
            return Err(ExecutionError::Blocked(plan.reasons().len()));
        }
        let redeem_index = plan
            .steps()
            .iter()
            .position(|s| s.kind() == StepKind::Redeem)
            .ok_or(ExecutionError::MissingRedeem)?;
        let from = plan.user();

        let mut approvals = Vec::new();
        if plan.approval_count() > 0 {
            on_phase(Phase::Approving);
            for (index, step) in plan.steps().iter().enumerate() {
                if step.kind() != StepKind::Approve {
                    continue;
                }
                let (receipt, _) = self.send(from, index, step).await?;
                approvals.push(receipt);
            }
            self.fire_refresh_hook();
        }

        on_phase(Phase::Redeeming);
        let (redeem, fee_model) = self.send(from, redeem_index, &plan.steps()[redeem_index]).await?;
        info!(
            %from,
            hash = %redeem.hash,
            approvals = approvals.len(),
            "Redemption confirmed"
        );
        Ok(ExecutionReport {
            approvals,
            redeem,
            fee_model,
        })
    }

    /// Submits one step and waits for it to be mined.
    async fn send(
        &self,
        from: Address,
        index: usize,
        step: &PlanStep,
    ) -> Result<(TxReceipt, FeeModel), ExecutionError> {
        let kind = step.kind();
        let fail = |hash, source| ExecutionError::Step {
            index,
            kind,
            hash,
            source,
        };

        let fees = self.gas.resolve(self.chain_id, self.reader.as_ref()).await;
        let request = step.to_request();
        let hash = self
            .writer
            .submit(from, &request, &fees)
            .await
            .map_err(|e| fail(None, e))?;
        info!(%hash, step = index, %request, "Transaction submitted");

        let receipt = self
            .writer
            .wait_for_receipt(hash)
            .await
            .map_err(|e| fail(Some(hash), e))?;
        if !receipt.success {
            let reason = receipt
                .revert_reason
                .clone()
                .unwrap_or_else(|| "execution reverted".to_string());
            warn!(%hash, step = index, %reason, "Transaction reverted");
            return Err(fail(Some(hash), ChainError::from_message(reason)));
        }
        info!(%hash, step = index, block = receipt.block_number, "Transaction confirmed");
        Ok((receipt, fees))
    }

    fn fire_refresh_hook(&self) {
        let Some(hook) = &self.refresh_hook else {
            return;
        };
        let fut = hook();
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                warn!(error = %e, "Post-approval refresh failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::TokenSnapshot;
    use crate::chain::{MemoryVault, RejectionKind, TxRequest, VaultSnapshot};
    use crate::config::RedeemConfig;
    use crate::eligibility::{EligibilityVerifier, ProofBook, StaticProofSource};
    use crate::math::Usd;
    use crate::planner::{RedeemPlanner, RedeemRequest};
    use alloy_primitives::U256;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const E18: u128 = 1_000_000_000_000_000_000;

    fn user() -> Address {
        Address::repeat_byte(0xaa)
    }
    fn vault_addr() -> Address {
        Address::repeat_byte(0xfe)
    }
    fn claim() -> Address {
        Address::repeat_byte(0x01)
    }
    fn stable() -> Address {
        Address::repeat_byte(0x02)
    }

    fn vault(allowance: u128) -> Arc<MemoryVault> {
        Arc::new(MemoryVault::new(VaultSnapshot {
            vault: vault_addr(),
            daily_cap_usd: Usd::from_dollars(10_000),
            fee_thresholds: vec![Usd::from_dollars(100)],
            fee_bps: vec![100],
            allowlist: vec![user(), Address::repeat_byte(0xbb)],
            tokens: vec![
                TokenSnapshot::new(claim(), "CLAIM", 18, U256::from(2 * E18))
                    .with_balance(user(), U256::from(1_000 * E18))
                    .with_allowance(user(), vault_addr(), U256::from(allowance)),
                TokenSnapshot::new(stable(), "USDC", 6, U256::ZERO)
                    .with_liquidity(U256::from(10u64.pow(12))),
            ],
            ..VaultSnapshot::default()
        }))
    }

    async fn plan_for(vault: &Arc<MemoryVault>, amount: &str) -> RedeemPlan {
        let s = vault.snapshot();
        let proofs: HashMap<Address, Vec<B256>> = s
            .allowlist
            .iter()
            .map(|a| (*a, s.proof_for(*a).unwrap()))
            .collect();
        let verifier = EligibilityVerifier::new(vault.clone()).with_source(Arc::new(
            StaticProofSource::new("test", ProofBook::new(proofs, Some(s.effective_root()))),
        ));
        let config = RedeemConfig {
            vault: vault_addr(),
            ..RedeemConfig::default()
        };
        RedeemPlanner::new(vault.clone(), config)
            .with_eligibility(verifier)
            .prepare(&RedeemRequest {
                user: user(),
                token_in: claim(),
                amount: amount.into(),
                redeem_target: stable(),
                proof: None,
            })
            .await
            .unwrap()
    }

    fn executor(vault: &Arc<MemoryVault>) -> RedeemExecutor {
        RedeemExecutor::new(vault.clone(), vault.clone(), 1, GasStrategy::default())
    }

    // -----------------------------------------------------------------------
    // 1. Sequencing
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_approve_then_redeem() {
        let v = vault(0);
        let plan = plan_for(&v, "100").await;
        let mut phases = Vec::new();
        let report = executor(&v).run(&plan, |p| phases.push(p)).await.unwrap();

        assert_eq!(phases, vec![Phase::Approving, Phase::Redeeming]);
        assert_eq!(report.approvals.len(), 1);
        assert!(report.redeem.success);

        let subs = v.submissions();
        assert!(matches!(subs[0].request, TxRequest::Approve { .. }));
        assert!(matches!(subs[1].request, TxRequest::Redeem(_)));
        // $200 at 1% = $2 fee, $198 paid out.
        let usdc = v.snapshot().token(stable()).unwrap().balance_of(user());
        assert_eq!(usdc, U256::from(198_000_000u64));
    }

    #[tokio::test]
    async fn test_no_approvals_goes_straight_to_redeeming() {
        let v = vault(100 * E18);
        let plan = plan_for(&v, "100").await;
        assert_eq!(plan.approval_count(), 0);
        let mut phases = Vec::new();
        executor(&v).run(&plan, |p| phases.push(p)).await.unwrap();
        assert_eq!(phases, vec![Phase::Redeeming]);
        assert_eq!(v.submission_count(), 1);
    }

    // -----------------------------------------------------------------------
    // 2. Refresh hook
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_refresh_hook_fires_once_between_approval_and_redeem() {
        let v = vault(0);
        let plan = plan_for(&v, "100").await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook: RefreshHook = {
            let v = v.clone();
            let seen = seen.clone();
            Arc::new(move || {
                seen.lock().push(v.submission_count());
                Box::pin(async { Ok(()) })
            })
        };
        executor(&v).with_refresh_hook(hook).run(&plan, |_| {}).await.unwrap();

        // Called exactly once, when only the approval had been submitted.
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(v.submission_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_abort_redeem() {
        let v = vault(0);
        let plan = plan_for(&v, "100").await;
        let hook: RefreshHook = Arc::new(|| Box::pin(async { Err(anyhow::anyhow!("reload failed")) }));
        let report = executor(&v).with_refresh_hook(hook).run(&plan, |_| {}).await.unwrap();
        assert!(report.redeem.success);
    }

    #[tokio::test]
    async fn test_hook_skipped_without_approvals() {
        let v = vault(100 * E18);
        let plan = plan_for(&v, "100").await;
        let calls = Arc::new(AtomicUsize::new(0));
        let hook: RefreshHook = {
            let calls = calls.clone();
            Arc::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(()) })
            })
        };
        executor(&v).with_refresh_hook(hook).run(&plan, |_| {}).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    // -----------------------------------------------------------------------
    // 3. Failures
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_declined_approval_stops_before_redeem() {
        let v = vault(0);
        let plan = plan_for(&v, "100").await;
        v.decline_next();
        let err = executor(&v).run(&plan, |_| {}).await.unwrap_err();
        match err {
            ExecutionError::Step {
                index, kind, hash, source,
            } => {
                assert_eq!(index, 0);
                assert_eq!(kind, StepKind::Approve);
                assert!(hash.is_none());
                assert_eq!(source, ChainError::UserDeclined);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(v.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_reverted_redeem_is_classified() {
        let v = vault(100 * E18);
        let plan = plan_for(&v, "100").await;
        v.update(|s| s.locked = true);
        let err = executor(&v).run(&plan, |_| {}).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Step { hash: Some(_), .. }));
        assert_eq!(
            err.chain_error().and_then(|e| e.rejection()),
            Some(RejectionKind::ContractLocked)
        );
    }

    #[tokio::test]
    async fn test_blocked_plan_is_refused() {
        let v = vault(0);
        v.update(|s| s.round_active = false);
        let plan = plan_for(&v, "100").await;
        assert!(matches!(
            executor(&v).run(&plan, |_| {}).await,
            Err(ExecutionError::Blocked(1))
        ));
        assert_eq!(v.submission_count(), 0);
    }
}
