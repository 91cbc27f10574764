//! One user's redeem flow.
//!
//! A session owns at most one plan. `prepare` and `execute` are exclusive:
//! a second call while either is running is turned away with
//! [`SessionError::Busy`] rather than queued. Every `prepare` takes a
//! sequence number, and a result whose number is no longer current (because
//! `reset` ran meanwhile) is dropped without touching the session.
//!
//! Dropping an `execute` future mid-flight (a timeout, a `select!` arm, an
//! aborted task) leaves the session in `error`, from where `reset` works.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::state::SessionState;
use super::{ExecutionError, ExecutionReport, RedeemExecutor};
use crate::config::SESSION_HISTORY_LIMIT;
use crate::planner::{PlanError, RedeemPlan, RedeemPlanner, RedeemRequest};

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Another `prepare` or `execute` is running.
    #[error("session is busy")]
    Busy,

    /// The operation is not allowed from the current state.
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: SessionState,
        action: &'static str,
    },

    /// No runnable plan is held.
    #[error("no plan to execute")]
    NoPlan,

    /// The session was reset while this `prepare` was in flight.
    #[error("request superseded")]
    Superseded,

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// A state change, as recorded in the session history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub at: DateTime<Utc>,
}

struct Inner {
    state: SessionState,
    plan: Option<Arc<RedeemPlan>>,
    history: Vec<Transition>,
    last_error: Option<String>,
    last_report: Option<ExecutionReport>,
}

/// Clears the busy flag when dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, SessionError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| BusyGuard(flag))
            .map_err(|_| SessionError::Busy)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Moves the session to `error` if an `execute` is dropped while
/// transactions may be in flight.
struct CancelGuard<'a> {
    session: &'a RedeemSession,
    armed: bool,
}

impl CancelGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.session.inner.lock();
        let state = inner.state;
        if state.is_executing() {
            warn!(session = %self.session.id, %state, "Execution cancelled in flight");
            inner.last_error = Some(format!("execution cancelled while {state}"));
            self.session.transition(&mut inner, SessionState::Error);
        }
    }
}

/// Plan-then-execute state machine for one user.
pub struct RedeemSession {
    id: Uuid,
    planner: Arc<RedeemPlanner>,
    executor: Arc<RedeemExecutor>,
    inner: Mutex<Inner>,
    busy: AtomicBool,
    request_seq: AtomicU64,
}

impl RedeemSession {
    /// An idle session with a fresh id.
    pub fn new(planner: Arc<RedeemPlanner>, executor: Arc<RedeemExecutor>) -> Self {
        Self {
            id: Uuid::new_v4(),
            planner,
            executor,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                plan: None,
                history: Vec::new(),
                last_error: None,
                last_report: None,
            }),
            busy: AtomicBool::new(false),
            request_seq: AtomicU64::new(0),
        }
    }

    /// Session id, for log correlation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// The held plan, if any.
    pub fn plan(&self) -> Option<Arc<RedeemPlan>> {
        self.inner.lock().plan.clone()
    }

    /// Recent transitions, oldest first. Only the last
    /// [`SESSION_HISTORY_LIMIT`] are kept.
    pub fn history(&self) -> Vec<Transition> {
        self.inner.lock().history.clone()
    }

    /// Message of the failure that put the session in `error`.
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// Report of the last successful execution.
    pub fn last_report(&self) -> Option<ExecutionReport> {
        self.inner.lock().last_report.clone()
    }

    /// Builds a plan for `request` and holds it.
    ///
    /// Ends in `ready` or `blocked`, or in `error` if no plan could be built.
    pub async fn prepare(&self, request: &RedeemRequest) -> Result<Arc<RedeemPlan>, SessionError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        let seq = {
            let mut inner = self.inner.lock();
            if !inner.state.can_prepare() {
                return Err(SessionError::InvalidTransition {
                    from: inner.state,
                    action: "prepare",
                });
            }
            let seq = self.request_seq.fetch_add(1, Ordering::SeqCst) + 1;
            inner.plan = None;
            inner.last_error = None;
            self.transition(&mut inner, SessionState::Preparing);
            seq
        };

        let result = self.planner.prepare(request).await;

        let mut inner = self.inner.lock();
        if self.request_seq.load(Ordering::SeqCst) != seq {
            info!(session = %self.id, seq, "Discarding superseded plan");
            return Err(SessionError::Superseded);
        }
        match result {
            Ok(plan) => {
                let plan = Arc::new(plan);
                let next = if plan.ok() {
                    SessionState::Ready
                } else {
                    SessionState::Blocked
                };
                inner.plan = Some(plan.clone());
                self.transition(&mut inner, next);
                Ok(plan)
            }
            Err(e) => {
                inner.last_error = Some(e.to_string());
                self.transition(&mut inner, SessionState::Error);
                Err(e.into())
            }
        }
    }

    /// Executes the held plan. Only valid from `ready`.
    pub async fn execute(&self) -> Result<ExecutionReport, SessionError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        let plan = {
            let inner = self.inner.lock();
            if !inner.state.can_execute() {
                return Err(SessionError::InvalidTransition {
                    from: inner.state,
                    action: "execute",
                });
            }
            inner.plan.clone().ok_or(SessionError::NoPlan)?
        };

        let mut cancel = CancelGuard {
            session: self,
            armed: true,
        };
        let result = self
            .executor
            .run(&plan, |phase| {
                let mut inner = self.inner.lock();
                self.transition(&mut inner, phase.into());
            })
            .await;
        cancel.disarm();

        let mut inner = self.inner.lock();
        match result {
            Ok(report) => {
                inner.last_report = Some(report.clone());
                self.transition(&mut inner, SessionState::Success);
                Ok(report)
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, "Execution failed");
                inner.last_error = Some(e.to_string());
                self.transition(&mut inner, SessionState::Error);
                Err(e.into())
            }
        }
    }

    /// Returns to `idle`, dropping the plan and cached proof data.
    ///
    /// Refused while transactions are in flight. During `prepare` the
    /// pending result is invalidated.
    pub fn reset(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if inner.state.is_executing() {
            return Err(SessionError::InvalidTransition {
                from: inner.state,
                action: "reset",
            });
        }
        self.request_seq.fetch_add(1, Ordering::SeqCst);
        inner.plan = None;
        inner.last_error = None;
        inner.last_report = None;
        self.planner.reset_caches();
        if inner.state != SessionState::Idle {
            self.transition(&mut inner, SessionState::Idle);
        }
        Ok(())
    }

    fn transition(&self, inner: &mut Inner, to: SessionState) {
        let from = inner.state;
        inner.state = to;
        if inner.history.len() >= SESSION_HISTORY_LIMIT {
            let excess = inner.history.len() + 1 - SESSION_HISTORY_LIMIT;
            inner.history.drain(..excess);
        }
        inner.history.push(Transition {
            from,
            to,
            at: Utc::now(),
        });
        info!(session = %self.id, %from, %to, "Session transition");
    }
}
