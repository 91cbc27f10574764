//! Session states.
//!
//! ```text
//!            prepare                 execute
//!   idle ──────────────► ready ─────────────► approving ──► redeeming ──► success
//!    ▲  ╲                  ▲ ╲                    │  (no approvals) ▲        │
//!    │   ╲─► blocked ◄─────┘  ╲───────────────────┼─────────────────┘        │
//!    │       (prepare)                            ▼                          │
//!    │                                          error ◄── any failure        │
//!    └──────────────────────────── reset ◄──────┴────────────────────────────┘
//! ```
//!
//! `success` and `error` are terminal. Leaving them takes an explicit reset;
//! `error` may also be re-prepared directly.

use std::fmt;

use serde::Serialize;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing prepared.
    Idle,
    /// A plan is being built.
    Preparing,
    /// A runnable plan is held.
    Ready,
    /// The held plan has blocking reasons.
    Blocked,
    /// Approval transactions are in flight.
    Approving,
    /// The redeem transaction is in flight.
    Redeeming,
    /// Terminal: the redeem confirmed.
    Success,
    /// Terminal: something failed.
    Error,
}

impl SessionState {
    /// States from which `prepare` may start.
    pub fn can_prepare(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Ready | SessionState::Blocked | SessionState::Error
        )
    }

    /// States from which `execute` may start.
    pub fn can_execute(self) -> bool {
        self == SessionState::Ready
    }

    /// States in which transactions may be in flight.
    pub fn is_executing(self) -> bool {
        matches!(self, SessionState::Approving | SessionState::Redeeming)
    }

    /// `success` or `error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Success | SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Preparing => "preparing",
            SessionState::Ready => "ready",
            SessionState::Blocked => "blocked",
            SessionState::Approving => "approving",
            SessionState::Redeeming => "redeeming",
            SessionState::Success => "success",
            SessionState::Error => "error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_entry_states() {
        assert!(SessionState::Idle.can_prepare());
        assert!(SessionState::Blocked.can_prepare());
        assert!(SessionState::Error.can_prepare());
        assert!(!SessionState::Success.can_prepare());
        assert!(!SessionState::Approving.can_prepare());
        assert!(!SessionState::Preparing.can_prepare());
    }

    #[test]
    fn test_only_ready_executes() {
        for s in [
            SessionState::Idle,
            SessionState::Blocked,
            SessionState::Success,
            SessionState::Error,
            SessionState::Redeeming,
        ] {
            assert!(!s.can_execute(), "{s}");
        }
        assert!(SessionState::Ready.can_execute());
    }

    #[test]
    fn test_display_matches_serde() {
        let json = serde_json::to_string(&SessionState::Redeeming).unwrap();
        assert_eq!(json, format!("\"{}\"", SessionState::Redeeming));
    }
}
