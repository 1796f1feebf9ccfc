//! Exit lock.
//!
//! Leaving the focus screen while a countdown runs needs an explicit
//! confirmation. The decision is recomputed from the session status on
//! every attempt and is never stored.

use serde::{Deserialize, Serialize};

use super::machine::SessionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitDecision {
    Allowed,
    NeedsConfirmation,
}

pub struct LockGuard;

impl LockGuard {
    pub fn evaluate(status: SessionStatus) -> ExitDecision {
        match status {
            SessionStatus::Running => ExitDecision::NeedsConfirmation,
            SessionStatus::Idle
            | SessionStatus::Paused
            | SessionStatus::Cancelled
            | SessionStatus::Completed => ExitDecision::Allowed,
        }
    }

    pub fn is_locked(status: SessionStatus) -> bool {
        Self::evaluate(status) == ExitDecision::NeedsConfirmation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_needs_confirmation() {
        assert_eq!(
            LockGuard::evaluate(SessionStatus::Running),
            ExitDecision::NeedsConfirmation
        );
        for status in [
            SessionStatus::Idle,
            SessionStatus::Paused,
            SessionStatus::Cancelled,
            SessionStatus::Completed,
        ] {
            assert_eq!(LockGuard::evaluate(status), ExitDecision::Allowed, "{status}");
            assert!(!LockGuard::is_locked(status));
        }
    }
}
