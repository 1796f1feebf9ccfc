use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::{Phase, SessionSummary};
use crate::streak::StreakRecord;

/// Every state change in the engine produces an Event.
/// The host polls snapshots; subscribers receive these as they happen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SessionStarted {
        session_id: Uuid,
        phase: Phase,
        planned_ms: u64,
        at: DateTime<Utc>,
    },
    /// A phase ran to its end. `cycle_index` is the value after the
    /// transition, so a Focus completion carries the new completed count.
    PhaseCompleted {
        session_id: Uuid,
        phase: Phase,
        cycle_index: u32,
        planned_minutes: u32,
        next_phase: Phase,
        completed_at: DateTime<Utc>,
    },
    SessionPaused {
        session_id: Uuid,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    SessionResumed {
        session_id: Uuid,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    SessionCancelled {
        session_id: Uuid,
        at: DateTime<Utc>,
    },
    SessionCompleted {
        session_id: Uuid,
        at: DateTime<Utc>,
    },
    /// Terminal sessions leave only their summary behind.
    SessionArchived {
        summary: SessionSummary,
    },
    /// A persisted session was found at startup and brought up to date.
    SessionRecovered {
        session_id: Uuid,
        replayed_phases: usize,
        at: DateTime<Utc>,
    },
    /// Streak statistics after a Focus completion was counted.
    StreakCredited {
        date: NaiveDate,
        record: StreakRecord,
    },
    /// A streak write failed; the in-memory record is kept and retried.
    PersistenceDeferred {
        key: String,
        error: String,
        retry_at: DateTime<Utc>,
    },
    /// Scheduling or cancelling a reminder failed. Best-effort only.
    NotificationFailed {
        session_id: Uuid,
        error: String,
    },
}

impl Event {
    pub fn is_focus_completion(&self) -> bool {
        matches!(
            self,
            Event::PhaseCompleted {
                phase: Phase::Focus,
                ..
            }
        )
    }
}
