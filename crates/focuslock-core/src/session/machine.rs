//! Session state machine.
//!
//! A wall-clock-based state machine with no internal thread. The host
//! calls `tick(now)` at any cadence; progress is derived from timestamps,
//! never from the number of calls.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Running(Focus) -> Running(ShortRest | LongRest) -> Running(Focus) -> ...
//!           Running <-> Paused
//!           Running | Paused -> Cancelled | Completed
//! ```
//!
//! While running, `remaining = planned - (now - phase_started_at)`. Resuming
//! shifts `phase_started_at` forward by the paused interval so that
//! identity keeps holding and the pause is never counted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::{Phase, SessionConfig};
use crate::error::SessionError;
use crate::events::Event;

/// Upper bound on phase transitions replayed by a single tick.
pub const MAX_REPLAY_TRANSITIONS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Running,
    Paused,
    Cancelled,
    Completed,
}

impl SessionStatus {
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One focus/rest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub phase: Phase,
    /// Completed Focus phases in this session.
    pub cycle_index: u32,
    pub config: SessionConfig,
    pub planned_ms: u64,
    pub remaining_ms: u64,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub phase_started_at: DateTime<Utc>,
    /// Sum of planned Focus time that ran to completion.
    #[serde(default)]
    pub focused_ms: u64,
}

impl Session {
    fn new(config: SessionConfig, now: DateTime<Utc>) -> Self {
        let planned_ms = config.duration_ms(Phase::Focus);
        Self {
            id: Uuid::new_v4(),
            phase: Phase::Focus,
            cycle_index: 0,
            config,
            planned_ms,
            remaining_ms: planned_ms,
            status: SessionStatus::Running,
            started_at: now,
            phase_started_at: now,
            focused_ms: 0,
        }
    }

    /// Instant the current phase ends if it keeps running.
    pub fn phase_ends_at(&self) -> DateTime<Utc> {
        self.phase_started_at + ms(self.planned_ms)
    }

    /// Remaining time at `now`, clamped to `[0, planned]`.
    fn remaining_at(&self, now: DateTime<Utc>) -> u64 {
        let elapsed = (now - self.phase_started_at).num_milliseconds().max(0) as u64;
        self.planned_ms.saturating_sub(elapsed)
    }

    pub fn summary(&self, ended_at: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            session_id: self.id,
            outcome: self.status,
            started_at: self.started_at,
            ended_at,
            completed_cycles: self.cycle_index,
            focused_minutes: self.focused_ms / 60_000,
        }
    }
}

/// What survives a session once it is cancelled or completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub outcome: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub completed_cycles: u32,
    pub focused_minutes: u64,
}

/// Point-in-time view for the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub session_id: Option<Uuid>,
    pub phase: Option<Phase>,
    pub cycle_index: u32,
    pub remaining_ms: u64,
    pub planned_ms: u64,
    pub phase_ends_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

/// Owns the (at most one) session and its transitions.
#[derive(Debug, Clone, Default)]
pub struct SessionMachine {
    session: Option<Session>,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn status(&self) -> SessionStatus {
        self.session
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(SessionStatus::Idle)
    }

    /// The session, if it is running or paused.
    pub fn active(&self) -> Option<&Session> {
        self.session.as_ref().filter(|s| s.status.is_active())
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        match &self.session {
            Some(s) => SessionSnapshot {
                status: s.status,
                session_id: Some(s.id),
                phase: Some(s.phase),
                cycle_index: s.cycle_index,
                remaining_ms: s.remaining_ms,
                planned_ms: s.planned_ms,
                phase_ends_at: (s.status == SessionStatus::Running).then(|| s.phase_ends_at()),
                at: now,
            },
            None => SessionSnapshot {
                status: SessionStatus::Idle,
                session_id: None,
                phase: None,
                cycle_index: 0,
                remaining_ms: 0,
                planned_ms: 0,
                phase_ends_at: None,
                at: now,
            },
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Begin a new session in Focus. A terminal session is replaced.
    pub fn start(&mut self, config: SessionConfig, now: DateTime<Utc>) -> Result<Event, SessionError> {
        if self.active().is_some() {
            return Err(SessionError::AlreadyRunning);
        }
        let session = Session::new(config, now);
        let event = Event::SessionStarted {
            session_id: session.id,
            phase: session.phase,
            planned_ms: session.planned_ms,
            at: now,
        };
        self.session = Some(session);
        Ok(event)
    }

    /// Advance to `now`, completing every phase whose end has passed.
    ///
    /// A phase completes once `now` is strictly past its end; the next
    /// phase is anchored at that end, so lazy ticks lose no time. After
    /// [`MAX_REPLAY_TRANSITIONS`] the landing phase restarts at `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = Vec::new();
        let Some(session) = self.session.as_mut() else {
            return events;
        };
        if session.status != SessionStatus::Running {
            return events;
        }

        let mut transitions = 0;
        loop {
            let end = session.phase_ends_at();
            if now <= end {
                break;
            }
            if transitions == MAX_REPLAY_TRANSITIONS {
                tracing::warn!(
                    session = %session.id,
                    "replay bound reached, restarting {} at now",
                    session.phase
                );
                session.phase_started_at = now;
                break;
            }

            let completed = session.phase;
            let (next, cycle_index) = session.config.next_phase(completed, session.cycle_index);
            if completed == Phase::Focus {
                session.focused_ms = session.focused_ms.saturating_add(session.planned_ms);
            }
            events.push(Event::PhaseCompleted {
                session_id: session.id,
                phase: completed,
                cycle_index,
                planned_minutes: session.config.minutes_for(completed),
                next_phase: next,
                completed_at: end,
            });
            tracing::info!(
                session = %session.id,
                cycle = cycle_index,
                "{completed} complete, entering {next}"
            );

            session.phase = next;
            session.cycle_index = cycle_index;
            session.planned_ms = session.config.duration_ms(next);
            session.phase_started_at = end;
            transitions += 1;
        }
        session.remaining_ms = session.remaining_at(now);
        events
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<Event, SessionError> {
        let session = self.require("pause", SessionStatus::Running)?;
        session.remaining_ms = session.remaining_at(now);
        session.status = SessionStatus::Paused;
        Ok(Event::SessionPaused {
            session_id: session.id,
            remaining_ms: session.remaining_ms,
            at: now,
        })
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<Event, SessionError> {
        let session = self.require("resume", SessionStatus::Paused)?;
        let elapsed = session.planned_ms - session.remaining_ms.min(session.planned_ms);
        session.phase_started_at = now - ms(elapsed);
        session.status = SessionStatus::Running;
        Ok(Event::SessionResumed {
            session_id: session.id,
            remaining_ms: session.remaining_ms,
            at: now,
        })
    }

    /// Abandon the session. The in-progress phase earns nothing.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<Event, SessionError> {
        let session = self.require_active("cancel")?;
        if session.status == SessionStatus::Running {
            session.remaining_ms = session.remaining_at(now);
        }
        session.status = SessionStatus::Cancelled;
        tracing::info!(session = %session.id, cycles = session.cycle_index, "session cancelled");
        Ok(Event::SessionCancelled {
            session_id: session.id,
            at: now,
        })
    }

    /// End the session on purpose. Requires at least one completed Focus.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<Event, SessionError> {
        let session = self.require_active("complete")?;
        if session.cycle_index == 0 {
            return Err(SessionError::InvalidTransition {
                command: "complete",
                status: session.status,
            });
        }
        if session.status == SessionStatus::Running {
            session.remaining_ms = session.remaining_at(now);
        }
        session.status = SessionStatus::Completed;
        tracing::info!(session = %session.id, cycles = session.cycle_index, "session completed");
        Ok(Event::SessionCompleted {
            session_id: session.id,
            at: now,
        })
    }

    /// Adopt a persisted session and bring it up to `now`.
    ///
    /// Timestamps are authoritative: planned length is recomputed from the
    /// phase, and remaining time from `phase_started_at` (running) or
    /// clamped into range (paused). Terminal snapshots are ignored.
    pub fn restore(&mut self, mut session: Session, now: DateTime<Utc>) -> Vec<Event> {
        if !session.status.is_active() {
            return Vec::new();
        }
        if self.active().is_some() {
            tracing::warn!(session = %session.id, "ignoring persisted session, one is already active");
            return Vec::new();
        }
        session.planned_ms = session.config.duration_ms(session.phase);
        session.remaining_ms = session.remaining_ms.min(session.planned_ms);
        self.session = Some(session);
        self.tick(now)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn require(
        &mut self,
        command: &'static str,
        wanted: SessionStatus,
    ) -> Result<&mut Session, SessionError> {
        let status = self.status();
        match self.session.as_mut() {
            Some(s) if s.status == wanted => Ok(s),
            _ => Err(SessionError::InvalidTransition { command, status }),
        }
    }

    fn require_active(&mut self, command: &'static str) -> Result<&mut Session, SessionError> {
        let status = self.status();
        match self.session.as_mut() {
            Some(s) if s.status.is_active() => Ok(s),
            _ => Err(SessionError::InvalidTransition { command, status }),
        }
    }
}

fn ms(value: u64) -> Duration {
    Duration::milliseconds(i64::try_from(value).unwrap_or(i64::MAX))
}
