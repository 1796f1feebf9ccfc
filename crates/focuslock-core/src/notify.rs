//! Phase-end reminders.
//!
//! The engine keeps at most one pending reminder per session. Every arm
//! first cancels the previous token, then schedules the next one. The port
//! itself is best-effort: failures are reported and the countdown carries on.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NotificationError;
use crate::session::{Phase, Session};

/// Opaque handle returned by the port for a scheduled reminder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationToken(pub String);

/// What the host needs to render a phase-appropriate reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub session_id: Uuid,
    /// The phase that ends when the reminder fires.
    pub phase: Phase,
    pub cycle_index: u32,
    pub title: String,
    pub body: String,
}

impl NotificationPayload {
    pub fn for_phase_end(session_id: Uuid, phase: Phase, cycle_index: u32) -> Self {
        let (title, body) = match phase {
            Phase::Focus => ("Focus complete", "Nice work, take a break."),
            Phase::ShortRest => ("Break over", "Back to focus."),
            Phase::LongRest => ("Long break over", "Ready for the next round of focus?"),
        };
        Self {
            session_id,
            phase,
            cycle_index,
            title: title.to_string(),
            body: body.to_string(),
        }
    }
}

/// Host-side reminder transport.
pub trait NotificationPort: Send {
    fn schedule(
        &self,
        session_id: Uuid,
        fire_at: DateTime<Utc>,
        payload: &NotificationPayload,
        timeout: Duration,
    ) -> Result<NotificationToken, NotificationError>;

    fn cancel(&self, token: &NotificationToken, timeout: Duration) -> Result<(), NotificationError>;
}

/// Reminder preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    2_000
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Tracks the single pending reminder and sequences port calls.
#[derive(Debug)]
pub struct NotificationScheduler {
    settings: NotificationSettings,
    pending: Option<NotificationToken>,
}

impl NotificationScheduler {
    pub fn new(settings: NotificationSettings) -> Self {
        Self {
            settings,
            pending: None,
        }
    }

    pub fn pending(&self) -> Option<&NotificationToken> {
        self.pending.as_ref()
    }

    /// Take over a token persisted before a restart.
    pub fn adopt(&mut self, token: Option<NotificationToken>) {
        self.pending = token;
    }

    /// Cancel the previous reminder and schedule one for the end of the
    /// session's current phase.
    pub fn arm(&mut self, port: &dyn NotificationPort, session: &Session) -> Vec<NotificationError> {
        let mut errors: Vec<NotificationError> = self.disarm(port).into_iter().collect();
        if !self.settings.enabled {
            return errors;
        }

        let fire_at = session.phase_ends_at();
        let payload = NotificationPayload::for_phase_end(session.id, session.phase, session.cycle_index);
        match port.schedule(session.id, fire_at, &payload, self.timeout()) {
            Ok(token) => {
                tracing::debug!(session = %session.id, %fire_at, phase = %session.phase, "reminder scheduled");
                self.pending = Some(token);
            }
            Err(e) => {
                tracing::warn!(session = %session.id, error = %e, "failed to schedule reminder");
                errors.push(e);
            }
        }
        errors
    }

    /// Cancel the pending reminder, if any.
    ///
    /// The token is dropped even when the port fails; a stale reminder is
    /// preferable to two live ones.
    pub fn disarm(&mut self, port: &dyn NotificationPort) -> Option<NotificationError> {
        let token = self.pending.take()?;
        match port.cancel(&token, self.timeout()) {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(token = %token.0, error = %e, "failed to cancel reminder");
                Some(e)
            }
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.settings.timeout_ms)
    }
}

/// A reminder as seen by [`RecordingPort`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedNotification {
    pub token: NotificationToken,
    pub fire_at: DateTime<Utc>,
    pub payload: NotificationPayload,
}

#[derive(Debug, Default)]
struct Recording {
    next: u64,
    pending: Vec<RecordedNotification>,
    scheduled: u64,
    cancelled: u64,
    fail: bool,
}

/// In-memory port that records calls. Clones share the recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingPort {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Vec<RecordedNotification> {
        self.lock().pending.clone()
    }

    pub fn scheduled_count(&self) -> u64 {
        self.lock().scheduled
    }

    pub fn cancelled_count(&self) -> u64 {
        self.lock().cancelled
    }

    /// Make every subsequent call fail.
    pub fn set_failing(&self, fail: bool) {
        self.lock().fail = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl NotificationPort for RecordingPort {
    fn schedule(
        &self,
        _session_id: Uuid,
        fire_at: DateTime<Utc>,
        payload: &NotificationPayload,
        _timeout: Duration,
    ) -> Result<NotificationToken, NotificationError> {
        let mut rec = self.lock();
        if rec.fail {
            return Err(NotificationError::Rejected("port unavailable".into()));
        }
        rec.next += 1;
        rec.scheduled += 1;
        let token = NotificationToken(format!("n{}", rec.next));
        rec.pending.push(RecordedNotification {
            token: token.clone(),
            fire_at,
            payload: payload.clone(),
        });
        Ok(token)
    }

    fn cancel(&self, token: &NotificationToken, _timeout: Duration) -> Result<(), NotificationError> {
        let mut rec = self.lock();
        if rec.fail {
            return Err(NotificationError::Rejected("port unavailable".into()));
        }
        rec.cancelled += 1;
        rec.pending.retain(|n| &n.token != token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionConfig, SessionMachine};
    use chrono::TimeZone;

    fn running_session() -> Session {
        let mut m = SessionMachine::new();
        let t0 = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
        m.start(SessionConfig::default(), t0).unwrap();
        m.session().cloned().unwrap()
    }

    #[test]
    fn arm_cancels_before_scheduling() {
        let port = RecordingPort::new();
        let mut scheduler = NotificationScheduler::new(NotificationSettings::default());
        let session = running_session();

        assert!(scheduler.arm(&port, &session).is_empty());
        assert!(scheduler.arm(&port, &session).is_empty());

        assert_eq!(port.scheduled_count(), 2);
        assert_eq!(port.cancelled_count(), 1);
        let pending = port.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].fire_at, session.phase_ends_at());
        assert_eq!(pending[0].payload.phase, Phase::Focus);
        assert_eq!(scheduler.pending(), Some(&pending[0].token));
    }

    #[test]
    fn disarm_without_pending_is_a_no_op() {
        let port = RecordingPort::new();
        let mut scheduler = NotificationScheduler::new(NotificationSettings::default());
        assert!(scheduler.disarm(&port).is_none());
        assert_eq!(port.cancelled_count(), 0);
    }

    #[test]
    fn disabled_reminders_schedule_nothing() {
        let port = RecordingPort::new();
        let mut scheduler = NotificationScheduler::new(NotificationSettings {
            enabled: false,
            ..NotificationSettings::default()
        });
        scheduler.arm(&port, &running_session());
        assert_eq!(port.scheduled_count(), 0);
        assert!(scheduler.pending().is_none());
    }

    #[test]
    fn port_failures_are_reported_not_raised() {
        let port = RecordingPort::new();
        port.set_failing(true);
        let mut scheduler = NotificationScheduler::new(NotificationSettings::default());
        let errors = scheduler.arm(&port, &running_session());
        assert_eq!(errors.len(), 1);
        assert!(scheduler.pending().is_none());
    }

    #[test]
    fn payload_text_depends_on_ending_phase() {
        let id = Uuid::new_v4();
        assert_eq!(
            NotificationPayload::for_phase_end(id, Phase::Focus, 0).title,
            "Focus complete"
        );
        assert_eq!(
            NotificationPayload::for_phase_end(id, Phase::ShortRest, 1).body,
            "Back to focus."
        );
    }
}
