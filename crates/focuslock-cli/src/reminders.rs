//! Reminder outbox kept in the database.
//!
//! The CLI has no OS notification center to hand reminders to, so scheduled
//! reminders are stored under one key and delivered by `timer run` once
//! they fall due. Separate invocations see the same outbox.

use std::time::Duration;

use chrono::{DateTime, Utc};
use focuslock_core::storage::{load_json, save_json};
use focuslock_core::{
    Database, NotificationError, NotificationPayload, NotificationPort, NotificationToken,
    PersistenceError,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store key of the reminder outbox.
pub const OUTBOX_KEY: &str = "notifications.pending";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReminder {
    pub token: NotificationToken,
    pub session_id: Uuid,
    pub fire_at: DateTime<Utc>,
    pub payload: NotificationPayload,
}

#[derive(Clone)]
pub struct StoreNotifier {
    db: Database,
}

impl StoreNotifier {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// All reminders not yet delivered, earliest first.
    pub fn pending(&self, timeout: Duration) -> Result<Vec<PendingReminder>, PersistenceError> {
        let mut reminders: Vec<PendingReminder> =
            load_json(&self.db, OUTBOX_KEY, timeout)?.unwrap_or_default();
        reminders.sort_by_key(|r| r.fire_at);
        Ok(reminders)
    }

    /// Remove and return the reminders due at `now`.
    pub fn take_due(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<PendingReminder>, PersistenceError> {
        let (due, later): (Vec<_>, Vec<_>) = self
            .pending(timeout)?
            .into_iter()
            .partition(|r| r.fire_at <= now);
        if !due.is_empty() {
            save_json(&self.db, OUTBOX_KEY, &later, timeout)?;
        }
        Ok(due)
    }

    fn update<F>(&self, timeout: Duration, change: F) -> Result<(), NotificationError>
    where
        F: FnOnce(&mut Vec<PendingReminder>),
    {
        let mut reminders = self.pending(timeout).map_err(|e| outbox_error(e, timeout))?;
        change(&mut reminders);
        save_json(&self.db, OUTBOX_KEY, &reminders, timeout).map_err(|e| outbox_error(e, timeout))
    }
}

impl NotificationPort for StoreNotifier {
    fn schedule(
        &self,
        session_id: Uuid,
        fire_at: DateTime<Utc>,
        payload: &NotificationPayload,
        timeout: Duration,
    ) -> Result<NotificationToken, NotificationError> {
        let token = NotificationToken(Uuid::new_v4().to_string());
        let reminder = PendingReminder {
            token: token.clone(),
            session_id,
            fire_at,
            payload: payload.clone(),
        };
        self.update(timeout, |reminders| reminders.push(reminder))?;
        Ok(token)
    }

    fn cancel(&self, token: &NotificationToken, timeout: Duration) -> Result<(), NotificationError> {
        self.update(timeout, |reminders| reminders.retain(|r| &r.token != token))
    }
}

fn outbox_error(error: PersistenceError, timeout: Duration) -> NotificationError {
    match error {
        PersistenceError::Timeout { .. } => NotificationError::Timeout(timeout),
        other => NotificationError::Rejected(other.to_string()),
    }
}
