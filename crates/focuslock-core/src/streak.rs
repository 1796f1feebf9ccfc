//! Daily focus streak.
//!
//! A streak counts consecutive calendar days (device-local) with at least
//! one completed Focus phase. Several completions on one day count once
//! toward the streak but every completion adds to the lifetime totals.
//!
//! The record is written through to the persistence store before the
//! completion is acknowledged. When a write fails the in-memory record
//! stays authoritative and the write is retried with exponential backoff.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::storage::{load_json, save_json, PersistenceStore};

/// Store key of the streak record blob.
pub const STREAK_KEY: &str = "focus.streak";

/// Persisted streak statistics, one per user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreakRecord {
    pub current_streak_days: u32,
    #[serde(default)]
    pub longest_streak_days: u32,
    /// Distinct dates that earned streak credit.
    #[serde(default)]
    pub credited_days: u32,
    pub last_credited_date: Option<NaiveDate>,
    pub total_focus_minutes: u64,
    /// Completed Focus phases, lifetime.
    pub total_completed_sessions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditOutcome {
    /// Already credited today; totals only.
    SameDay,
    /// The day after the last credited date.
    Extended,
    /// First credit ever, or a gap of more than one day.
    Restarted,
    /// Earlier than the last credited date (clock moved back); totals only.
    Backdated,
}

impl StreakRecord {
    /// Count one completed Focus phase of `minutes` on `date`.
    pub fn credit(&mut self, date: NaiveDate, minutes: u32) -> CreditOutcome {
        self.total_focus_minutes = self.total_focus_minutes.saturating_add(u64::from(minutes));
        self.total_completed_sessions = self.total_completed_sessions.saturating_add(1);

        let outcome = match self.last_credited_date {
            Some(last) if last == date => CreditOutcome::SameDay,
            Some(last) if date < last => CreditOutcome::Backdated,
            Some(last) if last.succ_opt() == Some(date) => {
                self.current_streak_days = self.current_streak_days.saturating_add(1);
                CreditOutcome::Extended
            }
            _ => {
                self.current_streak_days = 1;
                CreditOutcome::Restarted
            }
        };

        if matches!(outcome, CreditOutcome::Extended | CreditOutcome::Restarted) {
            self.last_credited_date = Some(date);
            self.credited_days = self.credited_days.saturating_add(1);
            self.longest_streak_days = self.longest_streak_days.max(self.current_streak_days);
        }
        outcome
    }

    /// Streak as it should be displayed on `today`: zero once a whole
    /// day has been missed, even though nothing has reset it yet.
    pub fn streak_on(&self, today: NaiveDate) -> u32 {
        match self.last_credited_date {
            Some(last) if last == today || last.succ_opt() == Some(today) => {
                self.current_streak_days
            }
            _ => 0,
        }
    }
}

/// Backoff for deferred streak writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

fn default_retry_base_ms() -> u64 {
    1_000
}
fn default_retry_max_ms() -> u64 {
    5 * 60 * 1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self.retry_base_ms.saturating_mul(factor).min(self.retry_max_ms);
        Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingWrite {
    attempts: u32,
    retry_at: DateTime<Utc>,
}

/// Result of crediting one Focus completion.
#[derive(Debug)]
pub struct CreditReport {
    pub date: NaiveDate,
    pub outcome: CreditOutcome,
    /// Set when the write-through failed and a retry was scheduled.
    pub deferred: Option<(PersistenceError, DateTime<Utc>)>,
}

/// Owns the streak record and its write-through to the store.
#[derive(Debug)]
pub struct StreakTracker {
    record: StreakRecord,
    retry: RetryPolicy,
    timeout: StdDuration,
    pending: Option<PendingWrite>,
}

impl StreakTracker {
    /// Read the record from `store`; a missing key starts a fresh record.
    pub fn load(
        store: &dyn PersistenceStore,
        timeout: StdDuration,
        retry: RetryPolicy,
    ) -> Result<Self, PersistenceError> {
        let record = load_json::<StreakRecord>(store, STREAK_KEY, timeout)?.unwrap_or_default();
        Ok(Self {
            record,
            retry,
            timeout,
            pending: None,
        })
    }

    pub fn record(&self) -> &StreakRecord {
        &self.record
    }

    pub fn has_pending_write(&self) -> bool {
        self.pending.is_some()
    }

    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        self.pending.map(|p| p.retry_at)
    }

    /// Credit a Focus completion on `date` and write it through.
    pub fn credit_focus(
        &mut self,
        store: &dyn PersistenceStore,
        date: NaiveDate,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> CreditReport {
        let outcome = self.record.credit(date, minutes);
        tracing::info!(
            %date,
            ?outcome,
            streak = self.record.current_streak_days,
            total_minutes = self.record.total_focus_minutes,
            "focus credited"
        );
        let deferred = self
            .write(store, now)
            .err()
            .and_then(|e| self.retry_at().map(|at| (e, at)));
        CreditReport {
            date,
            outcome,
            deferred,
        }
    }

    /// Take over a record whose write never reached the store, if it has
    /// counted more completions than the stored one. The write is retried
    /// on the next flush.
    pub fn adopt_unwritten(&mut self, record: StreakRecord, now: DateTime<Utc>) -> bool {
        if record.total_completed_sessions <= self.record.total_completed_sessions {
            return false;
        }
        tracing::info!(
            total_minutes = record.total_focus_minutes,
            "restoring streak record that was never written"
        );
        self.record = record;
        self.pending = Some(PendingWrite {
            attempts: 0,
            retry_at: now,
        });
        true
    }

    /// Retry a deferred write once its backoff has elapsed.
    ///
    /// Returns `None` when nothing was attempted.
    pub fn flush_pending(
        &mut self,
        store: &dyn PersistenceStore,
        now: DateTime<Utc>,
    ) -> Option<Result<(), PersistenceError>> {
        let pending = self.pending?;
        if now < pending.retry_at {
            return None;
        }
        Some(self.write(store, now))
    }

    fn write(&mut self, store: &dyn PersistenceStore, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        match save_json(store, STREAK_KEY, &self.record, self.timeout) {
            Ok(()) => {
                if self.pending.take().is_some() {
                    tracing::info!("deferred streak write flushed");
                }
                Ok(())
            }
            Err(e) => {
                let attempts = self.pending.map(|p| p.attempts).unwrap_or(0) + 1;
                let retry_at = now + self.retry.delay(attempts);
                tracing::warn!(error = %e, attempts, %retry_at, "streak write failed, will retry");
                self.pending = Some(PendingWrite { attempts, retry_at });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, d).unwrap()
    }

    #[test]
    fn streak_sequence_same_day_next_day_gap() {
        let mut record = StreakRecord::default();
        let mut seen = Vec::new();
        for date in [day(1), day(1), day(2), day(4)] {
            record.credit(date, 25);
            seen.push(record.current_streak_days);
        }
        assert_eq!(seen, vec![1, 1, 2, 1]);
        assert_eq!(record.total_focus_minutes, 100);
        assert_eq!(record.total_completed_sessions, 4);
        assert_eq!(record.longest_streak_days, 2);
        assert_eq!(record.credited_days, 3);
        assert_eq!(record.last_credited_date, Some(day(4)));
    }

    #[test]
    fn backdated_credit_keeps_last_date() {
        let mut record = StreakRecord::default();
        record.credit(day(5), 25);
        assert_eq!(record.credit(day(3), 25), CreditOutcome::Backdated);
        assert_eq!(record.last_credited_date, Some(day(5)));
        assert_eq!(record.current_streak_days, 1);
        assert_eq!(record.total_focus_minutes, 50);
    }

    #[test]
    fn month_boundary_extends() {
        let mut record = StreakRecord::default();
        record.credit(NaiveDate::from_ymd_opt(2026, 6, 30).unwrap(), 25);
        assert_eq!(
            record.credit(NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(), 25),
            CreditOutcome::Extended
        );
        assert_eq!(record.current_streak_days, 2);
    }

    #[test]
    fn displayed_streak_lapses_after_missed_day() {
        let mut record = StreakRecord::default();
        record.credit(day(1), 25);
        record.credit(day(2), 25);
        assert_eq!(record.streak_on(day(2)), 2);
        assert_eq!(record.streak_on(day(3)), 2);
        assert_eq!(record.streak_on(day(4)), 0);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            retry_base_ms: 1000,
            retry_max_ms: 5000,
        };
        assert_eq!(policy.delay(1), Duration::seconds(1));
        assert_eq!(policy.delay(2), Duration::seconds(2));
        assert_eq!(policy.delay(3), Duration::seconds(4));
        assert_eq!(policy.delay(4), Duration::seconds(5));
        assert_eq!(policy.delay(80), Duration::seconds(5));
    }

    #[test]
    fn credit_writes_through() {
        let store = MemoryStore::new();
        let timeout = StdDuration::from_secs(1);
        let mut tracker = StreakTracker::load(&store, timeout, RetryPolicy::default()).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap();
        let report = tracker.credit_focus(&store, day(1), 25, now);
        assert!(report.deferred.is_none());

        let reloaded = StreakTracker::load(&store, timeout, RetryPolicy::default()).unwrap();
        assert_eq!(reloaded.record(), tracker.record());
    }

    #[test]
    fn failed_write_is_retried_after_backoff() {
        let store = MemoryStore::new();
        let timeout = StdDuration::from_secs(1);
        let mut tracker = StreakTracker::load(&store, timeout, RetryPolicy::default()).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap();

        store.set_failing(true);
        let report = tracker.credit_focus(&store, day(1), 25, now);
        let (_, retry_at) = report.deferred.expect("write should be deferred");
        assert_eq!(retry_at, now + Duration::seconds(1));
        assert_eq!(tracker.record().current_streak_days, 1);

        store.set_failing(false);
        assert!(tracker.flush_pending(&store, now).is_none());
        assert!(matches!(tracker.flush_pending(&store, retry_at), Some(Ok(()))));
        assert!(!tracker.has_pending_write());

        let reloaded = StreakTracker::load(&store, timeout, RetryPolicy::default()).unwrap();
        assert_eq!(reloaded.record().total_focus_minutes, 25);
    }

    #[test]
    fn adopting_an_unwritten_record_only_moves_forward() {
        let store = MemoryStore::new();
        let timeout = StdDuration::from_secs(1);
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap();
        let mut tracker = StreakTracker::load(&store, timeout, RetryPolicy::default()).unwrap();

        let mut unwritten = StreakRecord::default();
        unwritten.credit(day(1), 25);
        assert!(!tracker.adopt_unwritten(StreakRecord::default(), now));
        assert!(tracker.adopt_unwritten(unwritten.clone(), now));
        assert!(tracker.has_pending_write());
        assert!(!tracker.adopt_unwritten(unwritten, now));

        assert!(matches!(tracker.flush_pending(&store, now), Some(Ok(()))));
        let reloaded = StreakTracker::load(&store, timeout, RetryPolicy::default()).unwrap();
        assert_eq!(reloaded.record().total_focus_minutes, 25);
    }
}
