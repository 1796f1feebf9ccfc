//! SQLite-backed storage.
//!
//! Provides persistent storage for:
//! - Key-value blobs (streak record, active session snapshot, pending reminders)
//! - Summaries of archived sessions and their statistics

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode};
use serde::{Deserialize, Serialize};

use super::data_dir;
use super::store::PersistenceStore;
use crate::error::PersistenceError;
use crate::session::{SessionStatus, SessionSummary};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub total_sessions: u64,
    pub completed_sessions: u64,
    pub cancelled_sessions: u64,
    pub total_cycles: u64,
    pub total_focus_min: u64,
    pub today_sessions: u64,
    pub today_focus_min: u64,
    pub month_sessions: u64,
    pub month_focus_min: u64,
    /// Focus minutes per archived session.
    pub average_focus_min: u64,
    /// This month's focus minutes per day elapsed in the month.
    pub daily_average_focus_min: u64,
}

/// SQLite database. Clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the database at `~/.config/focuslock/focuslock.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    pub fn open() -> Result<Self, PersistenceError> {
        let dir = data_dir().map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Self::open_at(&dir.join("focuslock.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id               TEXT PRIMARY KEY,
                outcome          TEXT NOT NULL,
                completed_cycles INTEGER NOT NULL,
                focused_min      INTEGER NOT NULL,
                started_at       TEXT NOT NULL,
                ended_at         TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_ended_at ON sessions(ended_at);",
        )
    }

    /// Record an archived session. Re-recording the same id is a no-op.
    pub fn record_session(&self, summary: &SessionSummary) -> Result<(), PersistenceError> {
        self.conn().execute(
            "INSERT OR IGNORE INTO sessions
                (id, outcome, completed_cycles, focused_min, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                summary.session_id.to_string(),
                summary.outcome.as_str(),
                summary.completed_cycles,
                summary.focused_minutes,
                timestamp(summary.started_at),
                timestamp(summary.ended_at),
            ],
        )?;
        Ok(())
    }

    /// Archive statistics. "Today" and "this month" are calendar periods
    /// in `now`'s time zone, the same local days the streak counts.
    pub fn stats<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Result<ArchiveStats, PersistenceError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT outcome, COUNT(*), COALESCE(SUM(completed_cycles), 0), COALESCE(SUM(focused_min), 0)
             FROM sessions
             GROUP BY outcome",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u64>(1)?,
                row.get::<_, u64>(2)?,
                row.get::<_, u64>(3)?,
            ))
        })?;

        let mut stats = ArchiveStats::default();
        for row in rows {
            let (outcome, count, cycles, minutes) = row?;
            stats.total_sessions += count;
            stats.total_cycles += cycles;
            stats.total_focus_min += minutes;
            if outcome == SessionStatus::Completed.as_str() {
                stats.completed_sessions += count;
            } else if outcome == SessionStatus::Cancelled.as_str() {
                stats.cancelled_sessions += count;
            }
        }

        let today = now.date_naive();
        let month = today.with_day(1).unwrap_or(today);
        let tz = now.timezone();
        let ended_since = |from: NaiveDate| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(focused_min), 0)
                 FROM sessions
                 WHERE ended_at >= ?1",
                params![timestamp(local_midnight(&tz, from))],
                |row| Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?)),
            )
        };
        (stats.today_sessions, stats.today_focus_min) = ended_since(today)?;
        (stats.month_sessions, stats.month_focus_min) = ended_since(month)?;

        if stats.total_sessions > 0 {
            stats.average_focus_min = stats.total_focus_min / stats.total_sessions;
        }
        stats.daily_average_focus_min = stats.month_focus_min / u64::from(today.day());
        Ok(stats)
    }

    /// Run `f` holding the database write lock, so that read-modify-write
    /// sequences from several processes apply one at a time. Waits up to
    /// `timeout` for another holder. Writes made by `f` are committed even
    /// when it returns an error.
    pub fn write_locked<T, E, F>(&self, timeout: Duration, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<PersistenceError>,
    {
        const LOCK_KEY: &str = "write lock";
        self.apply_timeout(timeout)
            .and_then(|()| self.conn().execute_batch("BEGIN IMMEDIATE"))
            .map_err(|e| map_err(LOCK_KEY, timeout, e))?;

        let result = f();
        if let Err(e) = self.conn().execute_batch("COMMIT") {
            tracing::warn!(error = %e, "commit failed, rolling back");
            let _ = self.conn().execute_batch("ROLLBACK");
            if result.is_ok() {
                return Err(map_err(LOCK_KEY, timeout, e).into());
            }
        }
        result
    }

    fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        match stmt.query_row(params![key], |row| row.get::<_, Vec<u8>>(0)) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn kv_set(&self, key: &str, value: &[u8]) -> Result<(), rusqlite::Error> {
        self.conn().execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn apply_timeout(&self, timeout: Duration) -> Result<(), rusqlite::Error> {
        self.conn().busy_timeout(timeout)
    }
}

/// Fixed-width UTC timestamps compare correctly as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// First instant of `date` in `tz`. A midnight skipped by a DST change
/// falls back to midnight UTC.
fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// SQLITE_BUSY after the busy timeout means the caller's deadline passed.
fn map_err(key: &str, timeout: Duration, err: rusqlite::Error) -> PersistenceError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::DatabaseBusy => {
            PersistenceError::Timeout {
                key: key.to_string(),
                timeout,
            }
        }
        _ => PersistenceError::from(err),
    }
}

impl PersistenceStore for Database {
    fn get(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, PersistenceError> {
        self.apply_timeout(timeout)
            .and_then(|()| self.kv_get(key))
            .map_err(|e| map_err(key, timeout, e))
    }

    fn set(&self, key: &str, value: &[u8], timeout: Duration) -> Result<(), PersistenceError> {
        self.apply_timeout(timeout)
            .and_then(|()| self.kv_set(key, value))
            .map_err(|e| map_err(key, timeout, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    const T: Duration = Duration::from_secs(1);

    fn summary(outcome: SessionStatus, cycles: u32, ended_at: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            session_id: Uuid::new_v4(),
            outcome,
            started_at: ended_at - ChronoDuration::hours(1),
            ended_at,
            completed_cycles: cycles,
            focused_minutes: u64::from(cycles) * 25,
        }
    }

    #[test]
    fn kv_store() {
        let db = Database::open_memory().unwrap();
        assert!(db.get("test", T).unwrap().is_none());
        db.set("test", b"hello", T).unwrap();
        assert_eq!(db.get("test", T).unwrap().unwrap(), b"hello");
        db.set("test", b"again", T).unwrap();
        assert_eq!(db.get("test", T).unwrap().unwrap(), b"again");
    }

    #[test]
    fn record_and_query() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        let done = summary(SessionStatus::Completed, 4, now);
        db.record_session(&done).unwrap();
        db.record_session(&done).unwrap();
        db.record_session(&summary(SessionStatus::Cancelled, 1, now - ChronoDuration::days(3)))
            .unwrap();

        let stats = db.stats(now).unwrap();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.completed_sessions, 1);
        assert_eq!(stats.cancelled_sessions, 1);
        assert_eq!(stats.total_cycles, 5);
        assert_eq!(stats.total_focus_min, 125);
        assert_eq!(stats.today_sessions, 1);
        assert_eq!(stats.today_focus_min, 100);
    }

    #[test]
    fn on_disk_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("focuslock.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.set("focus.streak", b"{}", T).unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.get("focus.streak", T).unwrap().as_deref(), Some(&b"{}"[..]));
    }

    #[test]
    fn today_and_month_follow_the_local_calendar() {
        use chrono::FixedOffset;

        let db = Database::open_memory().unwrap();
        let utc = |d, h, m| Utc.with_ymd_and_hms(2026, 9, d, h, m, 0).unwrap();
        // 00:30 on Sep 15 at UTC+8.
        db.record_session(&summary(SessionStatus::Completed, 2, utc(14, 16, 30)))
            .unwrap();
        // 23:30 on Sep 14 at UTC+8.
        db.record_session(&summary(SessionStatus::Completed, 1, utc(14, 15, 30)))
            .unwrap();
        // Aug 31 locally.
        db.record_session(&summary(
            SessionStatus::Cancelled,
            1,
            Utc.with_ymd_and_hms(2026, 8, 31, 12, 0, 0).unwrap(),
        ))
        .unwrap();

        let east = FixedOffset::east_opt(8 * 3600).unwrap();
        let now = utc(14, 17, 0).with_timezone(&east);
        let stats = db.stats(now).unwrap();
        assert_eq!(stats.today_sessions, 1);
        assert_eq!(stats.today_focus_min, 50);
        assert_eq!(stats.month_sessions, 2);
        assert_eq!(stats.month_focus_min, 75);
        assert_eq!(stats.average_focus_min, 100 / 3);
        assert_eq!(stats.daily_average_focus_min, 75 / 15);

        // Same instant seen from UTC: still Sep 14 there.
        let stats = db.stats(utc(14, 17, 0)).unwrap();
        assert_eq!(stats.today_sessions, 2);
    }

    #[test]
    fn busy_database_reports_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("focuslock.db");
        let holder = Database::open_at(&path).unwrap();
        let other = Database::open_at(&path).unwrap();
        let short = Duration::from_millis(50);

        let result: Result<(), PersistenceError> = holder.write_locked(T, || {
            match other.set("focus.streak", b"{}", short) {
                Err(PersistenceError::Timeout { key, timeout }) => {
                    assert_eq!(key, "focus.streak");
                    assert_eq!(timeout, short);
                }
                unexpected => panic!("expected timeout, got {unexpected:?}"),
            }
            assert!(matches!(
                other.write_locked(short, || Ok::<_, PersistenceError>(())),
                Err(PersistenceError::Timeout { .. })
            ));
            holder.set("focus.streak", b"[]", T)
        });
        result.unwrap();

        // Lock released: the other connection sees the commit and can write.
        assert_eq!(other.get("focus.streak", T).unwrap().as_deref(), Some(&b"[]"[..]));
        other.set("focus.streak", b"{}", T).unwrap();
    }
}
