//! Session controller.
//!
//! The only entry point for hosts. Wires the clock, state machine, lock
//! guard, reminder scheduler and streak tracker together, and serializes
//! every command through one mutex so concurrent UI actions resolve in
//! acquisition order. The controller owns no thread and never waits; the
//! host drives progress by calling [`SessionController::tick`].
//!
//! ## Ordering
//!
//! For each batch of state changes the controller
//! 1. credits completed Focus phases and writes the streak through,
//! 2. cancels and re-schedules the phase-end reminder,
//! 3. writes the active-session snapshot used for crash recovery,
//! 4. queues the events, releases the lock and delivers the queue.
//!
//! While a streak write is deferred, the record travels inside the session
//! snapshot, so a replayed-away Focus phase is restored by `recover` even
//! if the process dies before the retry succeeds.
//!
//! Events reach subscribers in the order the engine applied them, also
//! when commands race on several threads. Whichever thread finds the
//! queue idle delivers everything queued, including events queued by
//! others meanwhile.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CoreError, PersistenceError, SessionError};
use crate::events::Event;
use crate::notify::{NotificationPort, NotificationScheduler, NotificationSettings, NotificationToken};
use crate::session::{
    ExitDecision, LockGuard, Phase, Session, SessionConfig, SessionMachine, SessionSnapshot,
    SessionStatus,
};
use crate::storage::{load_json, save_json, PersistenceStore};
use crate::streak::{RetryPolicy, StreakRecord, StreakTracker};

/// Store key of the active-session snapshot.
pub const ACTIVE_SESSION_KEY: &str = "focus.active_session";

/// Construction-time settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Phase lengths used when `start` is given no config.
    pub session: SessionConfig,
    pub store_timeout: Duration,
    pub notifications: NotificationSettings,
    pub retry: RetryPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            store_timeout: Duration::from_secs(2),
            notifications: NotificationSettings::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Returned by a successful `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub phase: Phase,
    pub planned_ms: u64,
    pub started_at: DateTime<Utc>,
    pub phase_ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ActiveSnapshot {
    #[serde(default)]
    session: Option<Session>,
    #[serde(default)]
    notification: Option<NotificationToken>,
    /// Streak record whose own write has not gone through yet.
    #[serde(default)]
    streak: Option<StreakRecord>,
}

#[derive(Default)]
struct Outbox {
    queue: VecDeque<Event>,
    draining: bool,
}

/// Clears the draining flag if a subscriber panics mid-delivery.
struct Draining<'a> {
    outbox: &'a Mutex<Outbox>,
    finished: bool,
}

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        if !self.finished {
            lock(self.outbox).draining = false;
        }
    }
}

struct Engine {
    machine: SessionMachine,
    scheduler: NotificationScheduler,
    streak: StreakTracker,
    store: Box<dyn PersistenceStore>,
    port: Box<dyn NotificationPort>,
    options: EngineOptions,
    snapshot_dirty: bool,
}

pub struct SessionController {
    clock: Arc<dyn Clock>,
    engine: Mutex<Engine>,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
    outbox: Mutex<Outbox>,
}

impl SessionController {
    /// Build a controller. Loads the streak record; call
    /// [`recover`](Self::recover) afterwards to resume an interrupted session.
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Box<dyn PersistenceStore>,
        port: Box<dyn NotificationPort>,
        options: EngineOptions,
    ) -> Result<Self, CoreError> {
        options.session.validate()?;
        let streak = StreakTracker::load(store.as_ref(), options.store_timeout, options.retry)?;
        Ok(Self {
            clock,
            engine: Mutex::new(Engine {
                machine: SessionMachine::new(),
                scheduler: NotificationScheduler::new(options.notifications.clone()),
                streak,
                store,
                port,
                options,
                snapshot_dirty: false,
            }),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            outbox: Mutex::new(Outbox::default()),
        })
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        lock(&self.subscribers).retain(|(sid, _)| *sid != id);
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Resume a session persisted by a previous process.
    ///
    /// Phases that ended while the process was gone are replayed, so their
    /// streak credit and reminders are not lost. A corrupt snapshot is
    /// discarded; store failures are returned so the host can retry.
    pub fn recover(&self) -> Result<Vec<Event>, CoreError> {
        let now = self.clock.now();
        let events = {
            let mut engine = lock(&self.engine);
            let timeout = engine.options.store_timeout;
            let snapshot = match load_json::<Option<ActiveSnapshot>>(
                engine.store.as_ref(),
                ACTIVE_SESSION_KEY,
                timeout,
            ) {
                Ok(found) => found.flatten().unwrap_or_default(),
                Err(PersistenceError::Codec { message, .. }) => {
                    tracing::warn!(%message, "discarding unreadable session snapshot");
                    ActiveSnapshot::default()
                }
                Err(e) => return Err(e.into()),
            };

            // Restore unwritten credit before replay counts anything on top.
            if let Some(record) = snapshot.streak {
                if engine.streak.adopt_unwritten(record, now) {
                    engine.snapshot_dirty = true;
                }
            }

            let mut events = Vec::new();
            match snapshot.session {
                Some(session) if session.status.is_active() && engine.machine.active().is_none() => {
                    let session_id = session.id;
                    engine.scheduler.adopt(snapshot.notification);
                    let replayed = engine.machine.restore(session, now);
                    let replayed_phases = replayed
                        .iter()
                        .filter(|e| matches!(e, Event::PhaseCompleted { .. }))
                        .count();
                    tracing::info!(session = %session_id, replayed_phases, "session recovered");

                    events.push(Event::SessionRecovered {
                        session_id,
                        replayed_phases,
                        at: now,
                    });
                    engine.snapshot_dirty = true;
                    events.extend(engine.settle(self.clock.as_ref(), replayed, now));
                }
                _ => {}
            }
            events.extend(engine.retry_writes(now));
            self.enqueue(&events);
            events
        };
        self.deliver();
        Ok(events)
    }

    /// Start a new session. `None` uses the configured defaults.
    pub fn start(&self, config: Option<SessionConfig>) -> Result<SessionHandle, CoreError> {
        let config = match config {
            Some(config) => config,
            None => lock(&self.engine).options.session,
        };
        config.validate()?;

        let events = self.execute(|machine, now| machine.start(config, now).map(Some))?;
        events
            .iter()
            .find_map(|e| match e {
                Event::SessionStarted {
                    session_id,
                    phase,
                    planned_ms,
                    at,
                } => Some(SessionHandle {
                    session_id: *session_id,
                    phase: *phase,
                    planned_ms: *planned_ms,
                    started_at: *at,
                    phase_ends_at: *at
                        + chrono::Duration::milliseconds(i64::try_from(*planned_ms).unwrap_or(i64::MAX)),
                }),
                _ => None,
            })
            .ok_or_else(|| SessionError::AlreadyRunning.into())
    }

    pub fn pause(&self) -> Result<Vec<Event>, SessionError> {
        self.execute(|machine, now| machine.pause(now).map(Some))
    }

    pub fn resume(&self) -> Result<Vec<Event>, SessionError> {
        self.execute(|machine, now| machine.resume(now).map(Some))
    }

    pub fn cancel(&self) -> Result<Vec<Event>, SessionError> {
        self.execute(|machine, now| machine.cancel(now).map(Some))
    }

    /// End the session after at least one completed Focus phase.
    pub fn complete(&self) -> Result<Vec<Event>, SessionError> {
        self.execute(|machine, now| machine.complete(now).map(Some))
    }

    /// Advance the countdown to `now`. Safe to call at any cadence.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<Event> {
        let events = {
            let mut engine = lock(&self.engine);
            let events = engine.advance(self.clock.as_ref(), now);
            self.enqueue(&events);
            events
        };
        self.deliver();
        events
    }

    /// The user asked to leave the focus screen.
    pub fn request_exit(&self) -> ExitDecision {
        LockGuard::evaluate(lock(&self.engine).machine.status())
    }

    /// The user confirmed leaving. Cancels a running session; otherwise
    /// nothing happens.
    pub fn confirm_exit(&self) -> Result<Vec<Event>, SessionError> {
        self.execute(|machine, now| {
            if LockGuard::is_locked(machine.status()) {
                machine.cancel(now).map(Some)
            } else {
                Ok(None)
            }
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Current state, brought up to the clock's `now` first.
    pub fn current_state(&self) -> SessionSnapshot {
        let now = self.clock.now();
        let snapshot = {
            let mut engine = lock(&self.engine);
            let events = engine.advance(self.clock.as_ref(), now);
            self.enqueue(&events);
            engine.machine.snapshot(now)
        };
        self.deliver();
        snapshot
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.engine).machine.status()
    }

    pub fn streak(&self) -> StreakRecord {
        lock(&self.engine).streak.record().clone()
    }

    /// Streak as displayed today; zero once a day was missed.
    pub fn displayed_streak(&self) -> u32 {
        let today = self.clock.local_date(self.clock.now());
        lock(&self.engine).streak.record().streak_on(today)
    }

    pub fn has_pending_streak_write(&self) -> bool {
        lock(&self.engine).streak.has_pending_write()
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Tick, run one command, settle, then deliver everything emitted.
    fn execute<F>(&self, command: F) -> Result<Vec<Event>, SessionError>
    where
        F: FnOnce(&mut SessionMachine, DateTime<Utc>) -> Result<Option<Event>, SessionError>,
    {
        let now = self.clock.now();
        let (result, events) = {
            let mut engine = lock(&self.engine);
            let mut events = engine.advance(self.clock.as_ref(), now);
            let result = command(&mut engine.machine, now);
            if let Ok(Some(event)) = &result {
                let settled = engine.settle(self.clock.as_ref(), vec![event.clone()], now);
                events.extend(settled);
            }
            self.enqueue(&events);
            (result, events)
        };
        self.deliver();
        result.map(|_| events)
    }

    /// Queue events for delivery. Called with the engine lock held.
    fn enqueue(&self, events: &[Event]) {
        if !events.is_empty() {
            lock(&self.outbox).queue.extend(events.iter().cloned());
        }
    }

    /// Deliver queued events, unless another thread already is.
    fn deliver(&self) {
        {
            let mut outbox = lock(&self.outbox);
            if outbox.draining || outbox.queue.is_empty() {
                return;
            }
            outbox.draining = true;
        }
        let mut draining = Draining {
            outbox: &self.outbox,
            finished: false,
        };
        loop {
            let event = {
                let mut outbox = lock(&self.outbox);
                match outbox.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        outbox.draining = false;
                        break;
                    }
                }
            };
            let subscribers: Vec<Subscriber> = lock(&self.subscribers)
                .iter()
                .map(|(_, s)| Arc::clone(s))
                .collect();
            for subscriber in &subscribers {
                subscriber(&event);
            }
        }
        draining.finished = true;
    }
}

impl Engine {
    fn advance(&mut self, clock: &dyn Clock, now: DateTime<Utc>) -> Vec<Event> {
        let raw = self.machine.tick(now);
        if raw.is_empty() {
            tracing::debug!(%now, "tick");
        }
        let mut events = self.settle(clock, raw, now);
        events.extend(self.retry_writes(now));
        events
    }

    /// Apply the side effects of a batch of machine events.
    fn settle(&mut self, clock: &dyn Clock, raw: Vec<Event>, now: DateTime<Utc>) -> Vec<Event> {
        if raw.is_empty() {
            return raw;
        }
        let mut out = Vec::with_capacity(raw.len() + 2);
        let (mut rearm, mut disarm, mut ended) = (false, false, false);

        for event in raw {
            let credit = match &event {
                Event::PhaseCompleted {
                    phase: Phase::Focus,
                    planned_minutes,
                    completed_at,
                    ..
                } => Some((clock.local_date(*completed_at), *planned_minutes)),
                _ => None,
            };
            match &event {
                Event::PhaseCompleted { .. }
                | Event::SessionStarted { .. }
                | Event::SessionResumed { .. } => rearm = true,
                Event::SessionPaused { .. } => disarm = true,
                Event::SessionCancelled { .. } | Event::SessionCompleted { .. } => ended = true,
                _ => {}
            }
            out.push(event);
            if let Some((date, minutes)) = credit {
                out.extend(self.credit_focus(date, minutes, now));
            }
        }

        if ended || disarm {
            let error = self.scheduler.disarm(self.port.as_ref());
            out.extend(error.map(|e| self.notification_failed(e)));
        } else if rearm {
            if let Some(session) = self.machine.active() {
                let errors = self.scheduler.arm(self.port.as_ref(), session);
                let session_id = session.id;
                out.extend(errors.into_iter().map(|e| Event::NotificationFailed {
                    session_id,
                    error: e.to_string(),
                }));
            }
        }

        if ended {
            if let Some(session) = self.machine.session() {
                out.push(Event::SessionArchived {
                    summary: session.summary(now),
                });
            }
        }

        self.snapshot_dirty = true;
        out.extend(self.save_snapshot(now));
        out
    }

    fn credit_focus(&mut self, date: NaiveDate, minutes: u32, now: DateTime<Utc>) -> Vec<Event> {
        let report = self.streak.credit_focus(self.store.as_ref(), date, minutes, now);
        let mut events = vec![Event::StreakCredited {
            date: report.date,
            record: self.streak.record().clone(),
        }];
        if let Some((error, retry_at)) = report.deferred {
            events.push(Event::PersistenceDeferred {
                key: crate::streak::STREAK_KEY.to_string(),
                error: error.to_string(),
                retry_at,
            });
        }
        events
    }

    fn retry_writes(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = Vec::new();
        match self.streak.flush_pending(self.store.as_ref(), now) {
            // The snapshot no longer needs to carry the record.
            Some(Ok(())) => self.snapshot_dirty = true,
            Some(Err(e)) => {
                if let Some(retry_at) = self.streak.retry_at() {
                    events.push(Event::PersistenceDeferred {
                        key: crate::streak::STREAK_KEY.to_string(),
                        error: e.to_string(),
                        retry_at,
                    });
                }
            }
            None => {}
        }
        if self.snapshot_dirty {
            events.extend(self.save_snapshot(now));
        }
        events
    }

    /// Persist the active session (or its absence) for crash recovery,
    /// together with a streak record that is still waiting to be written.
    ///
    /// On failure the snapshot stays dirty and is rewritten on the next tick.
    fn save_snapshot(&mut self, now: DateTime<Utc>) -> Option<Event> {
        let session = self.machine.active().cloned();
        let snapshot = ActiveSnapshot {
            notification: session.as_ref().and(self.scheduler.pending().cloned()),
            session,
            streak: self
                .streak
                .has_pending_write()
                .then(|| self.streak.record().clone()),
        };
        match save_json(
            self.store.as_ref(),
            ACTIVE_SESSION_KEY,
            &snapshot,
            self.options.store_timeout,
        ) {
            Ok(()) => {
                self.snapshot_dirty = false;
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist session snapshot");
                Some(Event::PersistenceDeferred {
                    key: ACTIVE_SESSION_KEY.to_string(),
                    error: e.to_string(),
                    retry_at: now,
                })
            }
        }
    }

    fn notification_failed(&self, error: crate::error::NotificationError) -> Event {
        Event::NotificationFailed {
            session_id: self.machine.session().map(|s| s.id).unwrap_or_default(),
            error: error.to_string(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The session is fully recomputable from timestamps; a panicked
    // subscriber must not wedge the engine.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
