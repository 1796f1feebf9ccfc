//! # Focuslock Core Library
//!
//! The focus session engine behind the study app: a pomodoro-style
//! focus/rest cycle with an exit lock, phase-end reminders and a persisted
//! daily streak. Hosts (the CLI, a GUI shell) are thin layers over
//! [`SessionController`].
//!
//! ## Architecture
//!
//! - **Session machine**: wall-clock-based state machine; the host calls
//!   `tick(now)` at any cadence and progress is derived from timestamps
//! - **Lock guard**: exit needs confirmation while a countdown runs
//! - **Notification scheduler**: at most one pending reminder per session
//! - **Streak tracker**: consecutive-day streak and lifetime totals,
//!   written through to the store with retry on failure
//! - **Storage**: key-value persistence port, SQLite implementation and
//!   TOML configuration
//!
//! Clock, store and notification transport are injected at construction;
//! there is no global state.

pub mod clock;
pub mod controller;
pub mod error;
pub mod events;
pub mod notify;
pub mod session;
pub mod storage;
pub mod streak;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{EngineOptions, SessionController, SessionHandle, SubscriptionId};
pub use error::{ConfigError, CoreError, NotificationError, PersistenceError, SessionError};
pub use events::Event;
pub use notify::{
    NotificationPayload, NotificationPort, NotificationSettings, NotificationToken, RecordingPort,
};
pub use session::{ExitDecision, Phase, SessionConfig, SessionSnapshot, SessionStatus, SessionSummary};
pub use storage::{Config, Database, MemoryStore, PersistenceStore};
pub use streak::{StreakRecord, StreakTracker};
