mod lock;
mod machine;
mod phase;

pub use lock::{ExitDecision, LockGuard};
pub use machine::{
    Session, SessionMachine, SessionSnapshot, SessionStatus, SessionSummary,
    MAX_REPLAY_TRANSITIONS,
};
pub use phase::{
    Phase, SessionConfig, DEFAULT_CYCLES_PER_LONG_REST, DEFAULT_FOCUS_MINUTES,
    DEFAULT_LONG_REST_MINUTES, DEFAULT_SHORT_REST_MINUTES,
};
