//! Core error types for focuslock-core.
//!
//! Every failure in the focus engine is recoverable. Command errors
//! (`SessionError`) are returned to the caller; persistence and
//! notification errors are logged, reported as events and retried, and
//! never corrupt the in-memory session.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::session::SessionStatus;

/// Core error type for focuslock-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Session command errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Persistence store errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Notification port errors
    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by session commands.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The command is not valid in the current state. The session is unchanged.
    #[error("cannot {command} while session is {status}")]
    InvalidTransition {
        command: &'static str,
        status: SessionStatus,
    },

    /// A session is already running or paused.
    #[error("a focus session is already active")]
    AlreadyRunning,
}

/// Persistence store errors.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The store did not answer within the caller-supplied timeout.
    #[error("store operation on '{key}' timed out after {timeout:?}")]
    Timeout { key: String, timeout: Duration },

    /// The backing store failed.
    #[error("store backend failed: {0}")]
    Backend(String),

    /// A stored blob could not be encoded or decoded.
    #[error("failed to decode '{key}': {message}")]
    Codec { key: String, message: String },
}

/// Notification port errors. Always non-fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// The port did not answer within the caller-supplied timeout.
    #[error("notification port timed out after {0:?}")]
    Timeout(Duration),

    /// The port refused the request.
    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown dot-path key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        PersistenceError::Backend(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_command_and_status() {
        let err = SessionError::InvalidTransition {
            command: "resume",
            status: SessionStatus::Running,
        };
        assert_eq!(err.to_string(), "cannot resume while session is running");
    }

    #[test]
    fn session_error_converts_into_core_error() {
        let err: CoreError = SessionError::AlreadyRunning.into();
        assert!(matches!(err, CoreError::Session(SessionError::AlreadyRunning)));
    }
}
