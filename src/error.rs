//! Error types for Synheart Capture

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a single recorder can report while starting or stopping.
///
/// These are always scoped to one recorder. The session captures them in that
/// recorder's outcome and keeps going with its siblings.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Recorder already started")]
    AlreadyStarted,

    #[error("Recorder not started")]
    NotStarted,

    #[error("Recording cancelled")]
    Cancelled,

    #[error("Recorder timed out after {0} ms")]
    Timeout(u64),

    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RecorderError {
    /// Coarse classification used in step results
    pub fn kind(&self) -> RecorderErrorKind {
        match self {
            RecorderError::PermissionDenied(_) => RecorderErrorKind::PermissionDenied,
            RecorderError::AlreadyStarted => RecorderErrorKind::AlreadyStarted,
            RecorderError::NotStarted => RecorderErrorKind::NotStarted,
            RecorderError::Cancelled => RecorderErrorKind::Cancelled,
            RecorderError::Timeout(_) => RecorderErrorKind::Timeout,
            RecorderError::ResourceUnavailable(_)
            | RecorderError::Io(_)
            | RecorderError::JsonError(_) => RecorderErrorKind::ResourceUnavailable,
        }
    }
}

/// Serializable failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderErrorKind {
    PermissionDenied,
    AlreadyStarted,
    NotStarted,
    Cancelled,
    Timeout,
    ResourceUnavailable,
}

impl RecorderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecorderErrorKind::PermissionDenied => "permission_denied",
            RecorderErrorKind::AlreadyStarted => "already_started",
            RecorderErrorKind::NotStarted => "not_started",
            RecorderErrorKind::Cancelled => "cancelled",
            RecorderErrorKind::Timeout => "timeout",
            RecorderErrorKind::ResourceUnavailable => "resource_unavailable",
        }
    }
}

/// Contract violations on the recording session itself.
///
/// Unlike [`RecorderError`], these indicate caller misuse (finishing a closed
/// session, duplicate identifiers) and are returned to the caller directly.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Cannot {action} a session in state {from}")]
    InvalidTransition { from: String, action: String },

    #[error("Invalid step definition: {0}")]
    InvalidStep(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Errors loading session configuration or step definitions
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}
