use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::now_timestamp_ms;

/// Coarse classification handed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Validation,
    IdentityNotReady,
    Cancelled,
    Decode,
    Storage,
    Config,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Validation => "validation",
            ErrorKind::IdentityNotReady => "identity_not_ready",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Decode => "decode",
            ErrorKind::Storage => "storage",
            ErrorKind::Config => "config",
        }
    }

    /// Whether a retry affordance makes sense for this kind of failure.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Transport | ErrorKind::IdentityNotReady | ErrorKind::Storage
        )
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// The backend answered with a non-success status.
    #[error("remote request failed with status {status}: {message}")]
    Remote {
        status: u16,
        message: String,
        payload: Value,
    },

    #[error("no signed-in identity is available yet")]
    IdentityNotReady,

    #[error("operation cancelled")]
    Cancelled,

    #[error("malformed record: {0}")]
    Decode(String),

    #[error("local store error: {0}")]
    Storage(String),

    #[error("{0}")]
    Invalid(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn transport(message: impl Into<String>) -> Self {
        SyncError::Transport {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport { .. } => ErrorKind::Transport,
            SyncError::Remote { status, .. } => {
                if *status >= 500 || *status == 408 || *status == 429 {
                    ErrorKind::Transport
                } else {
                    ErrorKind::Validation
                }
            }
            SyncError::IdentityNotReady => ErrorKind::IdentityNotReady,
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::Decode(_) => ErrorKind::Decode,
            SyncError::Storage(_) => ErrorKind::Storage,
            SyncError::Invalid(_) => ErrorKind::Validation,
            SyncError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(value: rusqlite::Error) -> Self {
        SyncError::Storage(value.to_string())
    }
}

/// The last failure of a list, kept so views can render an error state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfacedError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub at_ms: i64,
}

impl From<&SyncError> for SurfacedError {
    fn from(value: &SyncError) -> Self {
        Self {
            kind: value.kind(),
            message: value.to_string(),
            status: value.status(),
            at_ms: now_timestamp_ms(),
        }
    }
}
