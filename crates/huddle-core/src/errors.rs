//! Session-service error hierarchy.
//!
//! Every failure that can reach a caller is a [`LobbyError`]. Each variant maps
//! to exactly one machine-readable [`ErrorKind`], which the gateway turns into
//! a wire code and an HTTP status.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable error classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Bad game type, bad name length or emptiness, bad phase transition.
    ValidationError,
    /// Unknown session code.
    NotFound,
    /// Duplicate player name.
    Conflict,
    /// Participant not admitted to the requested session.
    Unauthorized,
    /// Code generation or optimistic-write attempts exhausted.
    CapacityExceeded,
    /// Connectivity or serialization failure against the store.
    StoreUnavailable,
    /// Request deadline expired before the operation answered.
    Timeout,
}

impl ErrorKind {
    /// Wire code, e.g. `NOT_FOUND`.
    pub fn code(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::CapacityExceeded => "CAPACITY_EXCEEDED",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// Whether a caller may blindly retry the same request.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::CapacityExceeded | Self::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum LobbyError {
    /// Input rejected before touching state.
    #[error("{message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// No live session under this code.
    #[error("No game with code {code} exists")]
    NotFound {
        /// The code that was looked up.
        code: String,
    },

    /// Player name already taken in the session.
    #[error("The name '{name}' is already in use")]
    Conflict {
        /// The trimmed name that collided.
        name: String,
    },

    /// Connection admission refused.
    #[error("{message}")]
    Unauthorized {
        /// Why admission failed.
        message: String,
    },

    /// Retry budget exhausted.
    #[error("{operation} gave up after {attempts} attempts")]
    CapacityExceeded {
        /// The operation that ran out of attempts.
        operation: &'static str,
        /// How many attempts were made.
        attempts: u32,
    },

    /// The backing store could not be used.
    #[error("session store unavailable: {message}")]
    StoreUnavailable {
        /// Underlying failure description.
        message: String,
    },

    /// The request deadline expired.
    #[error("request timed out after {secs}s")]
    Timeout {
        /// The deadline that expired, in seconds.
        secs: u64,
    },
}

impl LobbyError {
    /// Build a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Build a not-found error for a code.
    pub fn not_found(code: impl Into<String>) -> Self {
        Self::NotFound { code: code.into() }
    }

    /// Build an admission error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Build a store error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::StoreUnavailable {
            message: message.to_string(),
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::ValidationError,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Message safe to show a client. Store internals are not leaked.
    pub fn public_message(&self) -> String {
        match self {
            Self::StoreUnavailable { .. } => "Session store unavailable".to_owned(),
            other => other.to_string(),
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, LobbyError>;
