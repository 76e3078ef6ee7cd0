use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories shared across the engine. Collaborator adapters map
/// their native errors into this taxonomy; the router's retry policy and the
/// pipeline's error accumulation both dispatch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller error. Never retried.
    InvalidInput,
    /// The referenced entity does not exist.
    NotFound,
    /// Remote unavailable, resource exhausted, connection reset. Retried.
    Transient,
    /// A per-attempt deadline elapsed. Retried up to the bound.
    Timeout,
    /// Circuit breaker is open; the collaborator was not invoked.
    ServiceUnavailable,
    /// Data that should be well-formed was not (e.g. unparseable model JSON).
    Integrity,
    /// Anything else. Never retried.
    Fatal,
}

impl ErrorKind {
    /// Whether the router may re-attempt a call that failed with this kind.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transient => "transient",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{} error: {message}", .kind.as_str())]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integrity, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
