//! Error types for the coordination engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by a coordination run.
///
/// Only `RoutingExhausted` and `PrimaryFailed` describe a failed answer to the
/// user; `DeadlineExceeded` and `Cancelled` end a run early. Every other
/// condition degrades gracefully and is reported through metadata instead.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// No agent could be selected and no fallback role is registered
    #[error("Routing exhausted: no agent registered and no fallback role available")]
    RoutingExhausted,

    /// The primary agent failed and the substitute budget is spent
    #[error("Primary agent '{role}' failed after {attempts} attempt(s): {source}")]
    PrimaryFailed {
        role: String,
        attempts: u32,
        #[source]
        source: InvocationError,
    },

    /// The overall run deadline elapsed
    #[error("Coordination run exceeded its deadline of {0}s")]
    DeadlineExceeded(u64),

    /// The caller cancelled the run
    #[error("Coordination run was cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Persistence failure on a read path
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<crate::agents::domain::InvalidTransition> for CoordinationError {
    fn from(err: crate::agents::domain::InvalidTransition) -> Self {
        CoordinationError::Internal(err.to_string())
    }
}

/// Classification of a failed model invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationErrorKind {
    /// The per-call timeout elapsed
    Timeout,
    /// Transport or provider failure (including rate limiting)
    ProviderUnavailable,
    /// The provider rejected the request
    InvalidRequest,
    /// The run was cancelled while the call was in flight
    Cancelled,
}

impl std::fmt::Display for InvocationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationErrorKind::Timeout => write!(f, "timeout"),
            InvocationErrorKind::ProviderUnavailable => write!(f, "provider_unavailable"),
            InvocationErrorKind::InvalidRequest => write!(f, "invalid_request"),
            InvocationErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A normalized model invocation failure
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct InvocationError {
    pub kind: InvocationErrorKind,
    pub message: String,
}

impl InvocationError {
    pub fn new(kind: InvocationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(secs: u64) -> Self {
        Self::new(
            InvocationErrorKind::Timeout,
            format!("no completion within {}s", secs),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(InvocationErrorKind::Cancelled, "run cancelled")
    }
}

impl From<LlmError> for InvocationError {
    fn from(err: LlmError) -> Self {
        let kind = match &err {
            LlmError::Timeout => InvocationErrorKind::Timeout,
            LlmError::InvalidRequest(_) => InvocationErrorKind::InvalidRequest,
            LlmError::Api { status, .. } if (400..500).contains(status) && *status != 429 => {
                InvocationErrorKind::InvalidRequest
            }
            _ => InvocationErrorKind::ProviderUnavailable,
        };
        InvocationError::new(kind, err.to_string())
    }
}

/// Errors specific to LLM provider operations
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider not found
    #[error("LLM provider not found: {0}")]
    ProviderNotFound(String),

    /// API error
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limited
    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication error
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Provider is unavailable
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Timeout
    #[error("Request timed out")]
    Timeout,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_connect() {
            LlmError::Network(format!("Connection error: {}", err))
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

/// Errors raised by a retrieval backend
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Retrieval request failed: {0}")]
    Request(String),

    #[error("Retrieval response could not be parsed: {0}")]
    Parse(String),

    #[error("Retrieval timed out after {0}ms")]
    Timeout(u64),
}

impl From<reqwest::Error> for RetrievalError {
    fn from(err: reqwest::Error) -> Self {
        RetrievalError::Request(err.to_string())
    }
}

/// Errors raised by a session store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database connection error
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Item not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Write did not finish within the recorder's budget
    #[error("Write timed out after {0}ms")]
    WriteTimeout(u64),

    /// Database error from SQLx
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored row could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Result type alias for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
