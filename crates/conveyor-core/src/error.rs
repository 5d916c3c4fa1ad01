//! Error taxonomy (spec §7).
//!
//! Domain errors are typed so call sites can classify them (retryable vs
//! terminal, HTTP status mapping) without string matching. Infrastructure
//! glue still uses `anyhow::Result` at the edges, the way the teacher crate
//! does in its effects and handlers.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConveyorError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("database schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: i32, found: i32 },

    #[error("broker or database connection closed: {0}")]
    TransportClosed(String),

    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("missing or malformed Authorization header")]
    Unauthorized,

    #[error("invalid HMAC signature")]
    Forbidden,

    #[error("no rows found")]
    NotFound,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("terminal failure: {0}")]
    Terminal(String),

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,
}

impl ConveyorError {
    /// Whether a worker should retry the attempt that produced this error
    /// (spec §7's `Transient` vs `Terminal` classification).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConveyorError::Transient(_))
    }

    /// Whether the owning process should treat this as fatal and rely on a
    /// supervisor restart (spec §4.2, §5).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConveyorError::TransportClosed(_) | ConveyorError::SchemaMismatch { .. }
        )
    }

    /// HTTP status the frontend maps this error to (spec §4.6).
    pub fn http_status(&self) -> StatusCode {
        match self {
            ConveyorError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ConveyorError::Unauthorized => StatusCode::UNAUTHORIZED,
            ConveyorError::Forbidden => StatusCode::FORBIDDEN,
            ConveyorError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The outcome of classifying a single `TransactionLoop` attempt (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The attempt may be retried if budget remains.
    Retryable,
    /// The attempt must not be retried.
    NonRetryable,
}
