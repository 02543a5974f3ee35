//! Process-wide error taxonomy.
//!
//! Every failure surfaced across a component boundary is one of these kinds.
//! Clients recover `Transient` and `RateLimited` locally; `Corruption` is
//! fatal to the process; everything else is fatal to the call or record,
//! never to the pipeline.

use std::time::Duration;

use thiserror::Error;

pub type SeismoResult<T> = Result<T, SeismoError>;

#[derive(Debug, Error)]
pub enum SeismoError {
    /// Malformed input; never retried, surfaced to the caller.
    #[error("validation: {0}")]
    Validation(String),

    /// Rate bucket exhausted within the caller's deadline.
    #[error("rate limited; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Network, 5xx, or I/O timeout; retried internally with bounded backoff.
    #[error("transient: {0}")]
    Transient(String),

    /// Circuit breaker open or dependency declared down; fail fast.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Feature schema does not match the model's expected schema.
    #[error("schema mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: String, got: String },

    /// Call cancelled by its deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Persisted state unreadable; fatal to the process (exit code 2).
    #[error("corruption: {0}")]
    Corruption(String),

    /// Catch-all bug indicator.
    #[error("internal: {0}")]
    Internal(String),
}

impl SeismoError {
    /// Whether a caller may retry the operation with a fresh deadline.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::RateLimited { .. } | Self::DeadlineExceeded
        )
    }
}
