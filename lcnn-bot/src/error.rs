//! Error types for lcnn-bot
//!
//! Every failure a record can meet maps onto one variant here. Only
//! `Configuration` aborts a run; the rest degrade to a reported decision.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Network failure, timeout, 5xx or 429 on an idempotent read
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    /// Record payload could not be parsed
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Too little text on either side to ask the model
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Model response unusable
    #[error("Match error: {0}")]
    Match(String),

    /// The knowledge base rejected a write
    #[error("Apply error: {0}")]
    Apply(String),

    /// Missing credentials or invalid settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Idempotency ledger I/O failed
    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Common error: {0}")]
    Common(#[from] lcnn_common::Error),
}

impl ReconcileError {
    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcileError::TransientFetch(_))
    }

    /// Classify a failed HTTP exchange on a read path
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ReconcileError::TransientFetch(format!("HTTP {}: {}", status.as_u16(), snippet))
        } else {
            ReconcileError::MalformedInput(format!("HTTP {}: {}", status.as_u16(), snippet))
        }
    }
}

impl From<reqwest::Error> for ReconcileError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ReconcileError::MalformedInput(err.to_string())
        } else {
            ReconcileError::TransientFetch(err.to_string())
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ReconcileError::from_status(reqwest::StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(ReconcileError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(matches!(
            ReconcileError::from_status(reqwest::StatusCode::NOT_FOUND, "gone"),
            ReconcileError::MalformedInput(_)
        ));
    }
}
