use crate::spin::{
    SpinId,
    SpinStatus,
};
use thiserror::Error;

/// Error type for engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid wager: {0}")]
    InvalidWager(String),
    #[error("submission rejected: {0}")]
    Submission(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("seed unavailable for round {round}")]
    SeedUnavailable { round: u64 },
    #[error("spin expired after {elapsed_ms}ms")]
    Expiry { elapsed_ms: u64 },
    #[error("reconstruction mismatch: {0}")]
    ReconstructionMismatch(String),
    #[error("invalid reconstruction input: {0}")]
    InvalidReconstructionInput(String),
    #[error("invalid transition for spin {id}: {from} -> {to}")]
    InvalidTransition {
        id: SpinId,
        from: SpinStatus,
        to: SpinStatus,
    },
    #[error("spin {0} not found")]
    SpinNotFound(SpinId),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid json: {0}")]
    Json(String),
    #[error("export failed: {0}")]
    Export(String),
}

impl Error {
    /// Transient failures the processor retries before giving up on a spin.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::SeedUnavailable { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Export(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Network("ledger call timed out".to_string())
    }
}

/// Result type for engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn is_retryable__only_for_transient_errors() {
        assert!(Error::Network("reset".into()).is_retryable());
        assert!(Error::SeedUnavailable { round: 7 }.is_retryable());
        assert!(!Error::Submission("insufficient balance".into()).is_retryable());
        assert!(!Error::ReconstructionMismatch("len".into()).is_retryable());
        assert!(!Error::InvalidReconstructionInput("key".into()).is_retryable());
        assert!(!Error::Expiry { elapsed_ms: 10 }.is_retryable());
    }

    #[test]
    fn display__is_human_readable() {
        let err = Error::InvalidTransition {
            id: SpinId::new(3),
            from: SpinStatus::Completed,
            to: SpinStatus::Failed,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition for spin spin-3: COMPLETED -> FAILED"
        );
    }
}
