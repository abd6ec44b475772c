//! Error types shared across the Cadence workspace.

use thiserror::Error;

/// Unified error type.
#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Benefit resolution failed: {0}")]
    Benefits(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CadenceError {
    /// Whether a failed tick should simply be retried at the next interval.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CadenceError::Store(_) | CadenceError::Broker(_) | CadenceError::Benefits(_) | CadenceError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;
