use crate::types::TabId;
use thiserror::Error;

/// Failures while resolving or executing a connection strategy.
///
/// `Refused`, `NotFound` and `Timeout` name the branch that was attempted and
/// the target it was attempted against, so callers can retry with corrected
/// input. The resolver itself never retries or falls back to another branch.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("ambiguous connection spec: {0}")]
    AmbiguousSpec(String),

    #[error("{branch}: connection refused by {target}: {reason}")]
    Refused {
        branch: &'static str,
        target: String,
        reason: String,
    },

    #[error("{branch}: {target} not found: {reason}")]
    NotFound {
        branch: &'static str,
        target: String,
        reason: String,
    },

    #[error("{branch}: timed out connecting to {target} after {waited_ms}ms")]
    Timeout {
        branch: &'static str,
        target: String,
        waited_ms: u64,
    },
}

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("unknown tab: {0}")]
    UnknownTab(TabId),

    #[error("navigation to {url} blocked by allow-list")]
    NavigationBlocked { url: String },

    #[error("session is {state}, cannot {operation}")]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WardenError>;

// Convert anyhow::Error to WardenError
impl From<anyhow::Error> for WardenError {
    fn from(err: anyhow::Error) -> Self {
        WardenError::Browser(err.to_string())
    }
}
