//! Cluster client error types.

use thiserror::Error;

/// Errors returned by a [`ClusterClient`](crate::ClusterClient).
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cannot reach control plane at {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("http error: {0}")]
    Http(String),

    #[error("control plane returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("service {0} is not in replicated mode")]
    NotReplicated(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type ClusterResult<T> = Result<T, ClusterError>;
