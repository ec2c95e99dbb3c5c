//! Node control error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("can't build tunnel for {organization}: {reason}")]
    TunnelUnavailable {
        organization: String,
        reason: String,
    },

    #[error("node at {address} is unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("node at {address} timed out after {secs}s")]
    Timeout { address: String, secs: u64 },

    #[error("node returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}
