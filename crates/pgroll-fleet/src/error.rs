//! Error types for the fleet API client.

use thiserror::Error;

pub type FleetResult<T> = Result<T, FleetError>;

/// Errors returned by the fleet inventory and lease service.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("lease denied for node {node_id}: {reason}")]
    LeaseDenied { node_id: String, reason: String },

    #[error("lease for node {requested} was granted on node {granted}")]
    LeaseMismatch { requested: String, granted: String },

    #[error("invalid fleet API url {0:?}")]
    InvalidUrl(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("fleet API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}
