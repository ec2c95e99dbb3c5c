//! Restart error taxonomy.

use thiserror::Error;

use pgroll_core::{NodeId, VersionError};
use pgroll_fleet::{FleetError, LeaseError};
use pgroll_node::NodeError;

use crate::run::RunReport;

/// Coarse classification of a [`RestartError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Cluster not found, not a database cluster, or no members.
    InputResolution,
    /// Version gate failed.
    Precondition,
    /// Lease or tunnel could not be obtained.
    ResourceAcquisition,
    /// A node's restart command failed.
    Execution,
    /// Cancelled or out of time.
    Interrupted,
}

/// Why a run stopped. Every variant is terminal; none is retried.
#[derive(Debug, Error)]
pub enum RestartError {
    #[error("failed to look up {name}")]
    ClusterLookup {
        name: String,
        #[source]
        source: FleetError,
    },

    #[error("app {0} is not a Postgres app")]
    NotPostgres(String),

    #[error("machines could not be retrieved")]
    Membership(#[source] FleetError),

    #[error("no nodes found for {0}")]
    NoNodesFound(String),

    #[error("version check failed")]
    VersionIncompatible(#[from] VersionError),

    #[error("failed to obtain lease on node {node_id}")]
    LeaseAcquisitionFailed {
        node_id: NodeId,
        #[source]
        source: FleetError,
    },

    #[error("lease on node {node_id} is no longer valid")]
    LeaseExpired {
        node_id: NodeId,
        #[source]
        source: LeaseError,
    },

    #[error("failed to establish tunnel")]
    TunnelEstablishmentFailed(#[source] NodeError),

    #[error("failed to restart postgres on node {node_id}")]
    NodeRestartFailed {
        node_id: NodeId,
        #[source]
        cause: NodeError,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("run deadline exceeded")]
    DeadlineExceeded,
}

impl RestartError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RestartError::ClusterLookup { .. }
            | RestartError::NotPostgres(_)
            | RestartError::Membership(_)
            | RestartError::NoNodesFound(_) => ErrorCategory::InputResolution,
            RestartError::VersionIncompatible(_) => ErrorCategory::Precondition,
            RestartError::LeaseAcquisitionFailed { .. }
            | RestartError::LeaseExpired { .. }
            | RestartError::TunnelEstablishmentFailed(_) => ErrorCategory::ResourceAcquisition,
            RestartError::NodeRestartFailed { .. } => ErrorCategory::Execution,
            RestartError::Cancelled | RestartError::DeadlineExceeded => ErrorCategory::Interrupted,
        }
    }

    /// Node the failure is attributed to, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            RestartError::LeaseAcquisitionFailed { node_id, .. }
            | RestartError::LeaseExpired { node_id, .. }
            | RestartError::NodeRestartFailed { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.category() == ErrorCategory::Interrupted
    }
}

impl From<LeaseError> for RestartError {
    fn from(err: LeaseError) -> Self {
        match err {
            LeaseError::Acquire { node_id, source } => {
                RestartError::LeaseAcquisitionFailed { node_id, source }
            }
            other => RestartError::LeaseExpired {
                node_id: other.node_id().to_string(),
                source: other,
            },
        }
    }
}

/// A run that stopped before restarting every member.
///
/// Carries the per-node outcomes recorded up to the failure.
#[derive(Debug, Error)]
#[error("restart of {} aborted", .report.cluster)]
pub struct AbortedRun {
    #[source]
    pub error: RestartError,
    pub report: RunReport,
}
