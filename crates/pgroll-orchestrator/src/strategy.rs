//! Restart strategies: one per backend kind.
//!
//! Both strategies restart every member and report the same way; they
//! differ in where membership comes from, which nodes the version gate
//! inspects, and whether leases guard the restarts.

use pgroll_core::{BackendKind, Cluster, Node};
use pgroll_fleet::{FleetResult, MembershipResolver};

/// Lifecycle state a leased node must be in to take part in a run.
pub const RUNNING_STATE: &str = "started";

/// How to restart a cluster, selected once per run from its backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartStrategy {
    /// Scheduler-managed allocations. No leases.
    Legacy,
    /// Individually addressable nodes, each leased before any restart.
    Leased,
}

impl RestartStrategy {
    pub fn for_backend(backend: BackendKind) -> Self {
        match backend {
            BackendKind::Legacy => Self::Legacy,
            BackendKind::Leased => Self::Leased,
        }
    }

    pub fn uses_leases(&self) -> bool {
        matches!(self, RestartStrategy::Leased)
    }

    /// Resolve the members this strategy restarts.
    pub async fn members<M: MembershipResolver>(
        &self,
        membership: &M,
        cluster: &Cluster,
    ) -> FleetResult<Vec<Node>> {
        match self {
            RestartStrategy::Legacy => membership.app_status(cluster).await,
            RestartStrategy::Leased => membership.list_nodes(cluster, Some(RUNNING_STATE)).await,
        }
    }

    /// Nodes whose version must pass the gate.
    ///
    /// Leased clusters are gated on the reported leader, falling back to
    /// the first member. Legacy clusters report no roles, so every
    /// allocation is checked.
    pub fn gate_targets<'a>(&self, nodes: &'a [Node]) -> Vec<&'a Node> {
        match self {
            RestartStrategy::Legacy => nodes.iter().collect(),
            RestartStrategy::Leased => nodes
                .iter()
                .find(|n| n.is_leader())
                .or_else(|| nodes.first())
                .into_iter()
                .collect(),
        }
    }
}
