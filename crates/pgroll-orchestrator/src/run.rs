//! Run-scoped state: the ordered restart plan and per-node outcomes.
//!
//! A [`RestartRun`] lives for one orchestrator invocation and is never
//! persisted. The plan is an explicit ordered list of nodes, each with
//! the lease (if any) that guards it.

use serde::Serialize;
use tracing::{debug, info, warn};

use pgroll_core::{BackendKind, Cluster, Lease, Node, NodeId, NodeOutcome, RestartOrder};
use pgroll_fleet::LeaseSet;

/// Current phase of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    Resolving,
    Gating,
    LeaseAcquiring,
    TunnelEstablishing,
    /// Restarting node `index` (0-based) of `total`.
    Restarting { index: usize, total: usize, node_id: NodeId },
    Completed,
    Aborted { reason: String },
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Aborted { .. })
    }
}

/// One planned node and what happened to it.
#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub node: Node,
    pub lease: Option<Lease>,
    pub outcome: NodeOutcome,
}

/// In-memory state of one run.
#[derive(Debug)]
pub struct RestartRun {
    cluster: String,
    resolved: Option<Cluster>,
    phase: RunPhase,
    plan: Vec<PlannedNode>,
}

impl RestartRun {
    pub fn new(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            resolved: None,
            phase: RunPhase::Resolving,
            plan: Vec::new(),
        }
    }

    pub fn phase(&self) -> &RunPhase {
        &self.phase
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Record the cluster as resolved by the fleet API.
    pub fn resolve(&mut self, cluster: Cluster) {
        self.resolved = Some(cluster);
    }

    pub fn resolved(&self) -> Option<&Cluster> {
        self.resolved.as_ref()
    }

    /// Move to `phase`. Terminal phases are sticky.
    pub fn enter(&mut self, phase: RunPhase) {
        if self.phase.is_terminal() {
            return;
        }
        debug!(cluster = %self.cluster, from = ?self.phase, to = ?phase, "run phase change");
        self.phase = phase;
    }

    /// Build the ordered plan from resolved members.
    ///
    /// Duplicate node IDs are dropped (first one wins) so no node can be
    /// restarted twice in one run.
    pub fn plan(&mut self, nodes: Vec<Node>, order: RestartOrder) {
        let mut unique: Vec<Node> = Vec::with_capacity(nodes.len());
        for node in nodes {
            if unique.iter().any(|n| n.id == node.id) {
                debug!(node_id = %node.id, "dropping duplicate member");
                continue;
            }
            unique.push(node);
        }

        if order == RestartOrder::LeaderLast {
            // Stable: replicas keep their relative order.
            unique.sort_by_key(|n| n.is_leader());
        }

        self.plan = unique
            .into_iter()
            .map(|node| PlannedNode {
                node,
                lease: None,
                outcome: NodeOutcome::Skipped,
            })
            .collect();
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.plan.iter().map(|p| p.node.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.plan.len()
    }

    pub fn planned(&self, index: usize) -> &PlannedNode {
        &self.plan[index]
    }

    pub fn planned_mut(&mut self, index: usize) -> &mut PlannedNode {
        &mut self.plan[index]
    }

    /// Pair planned nodes with the leases in `leases`, resolving each
    /// token to the node it guards.
    pub fn attach_leases(&mut self, mut leases: LeaseSet) {
        for token in leases.tokens() {
            let Some(node_id) = leases.node_for(&token).map(str::to_string) else {
                continue;
            };
            match self.plan.iter_mut().find(|p| p.node.id == node_id) {
                Some(planned) => planned.lease = leases.take(&token),
                None => warn!(%token, %node_id, "lease for a node outside the plan"),
            }
        }
    }

    /// Leases currently attached to the plan.
    pub fn held_leases(&self) -> Vec<Lease> {
        self.plan.iter().filter_map(|p| p.lease.clone()).collect()
    }

    pub fn record(&mut self, index: usize, outcome: NodeOutcome) {
        let planned = &mut self.plan[index];
        info!(node_id = %planned.node.id, outcome = ?outcome, "node outcome");
        planned.outcome = outcome;
    }

    pub fn into_report(self) -> RunReport {
        RunReport {
            cluster: self.cluster,
            backend: self.resolved.map(|c| c.backend),
            phase: self.phase,
            nodes: self
                .plan
                .into_iter()
                .map(|p| NodeReport {
                    node_id: p.node.id,
                    lease_token: p.lease.map(|l| l.token),
                    outcome: p.outcome,
                })
                .collect(),
        }
    }
}

/// Per-node line of a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub lease_token: Option<String>,
    pub outcome: NodeOutcome,
}

/// Final result of a run, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub cluster: String,
    pub backend: Option<BackendKind>,
    pub phase: RunPhase,
    pub nodes: Vec<NodeReport>,
}

impl RunReport {
    pub fn outcome(&self, node_id: &str) -> Option<&NodeOutcome> {
        self.nodes
            .iter()
            .find(|n| n.node_id == node_id)
            .map(|n| &n.outcome)
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Succeeded))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Skipped))
    }

    pub fn is_success(&self) -> bool {
        self.phase == RunPhase::Completed
    }

    fn count(&self, f: impl Fn(&NodeOutcome) -> bool) -> usize {
        self.nodes.iter().filter(|n| f(&n.outcome)).count()
    }
}
