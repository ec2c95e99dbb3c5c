//! Shared types used across pgroll crates.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Opaque identifier for a node in the fleet inventory.
pub type NodeId = String;

/// Operational mode of a cluster. Fixed for the cluster's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Scheduler-managed allocations, no per-node leases.
    Legacy,
    /// Individually addressable nodes guarded by leases.
    Leased,
}

impl BackendKind {
    /// Map the fleet API's platform string onto a backend kind.
    pub fn from_platform(platform: &str) -> Option<Self> {
        match platform {
            "nomad" | "legacy" => Some(Self::Legacy),
            "machines" | "leased" => Some(Self::Leased),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Legacy => "legacy",
            BackendKind::Leased => "leased",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A database cluster as known to the fleet API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    /// Organization slug; scopes the private network and the tunnel.
    pub organization: String,
    pub backend: BackendKind,
    /// Whether the app runs the Postgres HA image.
    pub is_postgres: bool,
}

/// Lifecycle state reported by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Started,
    Stopped,
    Other(String),
}

impl NodeState {
    pub fn parse(s: &str) -> Self {
        match s {
            "started" | "running" => NodeState::Started,
            "stopped" => NodeState::Stopped,
            other => NodeState::Other(other.to_string()),
        }
    }
}

/// Replication role, when the inventory reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Leader,
    Replica,
}

/// Read-only snapshot of one cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Private network address (IPv4 or IPv6, without port).
    pub private_ip: String,
    pub state: NodeState,
    /// Software version of the database image, if known.
    pub version: Option<String>,
    pub role: Option<NodeRole>,
}

impl Node {
    pub fn is_leader(&self) -> bool {
        self.role == Some(NodeRole::Leader)
    }
}

/// Exclusive right to mutate one node, bounded in time.
///
/// The token is the join key between a lease and its node; the fleet API
/// binds authorization to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub node_id: NodeId,
    pub token: String,
    pub ttl: Duration,
    /// Local instant at which the grant was observed.
    pub granted_at: Instant,
}

impl Lease {
    pub fn new(node_id: impl Into<NodeId>, token: impl Into<String>, ttl: Duration) -> Self {
        Self::starting_at(node_id, token, ttl, Instant::now())
    }

    /// Lease whose lifetime is counted from `granted_at`.
    ///
    /// Pass the instant the request was sent, not when the reply arrived:
    /// the service starts the clock on receipt, so a later instant would
    /// overestimate the remaining lifetime by the round trip.
    pub fn starting_at(
        node_id: impl Into<NodeId>,
        token: impl Into<String>,
        ttl: Duration,
        granted_at: Instant,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            token: token.into(),
            ttl,
            granted_at,
        }
    }

    /// Local estimate of when the lease stops being valid.
    pub fn expires_at(&self) -> Instant {
        self.granted_at + self.ttl
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at().saturating_duration_since(now)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }
}

/// Result of one node within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum NodeOutcome {
    Succeeded,
    Failed(String),
    /// Not attempted because the run stopped earlier.
    Skipped,
}

impl NodeOutcome {
    pub fn symbol(&self) -> &'static str {
        match self {
            NodeOutcome::Succeeded => "✓",
            NodeOutcome::Failed(_) => "✗",
            NodeOutcome::Skipped => "-",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_from_platform() {
        assert_eq!(BackendKind::from_platform("nomad"), Some(BackendKind::Legacy));
        assert_eq!(BackendKind::from_platform("machines"), Some(BackendKind::Leased));
        assert_eq!(BackendKind::from_platform("kubernetes"), None);
    }

    #[test]
    fn lease_expiry() {
        let lease = Lease::new("n1", "tok", Duration::from_secs(40));
        let now = lease.granted_at;
        assert!(!lease.is_expired(now));
        assert_eq!(lease.remaining(now), Duration::from_secs(40));

        let later = now + Duration::from_secs(41);
        assert!(lease.is_expired(later));
        assert_eq!(lease.remaining(later), Duration::ZERO);
    }

    #[test]
    fn node_state_parse() {
        assert_eq!(NodeState::parse("started"), NodeState::Started);
        assert_eq!(NodeState::parse("running"), NodeState::Started);
        assert_eq!(NodeState::parse("replacing"), NodeState::Other("replacing".into()));
    }

    #[test]
    fn outcome_serializes_tagged() {
        let json = serde_json::to_string(&NodeOutcome::Failed("boom".into())).unwrap();
        assert_eq!(json, r#"{"outcome":"failed","reason":"boom"}"#);
    }
}
