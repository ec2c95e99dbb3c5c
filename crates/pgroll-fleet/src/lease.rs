//! Node leases: exclusive, time-bounded rights to mutate a node.
//!
//! [`LeaseService`] is the fleet's lock service. [`LeaseCoordinator`]
//! layers the run policy on top: acquire a lease for every member before
//! any mutation, re-validate a lease right before it is used, and release
//! leases best-effort when a run ends.

use std::future::Future;
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use pgroll_core::{Cluster, Lease, Node, NodeId};

use crate::client::{FleetApi, LEASE_TOKEN_HEADER, expect_success};
use crate::error::{FleetError, FleetResult};
use crate::membership::app_path;

/// The fleet's lease service.
pub trait LeaseService: Send + Sync {
    /// Acquire a new lease on `node_id`.
    fn acquire(
        &self,
        cluster: &Cluster,
        node_id: &str,
        ttl: Duration,
    ) -> impl Future<Output = FleetResult<Lease>> + Send;

    /// Extend a held lease. The returned lease carries the fresh expiry.
    fn renew(
        &self,
        cluster: &Cluster,
        lease: &Lease,
        ttl: Duration,
    ) -> impl Future<Output = FleetResult<Lease>> + Send;

    fn release(&self, cluster: &Cluster, lease: &Lease) -> impl Future<Output = FleetResult<()>> + Send;
}

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct LeaseRequest {
    ttl: u64,
}

#[derive(Debug, Deserialize)]
struct LeaseResponse {
    data: LeaseData,
}

#[derive(Debug, Deserialize)]
struct LeaseData {
    nonce: String,
    /// Node the service bound the lease to.
    #[serde(default, alias = "machine_id")]
    node_id: Option<String>,
    #[serde(default)]
    ttl: Option<u64>,
}

fn lease_path(cluster: &Cluster, node_id: &str) -> String {
    format!(
        "{}/machines/{}/lease",
        app_path(&cluster.name),
        urlencoding::encode(node_id)
    )
}

/// Decode a lease grant for `node_id`, counting its lifetime from `sent_at`.
fn decode_lease(
    resp: crate::client::RawResponse,
    node_id: &str,
    requested: Duration,
    sent_at: Instant,
) -> FleetResult<Lease> {
    if resp.status == StatusCode::CONFLICT {
        return Err(FleetError::LeaseDenied {
            node_id: node_id.to_string(),
            reason: resp.body_text(),
        });
    }
    let parsed: LeaseResponse = expect_success(resp, &format!("node {node_id}"))?.json()?;
    let granted = parsed.data.node_id.unwrap_or_else(|| node_id.to_string());
    if granted != node_id {
        return Err(FleetError::LeaseMismatch {
            requested: node_id.to_string(),
            granted,
        });
    }
    // The service may grant less than requested.
    let ttl = parsed
        .data
        .ttl
        .map(Duration::from_secs)
        .unwrap_or(requested);
    Ok(Lease::starting_at(granted, parsed.data.nonce, ttl, sent_at))
}

impl LeaseService for FleetApi {
    async fn acquire(&self, cluster: &Cluster, node_id: &str, ttl: Duration) -> FleetResult<Lease> {
        let body = LeaseRequest { ttl: ttl.as_secs() };
        let sent_at = Instant::now();
        let resp = self
            .send(Method::POST, &lease_path(cluster, node_id), Some(&body), &[])
            .await?;
        decode_lease(resp, node_id, ttl, sent_at)
    }

    async fn renew(&self, cluster: &Cluster, lease: &Lease, ttl: Duration) -> FleetResult<Lease> {
        let body = LeaseRequest { ttl: ttl.as_secs() };
        let sent_at = Instant::now();
        let resp = self
            .send(
                Method::POST,
                &lease_path(cluster, &lease.node_id),
                Some(&body),
                &[(LEASE_TOKEN_HEADER, lease.token.as_str())],
            )
            .await?;
        decode_lease(resp, &lease.node_id, ttl, sent_at)
    }

    async fn release(&self, cluster: &Cluster, lease: &Lease) -> FleetResult<()> {
        let resp = self
            .send(
                Method::DELETE,
                &lease_path(cluster, &lease.node_id),
                None::<&()>,
                &[(LEASE_TOKEN_HEADER, lease.token.as_str())],
            )
            .await?;
        expect_success(resp, &format!("lease on {}", lease.node_id))?;
        Ok(())
    }
}

// ── Coordinator ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("failed to obtain lease on node {node_id}: {source}")]
    Acquire {
        node_id: NodeId,
        #[source]
        source: FleetError,
    },

    #[error("lease {token} on node {node_id} expired before use")]
    Expired { node_id: NodeId, token: String },

    #[error("failed to renew lease on node {node_id}: {source}")]
    Renew {
        node_id: NodeId,
        #[source]
        source: FleetError,
    },
}

impl LeaseError {
    pub fn node_id(&self) -> &str {
        match self {
            LeaseError::Acquire { node_id, .. }
            | LeaseError::Expired { node_id, .. }
            | LeaseError::Renew { node_id, .. } => node_id,
        }
    }
}

/// Leases held for one run, keyed by token, in acquisition order.
///
/// The token is the join key back to the node it guards; callers resolve
/// nodes through [`LeaseSet::node_for`].
#[derive(Debug, Clone, Default)]
pub struct LeaseSet {
    leases: Vec<Lease>,
}

impl LeaseSet {
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    /// Tokens in acquisition order.
    pub fn tokens(&self) -> Vec<String> {
        self.leases.iter().map(|l| l.token.clone()).collect()
    }

    /// Node guarded by the lease with `token`.
    pub fn node_for(&self, token: &str) -> Option<&str> {
        self.leases
            .iter()
            .find(|l| l.token == token)
            .map(|l| l.node_id.as_str())
    }

    /// Take the lease with `token` out of the set.
    pub fn take(&mut self, token: &str) -> Option<Lease> {
        let idx = self.leases.iter().position(|l| l.token == token)?;
        Some(self.leases.remove(idx))
    }

    fn insert(&mut self, lease: Lease) -> Result<(), Lease> {
        let taken = self
            .leases
            .iter()
            .any(|l| l.token == lease.token || l.node_id == lease.node_id);
        if taken {
            return Err(lease);
        }
        self.leases.push(lease);
        Ok(())
    }
}

impl IntoIterator for LeaseSet {
    type Item = Lease;
    type IntoIter = std::vec::IntoIter<Lease>;

    fn into_iter(self) -> Self::IntoIter {
        self.leases.into_iter()
    }
}

/// Applies the run's lease policy on top of a [`LeaseService`].
pub struct LeaseCoordinator<S> {
    service: S,
    ttl: Duration,
    renew_margin: Duration,
}

impl<S: LeaseService> LeaseCoordinator<S> {
    pub fn new(service: S, ttl: Duration) -> Self {
        Self {
            service,
            ttl,
            renew_margin: Duration::from_secs(10),
        }
    }

    /// Renew before use when less than `margin` of the lease remains.
    pub fn with_renew_margin(mut self, margin: Duration) -> Self {
        self.renew_margin = margin;
        self
    }

    /// Acquire one lease per node, all or nothing.
    ///
    /// Stops at the first denial. Leases granted before it are left to
    /// expire; the caller decides whether to release them early.
    pub async fn acquire_all(
        &self,
        cluster: &Cluster,
        nodes: &[Node],
    ) -> Result<LeaseSet, (LeaseError, LeaseSet)> {
        let mut set = LeaseSet::default();
        for node in nodes {
            match self.service.acquire(cluster, &node.id, self.ttl).await {
                Ok(lease) => {
                    debug!(node_id = %node.id, token = %lease.token, ttl = ?lease.ttl, "lease acquired");
                    if let Err(dup) = set.insert(lease) {
                        warn!(node_id = %node.id, token = %dup.token, "duplicate lease grant");
                        let err = LeaseError::Acquire {
                            node_id: node.id.clone(),
                            source: FleetError::LeaseMismatch {
                                requested: node.id.clone(),
                                granted: dup.node_id.clone(),
                            },
                        };
                        return Err((err, set));
                    }
                }
                Err(source) => {
                    warn!(node_id = %node.id, error = %source, "lease acquisition failed");
                    let err = LeaseError::Acquire {
                        node_id: node.id.clone(),
                        source,
                    };
                    return Err((err, set));
                }
            }
        }
        info!(cluster = %cluster.name, count = set.len(), "acquired leases on all members");
        Ok(set)
    }

    /// Make sure `lease` is usable right now, renewing it if it is close to
    /// expiry. Returns whether a renewal happened.
    pub async fn ensure_valid(&self, cluster: &Cluster, lease: &mut Lease) -> Result<bool, LeaseError> {
        self.ensure_valid_at(cluster, lease, Instant::now()).await
    }

    async fn ensure_valid_at(
        &self,
        cluster: &Cluster,
        lease: &mut Lease,
        now: Instant,
    ) -> Result<bool, LeaseError> {
        if lease.is_expired(now) {
            return Err(LeaseError::Expired {
                node_id: lease.node_id.clone(),
                token: lease.token.clone(),
            });
        }
        if lease.remaining(now) >= self.renew_margin {
            return Ok(false);
        }

        let renewed = self
            .service
            .renew(cluster, lease, self.ttl)
            .await
            .map_err(|source| LeaseError::Renew {
                node_id: lease.node_id.clone(),
                source,
            })?;
        debug!(node_id = %lease.node_id, token = %renewed.token, "lease renewed");
        *lease = renewed;
        Ok(true)
    }

    /// Release every lease in `leases`, logging failures.
    pub async fn release_all(&self, cluster: &Cluster, leases: impl IntoIterator<Item = Lease>) {
        for lease in leases {
            match self.service.release(cluster, &lease).await {
                Ok(()) => debug!(node_id = %lease.node_id, "lease released"),
                Err(e) => warn!(node_id = %lease.node_id, error = %e, "failed to release lease"),
            }
        }
    }
}
