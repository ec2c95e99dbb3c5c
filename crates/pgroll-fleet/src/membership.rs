//! Cluster lookup and membership resolution.
//!
//! The leased backend lists individually addressable nodes filtered by
//! lifecycle state. The legacy backend only exposes an app status with
//! its current allocations.

use std::future::Future;

use serde::Deserialize;
use tracing::{debug, info};

use pgroll_core::{BackendKind, Cluster, Node, NodeRole, NodeState};

use crate::client::{FleetApi, expect_success};
use crate::error::{FleetError, FleetResult};

/// Source of cluster identity and live membership.
pub trait MembershipResolver: Send + Sync {
    /// Resolve a cluster by app name.
    fn lookup(&self, name: &str) -> impl Future<Output = FleetResult<Cluster>> + Send;

    /// List nodes of a leased cluster, optionally filtered by lifecycle state.
    fn list_nodes(
        &self,
        cluster: &Cluster,
        state: Option<&str>,
    ) -> impl Future<Output = FleetResult<Vec<Node>>> + Send;

    /// Current allocations of a legacy cluster.
    fn app_status(&self, cluster: &Cluster) -> impl Future<Output = FleetResult<Vec<Node>>> + Send;
}

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AppResponse {
    name: String,
    organization: OrgRef,
    platform_version: String,
    #[serde(default)]
    postgres: bool,
}

#[derive(Debug, Deserialize)]
struct OrgRef {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct MachineResponse {
    id: String,
    private_ip: String,
    state: String,
    #[serde(default)]
    image_version: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    allocations: Vec<AllocationResponse>,
}

#[derive(Debug, Deserialize)]
struct AllocationResponse {
    id: String,
    private_ip: String,
    status: String,
    #[serde(default)]
    version: Option<String>,
}

fn parse_role(role: Option<&str>) -> Option<NodeRole> {
    match role? {
        "leader" | "primary" => Some(NodeRole::Leader),
        "replica" | "standby" => Some(NodeRole::Replica),
        _ => None,
    }
}

impl From<MachineResponse> for Node {
    fn from(m: MachineResponse) -> Self {
        Node {
            role: parse_role(m.role.as_deref()),
            id: m.id,
            private_ip: m.private_ip,
            state: NodeState::parse(&m.state),
            version: m.image_version,
        }
    }
}

impl From<AllocationResponse> for Node {
    fn from(a: AllocationResponse) -> Self {
        Node {
            id: a.id,
            private_ip: a.private_ip,
            state: NodeState::parse(&a.status),
            version: a.version,
            role: None,
        }
    }
}

/// `/v1/apps/{name}` with the name escaped as a single path segment.
pub(crate) fn app_path(name: &str) -> String {
    format!("/v1/apps/{}", urlencoding::encode(name))
}

fn cluster_from(app: AppResponse) -> FleetResult<Cluster> {
    let backend = BackendKind::from_platform(&app.platform_version).ok_or_else(|| {
        FleetError::Decode(format!(
            "app {} has unsupported platform {:?}",
            app.name, app.platform_version
        ))
    })?;
    Ok(Cluster {
        name: app.name,
        organization: app.organization.slug,
        backend,
        is_postgres: app.postgres,
    })
}

impl MembershipResolver for FleetApi {
    async fn lookup(&self, name: &str) -> FleetResult<Cluster> {
        let resp = self.get(&app_path(name)).await?;
        let app: AppResponse = expect_success(resp, &format!("app {name}"))?.json()?;
        let cluster = cluster_from(app)?;
        debug!(cluster = %cluster.name, backend = %cluster.backend, org = %cluster.organization, "resolved cluster");
        Ok(cluster)
    }

    async fn list_nodes(&self, cluster: &Cluster, state: Option<&str>) -> FleetResult<Vec<Node>> {
        let path = match state {
            Some(s) => format!("{}/machines?state={}", app_path(&cluster.name), urlencoding::encode(s)),
            None => format!("{}/machines", app_path(&cluster.name)),
        };
        let resp = self.get(&path).await?;
        let machines: Vec<MachineResponse> =
            expect_success(resp, &format!("machines of {}", cluster.name))?.json()?;

        let nodes: Vec<Node> = machines.into_iter().map(Node::from).collect();
        info!(cluster = %cluster.name, count = nodes.len(), state = ?state, "listed nodes");
        Ok(nodes)
    }

    async fn app_status(&self, cluster: &Cluster) -> FleetResult<Vec<Node>> {
        let resp = self.get(&format!("{}/status", app_path(&cluster.name))).await?;
        let status: StatusResponse =
            expect_success(resp, &format!("status of {}", cluster.name))?.json()?;

        let nodes: Vec<Node> = status.allocations.into_iter().map(Node::from).collect();
        info!(cluster = %cluster.name, count = nodes.len(), "fetched app status");
        Ok(nodes)
    }
}
