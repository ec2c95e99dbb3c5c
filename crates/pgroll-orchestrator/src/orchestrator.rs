//! Cluster restart orchestrator: drives one run end to end.
//!
//! ```text
//! Resolving → Gating → (LeaseAcquiring) → TunnelEstablishing
//!           → Restarting(node_0) → … → Completed
//! ```
//!
//! Any phase may end in `Aborted(error)`. There is no resumption; a new
//! invocation starts a fresh run.
//!
//! Restarts are sequential and fail-fast: the first failed node stops the
//! run and later nodes are never contacted. Nodes restarted before the
//! failure stay restarted.
//!
//! Leases are re-validated right before each restart and renewed when
//! close to expiry. A node whose lease has lapsed is never restarted.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{info, warn};

use pgroll_core::{NodeId, NodeOutcome, RestartConfig, RestartOrder, VersionGate};
use pgroll_fleet::{LeaseCoordinator, LeaseService, MembershipResolver};
use pgroll_node::{NodeControl, TunnelProvider};

use crate::error::{AbortedRun, RestartError};
use crate::run::{RestartRun, RunPhase, RunReport};
use crate::strategy::RestartStrategy;

/// Per-run tuning.
#[derive(Debug, Clone)]
pub struct RestartOptions {
    pub order: RestartOrder,
    /// Whole-run deadline, measured from the start of `run`.
    pub deadline: Option<Duration>,
    /// Release leases when the run ends (not on cancellation).
    pub release_leases: bool,
}

impl Default for RestartOptions {
    fn default() -> Self {
        Self {
            order: RestartOrder::AsListed,
            deadline: None,
            release_leases: true,
        }
    }
}

impl From<&RestartConfig> for RestartOptions {
    fn from(cfg: &RestartConfig) -> Self {
        Self {
            order: cfg.order,
            deadline: cfg.deadline(),
            release_leases: cfg.release_leases,
        }
    }
}

/// Progress notifications for whoever drives the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Phase(RunPhase),
    Restarting {
        node_id: NodeId,
        lease_token: Option<String>,
    },
    Restarted {
        node_id: NodeId,
    },
}

/// Restarts every member of a cluster, one node at a time.
///
/// All collaborators are injected; nothing is read from ambient state.
pub struct ClusterRestartOrchestrator<M, S, T, N, G> {
    membership: M,
    leases: LeaseCoordinator<S>,
    tunnel: T,
    control: N,
    gate: G,
    options: RestartOptions,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl<M, S, T, N, G> ClusterRestartOrchestrator<M, S, T, N, G>
where
    M: MembershipResolver,
    S: LeaseService,
    T: TunnelProvider,
    N: NodeControl,
    G: VersionGate,
{
    pub fn new(membership: M, leases: LeaseCoordinator<S>, tunnel: T, control: N, gate: G) -> Self {
        Self {
            membership,
            leases,
            tunnel,
            control,
            gate,
            options: RestartOptions::default(),
            events: None,
        }
    }

    pub fn with_options(mut self, options: RestartOptions) -> Self {
        self.options = options;
        self
    }

    /// Send [`RunEvent`]s to `tx` as the run progresses.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Restart every member of `cluster_name`.
    ///
    /// `cancel` flipping to `true` aborts the in-flight network call and
    /// the rest of the run. Acquired leases are not released on
    /// cancellation; they expire on their own.
    pub async fn run(
        &self,
        cluster_name: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<RunReport, AbortedRun> {
        let deadline = self.options.deadline.map(|d| Instant::now() + d);
        let mut run = RestartRun::new(cluster_name);

        let result = self.drive(&mut run, &mut cancel, deadline).await;

        let held = run.held_leases();
        let release = self.options.release_leases
            && !held.is_empty()
            && !matches!(&result, Err(e) if e.is_interrupted());

        match result {
            Ok(()) => {
                self.enter(&mut run, RunPhase::Completed);
                info!(cluster = %cluster_name, nodes = run.len(), "restart complete");
            }
            Err(ref error) => {
                warn!(cluster = %cluster_name, error = %error, "restart aborted");
                self.enter(
                    &mut run,
                    RunPhase::Aborted {
                        reason: error.to_string(),
                    },
                );
            }
        }

        if release {
            if let Some(cluster) = run.resolved() {
                self.leases.release_all(cluster, held).await;
            }
        }

        let report = run.into_report();
        match result {
            Ok(()) => Ok(report),
            Err(error) => Err(AbortedRun { error, report }),
        }
    }

    async fn drive(
        &self,
        run: &mut RestartRun,
        cancel: &mut watch::Receiver<bool>,
        deadline: Option<Instant>,
    ) -> Result<(), RestartError> {
        // ── Resolving ──────────────────────────────────────────────
        self.enter(run, RunPhase::Resolving);
        let name = run.cluster().to_string();

        let cluster = guard(cancel, deadline, self.membership.lookup(&name))
            .await?
            .map_err(|source| RestartError::ClusterLookup {
                name: name.clone(),
                source,
            })?;
        if !cluster.is_postgres {
            return Err(RestartError::NotPostgres(cluster.name));
        }
        run.resolve(cluster.clone());

        let strategy = RestartStrategy::for_backend(cluster.backend);
        info!(cluster = %cluster.name, backend = %cluster.backend, "resolving members");

        let members = guard(cancel, deadline, strategy.members(&self.membership, &cluster))
            .await?
            .map_err(RestartError::Membership)?;
        if members.is_empty() {
            return Err(RestartError::NoNodesFound(cluster.name));
        }
        run.plan(members, self.options.order);

        // ── Gating ─────────────────────────────────────────────────
        self.enter(run, RunPhase::Gating);
        let nodes = run.nodes();
        for node in strategy.gate_targets(&nodes) {
            self.gate.check(node)?;
        }

        // ── LeaseAcquiring ─────────────────────────────────────────
        if strategy.uses_leases() {
            self.enter(run, RunPhase::LeaseAcquiring);
            let acquired = guard(cancel, deadline, self.leases.acquire_all(&cluster, &nodes)).await?;
            match acquired {
                Ok(set) => run.attach_leases(set),
                Err((error, partial)) => {
                    if self.options.release_leases {
                        self.leases.release_all(&cluster, partial).await;
                    }
                    return Err(error.into());
                }
            }
        }

        // ── TunnelEstablishing ─────────────────────────────────────
        self.enter(run, RunPhase::TunnelEstablishing);
        let dialer = guard(cancel, deadline, self.tunnel.establish(&cluster.organization))
            .await?
            .map_err(RestartError::TunnelEstablishmentFailed)?;

        // ── Restarting ─────────────────────────────────────────────
        let total = run.len();
        for index in 0..total {
            let node = run.planned(index).node.clone();
            self.enter(
                run,
                RunPhase::Restarting {
                    index,
                    total,
                    node_id: node.id.clone(),
                },
            );

            if let Some(lease) = run.planned_mut(index).lease.as_mut() {
                let checked = guard(cancel, deadline, self.leases.ensure_valid(&cluster, lease)).await;
                // No command was sent, so the node stays Skipped on failure.
                match checked {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => return Err(e.into()),
                    Err(interrupted) => return Err(interrupted),
                }
            }

            let lease_token = run.planned(index).lease.as_ref().map(|l| l.token.clone());
            info!(node_id = %node.id, lease = ?lease_token, "restarting node");
            self.emit(RunEvent::Restarting {
                node_id: node.id.clone(),
                lease_token,
            });

            match guard(cancel, deadline, self.control.restart(&dialer, &node)).await {
                Ok(Ok(())) => {
                    run.record(index, NodeOutcome::Succeeded);
                    self.emit(RunEvent::Restarted {
                        node_id: node.id.clone(),
                    });
                }
                Ok(Err(cause)) => {
                    run.record(index, NodeOutcome::Failed(cause.to_string()));
                    return Err(RestartError::NodeRestartFailed {
                        node_id: node.id,
                        cause,
                    });
                }
                Err(interrupted) => {
                    // The command may or may not have reached the node.
                    run.record(index, NodeOutcome::Failed(interrupted.to_string()));
                    return Err(interrupted);
                }
            }
        }

        Ok(())
    }

    fn enter(&self, run: &mut RestartRun, phase: RunPhase) {
        run.enter(phase.clone());
        self.emit(RunEvent::Phase(phase));
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Race `fut` against cancellation and the run deadline.
async fn guard<F: Future>(
    cancel: &mut watch::Receiver<bool>,
    deadline: Option<Instant>,
    fut: F,
) -> Result<F::Output, RestartError> {
    let expired = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancelled(cancel) => Err(RestartError::Cancelled),
        _ = expired => Err(RestartError::DeadlineExceeded),
        out = fut => Ok(out),
    }
}

/// Resolves once `cancel` reads `true`. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}
