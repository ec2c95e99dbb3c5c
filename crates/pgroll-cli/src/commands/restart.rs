//! `pgroll restart`: rolling restart of one Postgres app.
//!
//! Wires the fleet client, lease coordinator, tunnel, node control client
//! and version gate from `pgroll.toml`, then drives a single run. Progress
//! lines go to stdout; Ctrl-C cancels the run.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use pgroll_core::{MinimumVersionGate, PgrollConfig};
use pgroll_fleet::{FleetApi, LeaseCoordinator};
use pgroll_node::{NodeControlClient, TcpTunnel};
use pgroll_orchestrator::{
    ClusterRestartOrchestrator, RestartOptions, RunEvent, RunPhase, RunReport,
};

/// How the final run report is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub min_version: Option<String>,
    pub order: Option<String>,
    pub deadline: Option<u64>,
}

impl Overrides {
    fn apply(self, config: &mut PgrollConfig) -> Result<()> {
        if let Some(min) = self.min_version {
            config.restart.min_version = min;
        }
        if let Some(order) = self.order {
            config.restart.order = order.parse()?;
        }
        if let Some(secs) = self.deadline {
            config.restart.deadline_secs = Some(secs);
        }
        Ok(())
    }
}

pub async fn restart(config_path: Option<&Path>, app: &str, overrides: Overrides, format: ReportFormat) -> Result<()> {
    let mut config = PgrollConfig::load(config_path).context("failed to load configuration")?;
    overrides.apply(&mut config)?;
    config.validate()?;

    let api = FleetApi::new(
        &config.api.base_url,
        config.api_token(),
        Duration::from_secs(config.api.timeout_secs),
    )?;
    let leases = LeaseCoordinator::new(api.clone(), config.restart.lease_ttl())
        .with_renew_margin(config.restart.lease_renew_margin());
    let tunnel = TcpTunnel::new(config.tunnel.connect_timeout());
    let control = NodeControlClient::new(config.tunnel.control_port, config.restart.node_timeout());
    let gate = MinimumVersionGate::new(&config.restart.min_version)
        .with_context(|| format!("invalid minimum version {:?}", config.restart.min_version))?;

    info!(app = %app, api = %config.api.base_url, min_version = %gate.minimum(), "starting restart");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let orchestrator = ClusterRestartOrchestrator::new(api, leases, tunnel, control, gate)
        .with_options(RestartOptions::from(&config.restart))
        .with_events(events_tx);

    // ── Progress + Ctrl-C ──────────────────────────────────────

    let printer = tokio::spawn(print_progress(events_rx));

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling restart");
            let _ = cancel_tx.send(true);
        }
    });

    let result = orchestrator.run(app, cancel_rx).await;

    // Closing the event channel lets the printer drain and exit.
    drop(orchestrator);
    let _ = printer.await;

    match result {
        Ok(report) => print_report(&report, format),
        Err(aborted) => {
            print_report(&aborted.report, format)?;
            if let Some(node_id) = aborted.error.node_id() {
                eprintln!("Restart stopped at node {node_id}");
            }
            Err(aborted.into())
        }
    }
}

async fn print_progress(mut events: mpsc::UnboundedReceiver<RunEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::Phase(RunPhase::LeaseAcquiring) => {
                println!("Acquiring lease on postgres cluster");
            }
            RunEvent::Phase(RunPhase::TunnelEstablishing) => {
                println!("Connecting to cluster network");
            }
            RunEvent::Restarting {
                node_id,
                lease_token: Some(token),
            } => println!(" Restarting {node_id} with lease {token}"),
            RunEvent::Restarting {
                node_id,
                lease_token: None,
            } => println!(" Restarting {node_id}"),
            RunEvent::Phase(RunPhase::Completed) => println!("Restart complete"),
            _ => {}
        }
    }
}

fn print_report(report: &RunReport, format: ReportFormat) -> Result<()> {
    match format {
        ReportFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        ReportFormat::Text => {
            println!();
            for node in &report.nodes {
                let detail = match &node.outcome {
                    pgroll_core::NodeOutcome::Failed(reason) => format!(" ({reason})"),
                    _ => String::new(),
                };
                println!("  {} {}{}", node.outcome.symbol(), node.node_id, detail);
            }
            println!(
                "{} succeeded, {} failed, {} skipped",
                report.succeeded(),
                report.failed(),
                report.skipped()
            );
        }
    }
    Ok(())
}
