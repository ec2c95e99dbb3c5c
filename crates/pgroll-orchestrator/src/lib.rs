//! pgroll rolling restart: restart every member of a database cluster.
//!
//! This crate holds the control loop for one restart run. It resolves the
//! cluster's members, checks the version gate, leases every node, opens
//! one tunnel and restarts the nodes one at a time, stopping at the first
//! failure.
//!
//! # Components
//!
//! - **`strategy`**: Legacy vs. leased restart protocol, picked per backend kind
//! - **`orchestrator`**: The run state machine and its collaborators
//! - **`run`**: Ordered restart plan, per-node outcomes, final report
//! - **`error`**: Restart error taxonomy

pub mod error;
pub mod orchestrator;
pub mod run;
pub mod strategy;

pub use error::{AbortedRun, ErrorCategory, RestartError};
pub use orchestrator::{ClusterRestartOrchestrator, RestartOptions, RunEvent};
pub use run::{NodeReport, RestartRun, RunPhase, RunReport};
pub use strategy::RestartStrategy;
