//! pgroll-node: reaching individual database nodes.
//!
//! Provides the tunnel/dialer abstraction used to reach private node
//! addresses and the client that issues the restart command.
//!
//! # Architecture
//!
//! ```text
//! TunnelProvider::establish(org) → Dialer   (one per run)
//!   └── NodeControlClient::restart(&dialer, node)
//!       ├── dial [private_ip]:5500
//!       └── POST /commands/admin/restart → ack
//! ```

pub mod control;
pub mod error;
pub mod tunnel;

pub use control::{NodeControl, NodeControlClient};
pub use error::NodeError;
pub use tunnel::{Dialer, TcpDialer, TcpTunnel, TunnelProvider, node_address};
