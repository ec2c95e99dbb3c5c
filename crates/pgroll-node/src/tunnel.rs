//! Private-network tunnel and dialer.
//!
//! A [`TunnelProvider`] opens one path into an organization's private
//! address space; the resulting [`Dialer`] is shared by every node call
//! in a run and hands out one connection per call.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::NodeError;

/// Opens connections to private addresses through an established tunnel.
pub trait Dialer: Send + Sync {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `address` (`host:port`, IPv6 hosts bracketed).
    fn dial(&self, address: &str) -> impl Future<Output = Result<Self::Conn, NodeError>> + Send;
}

/// Establishes a tunnel for one organization.
pub trait TunnelProvider: Send + Sync {
    type Dialer: Dialer;

    fn establish(
        &self,
        organization: &str,
    ) -> impl Future<Output = Result<Self::Dialer, NodeError>> + Send;
}

/// Format a private IP and port as a dialable address.
pub fn node_address(private_ip: &str, port: u16) -> String {
    if private_ip.contains(':') && !private_ip.starts_with('[') {
        format!("[{private_ip}]:{port}")
    } else {
        format!("{private_ip}:{port}")
    }
}

/// Tunnel for hosts that already sit on the private network (or behind a
/// routed WireGuard interface): dialing is plain TCP.
#[derive(Debug, Clone)]
pub struct TcpTunnel {
    connect_timeout: Duration,
}

impl TcpTunnel {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl TunnelProvider for TcpTunnel {
    type Dialer = TcpDialer;

    async fn establish(&self, organization: &str) -> Result<TcpDialer, NodeError> {
        if organization.is_empty() {
            return Err(NodeError::TunnelUnavailable {
                organization: organization.to_string(),
                reason: "organization slug is empty".to_string(),
            });
        }
        info!(%organization, "tunnel established");
        Ok(TcpDialer {
            organization: organization.to_string(),
            connect_timeout: self.connect_timeout,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TcpDialer {
    organization: String,
    connect_timeout: Duration,
}

impl Dialer for TcpDialer {
    type Conn = TcpStream;

    async fn dial(&self, address: &str) -> Result<TcpStream, NodeError> {
        let connect = TcpStream::connect(address);
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => {
                debug!(%address, org = %self.organization, "dialed node");
                Ok(stream)
            }
            Ok(Err(e)) => Err(NodeError::Unreachable {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(NodeError::Timeout {
                address: address.to_string(),
                secs: self.connect_timeout.as_secs(),
            }),
        }
    }
}
