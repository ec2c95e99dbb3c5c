//! Restart command issued to a single database node.
//!
//! The node's admin endpoint acknowledges once the database process
//! restart has been issued; it does not wait for recovery.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tracing::{debug, warn};

use pgroll_core::Node;

use crate::error::NodeError;
use crate::tunnel::{Dialer, node_address};

/// Admin path that restarts the database process on a node.
pub const RESTART_PATH: &str = "/commands/admin/restart";

/// Issues control commands to one node.
pub trait NodeControl: Send + Sync {
    /// Restart the database process on `node`, waiting for acknowledgement.
    fn restart<D: Dialer>(
        &self,
        dialer: &D,
        node: &Node,
    ) -> impl Future<Output = Result<(), NodeError>> + Send;
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    error: Option<String>,
}

/// HTTP/1 client for the node admin endpoint.
#[derive(Debug, Clone)]
pub struct NodeControlClient {
    port: u16,
    timeout: Duration,
}

impl NodeControlClient {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    async fn post<D: Dialer>(&self, dialer: &D, address: &str, path: &str) -> Result<(), NodeError> {
        let stream = dialer.dial(address).await?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| NodeError::Unreachable {
                address: address.to_string(),
                reason: format!("handshake failed: {e}"),
            })?;

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(path)
            .header("host", address)
            .header("user-agent", concat!("pgroll/", env!("CARGO_PKG_VERSION")))
            .body(Empty::<Bytes>::new())
            .map_err(|e| NodeError::Protocol(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| NodeError::Unreachable {
                address: address.to_string(),
                reason: format!("request failed: {e}"),
            })?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| NodeError::Protocol(format!("read body: {e}")))?
            .to_bytes();

        if !status.is_success() {
            return Err(NodeError::Remote {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        // An empty body is an acknowledgement too.
        if body.is_empty() {
            return Ok(());
        }
        let parsed: CommandResponse =
            serde_json::from_slice(&body).map_err(|e| NodeError::Protocol(e.to_string()))?;
        match parsed.error {
            Some(msg) if !msg.is_empty() => Err(NodeError::Remote {
                status: status.as_u16(),
                message: msg,
            }),
            _ => Ok(()),
        }
    }
}

impl NodeControl for NodeControlClient {
    async fn restart<D: Dialer>(&self, dialer: &D, node: &Node) -> Result<(), NodeError> {
        let address = node_address(&node.private_ip, self.port);
        debug!(node_id = %node.id, %address, "issuing database restart");

        match tokio::time::timeout(self.timeout, self.post(dialer, &address, RESTART_PATH)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(node_id = %node.id, error = %e, "restart command failed");
                Err(e)
            }
            Err(_) => Err(NodeError::Timeout {
                address,
                secs: self.timeout.as_secs(),
            }),
        }
    }
}
