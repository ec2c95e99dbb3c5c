//! Minimal HTTP/JSON client for the fleet API.
//!
//! Each request opens a fresh HTTP/1 connection, sends one request and
//! reads the full body. Responses are decoded with serde.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{FleetError, FleetResult};

/// Header carrying the lease token on lease-scoped requests.
pub const LEASE_TOKEN_HEADER: &str = "pgroll-lease-token";

/// Handle to the fleet API. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FleetApi {
    /// `host:port` to connect to.
    authority: String,
    /// Path prefix from the base URL, without trailing slash.
    prefix: String,
    token: Option<String>,
    timeout: Duration,
}

/// Raw response: status plus body bytes.
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl RawResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> FleetResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| FleetError::Decode(e.to_string()))
    }
}

impl FleetApi {
    /// Build a client for `base_url` (e.g. `http://127.0.0.1:4280/api`).
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> FleetResult<Self> {
        let uri: Uri = base_url
            .parse()
            .map_err(|_| FleetError::InvalidUrl(base_url.to_string()))?;
        if uri.scheme_str() != Some("http") {
            return Err(FleetError::InvalidUrl(base_url.to_string()));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| FleetError::InvalidUrl(base_url.to_string()))?;
        let host = authority.host();
        let port = authority.port_u16().unwrap_or(80);
        let authority = if host.starts_with('[') || !host.contains(':') {
            format!("{host}:{port}")
        } else {
            format!("[{host}]:{port}")
        };

        Ok(Self {
            authority,
            prefix: uri.path().trim_end_matches('/').to_string(),
            token,
            timeout,
        })
    }

    pub(crate) async fn get(&self, path: &str) -> FleetResult<RawResponse> {
        self.send(Method::GET, path, None::<&()>, &[]).await
    }

    /// Send one request and read the whole response.
    ///
    /// Non-2xx statuses are returned, not turned into errors; callers map
    /// them since 404 and 409 mean different things per endpoint.
    pub(crate) async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        headers: &[(&str, &str)],
    ) -> FleetResult<RawResponse> {
        let uri = format!("{}{}", self.prefix, path);
        let secs = self.timeout.as_secs();

        tokio::time::timeout(self.timeout, self.send_inner(method, &uri, body, headers))
            .await
            .map_err(|_| FleetError::Timeout(secs))?
    }

    async fn send_inner<B: Serialize>(
        &self,
        method: Method,
        uri: &str,
        body: Option<&B>,
        headers: &[(&str, &str)],
    ) -> FleetResult<RawResponse> {
        let payload = match body {
            Some(b) => Bytes::from(
                serde_json::to_vec(b).map_err(|e| FleetError::Decode(e.to_string()))?,
            ),
            None => Bytes::new(),
        };

        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| FleetError::Transport(format!("connect {}: {e}", self.authority)))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| FleetError::Transport(format!("handshake: {e}")))?;

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header("host", &self.authority)
            .header("user-agent", concat!("pgroll/", env!("CARGO_PKG_VERSION")))
            .header("accept", "application/json");
        if !payload.is_empty() {
            builder = builder.header("content-type", "application/json");
        }
        if let Some(token) = &self.token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let req = builder
            .body(Full::new(payload))
            .map_err(|e| FleetError::Transport(format!("build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| FleetError::Transport(format!("{method} {uri}: {e}")))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| FleetError::Transport(format!("read body: {e}")))?
            .to_bytes();

        debug!(%method, %uri, %status, bytes = body.len(), "fleet API response");
        Ok(RawResponse { status, body })
    }
}

/// Turn a non-2xx response into an error, mapping 404 to `NotFound(what)`.
pub(crate) fn expect_success(resp: RawResponse, what: &str) -> FleetResult<RawResponse> {
    if resp.status.is_success() {
        return Ok(resp);
    }
    if resp.status == StatusCode::NOT_FOUND {
        return Err(FleetError::NotFound(what.to_string()));
    }
    Err(FleetError::Status {
        status: resp.status.as_u16(),
        body: resp.body_text(),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! One-shot HTTP server that answers every request with a canned response.

    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Spawn a server that replies to each connection with the next response
    /// in `responses`. Returns the bound address and the captured request heads.
    pub async fn serve(responses: Vec<(u16, String)>) -> (String, Arc<Mutex<Vec<String>>>) {
        serve_delayed(responses, Duration::ZERO).await
    }

    /// Like [`serve`], but waits `delay` after reading each request before replying.
    pub async fn serve_delayed(
        responses: Vec<(u16, String)>,
        delay: Duration,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut sock, _) = listener.accept().await.unwrap();
                let request = read_request(&mut sock).await;
                captured.lock().unwrap().push(request);
                tokio::time::sleep(delay).await;
                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                sock.write_all(reply.as_bytes()).await.unwrap();
                sock.shutdown().await.ok();
            }
        });

        (addr, seen)
    }

    async fn read_request(sock: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = sock.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let len = text[..end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .and_then(|v| v.trim().parse::<usize>().ok())
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_base_url() {
        let api = FleetApi::new("http://127.0.0.1:4280/api/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(api.authority, "127.0.0.1:4280");
        assert_eq!(api.prefix, "/api");

        let api = FleetApi::new("http://fleet.internal", None, Duration::from_secs(1)).unwrap();
        assert_eq!(api.authority, "fleet.internal:80");
    }

    #[test]
    fn rejects_non_http() {
        assert!(matches!(
            FleetApi::new("https://fleet", None, Duration::from_secs(1)),
            Err(FleetError::InvalidUrl(_))
        ));
        assert!(FleetApi::new("not a url", None, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn sends_bearer_token() {
        let (addr, seen) = testing::serve(vec![(200, "{}".to_string())]).await;
        let api = FleetApi::new(
            &format!("http://{addr}"),
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();

        let resp = api.get("/v1/ping").await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);

        let requests = seen.lock().unwrap();
        assert!(requests[0].starts_with("GET /v1/ping"));
        assert!(requests[0].to_ascii_lowercase().contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn maps_not_found() {
        let (addr, _) = testing::serve(vec![(404, "{}".to_string())]).await;
        let api = FleetApi::new(&format!("http://{addr}"), None, Duration::from_secs(5)).unwrap();
        let resp = api.get("/v1/apps/missing").await.unwrap();
        assert!(matches!(
            expect_success(resp, "app missing"),
            Err(FleetError::NotFound(_))
        ));
    }
}
