//! Docker Engine API client for Swarm-mode clusters.
//!
//! Each request opens a fresh HTTP/1.1 connection (unix socket or TCP),
//! performs the hyper handshake, and drives the connection in a
//! background task until the response body has been read.

mod wire;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tracing::{debug, warn};

use crate::client::ClusterClient;
use crate::error::{ClusterError, ClusterResult};
use crate::types::{Service, Task};

use wire::{ErrorBody, ServiceBody, StatsBody, TaskBody, VersionBody};

/// Default Docker socket path.
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Where the Docker daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerHost {
    Unix(PathBuf),
    Tcp(String),
}

impl DockerHost {
    /// Parse a `DOCKER_HOST`-style value (`unix:///path` or `tcp://host:port`).
    pub fn parse(value: &str) -> ClusterResult<Self> {
        if let Some(path) = value.strip_prefix("unix://") {
            Ok(DockerHost::Unix(PathBuf::from(path)))
        } else if let Some(addr) = value.strip_prefix("tcp://") {
            Ok(DockerHost::Tcp(addr.trim_end_matches('/').to_string()))
        } else {
            Err(ClusterError::Connect {
                endpoint: value.to_string(),
                message: "unsupported DOCKER_HOST scheme (expected unix:// or tcp://)"
                    .to_string(),
            })
        }
    }

    /// Read `DOCKER_HOST`, falling back to the default unix socket.
    pub fn from_env() -> ClusterResult<Self> {
        match std::env::var("DOCKER_HOST") {
            Ok(value) if !value.is_empty() => Self::parse(&value),
            _ => Ok(DockerHost::Unix(PathBuf::from(DEFAULT_DOCKER_SOCKET))),
        }
    }

    fn authority(&self) -> &str {
        match self {
            DockerHost::Unix(_) => "docker",
            DockerHost::Tcp(addr) => addr,
        }
    }
}

impl std::fmt::Display for DockerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DockerHost::Unix(path) => write!(f, "unix://{}", path.display()),
            DockerHost::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

/// `ClusterClient` backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerClient {
    host: DockerHost,
    request_timeout: Duration,
}

impl DockerClient {
    pub fn new(host: DockerHost) -> Self {
        Self {
            host,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Connect using `DOCKER_HOST` (or the default socket).
    pub fn from_env() -> ClusterResult<Self> {
        Ok(Self::new(DockerHost::from_env()?))
    }

    /// Override the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn host(&self) -> &DockerHost {
        &self.host
    }

    /// Perform a request and return the status and full body.
    async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Vec<u8>>,
    ) -> ClusterResult<(StatusCode, Bytes)> {
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(path_and_query)
            .header("host", self.host.authority())
            .header("user-agent", "swarmscale/0.1");
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let req = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| ClusterError::Http(e.to_string()))?;

        let result = tokio::time::timeout(self.request_timeout, self.send(req)).await;
        match result {
            Ok(Ok((status, bytes))) => {
                debug!(%method, path = %path_and_query, %status, "docker api call");
                Ok((status, bytes))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ClusterError::Timeout(self.request_timeout)),
        }
    }

    async fn send(&self, req: Request<Full<Bytes>>) -> ClusterResult<(StatusCode, Bytes)> {
        match &self.host {
            #[cfg(unix)]
            DockerHost::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(|e| self.connect_error(e))?;
                send_on(TokioIo::new(stream), req).await
            }
            #[cfg(not(unix))]
            DockerHost::Unix(_) => Err(ClusterError::Connect {
                endpoint: self.host.to_string(),
                message: "unix sockets are not supported on this platform".to_string(),
            }),
            DockerHost::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr.as_str())
                    .await
                    .map_err(|e| self.connect_error(e))?;
                send_on(TokioIo::new(stream), req).await
            }
        }
    }

    fn connect_error(&self, e: std::io::Error) -> ClusterError {
        ClusterError::Connect {
            endpoint: self.host.to_string(),
            message: e.to_string(),
        }
    }

    /// GET a JSON document, mapping 404 to `NotFound(what)`.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path_and_query: &str,
        what: &str,
    ) -> ClusterResult<T> {
        let (status, body) = self.request(Method::GET, path_and_query, None).await?;
        check_status(status, &body, what)?;
        serde_json::from_slice(&body).map_err(|e| ClusterError::Decode(e.to_string()))
    }
}

async fn send_on<T>(io: T, req: Request<Full<Bytes>>) -> ClusterResult<(StatusCode, Bytes)>
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| ClusterError::Http(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "docker connection closed with error");
        }
    });

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| ClusterError::Http(e.to_string()))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| ClusterError::Http(e.to_string()))?
        .to_bytes();
    Ok((status, body))
}

/// Turn a non-2xx response into an error carrying the daemon's message.
fn check_status(status: StatusCode, body: &[u8], what: &str) -> ClusterResult<()> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ClusterError::NotFound(what.to_string()));
    }
    let message = serde_json::from_slice::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
    Err(ClusterError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Percent-encode a query parameter value (RFC 3986 unreserved set kept).
fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Build the `/tasks` query selecting running tasks of one service.
fn running_tasks_path(service_id: &str) -> String {
    let filters = serde_json::json!({
        "service": [service_id],
        "desired-state": ["running"],
    });
    format!("/tasks?filters={}", encode_query_value(&filters.to_string()))
}

#[async_trait]
impl ClusterClient for DockerClient {
    async fn ping(&self) -> ClusterResult<String> {
        let version: VersionBody = self.get_json("/version", "version").await?;
        Ok(version.api_version)
    }

    async fn list_services(&self) -> ClusterResult<Vec<Service>> {
        let bodies: Vec<ServiceBody> = self.get_json("/services", "services").await?;
        Ok(bodies.into_iter().map(Service::from).collect())
    }

    async fn inspect_service(&self, service_id: &str) -> ClusterResult<Service> {
        let path = format!("/services/{}", encode_query_value(service_id));
        let body: ServiceBody = self.get_json(&path, service_id).await?;
        Ok(Service::from(body))
    }

    async fn list_running_tasks(&self, service_id: &str) -> ClusterResult<Vec<Task>> {
        let bodies: Vec<TaskBody> = self
            .get_json(&running_tasks_path(service_id), service_id)
            .await?;
        Ok(bodies.into_iter().map(Task::from).collect())
    }

    async fn container_memory_usage(&self, container_id: &str) -> ClusterResult<u64> {
        let path = format!(
            "/containers/{}/stats?stream=false",
            encode_query_value(container_id)
        );
        let stats: StatsBody = self.get_json(&path, container_id).await?;
        Ok(stats.memory_stats.usage)
    }

    async fn set_replicas(&self, service_id: &str, replicas: u64) -> ClusterResult<()> {
        // The update endpoint takes the complete spec plus the version it
        // was read at, so work on the raw document to keep unknown fields.
        let path = format!("/services/{}", encode_query_value(service_id));
        let raw: serde_json::Value = self.get_json(&path, service_id).await?;

        let version = raw
            .pointer("/Version/Index")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ClusterError::Decode("service has no Version.Index".to_string()))?;
        let mut spec = raw
            .get("Spec")
            .cloned()
            .ok_or_else(|| ClusterError::Decode("service has no Spec".to_string()))?;

        let slot = spec
            .pointer_mut("/Mode/Replicated")
            .and_then(|r| r.as_object_mut())
            .ok_or_else(|| ClusterError::NotReplicated(service_id.to_string()))?;
        slot.insert("Replicas".to_string(), serde_json::Value::from(replicas));

        let body = serde_json::to_vec(&spec).map_err(|e| ClusterError::Decode(e.to_string()))?;
        let update_path = format!("{path}/update?version={version}");
        let (status, resp) = self.request(Method::POST, &update_path, Some(body)).await?;
        check_status(status, &resp, service_id)?;

        if let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(&resp)
            && let Some(warnings) = parsed.get("Warnings").and_then(|w| w.as_array())
        {
            for warning in warnings {
                warn!(%service_id, %warning, "service update warning");
            }
        }
        Ok(())
    }
}
