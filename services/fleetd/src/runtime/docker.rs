//! Docker Engine API runtime.
//!
//! Talks to the engine over its unix socket (hyperlocal) or plain TCP.
//! Only the handful of endpoints the fleet engine needs are wrapped:
//!
//! - `GET  /containers/json` filtered by the cluster label
//! - `POST /images/create` when the cluster asks for a pull
//! - `POST /containers/create` then `POST /containers/{id}/start`
//! - `POST /containers/{id}/stop` then `DELETE /containers/{id}`
//!
//! Reference: https://docs.docker.com/engine/api/v1.41/

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dockfleet_id::InstanceId;
use dockfleet_reconcile::ClusterIdentity;
use hyper::{client::HttpConnector, Body, Client, Method, Request, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ContainerStatus, RuntimeConnector,
    RuntimeError, CLUSTER_LABEL,
};
use crate::cluster::ClusterConfiguration;
use crate::error::FleetError;

const API_VERSION: &str = "v1.41";

/// Seconds Docker waits for a graceful stop before killing the agent.
const STOP_TIMEOUT_SECS: u32 = 10;

/// Where a Docker engine listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DockerEndpoint {
    /// Path to the engine's unix socket.
    Unix(String),
    /// Base URL such as `http://10.0.0.5:2375`.
    Http(String),
}

impl DockerEndpoint {
    /// Parse a `docker_uri` setting.
    ///
    /// Accepts `unix:///path`, `tcp://host:port` and `http://host:port`.
    pub fn parse(uri: &str) -> Result<Self, FleetError> {
        let uri = uri.trim();
        if let Some(path) = uri.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(FleetError::InvalidSettings(
                    "docker_uri has an empty socket path".to_string(),
                ));
            }
            return Ok(Self::Unix(path.to_string()));
        }

        let host = uri
            .strip_prefix("tcp://")
            .or_else(|| uri.strip_prefix("http://"))
            .map(|rest| rest.trim_end_matches('/'))
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| {
                FleetError::InvalidSettings(format!(
                    "unsupported docker_uri '{uri}': expected unix://, tcp:// or http://"
                ))
            })?;
        Ok(Self::Http(format!("http://{host}")))
    }
}

impl std::fmt::Display for DockerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{path}"),
            Self::Http(base) => f.write_str(base),
        }
    }
}

enum Transport {
    Unix(Client<UnixConnector>),
    Http(Client<HttpConnector>),
}

/// Docker Engine API client.
pub struct DockerRuntime {
    endpoint: DockerEndpoint,
    transport: Transport,
}

impl DockerRuntime {
    pub fn new(endpoint: DockerEndpoint) -> Self {
        let transport = match &endpoint {
            DockerEndpoint::Unix(_) => Transport::Unix(Client::unix()),
            DockerEndpoint::Http(_) => Transport::Http(Client::new()),
        };
        Self {
            endpoint,
            transport,
        }
    }

    pub fn endpoint(&self) -> &DockerEndpoint {
        &self.endpoint
    }

    fn uri(&self, path_and_query: &str) -> Result<hyper::Uri, RuntimeError> {
        let full = format!("/{API_VERSION}{path_and_query}");
        match &self.endpoint {
            DockerEndpoint::Unix(socket) => Ok(hyperlocal::Uri::new(socket, &full).into()),
            DockerEndpoint::Http(base) => format!("{base}{full}")
                .parse()
                .map_err(|e| RuntimeError::Rejected(format!("invalid request URI: {e}"))),
        }
    }

    /// Send one request and collect the full response body.
    async fn send<T: Serialize>(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<&T>,
    ) -> Result<(StatusCode, Vec<u8>), RuntimeError> {
        let uri = self.uri(path_and_query)?;
        debug!(method = %method, path = path_and_query, endpoint = %self.endpoint, "Docker API request");

        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Accept", "application/json");
        let body = match body {
            Some(body) => {
                builder = builder.header("Content-Type", "application/json");
                let bytes = serde_json::to_vec(body)
                    .map_err(|e| RuntimeError::Rejected(format!("cannot encode request: {e}")))?;
                Body::from(bytes)
            }
            None => Body::empty(),
        };
        let request = builder
            .body(body)
            .map_err(|e| RuntimeError::Rejected(format!("cannot build request: {e}")))?;

        let response = match &self.transport {
            Transport::Unix(client) => client.request(request).await,
            Transport::Http(client) => client.request(request).await,
        }
        .map_err(|e| RuntimeError::Unavailable(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("{}: {e}", self.endpoint)))?;
        Ok((status, bytes.to_vec()))
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        info!(image = %image, endpoint = %self.endpoint, "Pulling image");
        let path = format!("/images/create?fromImage={}", urlencoding::encode(image));
        let (status, body) = self.send::<()>(Method::POST, &path, None).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(rejected(status, &body))
        }
    }

    async fn remove(&self, id: &InstanceId) -> Result<(), RuntimeError> {
        let path = format!(
            "/containers/{}?force=true&v=true",
            urlencoding::encode(id.as_str())
        );
        let (status, body) = self.send::<()>(Method::DELETE, &path, None).await?;
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(rejected(status, &body)),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(
        &self,
        cluster: &ClusterIdentity,
    ) -> Result<Vec<ContainerHandle>, RuntimeError> {
        let filters = serde_json::json!({ "label": [format!("{CLUSTER_LABEL}={cluster}")] });
        let path = format!(
            "/containers/json?all=true&filters={}",
            urlencoding::encode(&filters.to_string())
        );

        let (status, body) = self.send::<()>(Method::GET, &path, None).await?;
        if !status.is_success() {
            return Err(rejected(status, &body));
        }

        let summaries: Vec<ContainerSummary> = serde_json::from_slice(&body)
            .map_err(|e| RuntimeError::Rejected(format!("unexpected container list: {e}")))?;

        let mut handles = Vec::with_capacity(summaries.len());
        for summary in summaries {
            match summary.into_handle() {
                Some(handle) => handles.push(handle),
                None => warn!(endpoint = %self.endpoint, "Skipping container with empty ID"),
            }
        }
        Ok(handles)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        if spec.pull_image {
            self.pull_image(&spec.image).await?;
        }

        let request = CreateContainerBody {
            image: &spec.image,
            env: spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
            labels: &spec.labels,
            host_config: HostConfig {
                restart_policy: RestartPolicy { name: "no" },
            },
        };
        let path = format!(
            "/containers/create?name={}",
            urlencoding::encode(&spec.name.to_string())
        );
        let (status, body) = self.send(Method::POST, &path, Some(&request)).await?;
        if !status.is_success() {
            return Err(rejected(status, &body));
        }

        let created: CreateContainerResponse = serde_json::from_slice(&body)
            .map_err(|e| RuntimeError::Rejected(format!("unexpected create response: {e}")))?;
        for warning in created.warnings.iter().flatten() {
            warn!(agent_id = %spec.name, warning = %warning, "Docker create warning");
        }
        let id = InstanceId::parse(&created.id)
            .map_err(|e| RuntimeError::Rejected(format!("runtime returned bad ID: {e}")))?;

        let start_path = format!("/containers/{}/start", urlencoding::encode(id.as_str()));
        let (status, body) = self.send::<()>(Method::POST, &start_path, None).await?;
        if !status.is_success() && status != StatusCode::NOT_MODIFIED {
            let err = rejected(status, &body);
            if let Err(cleanup) = self.remove(&id).await {
                warn!(instance_id = %id, error = %cleanup, "Failed to remove container that did not start");
            }
            return Err(err);
        }

        info!(instance_id = %id, agent_id = %spec.name, image = %spec.image, "Container started");
        Ok(ContainerHandle {
            id,
            name: spec.name.to_string(),
            status: ContainerStatus::Running,
            created_at: Utc::now(),
            labels: spec.labels.clone(),
        })
    }

    async fn terminate_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let path = format!(
            "/containers/{}/stop?t={STOP_TIMEOUT_SECS}",
            urlencoding::encode(handle.id.as_str())
        );
        let (status, body) = self.send::<()>(Method::POST, &path, None).await?;
        match status {
            StatusCode::NOT_FOUND => return Ok(()),
            s if s.is_success() || s == StatusCode::NOT_MODIFIED => {}
            _ => return Err(rejected(status, &body)),
        }

        self.remove(&handle.id).await?;
        info!(instance_id = %handle.id, name = %handle.name, "Container terminated");
        Ok(())
    }
}

/// Caches one client per Docker endpoint.
#[derive(Default)]
pub struct DockerConnector {
    runtimes: Mutex<HashMap<DockerEndpoint, Arc<DockerRuntime>>>,
}

impl DockerConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RuntimeConnector for DockerConnector {
    fn connect(
        &self,
        cluster: &ClusterConfiguration,
    ) -> Result<Arc<dyn ContainerRuntime>, FleetError> {
        let endpoint = DockerEndpoint::parse(cluster.docker_uri())?;
        let mut runtimes = self.runtimes.lock().unwrap_or_else(|e| e.into_inner());
        let runtime = runtimes
            .entry(endpoint.clone())
            .or_insert_with(|| {
                debug!(endpoint = %endpoint, "Creating Docker client");
                Arc::new(DockerRuntime::new(endpoint))
            })
            .clone();
        Ok(runtime)
    }
}

#[derive(Debug, Deserialize)]
struct ContainerSummary {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "Created", default)]
    created: i64,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
}

impl ContainerSummary {
    fn into_handle(self) -> Option<ContainerHandle> {
        let id = InstanceId::parse(&self.id).ok()?;
        let name = self
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| id.to_string());
        Some(ContainerHandle {
            id,
            name,
            status: status_from_state(&self.state),
            created_at: DateTime::<Utc>::from_timestamp(self.created, 0).unwrap_or_default(),
            labels: self.labels.unwrap_or_default(),
        })
    }
}

fn status_from_state(state: &str) -> ContainerStatus {
    match state {
        "running" | "paused" => ContainerStatus::Running,
        "created" | "restarting" => ContainerStatus::Starting,
        _ => ContainerStatus::Stopped,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateContainerBody<'a> {
    image: &'a str,
    env: Vec<String>,
    labels: &'a BTreeMap<String, String>,
    host_config: HostConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig {
    restart_policy: RestartPolicy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RestartPolicy {
    name: &'static str,
}

#[derive(Debug, Deserialize)]
struct CreateContainerResponse {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Warnings", default)]
    warnings: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct DockerMessage {
    message: String,
}

fn rejected(status: StatusCode, body: &[u8]) -> RuntimeError {
    let message = serde_json::from_slice::<DockerMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
    RuntimeError::Rejected(format!("docker API {}: {message}", status.as_u16()))
}
