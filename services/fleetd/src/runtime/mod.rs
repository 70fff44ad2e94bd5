//! Container runtime interface.
//!
//! The fleet engine never talks to a container engine directly. It goes
//! through [`ContainerRuntime`], which exposes the three calls the engine
//! needs:
//! - list the containers labelled for a cluster
//! - create (and start) one container from a spec
//! - terminate a container, idempotently
//!
//! Implementations:
//! - [`DockerRuntime`]: Docker Engine API over a unix socket or TCP
//! - [`MockRuntime`]: in-memory, for tests and local development

mod docker;
mod mock;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dockfleet_id::{AgentId, InstanceId, JobId};
use dockfleet_reconcile::ClusterIdentity;
use thiserror::Error;

use crate::cluster::{ClusterConfiguration, JobRequirements};
use crate::error::FleetError;

pub use docker::{DockerConnector, DockerEndpoint, DockerRuntime};
pub use mock::MockRuntime;

/// Label carrying the owning cluster's identity.
pub const CLUSTER_LABEL: &str = "dockfleet.cluster";

/// Label carrying the agent ID the container was created as.
pub const AGENT_LABEL: &str = "dockfleet.agent-id";

/// Label carrying the job a container was created for.
pub const JOB_LABEL: &str = "dockfleet.job-id";

/// Errors from a container runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Could not reach the runtime at all.
    #[error("{0}")]
    Unavailable(String),

    /// The runtime answered and refused.
    #[error("{0}")]
    Rejected(String),
}

/// Coarse container status as far as the fleet engine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerStatus {
    /// Created or restarting, not running yet.
    Starting,
    Running,
    /// Exited, dead or being removed.
    Stopped,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// A container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: InstanceId,
    pub name: String,
    pub status: ContainerStatus,
    pub created_at: DateTime<Utc>,
    pub labels: BTreeMap<String, String>,
}

impl ContainerHandle {
    /// Job this container was created for, read from its labels.
    pub fn job_id(&self) -> Option<JobId> {
        self.labels
            .get(JOB_LABEL)
            .and_then(|raw| JobId::parse(raw).ok())
    }

    pub fn cluster(&self) -> Option<&str> {
        self.labels.get(CLUSTER_LABEL).map(String::as_str)
    }
}

/// Everything needed to start one agent container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: AgentId,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub labels: BTreeMap<String, String>,
    pub pull_image: bool,
}

impl ContainerSpec {
    /// Spec for a new agent in `cluster`, created on behalf of `job`.
    pub fn for_agent(
        cluster: &ClusterConfiguration,
        job: &JobRequirements,
        name: AgentId,
    ) -> Result<Self, FleetError> {
        let mut labels = BTreeMap::new();
        labels.insert(CLUSTER_LABEL.to_string(), cluster.identity().to_string());
        labels.insert(AGENT_LABEL.to_string(), name.to_string());
        if let Some(job_id) = &job.job_id {
            labels.insert(JOB_LABEL.to_string(), job_id.to_string());
        }

        let mut env = cluster.environment();
        env.push((
            "GO_EA_AUTO_REGISTER_ELASTIC_AGENT_ID".to_string(),
            name.to_string(),
        ));
        if let Some(url) = cluster.go_server_url() {
            env.push(("GO_EA_SERVER_URL".to_string(), url.to_string()));
        }
        if let Some(environment) = &job.environment {
            env.push((
                "GO_EA_AUTO_REGISTER_ENVIRONMENT".to_string(),
                environment.clone(),
            ));
        }

        Ok(Self {
            name,
            image: cluster.image()?.to_string(),
            env,
            labels,
            pull_image: cluster.pull_on_create(),
        })
    }
}

/// Container runtime interface.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// All containers, in any status, labelled as belonging to `cluster`.
    async fn list_containers(
        &self,
        cluster: &ClusterIdentity,
    ) -> Result<Vec<ContainerHandle>, RuntimeError>;

    /// Create and start a container.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError>;

    /// Stop and remove a container. Terminating a container that is already
    /// gone succeeds.
    async fn terminate_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;
}

/// Resolves the runtime serving a cluster configuration.
pub trait RuntimeConnector: Send + Sync {
    fn connect(&self, cluster: &ClusterConfiguration)
        -> Result<Arc<dyn ContainerRuntime>, FleetError>;
}

/// Connector that hands every cluster the same runtime.
#[derive(Clone)]
pub struct StaticConnector(Arc<dyn ContainerRuntime>);

impl StaticConnector {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self(runtime)
    }
}

impl RuntimeConnector for StaticConnector {
    fn connect(
        &self,
        _cluster: &ClusterConfiguration,
    ) -> Result<Arc<dyn ContainerRuntime>, FleetError> {
        Ok(Arc::clone(&self.0))
    }
}
