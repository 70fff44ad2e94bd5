//! Typed requests from the CI server.
//!
//! The server names each call (`cd.go.elastic-agent.create-agent`, ...) and
//! sends a JSON body. Only the fleet kinds are handled here; metadata, view
//! and validation calls belong to a different surface.

use std::collections::BTreeMap;

use dockfleet_id::JobId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cluster::{ClusterConfiguration, JobRequirements};
use crate::controller::{FleetController, PingReport};
use crate::error::FleetError;
use crate::instance::InstanceRecord;

const NAME_PREFIX: &str = "cd.go.elastic-agent.";

/// Request kinds this service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    ShouldAssignWork,
    CreateAgent,
    AssignWork,
    JobCompletion,
    ServerPing,
}

impl RequestKind {
    pub const ALL: [RequestKind; 5] = [
        Self::ShouldAssignWork,
        Self::CreateAgent,
        Self::AssignWork,
        Self::JobCompletion,
        Self::ServerPing,
    ];

    /// Resolve a request name as sent by the server.
    pub fn from_name(name: &str) -> Result<Self, FleetError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| FleetError::UnknownRequest(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ShouldAssignWork => "cd.go.elastic-agent.should-assign-work",
            Self::CreateAgent => "cd.go.elastic-agent.create-agent",
            Self::AssignWork => "cd.go.elastic-agent.assign-work",
            Self::JobCompletion => "cd.go.elastic-agent.job-completion",
            Self::ServerPing => "cd.go.elastic-agent.server-ping",
        }
    }

    /// Name without the shared `cd.go.elastic-agent.` prefix.
    pub fn short_name(&self) -> &'static str {
        self.name().trim_start_matches(NAME_PREFIX)
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Body of the job-scoped requests.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    pub cluster_profile_properties: BTreeMap<String, String>,
    #[serde(flatten)]
    pub job: JobRequirements,
}

/// Body of a job-completion notice.
#[derive(Debug, Clone, Deserialize)]
pub struct JobCompletionRequest {
    pub cluster_profile_properties: BTreeMap<String, String>,
    pub job_id: JobId,
}

/// Body of the periodic heartbeat.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerPingRequest {
    #[serde(default)]
    pub all_cluster_profile_properties: Vec<BTreeMap<String, String>>,
}

/// A parsed request, ready to dispatch.
#[derive(Debug, Clone)]
pub enum FleetRequest {
    ShouldAssignWork {
        cluster: ClusterConfiguration,
        job: JobRequirements,
    },
    CreateAgent {
        cluster: ClusterConfiguration,
        job: JobRequirements,
    },
    AssignWork {
        cluster: ClusterConfiguration,
        job: JobRequirements,
    },
    JobCompletion {
        cluster: ClusterConfiguration,
        job_id: JobId,
    },
    ServerPing {
        clusters: Vec<ClusterConfiguration>,
    },
}

impl FleetRequest {
    /// Decode a JSON body for `kind`.
    pub fn parse(kind: RequestKind, body: &[u8]) -> Result<Self, FleetError> {
        let request = match kind {
            RequestKind::ShouldAssignWork => {
                let req: JobRequest = decode(kind, body)?;
                Self::ShouldAssignWork {
                    cluster: req.cluster_profile_properties.into(),
                    job: req.job,
                }
            }
            RequestKind::CreateAgent => {
                let req: JobRequest = decode(kind, body)?;
                Self::CreateAgent {
                    cluster: req.cluster_profile_properties.into(),
                    job: req.job,
                }
            }
            RequestKind::AssignWork => {
                let req: JobRequest = decode(kind, body)?;
                Self::AssignWork {
                    cluster: req.cluster_profile_properties.into(),
                    job: req.job,
                }
            }
            RequestKind::JobCompletion => {
                let req: JobCompletionRequest = decode(kind, body)?;
                Self::JobCompletion {
                    cluster: req.cluster_profile_properties.into(),
                    job_id: req.job_id,
                }
            }
            RequestKind::ServerPing => {
                let req: ServerPingRequest = if body.iter().all(u8::is_ascii_whitespace) {
                    ServerPingRequest::default()
                } else {
                    decode(kind, body)?
                };
                Self::ServerPing {
                    clusters: req
                        .all_cluster_profile_properties
                        .into_iter()
                        .map(ClusterConfiguration::from)
                        .collect(),
                }
            }
        };
        Ok(request)
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Self::ShouldAssignWork { .. } => RequestKind::ShouldAssignWork,
            Self::CreateAgent { .. } => RequestKind::CreateAgent,
            Self::AssignWork { .. } => RequestKind::AssignWork,
            Self::JobCompletion { .. } => RequestKind::JobCompletion,
            Self::ServerPing { .. } => RequestKind::ServerPing,
        }
    }
}

fn decode<'a, T: Deserialize<'a>>(kind: RequestKind, body: &'a [u8]) -> Result<T, FleetError> {
    serde_json::from_slice(body)
        .map_err(|e| FleetError::InvalidRequest(format!("{}: {e}", kind.short_name())))
}

/// Result of a dispatched request.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FleetResponse {
    /// Answer to should-assign-work.
    Admission(bool),
    /// The agent created, reused or assigned.
    Agent(InstanceRecord),
    /// Job completion acknowledged.
    Completed,
    Ping(PingReport),
}

/// Run `request` against the controller.
pub async fn dispatch(
    controller: &FleetController,
    request: FleetRequest,
) -> Result<FleetResponse, FleetError> {
    debug!(kind = %request.kind(), "Dispatching request");
    match request {
        FleetRequest::ShouldAssignWork { cluster, job } => controller
            .should_assign_work(&cluster, &job)
            .await
            .map(FleetResponse::Admission),
        FleetRequest::CreateAgent { cluster, job } => controller
            .create_agent(&cluster, &job)
            .await
            .map(FleetResponse::Agent),
        FleetRequest::AssignWork { cluster, job } => controller
            .assign_work(&cluster, &job)
            .await
            .map(FleetResponse::Agent),
        FleetRequest::JobCompletion { cluster, job_id } => controller
            .job_completed(&cluster, &job_id)
            .await
            .map(|()| FleetResponse::Completed),
        FleetRequest::ServerPing { clusters } => Ok(FleetResponse::Ping(
            controller.ping_all_clusters(&clusters).await,
        )),
    }
}
