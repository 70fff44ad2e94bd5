//! Fleet controller: owns every cluster's registry.
//!
//! ## Locking
//!
//! Registries live in per-cluster slots. The outer map sits behind an
//! `RwLock` that is only held long enough to find or insert a slot, never
//! across a runtime call. Each slot guards its registry with its own
//! `tokio::sync::Mutex`, and every operation holds that lock from its
//! reconcile through its decision and action. A slow runtime for one
//! cluster therefore never stalls requests for another.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dockfleet_id::{AgentId, JobId};
use dockfleet_reconcile::{ClusterIdentity, SweepReport};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::capacity::{CapacityDecider, CreatePlan};
use crate::clock::Clock;
use crate::cluster::{ClusterConfiguration, JobRequirements};
use crate::error::FleetError;
use crate::instance::{InstanceRecord, LifecycleState};
use crate::reconciler::ReconciliationEngine;
use crate::registry::FleetRegistry;
use crate::runtime::{ContainerRuntime, ContainerSpec, RuntimeConnector};

struct ClusterSlot {
    config: ClusterConfiguration,
    state: Mutex<SlotState>,
}

struct SlotState {
    registry: FleetRegistry,
    last_reconciled_at: Option<DateTime<Utc>>,
    last_report: Option<SweepReport>,
    last_error: Option<String>,
}

impl ClusterSlot {
    fn new(config: ClusterConfiguration) -> Self {
        let registry = FleetRegistry::new(config.identity().clone());
        Self {
            config,
            state: Mutex::new(SlotState {
                registry,
                last_reconciled_at: None,
                last_report: None,
                last_error: None,
            }),
        }
    }
}

/// Read-only view of one cluster.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub identity: ClusterIdentity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<u32>,
    pub by_state: BTreeMap<&'static str, usize>,
    /// Whether a job could be taken now, by a Ready instance or a new one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepting: Option<bool>,
    /// Instances that may still be created before the maximum.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headroom: Option<u32>,
    pub instances: Vec<InstanceRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reconciled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<SweepReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// One cluster that failed during a ping.
#[derive(Debug, Clone, Serialize)]
pub struct PingFailure {
    pub cluster: ClusterIdentity,
    pub code: &'static str,
    pub message: String,
}

/// Outcome of a full-fleet sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PingReport {
    pub reconciled: usize,
    pub totals: SweepReport,
    pub failures: Vec<PingFailure>,
}

/// Owns the per-cluster registries and runs every fleet operation.
pub struct FleetController {
    clusters: RwLock<HashMap<ClusterIdentity, Arc<ClusterSlot>>>,
    connector: Arc<dyn RuntimeConnector>,
    clock: Arc<dyn Clock>,
    engine: ReconciliationEngine,
}

impl FleetController {
    pub fn new(
        connector: Arc<dyn RuntimeConnector>,
        clock: Arc<dyn Clock>,
        engine: ReconciliationEngine,
    ) -> Self {
        Self {
            clusters: RwLock::new(HashMap::new()),
            connector,
            clock,
            engine,
        }
    }

    /// Admission check: is there a Ready instance to take this job?
    ///
    /// Answers false while the only option would be creating a new
    /// instance; the server then asks for one with `create_agent`.
    pub async fn should_assign_work(
        &self,
        cluster: &ClusterConfiguration,
        job: &JobRequirements,
    ) -> Result<bool, FleetError> {
        let slot = self.slot(cluster).await;
        let mut state = slot.state.lock().await;
        let runtime = self.connector.connect(cluster)?;
        self.reconcile_locked(cluster, &mut state, runtime.as_ref()).await?;

        let admission = CapacityDecider::admission(cluster, &state.registry)?;
        let answer = CapacityDecider::has_ready(&state.registry);
        debug!(
            cluster = %cluster.identity(),
            job_id = ?job.job_id.as_ref().map(JobId::as_str),
            ready = admission.ready,
            active = admission.active,
            max = admission.max_instances,
            headroom = admission.headroom(),
            answer,
            "Admission check"
        );
        Ok(answer)
    }

    /// Create an agent for a job, or return the one already answering it.
    pub async fn create_agent(
        &self,
        cluster: &ClusterConfiguration,
        job: &JobRequirements,
    ) -> Result<InstanceRecord, FleetError> {
        let slot = self.slot(cluster).await;
        let mut state = slot.state.lock().await;
        let runtime = self.connector.connect(cluster)?;
        self.reconcile_locked(cluster, &mut state, runtime.as_ref()).await?;

        let identity = cluster.identity();
        match CapacityDecider::plan_create(cluster, &state.registry, job)? {
            CreatePlan::Existing(id) => {
                let record = state.registry.get(&id).cloned().ok_or_else(|| {
                    FleetError::NotFound(format!("instance {id} vanished during create"))
                })?;
                info!(
                    cluster = %identity,
                    instance_id = %record.instance_id,
                    state = %record.state,
                    "Reusing existing instance for create request"
                );
                Ok(record)
            }
            CreatePlan::AtCapacity => {
                let max = cluster.max_instances()?;
                warn!(cluster = %identity, max, "Cluster at capacity, refusing create");
                Err(FleetError::CapacityExceeded {
                    cluster: identity.clone(),
                    max,
                })
            }
            CreatePlan::Create => {
                let spec = ContainerSpec::for_agent(cluster, job, AgentId::new())?;
                let handle = runtime.create_container(&spec).await.map_err(|e| {
                    warn!(cluster = %identity, agent_id = %spec.name, error = %e, "Create failed");
                    FleetError::from(e)
                })?;
                let record = InstanceRecord::provisioning(
                    &handle,
                    identity.clone(),
                    job.job_id.clone(),
                    self.clock.now(),
                );
                state.registry.put(record.clone())?;
                info!(
                    cluster = %identity,
                    instance_id = %record.instance_id,
                    agent_id = %record.name,
                    job_id = ?job.job_id.as_ref().map(JobId::as_str),
                    "Created agent"
                );
                Ok(record)
            }
        }
    }

    /// Bind a job to a Ready instance.
    pub async fn assign_work(
        &self,
        cluster: &ClusterConfiguration,
        job: &JobRequirements,
    ) -> Result<InstanceRecord, FleetError> {
        let job_id = job
            .job_id
            .as_ref()
            .ok_or_else(|| FleetError::InvalidRequest("assign-work needs a job_id".to_string()))?;

        let slot = self.slot(cluster).await;
        let mut state = slot.state.lock().await;
        let runtime = self.connector.connect(cluster)?;
        self.reconcile_locked(cluster, &mut state, runtime.as_ref()).await?;

        if let Some(bound) = state.registry.find_by_job(job_id) {
            return Ok(bound.clone());
        }

        let Some(id) = CapacityDecider::pick_ready(&state.registry, Some(job_id)) else {
            return Err(FleetError::CapacityExceeded {
                cluster: cluster.identity().clone(),
                max: cluster.max_instances()?,
            });
        };

        let now = self.clock.now();
        let record = state
            .registry
            .get_mut(&id)
            .ok_or_else(|| FleetError::NotFound(format!("instance {id}")))?;
        record.assign(job_id.clone(), now);
        info!(instance_id = %id, job_id = %job_id, "Assigned job");
        Ok(record.clone())
    }

    /// Release the instance bound to `job_id`.
    ///
    /// Duplicate or late notices are no-ops. A failed reconcile does not
    /// block the release; the registry is used as it stands.
    pub async fn job_completed(
        &self,
        cluster: &ClusterConfiguration,
        job_id: &JobId,
    ) -> Result<(), FleetError> {
        let slot = self.slot(cluster).await;
        let mut state = slot.state.lock().await;

        match self.connector.connect(cluster) {
            Ok(runtime) => {
                if let Err(e) = self.reconcile_locked(cluster, &mut state, runtime.as_ref()).await {
                    warn!(cluster = %cluster.identity(), error = %e, "Reconcile failed, completing against stale registry");
                }
            }
            Err(e) => warn!(cluster = %cluster.identity(), error = %e, "No runtime for cluster"),
        }

        match complete_bound_job(&mut state.registry, job_id, self.clock.now()) {
            Ok(record) => {
                info!(instance_id = %record.instance_id, job_id = %job_id, "Job completed, instance idle");
                Ok(())
            }
            Err(FleetError::NotFound(what)) => {
                debug!(job_id = %job_id, what = %what, "Completion for unbound job ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Reconcile the given clusters plus every cluster already known.
    ///
    /// Clusters run concurrently and independently; a failure is recorded
    /// in the report and never stops the others.
    pub async fn ping_all_clusters(&self, clusters: &[ClusterConfiguration]) -> PingReport {
        for cluster in clusters {
            self.slot(cluster).await;
        }
        let slots: Vec<_> = self.clusters.read().await.values().cloned().collect();

        let sweeps = slots.iter().map(|slot| async move {
            let mut state = slot.state.lock().await;
            let result = match self.connector.connect(&slot.config) {
                Ok(runtime) => {
                    self.reconcile_locked(&slot.config, &mut state, runtime.as_ref())
                        .await
                }
                Err(e) => Err(e),
            };
            (slot.config.identity().clone(), result)
        });

        let mut report = PingReport::default();
        for (cluster, result) in join_all(sweeps).await {
            match result {
                Ok(sweep) => {
                    report.reconciled += 1;
                    report.totals.merge(&sweep);
                }
                Err(e) => {
                    warn!(cluster = %cluster, error = %e, "Cluster reconcile failed during ping");
                    report.failures.push(PingFailure {
                        cluster,
                        code: e.code(),
                        message: e.to_string(),
                    });
                }
            }
        }
        info!(
            reconciled = report.reconciled,
            failed = report.failures.len(),
            terminated = report.totals.terminated,
            "Server ping sweep finished"
        );
        report
    }

    /// Snapshot of one known cluster.
    pub async fn cluster_status(&self, identity: &ClusterIdentity) -> Option<ClusterStatus> {
        let slot = self.clusters.read().await.get(identity).cloned()?;
        Some(snapshot(&slot).await)
    }

    /// Snapshot of every known cluster, ordered by identity.
    pub async fn fleet_status(&self) -> Vec<ClusterStatus> {
        let mut slots: Vec<_> = self.clusters.read().await.values().cloned().collect();
        slots.sort_by(|a, b| a.config.identity().cmp(b.config.identity()));

        let mut statuses = Vec::with_capacity(slots.len());
        for slot in &slots {
            statuses.push(snapshot(slot).await);
        }
        statuses
    }

    pub async fn cluster_count(&self) -> usize {
        self.clusters.read().await.len()
    }

    async fn slot(&self, cluster: &ClusterConfiguration) -> Arc<ClusterSlot> {
        let identity = cluster.identity();
        if let Some(slot) = self.clusters.read().await.get(identity) {
            return Arc::clone(slot);
        }
        let mut clusters = self.clusters.write().await;
        Arc::clone(clusters.entry(identity.clone()).or_insert_with(|| {
            info!(cluster = %identity, "Tracking new cluster");
            Arc::new(ClusterSlot::new(cluster.clone()))
        }))
    }

    async fn reconcile_locked(
        &self,
        cluster: &ClusterConfiguration,
        state: &mut SlotState,
        runtime: &dyn ContainerRuntime,
    ) -> Result<SweepReport, FleetError> {
        let now = self.clock.now();
        let result = self
            .engine
            .reconcile(cluster, &mut state.registry, runtime, now)
            .await;
        match &result {
            Ok(report) => {
                state.last_reconciled_at = Some(now);
                state.last_report = Some(*report);
                state.last_error = None;
            }
            Err(e) => state.last_error = Some(e.to_string()),
        }
        result
    }
}

fn complete_bound_job(
    registry: &mut FleetRegistry,
    job_id: &JobId,
    now: DateTime<Utc>,
) -> Result<InstanceRecord, FleetError> {
    let record = registry
        .find_by_job_mut(job_id)
        .ok_or_else(|| FleetError::NotFound(format!("no instance bound to job {job_id}")))?;
    if !record.complete_job(now) {
        return Err(FleetError::NotFound(format!(
            "instance {} is {} and not running job {job_id}",
            record.instance_id, record.state
        )));
    }
    Ok(record.clone())
}

async fn snapshot(slot: &ClusterSlot) -> ClusterStatus {
    let state = slot.state.lock().await;
    let instances = state.registry.all();
    let mut by_state = BTreeMap::new();
    for record in &instances {
        *by_state.entry(record.state.as_str()).or_insert(0) += 1;
    }
    let admission = CapacityDecider::admission(&slot.config, &state.registry).ok();
    ClusterStatus {
        identity: slot.config.identity().clone(),
        max_instances: admission.map(|a| a.max_instances),
        by_state,
        accepting: CapacityDecider::can_assign(
            &slot.config,
            &state.registry,
            &JobRequirements::default(),
        )
        .ok(),
        headroom: admission.map(|a| a.headroom()),
        instances,
        last_reconciled_at: state.last_reconciled_at,
        last_report: state.last_report,
        last_error: state.last_error.clone(),
    }
}

impl std::fmt::Debug for FleetController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetController")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
