//! Reconciliation of a cluster registry against the container runtime.
//!
//! One sweep runs four phases, in order:
//! - list the containers labelled for the cluster
//! - adopt untracked live containers and promote confirmed `Provisioning` records
//! - prune records with no live container and drop exited containers
//! - reap instances idle past their deadline
//!
//! Adopt runs before reap so a container recovered after a restart is
//! represented before it is considered for termination. This is the only
//! place records are added or removed based on runtime truth.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dockfleet_id::InstanceId;
use dockfleet_reconcile::{ReapPolicy, SweepReport, DEFAULT_PROVISIONING_GRACE};
use tracing::{debug, info, warn};

use crate::cluster::ClusterConfiguration;
use crate::error::FleetError;
use crate::instance::{InstanceRecord, LifecycleState};
use crate::registry::FleetRegistry;
use crate::runtime::{ContainerHandle, ContainerRuntime};

/// Synchronizes registries with the runtime.
#[derive(Debug, Clone, Copy)]
pub struct ReconciliationEngine {
    provisioning_grace: Duration,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_PROVISIONING_GRACE)
    }
}

impl ReconciliationEngine {
    pub fn new(provisioning_grace: Duration) -> Self {
        Self { provisioning_grace }
    }

    pub fn provisioning_grace(&self) -> Duration {
        self.provisioning_grace
    }

    /// Run one sweep over `registry`.
    ///
    /// Fails with `RuntimeUnavailable` if the runtime cannot be listed, in
    /// which case the registry is left exactly as it was. Failed
    /// terminations are counted in the report and retried next sweep.
    pub async fn reconcile(
        &self,
        cluster: &ClusterConfiguration,
        registry: &mut FleetRegistry,
        runtime: &dyn ContainerRuntime,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, FleetError> {
        let policy = cluster.reap_policy(self.provisioning_grace)?;
        let identity = cluster.identity();
        debug!(cluster = %identity, tracked = registry.len(), "Starting reconciliation");

        let live = runtime.list_containers(identity).await.map_err(|e| {
            warn!(cluster = %identity, error = %e, "Failed to list containers, registry left stale");
            FleetError::from(e)
        })?;

        let mut report = SweepReport::default();
        let live_ids: HashSet<InstanceId> = live.iter().map(|h| h.id.clone()).collect();
        let mut handles: HashMap<InstanceId, ContainerHandle> = HashMap::new();
        let mut exited = Vec::new();

        for handle in live {
            if handle.status.is_stopped() {
                exited.push(handle);
                continue;
            }
            match registry.get_mut(&handle.id) {
                None => {
                    let record = InstanceRecord::adopted(&handle, identity.clone(), now);
                    info!(
                        cluster = %identity,
                        instance_id = %record.instance_id,
                        state = %record.state,
                        "Adopted untracked container"
                    );
                    registry.put(record)?;
                    report.adopted += 1;
                }
                Some(record) if record.state == LifecycleState::Provisioning => {
                    if handle.status.is_running() {
                        record.mark_ready();
                        debug!(instance_id = %record.instance_id, "Instance ready");
                        report.promoted += 1;
                    } else if policy.is_provisioning_overdue(record.created_at, now) {
                        warn!(instance_id = %record.instance_id, "Container never started, dropping");
                        exited.push(handle);
                        continue;
                    }
                }
                Some(_) => {}
            }
            handles.insert(handle.id.clone(), handle);
        }

        self.prune(registry, &live_ids, &policy, now, &mut report);

        for handle in exited {
            match runtime.terminate_container(&handle).await {
                Ok(()) => {
                    if registry.remove(&handle.id).is_some() {
                        info!(instance_id = %handle.id, "Removed exited instance");
                    }
                    report.terminated += 1;
                }
                Err(e) => {
                    warn!(instance_id = %handle.id, error = %e, "Failed to remove exited container");
                    report.failed_terminations += 1;
                }
            }
        }

        self.reap(registry, runtime, &handles, &policy, now, &mut report)
            .await;

        if !report.is_noop() {
            info!(
                cluster = %identity,
                adopted = report.adopted,
                promoted = report.promoted,
                pruned = report.pruned,
                idled = report.idled,
                terminated = report.terminated,
                failed_terminations = report.failed_terminations,
                "Reconciliation complete"
            );
        }
        Ok(report)
    }

    /// Drop records whose container is gone. In-flight creates get a grace
    /// period before their record is given up on.
    fn prune(
        &self,
        registry: &mut FleetRegistry,
        live_ids: &HashSet<InstanceId>,
        policy: &ReapPolicy,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        for id in registry.ids() {
            if live_ids.contains(&id) {
                continue;
            }
            let Some(record) = registry.get(&id) else {
                continue;
            };
            if record.state == LifecycleState::Provisioning
                && !policy.is_provisioning_overdue(record.created_at, now)
            {
                continue;
            }
            if let Some(record) = registry.remove(&id) {
                info!(
                    instance_id = %id,
                    state = %record.state,
                    job_id = ?record.current_job_id.as_ref().map(|j| j.as_str()),
                    "Pruned instance with no live container"
                );
                report.pruned += 1;
            }
        }
    }

    async fn reap(
        &self,
        registry: &mut FleetRegistry,
        runtime: &dyn ContainerRuntime,
        handles: &HashMap<InstanceId, ContainerHandle>,
        policy: &ReapPolicy,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        for snapshot in registry.all() {
            let id = &snapshot.instance_id;
            let expired = policy.is_idle_expired(snapshot.last_activity_at, now);
            let due = match snapshot.state {
                LifecycleState::Ready if expired => {
                    if let Some(record) = registry.get_mut(id) {
                        record.mark_idle();
                    }
                    report.idled += 1;
                    true
                }
                LifecycleState::Idle => expired,
                LifecycleState::Terminating => true,
                _ => false,
            };
            if !due {
                continue;
            }

            if let Some(record) = registry.get_mut(id) {
                record.mark_terminating();
            }
            let Some(handle) = handles.get(id) else {
                registry.remove(id);
                continue;
            };

            match runtime.terminate_container(handle).await {
                Ok(()) => {
                    registry.remove(id);
                    info!(
                        instance_id = %id,
                        idle_since = %snapshot.last_activity_at,
                        "Terminated idle instance"
                    );
                    report.terminated += 1;
                }
                Err(e) => {
                    warn!(instance_id = %id, error = %e, "Termination failed, will retry");
                    report.failed_terminations += 1;
                }
            }
        }
    }
}
