//! In-memory runtime for tests and development.
//!
//! Containers live in a map keyed by ID. Helpers let tests play the part of
//! the outside world: containers created or deleted behind the engine's back,
//! containers that crash, an engine that goes away.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dockfleet_id::{InstanceId, JobId};
use dockfleet_reconcile::ClusterIdentity;
use tracing::{debug, info};

use super::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ContainerStatus, RuntimeError,
    AGENT_LABEL, CLUSTER_LABEL, JOB_LABEL,
};
use crate::clock::{Clock, SystemClock};

/// Mock runtime for testing and development.
pub struct MockRuntime {
    containers: Mutex<HashMap<InstanceId, ContainerHandle>>,

    /// Counter for generating container IDs.
    id_counter: AtomicU64,

    create_calls: AtomicU64,
    terminate_calls: AtomicU64,
    list_calls: AtomicU64,

    unavailable: AtomicBool,
    reject_creates: AtomicBool,
    reject_terminates: AtomicBool,

    /// Created containers are accepted but do not show up in listings.
    hide_created: AtomicBool,

    clock: Arc<dyn Clock>,
}

impl MockRuntime {
    /// Create a new mock runtime.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a mock runtime that stamps containers using `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            id_counter: AtomicU64::new(0),
            create_calls: AtomicU64::new(0),
            terminate_calls: AtomicU64::new(0),
            list_calls: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
            reject_creates: AtomicBool::new(false),
            reject_terminates: AtomicBool::new(false),
            hide_created: AtomicBool::new(false),
            clock,
        }
    }

    /// Create a mock runtime that rejects every create.
    pub fn failing() -> Self {
        let runtime = Self::new();
        runtime.set_reject_creates(true);
        runtime
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_reject_creates(&self, reject: bool) {
        self.reject_creates.store(reject, Ordering::SeqCst);
    }

    pub fn set_reject_terminates(&self, reject: bool) {
        self.reject_terminates.store(reject, Ordering::SeqCst);
    }

    pub fn set_hide_created(&self, hide: bool) {
        self.hide_created.store(hide, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn terminate_calls(&self) -> u64 {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Simulate a container started outside the fleet engine.
    pub fn inject_container(&self, cluster: &ClusterIdentity, job: Option<&JobId>) -> InstanceId {
        let mut labels = BTreeMap::new();
        labels.insert(CLUSTER_LABEL.to_string(), cluster.to_string());
        if let Some(job) = job {
            labels.insert(JOB_LABEL.to_string(), job.to_string());
        }
        let id = self.next_id();
        let handle = ContainerHandle {
            id: id.clone(),
            name: format!("external-{id}"),
            status: ContainerStatus::Running,
            created_at: self.clock.now(),
            labels,
        };
        self.lock().insert(id.clone(), handle);
        id
    }

    /// Simulate an out-of-band deletion.
    pub fn remove_container(&self, id: &InstanceId) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Simulate a container process exiting.
    pub fn stop_container(&self, id: &InstanceId) -> bool {
        match self.lock().get_mut(id) {
            Some(handle) => {
                handle.status = ContainerStatus::Stopped;
                true
            }
            None => false,
        }
    }

    /// Make previously hidden containers visible.
    pub fn reveal(&self, handle: ContainerHandle) {
        self.lock().insert(handle.id.clone(), handle);
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn container_count(&self) -> usize {
        self.lock().len()
    }

    fn next_id(&self) -> InstanceId {
        let counter = self.id_counter.fetch_add(1, Ordering::SeqCst);
        InstanceId::parse(&format!("mock{counter:012x}")).expect("generated IDs are non-empty")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<InstanceId, ContainerHandle>> {
        self.containers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<(), RuntimeError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable(
                "mock runtime configured as unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(
        &self,
        cluster: &ClusterIdentity,
    ) -> Result<Vec<ContainerHandle>, RuntimeError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut handles: Vec<_> = self
            .lock()
            .values()
            .filter(|h| h.cluster() == Some(cluster.as_str()))
            .cloned()
            .collect();
        handles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(handles)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.reject_creates.load(Ordering::SeqCst) {
            return Err(RuntimeError::Rejected(format!(
                "mock runtime refused to create {}",
                spec.name
            )));
        }

        let id = self.next_id();
        info!(
            instance_id = %id,
            agent_id = %spec.name,
            image = %spec.image,
            "[MOCK] Creating container"
        );

        let mut labels = spec.labels.clone();
        labels
            .entry(AGENT_LABEL.to_string())
            .or_insert_with(|| spec.name.to_string());
        let handle = ContainerHandle {
            id: id.clone(),
            name: spec.name.to_string(),
            status: ContainerStatus::Running,
            created_at: self.clock.now(),
            labels,
        };

        if !self.hide_created.load(Ordering::SeqCst) {
            self.lock().insert(id, handle.clone());
        }
        Ok(handle)
    }

    async fn terminate_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.reject_terminates.load(Ordering::SeqCst) {
            return Err(RuntimeError::Rejected(format!(
                "mock runtime refused to terminate {}",
                handle.id
            )));
        }

        let existed = self.lock().remove(&handle.id).is_some();
        debug!(instance_id = %handle.id, existed, "[MOCK] Container terminated");
        Ok(())
    }
}
