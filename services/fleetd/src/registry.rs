//! Per-cluster registry of tracked instances.
//!
//! A registry is plain data. Mutual exclusion comes from the per-cluster
//! lock the controller wraps around it, so every method here is synchronous
//! and a caller holding `&mut FleetRegistry` already has exclusive access to
//! that one cluster and nothing else.

use std::collections::{HashMap, HashSet};

use dockfleet_id::{InstanceId, JobId};
use dockfleet_reconcile::{Admission, ClusterIdentity};

use crate::error::FleetError;
use crate::instance::{InstanceRecord, LifecycleState};

#[derive(Debug, Clone)]
pub struct FleetRegistry {
    cluster: ClusterIdentity,
    records: HashMap<InstanceId, InstanceRecord>,
}

impl FleetRegistry {
    pub fn new(cluster: ClusterIdentity) -> Self {
        Self {
            cluster,
            records: HashMap::new(),
        }
    }

    pub fn cluster(&self) -> &ClusterIdentity {
        &self.cluster
    }

    pub fn get(&self, id: &InstanceId) -> Option<&InstanceRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &InstanceId) -> Option<&mut InstanceRecord> {
        self.records.get_mut(id)
    }

    /// Insert or replace a record, returning the previous one.
    ///
    /// Records belonging to another cluster are rejected.
    pub fn put(&mut self, record: InstanceRecord) -> Result<Option<InstanceRecord>, FleetError> {
        if record.cluster_identity != self.cluster {
            return Err(FleetError::ForeignRecord {
                registry: self.cluster.clone(),
                record: record.cluster_identity,
            });
        }
        Ok(self.records.insert(record.instance_id.clone(), record))
    }

    pub fn remove(&mut self, id: &InstanceId) -> Option<InstanceRecord> {
        self.records.remove(id)
    }

    /// Snapshot of every record, oldest first.
    pub fn all(&self) -> Vec<InstanceRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        records
    }

    pub fn ids(&self) -> HashSet<InstanceId> {
        self.records.keys().cloned().collect()
    }

    /// The instance currently bound to `job`, if any.
    pub fn find_by_job(&self, job: &JobId) -> Option<&InstanceRecord> {
        self.records.values().find(|r| r.is_bound_to(job))
    }

    pub fn find_by_job_mut(&mut self, job: &JobId) -> Option<&mut InstanceRecord> {
        self.records.values_mut().find(|r| r.is_bound_to(job))
    }

    pub fn count_in(&self, state: LifecycleState) -> usize {
        self.records.values().filter(|r| r.state == state).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Counts for admission decisions against `max_instances`.
    pub fn admission(&self, max_instances: u32) -> Admission {
        Admission {
            max_instances,
            active: saturating_u32(self.len()),
            ready: saturating_u32(self.count_in(LifecycleState::Ready)),
        }
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
