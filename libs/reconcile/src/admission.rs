//! Admission arithmetic over instance counts.

use serde::Serialize;

/// What a cluster can do for the next job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionDecision {
    /// A ready instance exists and can take the job.
    Reuse,

    /// No ready instance, but there is room to create one.
    Create,

    /// No ready instance and the cluster is at its maximum.
    AtCapacity,
}

impl AdmissionDecision {
    /// Whether the job can be accepted now, either way.
    pub fn accepts(&self) -> bool {
        !matches!(self, Self::AtCapacity)
    }
}

/// Counts observed in one cluster's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Admission {
    /// Configured maximum number of instances.
    pub max_instances: u32,

    /// Instances that are not gone, in any state.
    pub active: u32,

    /// Instances that are ready and unbound.
    pub ready: u32,
}

impl Admission {
    /// Decide for the next job.
    ///
    /// Ready instances are fungible within a cluster, so any one of them
    /// satisfies any job.
    pub fn decide(&self) -> AdmissionDecision {
        if self.ready > 0 {
            AdmissionDecision::Reuse
        } else if self.active < self.max_instances {
            AdmissionDecision::Create
        } else {
            AdmissionDecision::AtCapacity
        }
    }

    /// Room left before the maximum is reached.
    pub fn headroom(&self) -> u32 {
        self.max_instances.saturating_sub(self.active)
    }
}
