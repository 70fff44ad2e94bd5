//! Tracked agent instances and their lifecycle.

use chrono::{DateTime, Utc};
use dockfleet_id::{InstanceId, JobId};
use dockfleet_reconcile::ClusterIdentity;
use serde::Serialize;

use crate::runtime::{ContainerHandle, ContainerStatus};

/// Lifecycle of a tracked instance.
///
/// `Provisioning → Ready → Assigned → Idle → Terminating`, with removal from
/// the registry standing in for the final `Gone` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Create call issued; container not yet confirmed running.
    Provisioning,
    /// Running with no job.
    Ready,
    /// Bound to a job.
    Assigned,
    /// Unused and eligible for reaping once past its deadline.
    Idle,
    /// Termination issued, awaiting confirmation.
    Terminating,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Provisioning, Ready)
                | (Ready, Assigned)
                | (Ready, Idle)
                | (Assigned, Idle)
                | (Idle, Terminating)
                | (Terminating, Terminating)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Assigned => "assigned",
            Self::Idle => "idle",
            Self::Terminating => "terminating",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceRecord {
    /// Runtime-assigned container ID.
    pub instance_id: InstanceId,

    /// Container name; the agent ID the CI server knows the worker by.
    pub name: String,

    pub cluster_identity: ClusterIdentity,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,

    /// Job currently bound to this instance.
    pub current_job_id: Option<JobId>,

    /// Job whose create request produced this instance. Used to answer
    /// retried creates; it is not a binding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_for: Option<JobId>,

    pub state: LifecycleState,
}

impl InstanceRecord {
    /// Record for a container we just asked the runtime to create.
    pub fn provisioning(
        handle: &ContainerHandle,
        cluster_identity: ClusterIdentity,
        requested_for: Option<JobId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            instance_id: handle.id.clone(),
            name: handle.name.clone(),
            cluster_identity,
            created_at: now,
            last_activity_at: now,
            current_job_id: None,
            requested_for,
            state: LifecycleState::Provisioning,
        }
    }

    /// Record synthesized for a live container nobody was tracking.
    ///
    /// The job label only names the job the container was created for, not
    /// a binding. A labelled container is adopted `Idle` with its idle clock
    /// started at `now`: it is never handed out, and it is reaped one full
    /// idle timeout after adoption.
    pub fn adopted(
        handle: &ContainerHandle,
        cluster_identity: ClusterIdentity,
        now: DateTime<Utc>,
    ) -> Self {
        let requested_for = handle.job_id();
        let (state, last_activity_at) = match (handle.status, &requested_for) {
            (ContainerStatus::Starting, _) => (LifecycleState::Provisioning, handle.created_at),
            (_, Some(_)) => (LifecycleState::Idle, now.max(handle.created_at)),
            (_, None) => (LifecycleState::Ready, handle.created_at),
        };
        Self {
            instance_id: handle.id.clone(),
            name: handle.name.clone(),
            cluster_identity,
            created_at: handle.created_at,
            last_activity_at,
            current_job_id: None,
            requested_for,
            state,
        }
    }

    pub fn is_bound_to(&self, job: &JobId) -> bool {
        self.current_job_id.as_ref() == Some(job)
    }

    /// True if this instance came from a create request for `job`.
    pub fn was_requested_for(&self, job: &JobId) -> bool {
        self.requested_for.as_ref() == Some(job)
    }

    /// Confirm the container is running.
    pub fn mark_ready(&mut self) -> bool {
        self.transition(LifecycleState::Ready)
    }

    /// Bind a job. Only a ready instance accepts work.
    pub fn assign(&mut self, job: JobId, now: DateTime<Utc>) -> bool {
        if !self.transition(LifecycleState::Assigned) {
            return false;
        }
        self.current_job_id = Some(job);
        self.last_activity_at = now;
        true
    }

    /// Release the bound job and start the idle clock.
    pub fn complete_job(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != LifecycleState::Assigned || !self.transition(LifecycleState::Idle) {
            return false;
        }
        self.current_job_id = None;
        self.last_activity_at = now;
        true
    }

    /// Demote an unused ready instance.
    pub fn mark_idle(&mut self) -> bool {
        self.state == LifecycleState::Ready && self.transition(LifecycleState::Idle)
    }

    pub fn mark_terminating(&mut self) -> bool {
        self.transition(LifecycleState::Terminating)
    }

    fn transition(&mut self, next: LifecycleState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{JOB_LABEL, CLUSTER_LABEL};
    use chrono::{TimeDelta, TimeZone};
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap()
    }

    fn identity() -> ClusterIdentity {
        ClusterIdentity::from_pairs([("image", "agent:1")])
    }

    fn handle(status: ContainerStatus, job: Option<&str>) -> ContainerHandle {
        let mut labels = BTreeMap::new();
        labels.insert(CLUSTER_LABEL.to_string(), identity().to_string());
        if let Some(job) = job {
            labels.insert(JOB_LABEL.to_string(), job.to_string());
        }
        ContainerHandle {
            id: InstanceId::parse("c0ffee").unwrap(),
            name: "agent_01HV4Z2WQXKJNM8GPQY6VBKC3D".to_string(),
            status,
            created_at: t0(),
            labels,
        }
    }

    fn job(s: &str) -> JobId {
        JobId::parse(s).unwrap()
    }

    #[test]
    fn test_provisioning_record() {
        let record = InstanceRecord::provisioning(
            &handle(ContainerStatus::Running, None),
            identity(),
            Some(job("j1")),
            t0(),
        );
        assert_eq!(record.state, LifecycleState::Provisioning);
        assert!(record.was_requested_for(&job("j1")));
        assert!(record.current_job_id.is_none());
    }

    #[test]
    fn test_adopted_without_job_is_ready() {
        let later = t0() + TimeDelta::hours(3);
        let record =
            InstanceRecord::adopted(&handle(ContainerStatus::Running, None), identity(), later);
        assert_eq!(record.state, LifecycleState::Ready);
        assert_eq!(record.created_at, t0());
        assert_eq!(record.last_activity_at, t0());
    }

    #[test]
    fn test_adopted_with_job_label_is_idle_not_bound() {
        let later = t0() + TimeDelta::hours(3);
        let record = InstanceRecord::adopted(
            &handle(ContainerStatus::Running, Some("j7")),
            identity(),
            later,
        );
        assert_eq!(record.state, LifecycleState::Idle);
        assert!(record.current_job_id.is_none());
        assert!(record.was_requested_for(&job("j7")));
        assert_eq!(record.created_at, t0());
        assert_eq!(record.last_activity_at, later);

        let mut record = record;
        assert!(!record.complete_job(later), "nothing is bound");
        assert!(!record.assign(job("j8"), later), "idle instances take no work");
    }

    #[test]
    fn test_adopted_while_starting_is_provisioning() {
        let record = InstanceRecord::adopted(
            &handle(ContainerStatus::Starting, Some("j7")),
            identity(),
            t0(),
        );
        assert_eq!(record.state, LifecycleState::Provisioning);
        assert!(record.current_job_id.is_none());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut record = InstanceRecord::provisioning(
            &handle(ContainerStatus::Running, None),
            identity(),
            None,
            t0(),
        );
        assert!(!record.assign(job("j1"), t0()), "provisioning cannot take work");

        assert!(record.mark_ready());
        let later = t0() + TimeDelta::minutes(5);
        assert!(record.assign(job("j1"), later));
        assert_eq!(record.state, LifecycleState::Assigned);
        assert_eq!(record.last_activity_at, later);

        let done = later + TimeDelta::minutes(1);
        assert!(record.complete_job(done));
        assert_eq!(record.state, LifecycleState::Idle);
        assert!(record.current_job_id.is_none());
        assert_eq!(record.last_activity_at, done);

        assert!(!record.complete_job(done), "second completion is a no-op");
        assert!(record.mark_terminating());
        assert!(record.mark_terminating(), "termination may be retried");
    }

    #[test]
    fn test_invalid_transitions() {
        use LifecycleState::*;
        assert!(!Provisioning.can_transition_to(Assigned));
        assert!(!Assigned.can_transition_to(Ready));
        assert!(!Idle.can_transition_to(Ready));
        assert!(!Terminating.can_transition_to(Idle));
        assert!(!Ready.can_transition_to(Terminating));
    }

    #[test]
    fn test_mark_idle_only_from_ready() {
        let mut record = InstanceRecord::provisioning(
            &handle(ContainerStatus::Running, None),
            identity(),
            None,
            t0(),
        );
        assert!(record.mark_ready());
        assert!(record.assign(job("j"), t0()));
        assert!(!record.mark_idle());
        assert_eq!(record.state, LifecycleState::Assigned);
    }
}
