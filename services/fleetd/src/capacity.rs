//! Admission and create decisions over a registry snapshot.

use dockfleet_id::{InstanceId, JobId};
use dockfleet_reconcile::{Admission, AdmissionDecision};

use crate::cluster::{ClusterConfiguration, JobRequirements};
use crate::error::FleetError;
use crate::instance::LifecycleState;
use crate::registry::FleetRegistry;

/// What `create_agent` should do for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatePlan {
    /// Hand back an instance that already satisfies the request.
    Existing(InstanceId),
    /// Ask the runtime for a new instance.
    Create,
    /// At the maximum with nothing reusable.
    AtCapacity,
}

/// Pure decisions over one cluster's registry. Never mutates.
pub struct CapacityDecider;

impl CapacityDecider {
    pub fn admission(
        cluster: &ClusterConfiguration,
        registry: &FleetRegistry,
    ) -> Result<Admission, FleetError> {
        Ok(registry.admission(cluster.max_instances()?))
    }

    /// True if a Ready instance exists or another may be created.
    ///
    /// Every Ready instance in a cluster is fungible, so the job's
    /// requirements only matter for scoping to the cluster.
    pub fn can_assign(
        cluster: &ClusterConfiguration,
        registry: &FleetRegistry,
        _job: &JobRequirements,
    ) -> Result<bool, FleetError> {
        Ok(Self::admission(cluster, registry)?.decide().accepts())
    }

    pub fn has_ready(registry: &FleetRegistry) -> bool {
        registry.count_in(LifecycleState::Ready) > 0
    }

    /// Oldest Ready instance, preferring one created for `job`.
    pub fn pick_ready(registry: &FleetRegistry, job: Option<&JobId>) -> Option<InstanceId> {
        let ready: Vec<_> = registry
            .all()
            .into_iter()
            .filter(|r| r.state == LifecycleState::Ready)
            .collect();
        job.and_then(|job| ready.iter().find(|r| r.was_requested_for(job)))
            .or_else(|| ready.first())
            .map(|r| r.instance_id.clone())
    }

    /// Decide how to satisfy a create request.
    ///
    /// A live record already created for, or bound to, the same job wins.
    /// Idle records have served their job and do not count. After that any
    /// Ready instance is reused before capacity is spent.
    pub fn plan_create(
        cluster: &ClusterConfiguration,
        registry: &FleetRegistry,
        job: &JobRequirements,
    ) -> Result<CreatePlan, FleetError> {
        if let Some(job_id) = &job.job_id {
            let in_flight = registry
                .all()
                .into_iter()
                .filter(|r| {
                    matches!(
                        r.state,
                        LifecycleState::Provisioning | LifecycleState::Ready | LifecycleState::Assigned
                    )
                })
                .find(|r| r.is_bound_to(job_id) || r.was_requested_for(job_id));
            if let Some(record) = in_flight {
                return Ok(CreatePlan::Existing(record.instance_id));
            }
        }

        let admission = Self::admission(cluster, registry)?;
        Ok(match admission.decide() {
            AdmissionDecision::Reuse => match Self::pick_ready(registry, job.job_id.as_ref()) {
                Some(id) => CreatePlan::Existing(id),
                None => CreatePlan::AtCapacity,
            },
            AdmissionDecision::Create => CreatePlan::Create,
            AdmissionDecision::AtCapacity => CreatePlan::AtCapacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceRecord;
    use chrono::{TimeDelta, TimeZone, Utc};
    use dockfleet_reconcile::ClusterIdentity;
    use rstest::rstest;

    fn cluster(max: &str) -> ClusterConfiguration {
        ClusterConfiguration::from_pairs([("image", "agent:1"), ("max_docker_containers", max)])
    }

    fn record(id: &str, identity: &ClusterIdentity, state: LifecycleState, minute: i64) -> InstanceRecord {
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap() + TimeDelta::minutes(minute);
        InstanceRecord {
            instance_id: InstanceId::parse(id).unwrap(),
            name: id.to_string(),
            cluster_identity: identity.clone(),
            created_at: at,
            last_activity_at: at,
            current_job_id: None,
            requested_for: None,
            state,
        }
    }

    fn registry(c: &ClusterConfiguration, states: &[LifecycleState]) -> FleetRegistry {
        let mut registry = FleetRegistry::new(c.identity().clone());
        for (i, state) in states.iter().enumerate() {
            registry
                .put(record(&format!("c{i}"), c.identity(), *state, i as i64))
                .unwrap();
        }
        registry
    }

    fn job(id: &str) -> JobRequirements {
        JobRequirements::for_job(JobId::parse(id).unwrap())
    }

    use LifecycleState::*;

    #[rstest]
    #[case::empty("1", &[], true)]
    #[case::full_none_ready("1", &[Assigned], false)]
    #[case::full_one_ready("2", &[Assigned, Ready], true)]
    #[case::full_provisioning("1", &[Provisioning], false)]
    #[case::terminating_counts("1", &[Terminating], false)]
    #[case::room_left("3", &[Assigned, Idle], true)]
    fn test_can_assign(#[case] max: &str, #[case] states: &[LifecycleState], #[case] expected: bool) {
        let c = cluster(max);
        let r = registry(&c, states);
        assert_eq!(CapacityDecider::can_assign(&c, &r, &job("j")).unwrap(), expected);
    }

    #[test]
    fn test_can_assign_needs_max_setting() {
        let c = ClusterConfiguration::from_pairs([("image", "agent:1")]);
        let r = FleetRegistry::new(c.identity().clone());
        assert!(matches!(
            CapacityDecider::can_assign(&c, &r, &job("j")),
            Err(FleetError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_plan_create_returns_in_flight_record() {
        let c = cluster("1");
        let mut r = registry(&c, &[]);
        let mut pending = record("p1", c.identity(), Provisioning, 0);
        pending.requested_for = Some(JobId::parse("j1").unwrap());
        r.put(pending).unwrap();

        assert_eq!(
            CapacityDecider::plan_create(&c, &r, &job("j1")).unwrap(),
            CreatePlan::Existing(InstanceId::parse("p1").unwrap())
        );
        assert_eq!(
            CapacityDecider::plan_create(&c, &r, &job("j2")).unwrap(),
            CreatePlan::AtCapacity
        );
    }

    #[test]
    fn test_plan_create_skips_idle_record_for_same_job() {
        let c = cluster("2");
        let mut r = registry(&c, &[]);
        let mut served = record("done", c.identity(), Idle, 0);
        served.requested_for = Some(JobId::parse("j1").unwrap());
        r.put(served).unwrap();

        assert_eq!(
            CapacityDecider::plan_create(&c, &r, &job("j1")).unwrap(),
            CreatePlan::Create
        );
    }

    #[test]
    fn test_plan_create_reuses_oldest_ready() {
        let c = cluster("5");
        let r = registry(&c, &[Assigned, Ready, Ready]);
        assert_eq!(
            CapacityDecider::plan_create(&c, &r, &job("j")).unwrap(),
            CreatePlan::Existing(InstanceId::parse("c1").unwrap())
        );
    }

    #[test]
    fn test_plan_create_when_room() {
        let c = cluster("2");
        let r = registry(&c, &[Assigned]);
        assert_eq!(
            CapacityDecider::plan_create(&c, &r, &JobRequirements::default()).unwrap(),
            CreatePlan::Create
        );
    }

    #[test]
    fn test_pick_ready_prefers_requested_for() {
        let c = cluster("5");
        let mut r = registry(&c, &[Ready]);
        let mut mine = record("mine", c.identity(), Ready, 10);
        mine.requested_for = Some(JobId::parse("j9").unwrap());
        r.put(mine).unwrap();

        let j9 = JobId::parse("j9").unwrap();
        assert_eq!(
            CapacityDecider::pick_ready(&r, Some(&j9)).unwrap().as_str(),
            "mine"
        );
        assert_eq!(CapacityDecider::pick_ready(&r, None).unwrap().as_str(), "c0");
        assert!(CapacityDecider::has_ready(&r));
    }
}
