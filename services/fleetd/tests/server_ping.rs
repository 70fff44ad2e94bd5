//! Full-fleet sweeps keep going when single clusters fail.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{cluster, controller, job, t0, RoutedConnector};
use dockfleet_fleetd::clock::ManualClock;
use dockfleet_fleetd::instance::LifecycleState;
use dockfleet_fleetd::runtime::MockRuntime;

#[tokio::test]
async fn unreachable_runtime_does_not_block_other_clusters() {
    let clock = Arc::new(ManualClock::new(t0()));
    let down = Arc::new(MockRuntime::with_clock(clock.clone()));
    let up = Arc::new(MockRuntime::with_clock(clock.clone()));
    let fleet = controller(
        RoutedConnector::default()
            .route("mock://down", down.clone())
            .route("mock://up", up.clone()),
        clock.clone(),
    );
    let c_down = cluster("mock://down", 2);
    let c_up = cluster("mock://up", 2);
    let c_unrouted = cluster("mock://nowhere", 2);

    let stranded = fleet.create_agent(&c_down, &job("a")).await.unwrap();
    fleet.create_agent(&c_up, &job("b")).await.unwrap();
    down.set_unavailable(true);

    let report = fleet
        .ping_all_clusters(&[c_down.clone(), c_up.clone(), c_unrouted.clone()])
        .await;

    assert_eq!(report.reconciled, 1);
    assert_eq!(report.totals.promoted, 1);
    assert_eq!(report.failures.len(), 2);
    let mut codes: Vec<_> = report.failures.iter().map(|f| f.code).collect();
    codes.sort_unstable();
    assert_eq!(codes, vec!["invalid_settings", "runtime_unavailable"]);

    // The unreachable cluster keeps its stale view and reports the error.
    let down_status = fleet.cluster_status(c_down.identity()).await.unwrap();
    assert_eq!(down_status.instances[0].instance_id, stranded.instance_id);
    assert_eq!(down_status.instances[0].state, LifecycleState::Provisioning);
    assert!(down_status.last_error.is_some());

    let up_status = fleet.cluster_status(c_up.identity()).await.unwrap();
    assert_eq!(up_status.instances[0].state, LifecycleState::Ready);
    assert!(up_status.last_error.is_none());
    assert!(up_status.last_reconciled_at.is_some());

    // Recovery happens on the next ping without intervention.
    down.set_unavailable(false);
    clock.advance(Duration::from_secs(5));
    let report = fleet.ping_all_clusters(&[c_down.clone(), c_up.clone()]).await;
    assert_eq!(report.failures.len(), 1, "unrouted cluster is still known");
    let down_status = fleet.cluster_status(c_down.identity()).await.unwrap();
    assert_eq!(down_status.instances[0].state, LifecycleState::Ready);
    assert!(down_status.last_error.is_none());
}

#[tokio::test]
async fn empty_ping_on_fresh_controller() {
    let (fleet, runtime, _) = common::single_runtime();
    let report = fleet.ping_all_clusters(&[]).await;
    assert_eq!(report.reconciled, 0);
    assert!(report.failures.is_empty());
    assert_eq!(runtime.list_calls(), 0);
}
