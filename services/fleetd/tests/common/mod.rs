#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dockfleet_fleetd::clock::ManualClock;
use dockfleet_fleetd::cluster::{ClusterConfiguration, JobRequirements};
use dockfleet_fleetd::reconciler::ReconciliationEngine;
use dockfleet_fleetd::runtime::{
    ContainerHandle, ContainerRuntime, ContainerSpec, MockRuntime, RuntimeConnector, RuntimeError,
};
use dockfleet_fleetd::{FleetController, FleetError};
use dockfleet_id::JobId;
use dockfleet_reconcile::ClusterIdentity;
use tokio::sync::watch;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap()
}

pub fn cluster(docker_uri: &str, max: u32) -> ClusterConfiguration {
    ClusterConfiguration::from_pairs([
        ("docker_uri", docker_uri.to_string()),
        ("image", "gocd/gocd-agent-alpine:v24.1.0".to_string()),
        ("max_docker_containers", max.to_string()),
        ("auto_register_timeout", "10".to_string()),
    ])
}

pub fn job(id: &str) -> JobRequirements {
    JobRequirements::for_job(JobId::parse(id).unwrap())
}

pub fn job_id(id: &str) -> JobId {
    JobId::parse(id).unwrap()
}

/// Routes each cluster to a runtime by its `docker_uri`.
#[derive(Default)]
pub struct RoutedConnector {
    routes: HashMap<String, Arc<dyn ContainerRuntime>>,
}

impl RoutedConnector {
    pub fn route(mut self, docker_uri: &str, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.routes.insert(docker_uri.to_string(), runtime);
        self
    }
}

impl RuntimeConnector for RoutedConnector {
    fn connect(
        &self,
        cluster: &ClusterConfiguration,
    ) -> Result<Arc<dyn ContainerRuntime>, FleetError> {
        self.routes
            .get(cluster.docker_uri())
            .cloned()
            .ok_or_else(|| FleetError::InvalidSettings(format!("no runtime for {}", cluster.docker_uri())))
    }
}

pub fn controller(connector: RoutedConnector, clock: Arc<ManualClock>) -> Arc<FleetController> {
    Arc::new(FleetController::new(
        Arc::new(connector),
        clock,
        ReconciliationEngine::default(),
    ))
}

/// A manual clock plus one mock runtime reachable at `mock://a`.
pub fn single_runtime() -> (Arc<FleetController>, Arc<MockRuntime>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let runtime = Arc::new(MockRuntime::with_clock(clock.clone()));
    let connector = RoutedConnector::default().route("mock://a", runtime.clone());
    (controller(connector, clock.clone()), runtime, clock)
}

/// Runtime whose listing blocks until the gate is opened.
pub struct GatedRuntime {
    inner: MockRuntime,
    open: watch::Receiver<bool>,
}

impl GatedRuntime {
    pub fn closed() -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                inner: MockRuntime::new(),
                open: rx,
            },
            tx,
        )
    }
}

#[async_trait]
impl ContainerRuntime for GatedRuntime {
    async fn list_containers(
        &self,
        cluster: &ClusterIdentity,
    ) -> Result<Vec<ContainerHandle>, RuntimeError> {
        let mut open = self.open.clone();
        while !*open.borrow() {
            if open.changed().await.is_err() {
                break;
            }
        }
        self.inner.list_containers(cluster).await
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        self.inner.create_container(spec).await
    }

    async fn terminate_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.inner.terminate_container(handle).await
    }
}
