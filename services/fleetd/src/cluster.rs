//! Cluster settings and job requirements as delivered by the CI server.
//!
//! A cluster configuration is an immutable bag of string settings. Its
//! identity is a hash of those settings (see [`ClusterIdentity`]), so two
//! requests carrying equal settings share one registry no matter how they
//! were serialized.

use std::collections::BTreeMap;
use std::time::Duration;

use dockfleet_id::JobId;
use dockfleet_reconcile::{ClusterIdentity, ReapPolicy, DEFAULT_IDLE_TIMEOUT};
use serde::{Deserialize, Serialize};

use crate::error::FleetError;

/// Setting keys understood by the fleet engine.
pub mod keys {
    pub const DOCKER_URI: &str = "docker_uri";
    pub const MAX_DOCKER_CONTAINERS: &str = "max_docker_containers";
    pub const AUTO_REGISTER_TIMEOUT: &str = "auto_register_timeout";
    pub const IMAGE: &str = "image";
    pub const GO_SERVER_URL: &str = "go_server_url";
    pub const ENVIRONMENT_VARIABLES: &str = "environment_variables";
    pub const PULL_ON_CONTAINER_CREATE: &str = "pull_on_container_create";
}

pub const DEFAULT_DOCKER_URI: &str = "unix:///var/run/docker.sock";

/// Immutable settings of one logical cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct ClusterConfiguration {
    settings: BTreeMap<String, String>,
    identity: ClusterIdentity,
}

impl ClusterConfiguration {
    pub fn new(settings: BTreeMap<String, String>) -> Self {
        let identity = ClusterIdentity::of(&settings);
        Self { settings, identity }
    }

    /// Build from `(key, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Stable identity of these settings.
    pub fn identity(&self) -> &ClusterIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn docker_uri(&self) -> &str {
        self.get(keys::DOCKER_URI).unwrap_or(DEFAULT_DOCKER_URI)
    }

    /// Maximum number of instances this cluster may run.
    pub fn max_instances(&self) -> Result<u32, FleetError> {
        let raw = self.require(keys::MAX_DOCKER_CONTAINERS)?;
        raw.trim()
            .parse::<u32>()
            .ok()
            .filter(|&max| max > 0)
            .ok_or_else(|| {
                FleetError::InvalidSettings(format!(
                    "{} must be a positive integer, got '{raw}'",
                    keys::MAX_DOCKER_CONTAINERS
                ))
            })
    }

    /// How long an instance may stay unused, configured in minutes.
    pub fn idle_timeout(&self) -> Result<Duration, FleetError> {
        match self.get(keys::AUTO_REGISTER_TIMEOUT) {
            None => Ok(DEFAULT_IDLE_TIMEOUT),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
                .map_err(|_| {
                    FleetError::InvalidSettings(format!(
                        "{} must be a whole number of minutes, got '{raw}'",
                        keys::AUTO_REGISTER_TIMEOUT
                    ))
                }),
        }
    }

    pub fn image(&self) -> Result<&str, FleetError> {
        self.require(keys::IMAGE).map(str::trim)
    }

    pub fn go_server_url(&self) -> Option<&str> {
        self.get(keys::GO_SERVER_URL)
    }

    pub fn pull_on_create(&self) -> bool {
        self.get(keys::PULL_ON_CONTAINER_CREATE)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    /// `KEY=VALUE` lines from `environment_variables`, blank lines and
    /// lines without `=` skipped.
    pub fn environment(&self) -> Vec<(String, String)> {
        self.get(keys::ENVIRONMENT_VARIABLES)
            .map(|raw| {
                raw.lines()
                    .filter_map(|line| line.trim().split_once('='))
                    .filter(|(k, _)| !k.trim().is_empty())
                    .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reaping deadlines for this cluster.
    pub fn reap_policy(&self, provisioning_grace: Duration) -> Result<ReapPolicy, FleetError> {
        Ok(ReapPolicy::new(self.idle_timeout()?, provisioning_grace))
    }

    fn require(&self, key: &str) -> Result<&str, FleetError> {
        self.get(key)
            .ok_or_else(|| FleetError::InvalidSettings(format!("missing required setting '{key}'")))
    }
}

impl From<BTreeMap<String, String>> for ClusterConfiguration {
    fn from(settings: BTreeMap<String, String>) -> Self {
        Self::new(settings)
    }
}

impl From<ClusterConfiguration> for BTreeMap<String, String> {
    fn from(config: ClusterConfiguration) -> Self {
        config.settings
    }
}

/// What a pending job asks for.
///
/// Instances are fungible within a cluster, so the requirements only
/// identify the job and carry pass-through data for the agent container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,

    /// CI environment the agent should register into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// Elastic profile properties, forwarded untouched.
    #[serde(
        default,
        alias = "elastic_agent_profile_properties",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub properties: BTreeMap<String, String>,
}

impl JobRequirements {
    pub fn for_job(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            ..Default::default()
        }
    }
}
