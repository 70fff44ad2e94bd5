//! Fleet error taxonomy.
//!
//! Every error is scoped to the cluster or single operation that produced
//! it. None of them are fatal to the process.

use dockfleet_reconcile::ClusterIdentity;
use thiserror::Error;

use crate::runtime::RuntimeError;

#[derive(Debug, Error)]
pub enum FleetError {
    /// Runtime endpoint unreachable. Retried naturally on the next request or ping.
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Runtime refused a create or terminate call. Not retried automatically.
    #[error("container runtime rejected request: {0}")]
    RuntimeRejected(String),

    /// Cluster is at its configured maximum and nothing can be reused.
    #[error("cluster {cluster} is at capacity ({max} instances)")]
    CapacityExceeded { cluster: ClusterIdentity, max: u32 },

    /// Lookup referencing an instance or binding that no longer exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// A cluster setting is missing or malformed.
    #[error("invalid cluster settings: {0}")]
    InvalidSettings(String),

    /// A record was offered to the registry of a different cluster.
    #[error("record for cluster {record} cannot be stored in registry for {registry}")]
    ForeignRecord {
        registry: ClusterIdentity,
        record: ClusterIdentity,
    },

    /// Payload is missing a field the operation needs, or is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request name outside the kinds this service handles.
    #[error("unknown request: {0}")]
    UnknownRequest(String),
}

impl FleetError {
    /// True for conditions the caller should simply retry later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RuntimeUnavailable(_) | Self::CapacityExceeded { .. }
        )
    }

    /// Short machine-readable code used in API problem documents.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RuntimeUnavailable(_) => "runtime_unavailable",
            Self::RuntimeRejected(_) => "runtime_rejected",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::NotFound(_) => "not_found",
            Self::InvalidSettings(_) => "invalid_settings",
            Self::ForeignRecord { .. } => "foreign_record",
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnknownRequest(_) => "unknown_request",
        }
    }
}

impl From<RuntimeError> for FleetError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable(msg) => Self::RuntimeUnavailable(msg),
            RuntimeError::Rejected(msg) => Self::RuntimeRejected(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_errors_map_to_fleet_errors() {
        let unavailable: FleetError = RuntimeError::Unavailable("refused".into()).into();
        assert!(matches!(unavailable, FleetError::RuntimeUnavailable(_)));
        assert!(unavailable.is_transient());

        let rejected: FleetError = RuntimeError::Rejected("no such image".into()).into();
        assert!(matches!(rejected, FleetError::RuntimeRejected(_)));
        assert!(!rejected.is_transient());
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            FleetError::NotFound("x".into()).code(),
            "not_found"
        );
        assert_eq!(
            FleetError::UnknownRequest("x".into()).code(),
            "unknown_request"
        );
    }
}
