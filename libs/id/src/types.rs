//! Typed ID definitions.

use crate::{define_id, define_opaque_id};

// =============================================================================
// Generated by dockfleet
// =============================================================================

// Container name given to every agent dockfleet creates. The CI server sees
// this as the elastic agent ID.
define_id!(AgentId, "agent");

// Correlates an API request with its logs and problem documents.
define_id!(RequestId, "req");

// =============================================================================
// Assigned elsewhere
// =============================================================================

// Container ID as reported by the runtime.
define_opaque_id!(InstanceId);

// Job identifier as sent by the CI server.
define_opaque_id!(JobId);
