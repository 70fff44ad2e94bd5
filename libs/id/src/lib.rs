//! # dockfleet-id
//!
//! Typed identifiers used across the fleet engine.
//!
//! Two families of IDs exist:
//!
//! - **Generated IDs** are minted by dockfleet itself and use a prefixed
//!   ULID format: `{prefix}_{ulid}`, e.g. `agent_01HV4Z2WQXKJNM8GPQY6VBKC3D`.
//!   Agent IDs double as container names, so they must be unique and
//!   sortable by creation time.
//! - **Opaque IDs** are assigned by somebody else (the container runtime,
//!   the CI server) and are carried verbatim. The only rule is that they
//!   are non-empty.
//!
//! Keeping both typed prevents mixing a container ID with a job ID at a
//! call site that takes two strings.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
