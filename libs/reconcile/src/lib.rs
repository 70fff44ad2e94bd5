//! Reconciliation primitives for the fleet engine.
//!
//! Everything in this crate is pure: no I/O, no async, no clocks. Callers
//! pass in the current time and the counts they observed, and get back
//! deterministic decisions. Key concepts:
//!
//! - **Cluster identity**: a stable hash of a cluster's settings, used as the
//!   registry key and as the container label that ties runtime state back to
//!   a registry after a restart.
//! - **Reap policy**: when an unused instance becomes eligible for reaping,
//!   and how long an unconfirmed create may stay invisible.
//! - **Admission**: whether a cluster can take another job right now.
//!
//! # Invariants
//!
//! - Identity depends only on the settings' key/value pairs, never on the
//!   order they were supplied in
//! - Decisions are deterministic given the same inputs
//! - An instance exactly at its idle deadline is never reaped

mod admission;
mod identity;
mod policy;
mod report;

pub use admission::{Admission, AdmissionDecision};
pub use identity::{ClusterIdentity, IdentityError};
pub use policy::ReapPolicy;
pub use report::SweepReport;

use std::time::Duration;

/// Default idle timeout when a cluster does not configure one.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60); // 10 minutes

/// Default grace period before an unconfirmed `Provisioning` record is pruned.
pub const DEFAULT_PROVISIONING_GRACE: Duration = Duration::from_secs(120);
