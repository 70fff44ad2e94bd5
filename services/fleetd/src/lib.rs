//! dockfleet fleet controller library.
//!
//! This crate primarily ships the `fleetd` binary, but exposes its engine as
//! a library so the integration tests can drive it against a mock runtime.

pub mod api;
pub mod capacity;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod instance;
pub mod reconciler;
pub mod registry;
pub mod request;
pub mod runtime;
pub mod state;

pub use controller::FleetController;
pub use error::FleetError;
