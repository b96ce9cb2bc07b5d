//! fleetgrid-state: fleet control plane model for FleetGrid.
//!
//! Defines the read-only projections of remote fleet state (descriptors,
//! members, attachments, refresh operations, warm pools, scaling
//! activities), the [`FleetControl`] API the convergence engine drives, and
//! an [`InMemoryControlPlane`] that simulates an eventually consistent
//! control plane for tests and dry runs.
//!
//! # Architecture
//!
//! ```text
//!   fleetgrid-converge ──▶ FleetControl (trait) ◀── remote client adapter
//!                                  ▲
//!                                  └── InMemoryControlPlane (SimWorld fixture)
//! ```
//!
//! Every type here is `Serialize`/`Deserialize` so a whole simulated world
//! can be loaded from a TOML or JSON fixture.

pub mod control;
pub mod error;
pub mod memory;
pub mod types;

pub use control::{FleetControl, FleetReader, MAX_ATTACHMENT_BATCH, MAX_PROTECTION_BATCH};
pub use error::{
    CODE_RESOURCE_IN_USE, CODE_SCALING_ACTIVITY_IN_PROGRESS, CODE_THROTTLING, CODE_VALIDATION,
    FleetError, FleetResult, ResultExt,
};
pub use memory::{ControlCall, InMemoryControlPlane, Operation, SimBehavior, SimWorld};
pub use types::*;
