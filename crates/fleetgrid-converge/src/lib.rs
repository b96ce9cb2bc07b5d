//! FleetGrid convergence engine.
//!
//! Drives a fleet toward a target state against an eventually consistent
//! control plane. Every component is a bounded poll loop over the
//! [`fleetgrid_state::FleetControl`] API; none of them keeps state between
//! calls.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────────────┐
//!                     │ LifecycleController  │  create / update / delete
//!                     └──────────┬───────────┘
//!        ┌──────────────┬────────┴───────┬──────────────────┐
//!        ▼              ▼                ▼                  ▼
//!  CapacityPoller  AttachmentReconciler  RefreshOrchestrator  DrainSequencer
//!        └──────────────┴────────┬───────┴──────────────────┘
//!                                ▼
//!                     Waiter::retry (capped backoff, last-chance attempt)
//!                                ▼
//!                       FleetControl (trait)
//! ```
//!
//! # Components
//!
//! - **`retry`**: bounded retry loop with cancellation
//! - **`capacity`**: capacity predicates and the capacity poller
//! - **`attach`**: batched attach/detach with transitional-state waits
//! - **`refresh`**: start/cancel/wait for fleet refreshes
//! - **`drain`**: fleet and warm pool drains
//! - **`lifecycle`**: per-operation sequencing
//! - **`config`**: `EngineConfig` loaded from TOML

pub mod attach;
pub mod capacity;
pub mod config;
pub mod drain;
pub mod lifecycle;
pub mod refresh;
pub mod retry;

pub use attach::{AttachmentDiff, AttachmentReconciler, ReconcileReport, batches};
pub use capacity::{
    CapacityCount, CapacityOutcome, CapacityPoller, CapacityPredicate, CapacityTargets,
    CreatePredicate, UpdatePredicate, Verdict, count_capacity,
};
pub use config::{ConfigError, EngineConfig, PollConfig, parse_duration};
pub use drain::DrainSequencer;
pub use lifecycle::{DeleteOptions, LifecycleController, RefreshRequest, UpdatePlan, UpdateReport};
pub use refresh::{RefreshOrchestrator, RefreshTrigger};
pub use retry::{Attempt, Backoff, Waiter};
