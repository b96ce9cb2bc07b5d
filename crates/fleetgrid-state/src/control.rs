//! The Fleet Control API consumed by the convergence engine.
//!
//! Implementations wrap a typed client for the remote control plane. The
//! engine only depends on these traits, so tests substitute
//! [`crate::InMemoryControlPlane`] without a live control plane.

use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::FleetResult;
use crate::types::*;

/// Maximum identifiers per attach or detach call.
pub const MAX_ATTACHMENT_BATCH: usize = 10;

/// Maximum identifiers per member-protection call.
pub const MAX_PROTECTION_BATCH: usize = 50;

/// Fetch-by-name access to fleets.
#[async_trait]
pub trait FleetReader: Send + Sync {
    /// Current descriptor, or `None` if the fleet does not exist.
    async fn get_fleet(&self, name: &str) -> FleetResult<Option<FleetDescriptor>>;
}

/// Mutations and auxiliary reads against a fleet.
#[async_trait]
pub trait FleetControl: FleetReader {
    async fn set_fleet_capacity(&self, name: &str, capacity: CapacityUpdate) -> FleetResult<()>;

    async fn delete_fleet(&self, name: &str, force: bool) -> FleetResult<()>;

    /// Attach at most [`MAX_ATTACHMENT_BATCH`] identifiers.
    async fn attach(&self, name: &str, kind: AttachmentKind, ids: &[String]) -> FleetResult<()>;

    /// Detach at most [`MAX_ATTACHMENT_BATCH`] identifiers.
    async fn detach(&self, name: &str, kind: AttachmentKind, ids: &[String]) -> FleetResult<()>;

    /// One page of the attachment status listing for `kind`.
    async fn list_attachment_states(
        &self,
        name: &str,
        kind: AttachmentKind,
        next_token: Option<String>,
    ) -> FleetResult<AttachmentPage>;

    /// Member health as seen by a classic load balancer.
    async fn load_balancer_health(&self, load_balancer: &str) -> FleetResult<HealthMap>;

    /// Member health as seen by a target group.
    async fn target_group_health(&self, target_group: &str) -> FleetResult<HealthMap>;

    /// Change scale-in protection for at most [`MAX_PROTECTION_BATCH`] members.
    async fn set_member_protection(
        &self,
        name: &str,
        member_ids: &[MemberId],
        protected: bool,
    ) -> FleetResult<()>;

    /// Start a refresh. Fails with `RefreshInProgress` if one is active.
    async fn start_refresh(&self, name: &str, params: &RefreshParameters) -> FleetResult<String>;

    /// Cancel the active refresh. `None` when no refresh is active.
    async fn cancel_refresh(&self, name: &str) -> FleetResult<Option<String>>;

    async fn get_refresh(&self, name: &str, id: &str) -> FleetResult<Option<RefreshOperation>>;

    async fn get_warm_pool(&self, name: &str) -> FleetResult<Option<WarmPool>>;

    async fn set_warm_pool_capacity(
        &self,
        name: &str,
        min_size: u32,
        max_prepared_capacity: i32,
    ) -> FleetResult<()>;

    async fn delete_warm_pool(&self, name: &str, force: bool) -> FleetResult<()>;

    /// Scaling activities, newest first. `since` filters to activities
    /// started strictly after that instant.
    async fn scaling_activities(
        &self,
        name: &str,
        since: Option<SystemTime>,
    ) -> FleetResult<Vec<ScalingActivity>>;
}
