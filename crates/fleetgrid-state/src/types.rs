//! Domain types for the fleet control plane.
//!
//! These are read-only projections of remote state. The engine fetches a
//! fresh copy on every poll iteration and never mutates them locally; all
//! changes go through [`crate::FleetControl`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Unique name of a fleet.
pub type FleetName = String;

/// Identifier of a single member (compute instance).
pub type MemberId = String;

/// Per-attachment health map: member id → health-state string.
pub type HealthMap = HashMap<MemberId, String>;

/// Health state a classic load balancer reports for a healthy member.
pub const LOAD_BALANCER_HEALTHY: &str = "InService";

/// Health state a target group reports for a healthy member.
pub const TARGET_GROUP_HEALTHY: &str = "healthy";

// ── Fleet ──────────────────────────────────────────────────────────

/// Snapshot of a fleet as reported by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetDescriptor {
    pub name: FleetName,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
    #[serde(default)]
    pub members: Vec<Member>,
    /// Attached classic load balancer names.
    #[serde(default)]
    pub load_balancers: BTreeSet<String>,
    /// Attached target group identifiers.
    #[serde(default)]
    pub target_groups: BTreeSet<String>,
    /// Attached traffic source identifiers.
    #[serde(default)]
    pub traffic_sources: BTreeSet<String>,
    #[serde(default)]
    pub warm_pool: Option<WarmPoolConfig>,
    /// Whether newly launched members start protected from scale-in.
    #[serde(default)]
    pub protect_from_scale_in: bool,
}

impl FleetDescriptor {
    /// Attachment identifiers of the given kind.
    pub fn attachments(&self, kind: AttachmentKind) -> &BTreeSet<String> {
        match kind {
            AttachmentKind::LoadBalancer => &self.load_balancers,
            AttachmentKind::TargetGroup => &self.target_groups,
            AttachmentKind::TrafficSource => &self.traffic_sources,
        }
    }

    /// Members currently protected from scale-in.
    pub fn protected_members(&self) -> Vec<MemberId> {
        self.members
            .iter()
            .filter(|m| m.protected_from_scale_in)
            .map(|m| m.id.clone())
            .collect()
    }
}

// ── Member ─────────────────────────────────────────────────────────

/// One compute unit belonging to a fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub id: MemberId,
    #[serde(default)]
    pub health: Option<HealthStatus>,
    pub lifecycle: LifecycleState,
    /// Raw weighted capacity as reported; may be absent or malformed.
    #[serde(default)]
    pub weighted_capacity: Option<String>,
    #[serde(default)]
    pub protected_from_scale_in: bool,
}

impl Member {
    /// Capacity this member contributes. Absent or unparseable weights count as 1.
    pub fn weight(&self) -> u32 {
        self.weighted_capacity
            .as_deref()
            .and_then(|w| w.trim().parse::<u32>().ok())
            .unwrap_or(1)
    }

    /// Healthy according to the fleet and in service.
    pub fn is_serving(&self) -> bool {
        self.health == Some(HealthStatus::Healthy) && self.lifecycle == LifecycleState::InService
    }
}

/// Fleet-level health status of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Lifecycle state of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Pending,
    InService,
    Standby,
    Detaching,
    Terminating,
    Terminated,
    Warmed,
}

// ── Attachments ────────────────────────────────────────────────────

/// The kinds of load-balancing targets a fleet can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachmentKind {
    LoadBalancer,
    TargetGroup,
    TrafficSource,
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttachmentKind::LoadBalancer => "load balancers",
            AttachmentKind::TargetGroup => "target groups",
            AttachmentKind::TrafficSource => "traffic sources",
        };
        f.write_str(s)
    }
}

/// Transitional state reported while an attach is propagating.
pub const ATTACHMENT_ADDING: &str = "Adding";

/// Transitional state reported while a detach is propagating.
pub const ATTACHMENT_REMOVING: &str = "Removing";

/// One entry of the fleet's attachment status listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentState {
    pub id: String,
    pub state: String,
}

/// One page of an attachment status listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentPage {
    pub states: Vec<AttachmentState>,
    pub next_token: Option<String>,
}

// ── Capacity ───────────────────────────────────────────────────────

/// Partial capacity update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityUpdate {
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
    pub desired_capacity: Option<u32>,
}

impl CapacityUpdate {
    /// Min, max, and desired all set to zero.
    pub fn zero() -> Self {
        Self {
            min_size: Some(0),
            max_size: Some(0),
            desired_capacity: Some(0),
        }
    }
}

// ── Refresh ────────────────────────────────────────────────────────

/// Status of a fleet-wide refresh operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshStatus {
    Pending,
    InProgress,
    Cancelling,
    Cancelled,
    Failed,
    Successful,
}

/// How a refresh status reads while waiting for a refresh to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Pending,
    Succeeded,
    Failed,
}

impl RefreshStatus {
    /// Whether the operation still blocks a new refresh from starting.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RefreshStatus::Pending | RefreshStatus::InProgress | RefreshStatus::Cancelling
        )
    }

    /// Terminal partition for the cancellation wait: any state in which the
    /// operation is no longer active ends it.
    pub fn ends_cancellation_wait(self) -> bool {
        !self.is_active()
    }

    /// Partition for the completion wait. `Cancelled` is a failure here.
    pub fn completion(self) -> Completion {
        match self {
            RefreshStatus::Successful => Completion::Succeeded,
            RefreshStatus::Failed | RefreshStatus::Cancelled => Completion::Failed,
            RefreshStatus::Pending | RefreshStatus::InProgress | RefreshStatus::Cancelling => {
                Completion::Pending
            }
        }
    }
}

impl fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Observed state of a refresh operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOperation {
    pub id: String,
    pub status: RefreshStatus,
    #[serde(default)]
    pub status_reason: Option<String>,
    #[serde(default)]
    pub percentage_complete: u32,
}

/// Parameters passed through to a refresh start request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshParameters {
    /// Replacement strategy, e.g. "Rolling".
    pub strategy: Option<String>,
    pub min_healthy_percentage: Option<u32>,
    pub max_healthy_percentage: Option<u32>,
    /// Seconds a new member needs before it counts as warmed up.
    pub instance_warmup_secs: Option<u32>,
    pub checkpoint_percentages: Vec<u32>,
    pub checkpoint_delay_secs: Option<u32>,
    pub skip_matching: bool,
    pub auto_rollback: bool,
}

// ── Warm pool ──────────────────────────────────────────────────────

/// Status of a warm pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarmPoolStatus {
    Active,
    PendingDelete,
}

/// Configuration of a warm pool attached to a fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmPoolConfig {
    /// State members wait in, e.g. "Stopped".
    pub pool_state: String,
    pub min_size: u32,
    /// Maximum prepared capacity; `-1` means unbounded.
    pub max_prepared_capacity: i32,
    #[serde(default)]
    pub reuse_on_scale_in: bool,
}

/// Live view of a warm pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmPool {
    pub config: WarmPoolConfig,
    pub status: WarmPoolStatus,
    #[serde(default)]
    pub members: Vec<Member>,
}

// ── Scaling activity ───────────────────────────────────────────────

/// Status code of a scaling activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityStatus {
    InProgress,
    Successful,
    Failed,
    Cancelled,
}

/// A scaling activity recorded by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingActivity {
    pub id: String,
    pub status: ActivityStatus,
    #[serde(default)]
    pub status_message: Option<String>,
    pub description: String,
    pub progress: u32,
    pub started_at: SystemTime,
}

impl fmt::Display for ScalingActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}", self.description, self.status)?;
        if let Some(msg) = &self.status_message {
            write!(f, ": {msg}")?;
        }
        f.write_str(")")
    }
}
