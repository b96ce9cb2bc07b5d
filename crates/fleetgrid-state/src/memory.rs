//! Simulated fleet control plane.
//!
//! Models the eventually consistent behavior the engine has to cope with:
//! attachments linger in `Adding`/`Removing` for a few listing polls,
//! cancelled refreshes pass through `Cancelling`, member counts converge
//! toward desired capacity one member per read, and warm pools drain
//! gradually. Every call is recorded so tests can assert on ordering and
//! batch sizes, and faults can be scripted per operation.
//!
//! Simulated time advances on reads, not on the wall clock, so the same
//! world behaves identically under a paused tokio clock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::control::{FleetControl, FleetReader, MAX_ATTACHMENT_BATCH, MAX_PROTECTION_BATCH};
use crate::error::{CODE_RESOURCE_IN_USE, CODE_VALIDATION, FleetError, FleetResult};
use crate::types::*;

/// Control plane operations, used to key recorded calls and faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetFleet,
    SetFleetCapacity,
    DeleteFleet,
    Attach,
    Detach,
    ListAttachmentStates,
    LoadBalancerHealth,
    TargetGroupHealth,
    SetMemberProtection,
    StartRefresh,
    CancelRefresh,
    GetRefresh,
    GetWarmPool,
    SetWarmPoolCapacity,
    DeleteWarmPool,
    ScalingActivities,
}

/// A recorded control plane call.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCall {
    GetFleet { name: String },
    SetFleetCapacity { name: String, capacity: CapacityUpdate },
    DeleteFleet { name: String, force: bool },
    Attach { name: String, kind: AttachmentKind, ids: Vec<String> },
    Detach { name: String, kind: AttachmentKind, ids: Vec<String> },
    ListAttachmentStates { name: String, kind: AttachmentKind },
    LoadBalancerHealth { load_balancer: String },
    TargetGroupHealth { target_group: String },
    SetMemberProtection { name: String, member_ids: Vec<String>, protected: bool },
    StartRefresh { name: String },
    CancelRefresh { name: String },
    GetRefresh { name: String, id: String },
    GetWarmPool { name: String },
    SetWarmPoolCapacity { name: String, min_size: u32, max_prepared_capacity: i32 },
    DeleteWarmPool { name: String, force: bool },
    ScalingActivities { name: String },
}

impl ControlCall {
    pub fn operation(&self) -> Operation {
        match self {
            ControlCall::GetFleet { .. } => Operation::GetFleet,
            ControlCall::SetFleetCapacity { .. } => Operation::SetFleetCapacity,
            ControlCall::DeleteFleet { .. } => Operation::DeleteFleet,
            ControlCall::Attach { .. } => Operation::Attach,
            ControlCall::Detach { .. } => Operation::Detach,
            ControlCall::ListAttachmentStates { .. } => Operation::ListAttachmentStates,
            ControlCall::LoadBalancerHealth { .. } => Operation::LoadBalancerHealth,
            ControlCall::TargetGroupHealth { .. } => Operation::TargetGroupHealth,
            ControlCall::SetMemberProtection { .. } => Operation::SetMemberProtection,
            ControlCall::StartRefresh { .. } => Operation::StartRefresh,
            ControlCall::CancelRefresh { .. } => Operation::CancelRefresh,
            ControlCall::GetRefresh { .. } => Operation::GetRefresh,
            ControlCall::GetWarmPool { .. } => Operation::GetWarmPool,
            ControlCall::SetWarmPoolCapacity { .. } => Operation::SetWarmPoolCapacity,
            ControlCall::DeleteWarmPool { .. } => Operation::DeleteWarmPool,
            ControlCall::ScalingActivities { .. } => Operation::ScalingActivities,
        }
    }
}

/// Knobs for how quickly the simulated control plane settles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimBehavior {
    /// Listing polls an attachment stays in `Adding`/`Removing`.
    pub transition_polls: u32,
    /// Refresh reads before a cancelling refresh reports `Cancelled`.
    pub cancel_polls: u32,
    /// Refresh reads before a running refresh succeeds. `None` never finishes.
    pub refresh_polls: Option<u32>,
    /// Move the member count one step toward desired capacity per fleet read.
    pub converge_members: bool,
    /// Entries per attachment listing page.
    pub page_size: usize,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            transition_polls: 1,
            cancel_polls: 1,
            refresh_polls: None,
            converge_members: true,
            page_size: 2,
        }
    }
}

/// Serializable starting state for a simulated control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimWorld {
    pub fleets: Vec<FleetDescriptor>,
    pub load_balancer_health: HashMap<String, HealthMap>,
    pub target_group_health: HashMap<String, HealthMap>,
    /// Live warm pools keyed by fleet name.
    pub warm_pools: HashMap<String, WarmPool>,
    pub activities: HashMap<String, Vec<ScalingActivity>>,
    pub behavior: SimBehavior,
}

#[derive(Debug)]
struct SimAttachment {
    id: String,
    state: String,
    polls_left: u32,
}

#[derive(Debug)]
struct SimRefresh {
    op: RefreshOperation,
    polls_left: Option<u32>,
}

#[derive(Debug, Default)]
struct Inner {
    fleets: BTreeMap<String, FleetDescriptor>,
    attachment_states: HashMap<(String, AttachmentKind), Vec<SimAttachment>>,
    lb_health: HashMap<String, HealthMap>,
    tg_health: HashMap<String, HealthMap>,
    refreshes: HashMap<String, Vec<SimRefresh>>,
    warm_pools: HashMap<String, WarmPool>,
    activities: HashMap<String, Vec<ScalingActivity>>,
    behavior: SimBehavior,
    calls: Vec<ControlCall>,
    faults: HashMap<Operation, VecDeque<FleetError>>,
    next_id: u64,
}

impl Inner {
    /// Record the call and pop any scripted fault for it.
    fn enter(&mut self, call: ControlCall) -> FleetResult<()> {
        let op = call.operation();
        self.calls.push(call);
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => {
                debug!(?op, error = %err, "injected fault");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn fleet_mut(&mut self, name: &str) -> FleetResult<&mut FleetDescriptor> {
        self.fleets
            .get_mut(name)
            .ok_or_else(|| FleetError::not_found(format!("fleet ({name})")))
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    /// Launch or terminate one member toward the desired capacity.
    fn converge_members(&mut self, name: &str) {
        let Some((have, want)) = self
            .fleets
            .get(name)
            .map(|f| (f.members.len() as u32, f.desired_capacity))
        else {
            return;
        };

        if have > want {
            let Some(fleet) = self.fleets.get_mut(name) else {
                return;
            };
            if let Some(pos) = fleet.members.iter().position(|m| !m.protected_from_scale_in) {
                let removed = fleet.members.remove(pos);
                debug!(fleet = %name, member = %removed.id, "simulated termination");
            }
        } else if have < want {
            let id = self.next_id("i-sim");
            let Some(fleet) = self.fleets.get_mut(name) else {
                return;
            };
            fleet.members.push(Member {
                id: id.clone(),
                health: Some(HealthStatus::Healthy),
                lifecycle: LifecycleState::InService,
                weighted_capacity: None,
                protected_from_scale_in: fleet.protect_from_scale_in,
            });
            let lbs = fleet.load_balancers.clone();
            let tgs = fleet.target_groups.clone();
            for lb in lbs {
                self.lb_health
                    .entry(lb)
                    .or_default()
                    .insert(id.clone(), LOAD_BALANCER_HEALTHY.to_string());
            }
            for tg in tgs {
                self.tg_health
                    .entry(tg)
                    .or_default()
                    .insert(id.clone(), TARGET_GROUP_HEALTHY.to_string());
            }
            debug!(fleet = %name, member = %id, "simulated launch");
        }
    }

    fn tick_attachments(&mut self, name: &str, kind: AttachmentKind) {
        let Some(entries) = self.attachment_states.get_mut(&(name.to_string(), kind)) else {
            return;
        };
        for entry in entries.iter_mut() {
            if entry.polls_left > 0 {
                entry.polls_left -= 1;
                if entry.polls_left == 0 && entry.state == ATTACHMENT_ADDING {
                    entry.state = "Added".to_string();
                }
            }
        }
        entries.retain(|e| !(e.state == ATTACHMENT_REMOVING && e.polls_left == 0));
    }

    fn tick_warm_pool(&mut self, name: &str) {
        let Some(pool) = self.warm_pools.get_mut(name) else {
            return;
        };
        let shrinking = pool.status == WarmPoolStatus::PendingDelete
            || (pool.config.max_prepared_capacity == 0
                && pool.members.len() as u32 > pool.config.min_size);
        if shrinking && !pool.members.is_empty() {
            pool.members.remove(0);
        }
        if pool.status == WarmPoolStatus::PendingDelete && pool.members.is_empty() {
            self.warm_pools.remove(name);
            if let Some(fleet) = self.fleets.get_mut(name) {
                fleet.warm_pool = None;
            }
            debug!(fleet = %name, "simulated warm pool deleted");
        }
    }
}

/// Simulated control plane. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct InMemoryControlPlane {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryControlPlane {
    /// An empty control plane with default behavior.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a control plane from a fixture.
    pub fn from_world(world: SimWorld) -> Self {
        let plane = Self::new();
        {
            let mut inner = plane.lock();
            inner.behavior = world.behavior;
            inner.lb_health = world.load_balancer_health;
            inner.tg_health = world.target_group_health;
            inner.activities = world.activities;
            inner.warm_pools = world.warm_pools;
            for fleet in world.fleets {
                if let Some(config) = &fleet.warm_pool {
                    inner
                        .warm_pools
                        .entry(fleet.name.clone())
                        .or_insert_with(|| WarmPool {
                            config: config.clone(),
                            status: WarmPoolStatus::Active,
                            members: Vec::new(),
                        });
                }
                inner.fleets.insert(fleet.name.clone(), fleet);
            }
        }
        plane
    }

    pub fn with_behavior(self, behavior: SimBehavior) -> Self {
        self.lock().behavior = behavior;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_fleet(&self, fleet: FleetDescriptor) {
        self.lock().fleets.insert(fleet.name.clone(), fleet);
    }

    pub fn set_load_balancer_health(&self, load_balancer: &str, health: HealthMap) {
        self.lock().lb_health.insert(load_balancer.to_string(), health);
    }

    pub fn set_target_group_health(&self, target_group: &str, health: HealthMap) {
        self.lock().tg_health.insert(target_group.to_string(), health);
    }

    pub fn insert_warm_pool(&self, name: &str, pool: WarmPool) {
        let mut inner = self.lock();
        if let Some(fleet) = inner.fleets.get_mut(name) {
            fleet.warm_pool = Some(pool.config.clone());
        }
        inner.warm_pools.insert(name.to_string(), pool);
    }

    pub fn push_activity(&self, name: &str, activity: ScalingActivity) {
        self.lock()
            .activities
            .entry(name.to_string())
            .or_default()
            .push(activity);
    }

    /// Make the next call of `op` fail with `err`. Faults queue in order.
    pub fn inject_fault(&self, op: Operation, err: FleetError) {
        self.lock().faults.entry(op).or_default().push_back(err);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ControlCall> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, op: Operation) -> Vec<ControlCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation() == op)
            .cloned()
            .collect()
    }

    /// Peek at a fleet without advancing simulated time.
    pub fn fleet(&self, name: &str) -> Option<FleetDescriptor> {
        self.lock().fleets.get(name).cloned()
    }

    /// Peek at a warm pool without advancing simulated time.
    pub fn warm_pool(&self, name: &str) -> Option<WarmPool> {
        self.lock().warm_pools.get(name).cloned()
    }

    /// Peek at a refresh without advancing simulated time.
    pub fn refresh(&self, name: &str, id: &str) -> Option<RefreshOperation> {
        self.lock()
            .refreshes
            .get(name)?
            .iter()
            .find(|r| r.op.id == id)
            .map(|r| r.op.clone())
    }

    /// The active refresh for a fleet, if any.
    pub fn active_refresh(&self, name: &str) -> Option<RefreshOperation> {
        self.lock()
            .refreshes
            .get(name)?
            .iter()
            .find(|r| r.op.status.is_active())
            .map(|r| r.op.clone())
    }

    /// Drop a fleet's refresh history from the listing, as the real
    /// control plane does once operations age out.
    pub fn forget_refreshes(&self, name: &str) {
        self.lock().refreshes.remove(name);
    }
}

fn check_batch(ids: &[String], limit: usize, what: &str) -> FleetResult<()> {
    if ids.len() > limit {
        return Err(FleetError::fatal(
            CODE_VALIDATION,
            format!("{what}: at most {limit} identifiers per call, got {}", ids.len()),
        ));
    }
    Ok(())
}

#[async_trait]
impl FleetReader for InMemoryControlPlane {
    async fn get_fleet(&self, name: &str) -> FleetResult<Option<FleetDescriptor>> {
        let mut inner = self.lock();
        inner.enter(ControlCall::GetFleet {
            name: name.to_string(),
        })?;
        if inner.behavior.converge_members {
            inner.converge_members(name);
        }
        Ok(inner.fleets.get(name).cloned())
    }
}

#[async_trait]
impl FleetControl for InMemoryControlPlane {
    async fn set_fleet_capacity(&self, name: &str, capacity: CapacityUpdate) -> FleetResult<()> {
        let mut inner = self.lock();
        inner.enter(ControlCall::SetFleetCapacity {
            name: name.to_string(),
            capacity,
        })?;
        let fleet = inner.fleet_mut(name)?;
        let min = capacity.min_size.unwrap_or(fleet.min_size);
        let max = capacity.max_size.unwrap_or(fleet.max_size);
        let desired = capacity.desired_capacity.unwrap_or(fleet.desired_capacity);
        if min > desired || desired > max {
            return Err(FleetError::fatal(
                CODE_VALIDATION,
                format!("desired capacity {desired} must be within [{min}, {max}]"),
            ));
        }
        fleet.min_size = min;
        fleet.max_size = max;
        fleet.desired_capacity = desired;
        Ok(())
    }

    async fn delete_fleet(&self, name: &str, force: bool) -> FleetResult<()> {
        let mut inner = self.lock();
        inner.enter(ControlCall::DeleteFleet {
            name: name.to_string(),
            force,
        })?;
        let fleet = inner.fleet_mut(name)?;
        if !force && !fleet.members.is_empty() {
            return Err(FleetError::transient(
                CODE_RESOURCE_IN_USE,
                "cannot delete a fleet while members are still in it",
            ));
        }
        inner.fleets.remove(name);
        inner.warm_pools.remove(name);
        inner.refreshes.remove(name);
        inner.attachment_states.retain(|(fleet, _), _| fleet != name);
        Ok(())
    }

    async fn attach(&self, name: &str, kind: AttachmentKind, ids: &[String]) -> FleetResult<()> {
        let mut inner = self.lock();
        inner.enter(ControlCall::Attach {
            name: name.to_string(),
            kind,
            ids: ids.to_vec(),
        })?;
        check_batch(ids, MAX_ATTACHMENT_BATCH, "attach")?;
        let polls = inner.behavior.transition_polls;
        let fleet = inner.fleet_mut(name)?;
        let set = match kind {
            AttachmentKind::LoadBalancer => &mut fleet.load_balancers,
            AttachmentKind::TargetGroup => &mut fleet.target_groups,
            AttachmentKind::TrafficSource => &mut fleet.traffic_sources,
        };
        set.extend(ids.iter().cloned());
        let entries = inner
            .attachment_states
            .entry((name.to_string(), kind))
            .or_default();
        for id in ids {
            entries.retain(|e| &e.id != id);
            entries.push(SimAttachment {
                id: id.clone(),
                state: if polls == 0 { "Added" } else { ATTACHMENT_ADDING }.to_string(),
                polls_left: polls,
            });
        }
        Ok(())
    }

    async fn detach(&self, name: &str, kind: AttachmentKind, ids: &[String]) -> FleetResult<()> {
        let mut inner = self.lock();
        inner.enter(ControlCall::Detach {
            name: name.to_string(),
            kind,
            ids: ids.to_vec(),
        })?;
        check_batch(ids, MAX_ATTACHMENT_BATCH, "detach")?;
        let polls = inner.behavior.transition_polls;
        let fleet = inner.fleet_mut(name)?;
        let set = match kind {
            AttachmentKind::LoadBalancer => &mut fleet.load_balancers,
            AttachmentKind::TargetGroup => &mut fleet.target_groups,
            AttachmentKind::TrafficSource => &mut fleet.traffic_sources,
        };
        for id in ids {
            set.remove(id);
        }
        let entries = inner
            .attachment_states
            .entry((name.to_string(), kind))
            .or_default();
        entries.retain(|e| !ids.contains(&e.id));
        if polls > 0 {
            for id in ids {
                entries.push(SimAttachment {
                    id: id.clone(),
                    state: ATTACHMENT_REMOVING.to_string(),
                    polls_left: polls,
                });
            }
        }
        Ok(())
    }

    async fn list_attachment_states(
        &self,
        name: &str,
        kind: AttachmentKind,
        next_token: Option<String>,
    ) -> FleetResult<AttachmentPage> {
        let mut inner = self.lock();
        inner.enter(ControlCall::ListAttachmentStates {
            name: name.to_string(),
            kind,
        })?;
        inner.fleet_mut(name)?;

        let start = match next_token {
            None => {
                inner.tick_attachments(name, kind);
                0
            }
            Some(token) => token.parse::<usize>().map_err(|_| {
                FleetError::fatal(CODE_VALIDATION, format!("invalid next token {token:?}"))
            })?,
        };

        let page_size = inner.behavior.page_size.max(1);
        let entries = inner
            .attachment_states
            .get(&(name.to_string(), kind))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let end = (start + page_size).min(entries.len());
        let states = entries
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|e| AttachmentState {
                id: e.id.clone(),
                state: e.state.clone(),
            })
            .collect();
        let next_token = (end < entries.len()).then(|| end.to_string());
        Ok(AttachmentPage { states, next_token })
    }

    async fn load_balancer_health(&self, load_balancer: &str) -> FleetResult<HealthMap> {
        let mut inner = self.lock();
        inner.enter(ControlCall::LoadBalancerHealth {
            load_balancer: load_balancer.to_string(),
        })?;
        Ok(inner.lb_health.get(load_balancer).cloned().unwrap_or_default())
    }

    async fn target_group_health(&self, target_group: &str) -> FleetResult<HealthMap> {
        let mut inner = self.lock();
        inner.enter(ControlCall::TargetGroupHealth {
            target_group: target_group.to_string(),
        })?;
        Ok(inner.tg_health.get(target_group).cloned().unwrap_or_default())
    }

    async fn set_member_protection(
        &self,
        name: &str,
        member_ids: &[MemberId],
        protected: bool,
    ) -> FleetResult<()> {
        let mut inner = self.lock();
        inner.enter(ControlCall::SetMemberProtection {
            name: name.to_string(),
            member_ids: member_ids.to_vec(),
            protected,
        })?;
        check_batch(member_ids, MAX_PROTECTION_BATCH, "set member protection")?;
        let fleet = inner.fleet_mut(name)?;
        // Known members are updated even when the call reports an unknown one.
        let mut missing = None;
        for id in member_ids {
            match fleet.members.iter_mut().find(|m| &m.id == id) {
                Some(member) => member.protected_from_scale_in = protected,
                None => missing = Some(id.clone()),
            }
        }
        if let Some(id) = missing {
            return Err(FleetError::fatal(
                CODE_VALIDATION,
                format!("The instance {id} is not part of Auto Scaling group {name}."),
            ));
        }
        Ok(())
    }

    async fn start_refresh(&self, name: &str, _params: &RefreshParameters) -> FleetResult<String> {
        let mut inner = self.lock();
        inner.enter(ControlCall::StartRefresh {
            name: name.to_string(),
        })?;
        inner.fleet_mut(name)?;
        let active = inner
            .refreshes
            .get(name)
            .is_some_and(|ops| ops.iter().any(|r| r.op.status.is_active()));
        if active {
            return Err(FleetError::RefreshInProgress {
                fleet: name.to_string(),
            });
        }
        let id = inner.next_id("refresh");
        let polls_left = inner.behavior.refresh_polls;
        inner.refreshes.entry(name.to_string()).or_default().push(SimRefresh {
            op: RefreshOperation {
                id: id.clone(),
                status: RefreshStatus::Pending,
                status_reason: None,
                percentage_complete: 0,
            },
            polls_left,
        });
        Ok(id)
    }

    async fn cancel_refresh(&self, name: &str) -> FleetResult<Option<String>> {
        let mut inner = self.lock();
        inner.enter(ControlCall::CancelRefresh {
            name: name.to_string(),
        })?;
        let cancel_polls = inner.behavior.cancel_polls;
        let Some(active) = inner
            .refreshes
            .get_mut(name)
            .and_then(|ops| ops.iter_mut().find(|r| r.op.status.is_active()))
        else {
            return Ok(None);
        };
        if active.op.status != RefreshStatus::Cancelling {
            if cancel_polls == 0 {
                active.op.status = RefreshStatus::Cancelled;
                active.polls_left = None;
            } else {
                active.op.status = RefreshStatus::Cancelling;
                active.polls_left = Some(cancel_polls);
            }
        }
        Ok(Some(active.op.id.clone()))
    }

    async fn get_refresh(&self, name: &str, id: &str) -> FleetResult<Option<RefreshOperation>> {
        let mut inner = self.lock();
        inner.enter(ControlCall::GetRefresh {
            name: name.to_string(),
            id: id.to_string(),
        })?;
        let Some(refresh) = inner
            .refreshes
            .get_mut(name)
            .and_then(|ops| ops.iter_mut().find(|r| r.op.id == id))
        else {
            return Ok(None);
        };
        if refresh.op.status == RefreshStatus::Pending {
            refresh.op.status = RefreshStatus::InProgress;
        }
        if let Some(left) = refresh.polls_left {
            if left <= 1 {
                refresh.polls_left = None;
                refresh.op.status = match refresh.op.status {
                    RefreshStatus::Cancelling => RefreshStatus::Cancelled,
                    RefreshStatus::Pending | RefreshStatus::InProgress => {
                        refresh.op.percentage_complete = 100;
                        RefreshStatus::Successful
                    }
                    done => done,
                };
            } else {
                refresh.polls_left = Some(left - 1);
            }
        }
        Ok(Some(refresh.op.clone()))
    }

    async fn get_warm_pool(&self, name: &str) -> FleetResult<Option<WarmPool>> {
        let mut inner = self.lock();
        inner.enter(ControlCall::GetWarmPool {
            name: name.to_string(),
        })?;
        inner.tick_warm_pool(name);
        Ok(inner.warm_pools.get(name).cloned())
    }

    async fn set_warm_pool_capacity(
        &self,
        name: &str,
        min_size: u32,
        max_prepared_capacity: i32,
    ) -> FleetResult<()> {
        let mut inner = self.lock();
        inner.enter(ControlCall::SetWarmPoolCapacity {
            name: name.to_string(),
            min_size,
            max_prepared_capacity,
        })?;
        let pool = inner
            .warm_pools
            .get_mut(name)
            .ok_or_else(|| FleetError::not_found(format!("warm pool ({name})")))?;
        pool.config.min_size = min_size;
        pool.config.max_prepared_capacity = max_prepared_capacity;
        let config = pool.config.clone();
        if let Some(fleet) = inner.fleets.get_mut(name) {
            fleet.warm_pool = Some(config);
        }
        Ok(())
    }

    async fn delete_warm_pool(&self, name: &str, force: bool) -> FleetResult<()> {
        let mut inner = self.lock();
        inner.enter(ControlCall::DeleteWarmPool {
            name: name.to_string(),
            force,
        })?;
        let pool = inner
            .warm_pools
            .get_mut(name)
            .ok_or_else(|| FleetError::not_found(format!("warm pool ({name})")))?;
        if !force && !pool.members.is_empty() {
            return Err(FleetError::transient(
                CODE_RESOURCE_IN_USE,
                "warm pool still has members",
            ));
        }
        if force {
            pool.members.clear();
        }
        pool.status = WarmPoolStatus::PendingDelete;
        Ok(())
    }

    async fn scaling_activities(
        &self,
        name: &str,
        since: Option<SystemTime>,
    ) -> FleetResult<Vec<ScalingActivity>> {
        let mut inner = self.lock();
        inner.enter(ControlCall::ScalingActivities {
            name: name.to_string(),
        })?;
        let mut activities: Vec<ScalingActivity> = inner
            .activities
            .get(name)
            .map(|list| {
                list.iter()
                    .filter(|a| since.is_none_or(|t| a.started_at > t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        activities.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(activities)
    }
}
