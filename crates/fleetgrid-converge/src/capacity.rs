//! Capacity satisfaction polling.
//!
//! Each iteration fetches the live fleet, counts weighted capacity over
//! serving members, narrows that to members every attached load balancer
//! and target group also reports healthy, and hands both numbers to a
//! [`CapacityPredicate`].
//!
//! ```text
//!   get_fleet ──▶ serving members ──▶ have_fleet ─────┐
//!                      │                              ├──▶ predicate ──▶ done / retry
//!                      └─▶ healthy in every LB + TG ──▶ have_balanced
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use fleetgrid_state::{
    ActivityStatus, FleetControl, FleetDescriptor, FleetError, FleetResult, HealthMap,
    LOAD_BALANCER_HEALTHY, TARGET_GROUP_HEALTHY,
};

use crate::retry::{Attempt, Waiter};

/// Activities failing with this message are retried by the control plane itself.
const RETRIED_ACTIVITY_MESSAGE: &str = "Invalid IAM Instance Profile";

/// Error code reported when a scaling activity failed during a wait.
pub const CODE_SCALING_ACTIVITY_FAILED: &str = "ScalingActivityFailed";

// ── Predicates ─────────────────────────────────────────────────────

/// Result of evaluating a capacity predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub satisfied: bool,
    /// The remaining gap, or empty when satisfied.
    pub reason: String,
}

impl Verdict {
    fn satisfied() -> Self {
        Self {
            satisfied: true,
            reason: String::new(),
        }
    }

    fn unsatisfied(reason: String) -> Self {
        Self {
            satisfied: false,
            reason,
        }
    }
}

/// Decides whether observed capacity meets a target.
pub trait CapacityPredicate: Send + Sync {
    fn check(&self, have_fleet: u32, have_balanced: u32) -> Verdict;
}

/// Configured capacity targets of a fleet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapacityTargets {
    pub min_size: u32,
    pub desired_capacity: u32,
    /// Minimum members healthy in every load balancer.
    pub min_balanced_capacity: u32,
    /// Members healthy in every load balancer to wait for. Overrides
    /// `min_balanced_capacity` when non-zero.
    pub wait_for_balanced_capacity: u32,
}

impl CapacityTargets {
    fn balanced_target(&self) -> u32 {
        if self.wait_for_balanced_capacity > 0 {
            self.wait_for_balanced_capacity
        } else {
            self.min_balanced_capacity
        }
    }
}

/// After creation: configured targets are lower bounds.
#[derive(Debug, Clone, Copy)]
pub struct CreatePredicate(pub CapacityTargets);

impl CapacityPredicate for CreatePredicate {
    fn check(&self, have_fleet: u32, have_balanced: u32) -> Verdict {
        let want_fleet = if self.0.desired_capacity > 0 {
            self.0.desired_capacity
        } else {
            self.0.min_size
        };
        if have_fleet < want_fleet {
            return Verdict::unsatisfied(format!(
                "Need at least {want_fleet} healthy instances in ASG, have {have_fleet}"
            ));
        }
        balanced_at_least(self.0.balanced_target(), have_balanced)
    }
}

/// After an update: the fleet target is exact, the balanced target stays a lower bound.
#[derive(Debug, Clone, Copy)]
pub struct UpdatePredicate(pub CapacityTargets);

impl CapacityPredicate for UpdatePredicate {
    fn check(&self, have_fleet: u32, have_balanced: u32) -> Verdict {
        let want_fleet = self.0.min_size.max(self.0.desired_capacity);
        if have_fleet != want_fleet {
            return Verdict::unsatisfied(format!(
                "Need exactly {want_fleet} healthy instances in ASG, have {have_fleet}"
            ));
        }
        balanced_at_least(self.0.balanced_target(), have_balanced)
    }
}

fn balanced_at_least(want: u32, have: u32) -> Verdict {
    if want > 0 && have < want {
        return Verdict::unsatisfied(format!(
            "Need at least {want} healthy instances in ELB, have {have}"
        ));
    }
    Verdict::satisfied()
}

// ── Counting ───────────────────────────────────────────────────────

/// Weighted capacity observed in one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapacityCount {
    pub fleet: u32,
    pub balanced: u32,
}

/// Count serving capacity. A member missing from an attachment's health
/// map is unhealthy for that attachment. Sums saturate at `u32::MAX`.
pub fn count_capacity(
    fleet: &FleetDescriptor,
    lb_health: &HashMap<String, HealthMap>,
    tg_health: &HashMap<String, HealthMap>,
) -> CapacityCount {
    let healthy_in = |maps: &HashMap<String, HealthMap>, attachment: &String, member: &str, want: &str| {
        maps.get(attachment)
            .and_then(|health| health.get(member))
            .is_some_and(|state| state == want)
    };

    let mut count = CapacityCount::default();
    for member in fleet.members.iter().filter(|m| m.is_serving()) {
        let weight = member.weight();
        count.fleet = count.fleet.saturating_add(weight);

        let balanced = fleet
            .load_balancers
            .iter()
            .all(|lb| healthy_in(lb_health, lb, &member.id, LOAD_BALANCER_HEALTHY))
            && fleet
                .target_groups
                .iter()
                .all(|tg| healthy_in(tg_health, tg, &member.id, TARGET_GROUP_HEALTHY));
        if balanced {
            count.balanced = count.balanced.saturating_add(weight);
        }
    }
    count
}

// ── Poller ─────────────────────────────────────────────────────────

/// How a capacity wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityOutcome {
    Satisfied(CapacityCount),
    /// The budget was zero; nothing was polled.
    Skipped,
    /// The fleet no longer exists. The caller should forget it.
    Vanished,
}

/// Blocks until a fleet satisfies a capacity predicate.
pub struct CapacityPoller<C: ?Sized> {
    control: Arc<C>,
    waiter: Waiter,
    ignore_failed_activities: bool,
}

impl<C: FleetControl + ?Sized> CapacityPoller<C> {
    pub fn new(control: Arc<C>, waiter: Waiter) -> Self {
        Self {
            control,
            waiter,
            ignore_failed_activities: false,
        }
    }

    pub fn ignore_failed_activities(mut self, ignore: bool) -> Self {
        self.ignore_failed_activities = ignore;
        self
    }

    /// Wait up to `budget` for `predicate` to hold.
    ///
    /// A missing fleet is reported as [`CapacityOutcome::Vanished`] unless
    /// `newly_created` is set, in which case it is treated as not yet
    /// visible and polled again.
    pub async fn wait(
        &self,
        name: &str,
        budget: Duration,
        predicate: &dyn CapacityPredicate,
        newly_created: bool,
    ) -> FleetResult<CapacityOutcome> {
        if budget.is_zero() {
            debug!(fleet = %name, "capacity wait disabled");
            return Ok(CapacityOutcome::Skipped);
        }

        let since = SystemTime::now();
        let what = format!("fleet ({name}) capacity");
        let result = self
            .waiter
            .retry(&what, budget, move || {
                self.poll_once(name, predicate, newly_created, since)
            })
            .await;

        match result {
            Ok(outcome) => {
                if let CapacityOutcome::Satisfied(count) = outcome {
                    info!(
                        fleet = %name,
                        have_fleet = count.fleet,
                        have_balanced = count.balanced,
                        "capacity satisfied"
                    );
                }
                Ok(outcome)
            }
            Err(FleetError::Timeout {
                what,
                elapsed,
                last_state,
                ..
            }) => Err(FleetError::Timeout {
                what,
                elapsed,
                last_state,
                activity: self.latest_activity(name).await,
            }),
            Err(e) => Err(e),
        }
    }

    async fn poll_once(
        &self,
        name: &str,
        predicate: &dyn CapacityPredicate,
        newly_created: bool,
        since: SystemTime,
    ) -> Attempt<CapacityOutcome> {
        if !self.ignore_failed_activities {
            if let Err(e) = self.check_failed_activities(name, since).await {
                return Attempt::Fatal(e);
            }
        }

        let fleet = match self.control.get_fleet(name).await {
            Ok(Some(fleet)) => fleet,
            Ok(None) if newly_created => {
                return Attempt::Retry(format!("fleet ({name}) not visible yet"));
            }
            Ok(None) => {
                info!(fleet = %name, "fleet vanished while waiting for capacity");
                return Attempt::Done(CapacityOutcome::Vanished);
            }
            Err(e) => return Attempt::Fatal(e.context(format!("reading fleet ({name})"))),
        };

        let count = match self.measure(&fleet).await {
            Ok(count) => count,
            Err(e) => return Attempt::Fatal(e),
        };

        let verdict = predicate.check(count.fleet, count.balanced);
        if verdict.satisfied {
            Attempt::Done(CapacityOutcome::Satisfied(count))
        } else {
            debug!(fleet = %name, reason = %verdict.reason, "capacity not yet satisfied");
            Attempt::Retry(verdict.reason)
        }
    }

    async fn measure(&self, fleet: &FleetDescriptor) -> FleetResult<CapacityCount> {
        let mut lb_health = HashMap::new();
        for lb in &fleet.load_balancers {
            let health = self
                .control
                .load_balancer_health(lb)
                .await
                .map_err(|e| e.context(format!("reading load balancer ({lb}) health")))?;
            lb_health.insert(lb.clone(), health);
        }

        let mut tg_health = HashMap::new();
        for tg in &fleet.target_groups {
            let health = self
                .control
                .target_group_health(tg)
                .await
                .map_err(|e| e.context(format!("reading target group ({tg}) health")))?;
            tg_health.insert(tg.clone(), health);
        }

        Ok(count_capacity(fleet, &lb_health, &tg_health))
    }

    /// Fail fast on a scaling activity that failed since the wait began.
    async fn check_failed_activities(&self, name: &str, since: SystemTime) -> FleetResult<()> {
        let activities = self
            .control
            .scaling_activities(name, Some(since))
            .await
            .map_err(|e| e.context(format!("reading scaling activities for fleet ({name})")))?;

        for activity in activities {
            if activity.status != ActivityStatus::Failed || activity.progress != 100 {
                continue;
            }
            let message = activity.status_message.as_deref().unwrap_or_default();
            if message.contains(RETRIED_ACTIVITY_MESSAGE) {
                debug!(fleet = %name, activity = %activity.id, "ignoring retried activity failure");
                continue;
            }
            return Err(FleetError::fatal(
                CODE_SCALING_ACTIVITY_FAILED,
                format!("scaling activity ({}): {activity}", activity.id),
            ));
        }
        Ok(())
    }

    /// Most recent scaling activity, for timeout diagnostics.
    async fn latest_activity(&self, name: &str) -> Option<String> {
        match self.control.scaling_activities(name, None).await {
            Ok(activities) => activities.first().map(ToString::to_string),
            Err(e) => {
                warn!(fleet = %name, error = %e, "could not read scaling activities");
                None
            }
        }
    }
}
