//! Batched reconciliation of load balancer, target group and traffic
//! source attachments.
//!
//! Removals are applied before additions. After every batch the fleet's
//! attachment listing is paged through until no entry of that kind is
//! still `Adding` or `Removing`; only then is the next batch issued.
//! Batches already applied are not rolled back when a later one fails.
//! One deadline covers the whole reconciliation, not each batch.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use fleetgrid_state::{
    ATTACHMENT_ADDING, ATTACHMENT_REMOVING, AttachmentKind, FleetControl, FleetError, FleetResult,
};

use crate::retry::{Attempt, Waiter, remaining};

/// Set difference between desired and current attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentDiff {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl AttachmentDiff {
    pub fn between(desired: &BTreeSet<String>, current: &BTreeSet<String>) -> Self {
        Self {
            to_add: desired.difference(current).cloned().collect(),
            to_remove: current.difference(desired).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Split identifiers into batches of at most `size`.
pub fn batches(ids: &BTreeSet<String>, size: usize) -> Vec<Vec<String>> {
    let ids: Vec<String> = ids.iter().cloned().collect();
    ids.chunks(size.max(1)).map(<[String]>::to_vec).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Detach,
    Attach,
}

impl Direction {
    fn transitional_state(self) -> &'static str {
        match self {
            Direction::Detach => ATTACHMENT_REMOVING,
            Direction::Attach => ATTACHMENT_ADDING,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Detach => f.write_str("detach"),
            Direction::Attach => f.write_str("attach"),
        }
    }
}

/// What a reconciliation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub kind: AttachmentKind,
    pub added: usize,
    pub removed: usize,
    pub batches: usize,
}

/// Converges one attachment kind of a fleet to a desired set.
pub struct AttachmentReconciler<C: ?Sized> {
    control: Arc<C>,
    waiter: Waiter,
    batch_size: usize,
    timeout: Duration,
}

impl<C: FleetControl + ?Sized> AttachmentReconciler<C> {
    /// `timeout` bounds one whole reconciliation, all batches included.
    pub fn new(control: Arc<C>, waiter: Waiter, batch_size: usize, timeout: Duration) -> Self {
        Self {
            control,
            waiter,
            batch_size,
            timeout,
        }
    }

    pub async fn reconcile(
        &self,
        name: &str,
        kind: AttachmentKind,
        desired: &BTreeSet<String>,
    ) -> FleetResult<ReconcileReport> {
        let deadline = Instant::now() + self.timeout;
        let fleet = self
            .control
            .get_fleet(name)
            .await
            .map_err(|e| e.context(format!("reading fleet ({name})")))?
            .ok_or_else(|| FleetError::not_found(format!("fleet ({name})")))?;

        let diff = AttachmentDiff::between(desired, fleet.attachments(kind));
        let mut report = ReconcileReport {
            kind,
            added: diff.to_add.len(),
            removed: diff.to_remove.len(),
            batches: 0,
        };
        if diff.is_empty() {
            debug!(fleet = %name, %kind, "attachments already converged");
            return Ok(report);
        }

        let plan: Vec<(Direction, Vec<String>)> = batches(&diff.to_remove, self.batch_size)
            .into_iter()
            .map(|batch| (Direction::Detach, batch))
            .chain(
                batches(&diff.to_add, self.batch_size)
                    .into_iter()
                    .map(|batch| (Direction::Attach, batch)),
            )
            .collect();
        let total = plan.len();

        for (index, (direction, batch)) in plan.iter().enumerate() {
            let issued = match direction {
                Direction::Detach => self.control.detach(name, kind, batch).await,
                Direction::Attach => self.control.attach(name, kind, batch).await,
            };
            if let Err(e) = issued {
                let e = e.context(format!("{direction} {kind} for fleet ({name})"));
                return Err(partial(name, kind, index, total, e));
            }
            info!(
                fleet = %name,
                %kind,
                %direction,
                batch = index + 1,
                of = total,
                size = batch.len(),
                "attachment batch issued"
            );

            if let Err(e) = self
                .wait_for_transitions(name, kind, *direction, deadline)
                .await
            {
                return Err(partial(name, kind, index + 1, total, e));
            }
            report.batches += 1;
        }

        info!(
            fleet = %name,
            %kind,
            added = report.added,
            removed = report.removed,
            "attachments reconciled"
        );
        Ok(report)
    }

    async fn wait_for_transitions(
        &self,
        name: &str,
        kind: AttachmentKind,
        direction: Direction,
        deadline: Instant,
    ) -> FleetResult<()> {
        let what = format!("{kind} of fleet ({name}) to finish {}", direction.transitional_state());
        self.waiter
            .retry(&what, remaining(deadline), move || {
                self.count_transitional(name, kind, direction)
            })
            .await
    }

    /// Page through the whole listing and count entries still in transition.
    async fn count_transitional(
        &self,
        name: &str,
        kind: AttachmentKind,
        direction: Direction,
    ) -> Attempt<()> {
        let state = direction.transitional_state();
        let mut pending = 0usize;
        let mut token = None;
        loop {
            let page = match self.control.list_attachment_states(name, kind, token).await {
                Ok(page) => page,
                Err(e) => return Attempt::from_result(Err(e)),
            };
            pending += page.states.iter().filter(|s| s.state == state).count();
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }

        if pending == 0 {
            Attempt::Done(())
        } else {
            Attempt::Retry(format!("{pending} {kind} still {state}"))
        }
    }
}

fn partial(name: &str, kind: AttachmentKind, applied: usize, total: usize, e: FleetError) -> FleetError {
    if applied == 0 {
        return e;
    }
    FleetError::PartialBatch {
        operation: format!("reconcile {kind} for fleet ({name})"),
        applied,
        total,
        source: Box::new(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use fleetgrid_state::{
        CODE_THROTTLING, ControlCall, FleetDescriptor, InMemoryControlPlane, Operation,
        SimBehavior,
    };

    use crate::config::PollConfig;

    fn ids(prefix: &str, n: usize) -> BTreeSet<String> {
        (1..=n).map(|i| format!("{prefix}-{i}")).collect()
    }

    fn fleet(target_groups: BTreeSet<String>) -> FleetDescriptor {
        FleetDescriptor {
            name: "web".to_string(),
            min_size: 0,
            max_size: 4,
            desired_capacity: 0,
            members: Vec::new(),
            load_balancers: BTreeSet::new(),
            target_groups,
            traffic_sources: BTreeSet::new(),
            warm_pool: None,
            protect_from_scale_in: false,
        }
    }

    fn reconciler(plane: &InMemoryControlPlane) -> AttachmentReconciler<InMemoryControlPlane> {
        AttachmentReconciler::new(
            Arc::new(plane.clone()),
            Waiter::new(PollConfig::default()),
            10,
            Duration::from_secs(300),
        )
    }

    #[test]
    fn diff_is_two_way_set_difference() {
        let desired = BTreeSet::from(["a".to_string(), "b".to_string()]);
        let current = BTreeSet::from(["b".to_string(), "c".to_string()]);
        let diff = AttachmentDiff::between(&desired, &current);
        assert_eq!(diff.to_add, BTreeSet::from(["a".to_string()]));
        assert_eq!(diff.to_remove, BTreeSet::from(["c".to_string()]));
        assert!(AttachmentDiff::between(&desired, &desired).is_empty());
    }

    #[test]
    fn twelve_ids_make_batches_of_ten_and_two() {
        let sizes: Vec<usize> = batches(&ids("tg", 12), 10).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 2]);
        assert!(batches(&BTreeSet::new(), 10).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn removals_precede_additions() {
        let plane = InMemoryControlPlane::new();
        plane.insert_fleet(fleet(ids("old", 3)));

        let report = reconciler(&plane)
            .reconcile("web", AttachmentKind::TargetGroup, &ids("new", 2))
            .await
            .unwrap();
        assert_eq!((report.added, report.removed, report.batches), (2, 3, 2));

        let mutations: Vec<Operation> = plane
            .calls()
            .iter()
            .map(ControlCall::operation)
            .filter(|op| matches!(op, Operation::Attach | Operation::Detach))
            .collect();
        assert_eq!(mutations, vec![Operation::Detach, Operation::Attach]);
        assert_eq!(plane.fleet("web").unwrap().target_groups, ids("new", 2));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_each_batch_to_settle() {
        let plane = InMemoryControlPlane::new().with_behavior(SimBehavior {
            transition_polls: 3,
            ..SimBehavior::default()
        });
        plane.insert_fleet(fleet(BTreeSet::new()));

        reconciler(&plane)
            .reconcile("web", AttachmentKind::TargetGroup, &ids("tg", 12))
            .await
            .unwrap();

        // Every listing poll after the first attach happens before the second attach.
        let calls = plane.calls();
        let attaches: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| c.operation() == Operation::Attach)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(attaches.len(), 2);
        let listings_between = calls[attaches[0]..attaches[1]]
            .iter()
            .filter(|c| c.operation() == Operation::ListAttachmentStates)
            .count();
        assert!(listings_between >= 3, "only {listings_between} listings");
    }

    #[tokio::test(start_paused = true)]
    async fn later_batch_failure_is_partial() {
        let plane = InMemoryControlPlane::new();
        plane.insert_fleet(fleet(BTreeSet::new()));
        plane.inject_fault(
            Operation::Attach,
            FleetError::transient(CODE_THROTTLING, "rate exceeded"),
        );

        // First attach call fails: nothing applied, plain error.
        let err = reconciler(&plane)
            .reconcile("web", AttachmentKind::TargetGroup, &ids("tg", 12))
            .await
            .unwrap_err();
        assert!(!matches!(err, FleetError::PartialBatch { .. }));

        let plane = InMemoryControlPlane::new();
        plane.insert_fleet(fleet(BTreeSet::new()));
        let reconciler = reconciler(&plane);
        // Let the first batch through, fail the second.
        plane.inject_fault(Operation::ListAttachmentStates, FleetError::fatal("AccessDenied", "no"));
        let err = reconciler
            .reconcile("web", AttachmentKind::TargetGroup, &ids("tg", 12))
            .await
            .unwrap_err();
        match err {
            FleetError::PartialBatch { applied, total, .. } => assert_eq!((applied, total), (1, 2)),
            other => panic!("expected partial batch, got {other}"),
        }
        // The first batch stays attached.
        assert_eq!(plane.fleet("web").unwrap().target_groups.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn one_deadline_covers_every_batch() {
        // Each batch settles on its fifth listing poll, 15s after it is issued.
        let plane = InMemoryControlPlane::new().with_behavior(SimBehavior {
            transition_polls: 5,
            ..SimBehavior::default()
        });
        plane.insert_fleet(fleet(BTreeSet::new()));
        let reconciler = AttachmentReconciler::new(
            Arc::new(plane.clone()),
            Waiter::new(PollConfig {
                min_interval: Duration::from_secs(1),
                max_interval: Duration::from_secs(10),
            }),
            10,
            Duration::from_secs(20),
        );

        let started = tokio::time::Instant::now();
        let err = reconciler
            .reconcile("web", AttachmentKind::TargetGroup, &ids("tg", 12))
            .await
            .unwrap_err();
        assert!(started.elapsed() <= Duration::from_secs(20));
        match err {
            FleetError::PartialBatch { applied, total, source, .. } => {
                assert_eq!((applied, total), (2, 2));
                assert!(source.is_timeout(), "{source}");
            }
            other => panic!("expected partial batch, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_fleet_is_not_found() {
        let plane = InMemoryControlPlane::new();
        let err = reconciler(&plane)
            .reconcile("web", AttachmentKind::LoadBalancer, &ids("lb", 1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
