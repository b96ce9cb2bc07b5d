//! End-to-end lifecycle runs against the simulated control plane.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use fleetgrid_converge::{
    CapacityOutcome, CapacityPredicate, CapacityTargets, DeleteOptions, EngineConfig,
    LifecycleController, PollConfig, RefreshRequest, RefreshTrigger, UpdatePlan, UpdatePredicate,
    count_capacity,
};
use fleetgrid_state::{
    AttachmentKind, CapacityUpdate, ControlCall, FleetDescriptor, FleetError, HealthStatus,
    InMemoryControlPlane, LifecycleState, Member, Operation, SimBehavior, WarmPool,
    WarmPoolConfig, WarmPoolStatus,
};
use tokio_util::sync::CancellationToken;

fn member(id: &str) -> Member {
    Member {
        id: id.to_string(),
        health: Some(HealthStatus::Healthy),
        lifecycle: LifecycleState::InService,
        weighted_capacity: None,
        protected_from_scale_in: false,
    }
}

/// Fleet "web": min 2, desired 4, max 6, two healthy members behind one load balancer.
fn web() -> FleetDescriptor {
    FleetDescriptor {
        name: "web".to_string(),
        min_size: 2,
        max_size: 6,
        desired_capacity: 4,
        members: vec![member("i-1"), member("i-2")],
        load_balancers: BTreeSet::from(["lb-web".to_string()]),
        target_groups: BTreeSet::new(),
        traffic_sources: BTreeSet::new(),
        warm_pool: None,
        protect_from_scale_in: false,
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        poll: PollConfig {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
        },
        capacity_timeout: Duration::from_secs(120),
        ..EngineConfig::default()
    }
}

fn controller(plane: &InMemoryControlPlane) -> LifecycleController<InMemoryControlPlane> {
    LifecycleController::new(Arc::new(plane.clone()), config())
}

fn web_health(plane: &InMemoryControlPlane) {
    plane.set_load_balancer_health(
        "lb-web",
        HashMap::from([
            ("i-1".to_string(), "InService".to_string()),
            ("i-2".to_string(), "InService".to_string()),
        ]),
    );
}

fn web_targets() -> CapacityTargets {
    CapacityTargets {
        min_size: 2,
        desired_capacity: 4,
        ..CapacityTargets::default()
    }
}

#[test]
fn web_scenario_needs_exactly_four() {
    let fleet = web();
    let lb = HashMap::from([(
        "lb-web".to_string(),
        HashMap::from([
            ("i-1".to_string(), "InService".to_string()),
            ("i-2".to_string(), "InService".to_string()),
        ]),
    )]);
    let count = count_capacity(&fleet, &lb, &HashMap::new());
    let verdict = UpdatePredicate(web_targets()).check(count.fleet, count.balanced);
    assert!(!verdict.satisfied);
    assert_eq!(verdict.reason, "Need exactly 4 healthy instances in ASG, have 2");
}

#[test]
fn update_predicate_flips_away_from_target() {
    let p = UpdatePredicate(CapacityTargets {
        min_size: 2,
        desired_capacity: 4,
        min_balanced_capacity: 3,
        wait_for_balanced_capacity: 0,
    });
    assert!(p.check(4, 3).satisfied);
    assert!(p.check(4, 6).satisfied);
    for (fleet, balanced) in [(3, 3), (5, 3), (4, 2)] {
        assert!(!p.check(fleet, balanced).satisfied, "({fleet}, {balanced})");
    }
}

#[tokio::test(start_paused = true)]
async fn update_times_out_with_gap_when_fleet_stalls() {
    let plane = InMemoryControlPlane::new().with_behavior(SimBehavior {
        converge_members: false,
        ..SimBehavior::default()
    });
    plane.insert_fleet(web());
    web_health(&plane);

    let err = controller(&plane)
        .update(
            "web",
            &UpdatePlan {
                capacity: Some(web_targets()),
                ..UpdatePlan::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(
        err.to_string()
            .contains("Need exactly 4 healthy instances in ASG, have 2")
    );
}

#[tokio::test(start_paused = true)]
async fn update_converges_once_new_members_are_balanced() {
    let plane = InMemoryControlPlane::new();
    plane.insert_fleet(web());
    web_health(&plane);

    let report = controller(&plane)
        .update(
            "web",
            &UpdatePlan {
                capacity: Some(CapacityTargets {
                    min_balanced_capacity: 4,
                    ..web_targets()
                }),
                ..UpdatePlan::default()
            },
        )
        .await
        .unwrap();
    match report.capacity {
        Some(CapacityOutcome::Satisfied(count)) => {
            assert_eq!((count.fleet, count.balanced), (4, 4));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn twelve_target_groups_attach_in_two_batches() {
    let plane = InMemoryControlPlane::new();
    plane.insert_fleet(web());
    let desired: BTreeSet<String> = (1..=12).map(|i| format!("tg-{i}")).collect();

    let report = controller(&plane)
        .update(
            "web",
            &UpdatePlan {
                target_groups: Some(desired.clone()),
                ..UpdatePlan::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(report.attachments.len(), 1);
    assert_eq!(report.attachments[0].batches, 2);
    let sizes: Vec<usize> = plane
        .calls_for(Operation::Attach)
        .iter()
        .map(|c| match c {
            ControlCall::Attach { ids, .. } => ids.len(),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(sizes, vec![10, 2]);
    assert_eq!(plane.fleet("web").unwrap().target_groups, desired);
}

#[tokio::test(start_paused = true)]
async fn batches_respect_limits_and_removals_go_first() {
    let plane = InMemoryControlPlane::new();
    let mut fleet = web();
    fleet.load_balancers = (1..=15).map(|i| format!("old-{i}")).collect();
    plane.insert_fleet(fleet);
    let desired: BTreeSet<String> = (1..=23).map(|i| format!("new-{i}")).collect();

    controller(&plane)
        .update(
            "web",
            &UpdatePlan {
                load_balancers: Some(desired),
                ..UpdatePlan::default()
            },
        )
        .await
        .unwrap();

    let mutations: Vec<(Operation, usize)> = plane
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ControlCall::Detach { ids, .. } => Some((Operation::Detach, ids.len())),
            ControlCall::Attach { ids, .. } => Some((Operation::Attach, ids.len())),
            _ => None,
        })
        .collect();
    assert_eq!(
        mutations,
        vec![
            (Operation::Detach, 10),
            (Operation::Detach, 5),
            (Operation::Attach, 10),
            (Operation::Attach, 10),
            (Operation::Attach, 3),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn triggered_refresh_replaces_active_one() {
    let plane = InMemoryControlPlane::new();
    plane.insert_fleet(web());
    let controller = controller(&plane);
    let request = RefreshRequest {
        launch_template_changed: true,
        ..RefreshRequest::default()
    };
    let plan = UpdatePlan {
        refresh: Some(request),
        ..UpdatePlan::default()
    };

    let first = controller.update("web", &plan).await.unwrap().refresh_id.unwrap();
    let second = controller.update("web", &plan).await.unwrap().refresh_id.unwrap();
    assert_ne!(first, second);
    assert_eq!(plane.active_refresh("web").unwrap().id, second);
}

#[tokio::test(start_paused = true)]
async fn untriggered_refresh_is_skipped() {
    let plane = InMemoryControlPlane::new();
    plane.insert_fleet(web());
    let plan = UpdatePlan {
        refresh: Some(RefreshRequest {
            trigger: RefreshTrigger {
                fields: BTreeSet::from(["tag".to_string()]),
            },
            changed_fields: BTreeSet::from(["max_size".to_string()]),
            ..RefreshRequest::default()
        }),
        ..UpdatePlan::default()
    };
    let report = controller(&plane).update("web", &plan).await.unwrap();
    assert_eq!(report.refresh_id, None);
    assert!(plane.calls_for(Operation::StartRefresh).is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_with_nothing_active_is_ok() {
    let plane = InMemoryControlPlane::new();
    plane.insert_fleet(web());
    let cancelled = controller(&plane).refresh().cancel_refresh("web").await.unwrap();
    assert_eq!(cancelled, None);
}

#[tokio::test(start_paused = true)]
async fn update_resizes_then_waits() {
    let plane = InMemoryControlPlane::new();
    plane.insert_fleet(web());
    web_health(&plane);

    let report = controller(&plane)
        .update(
            "web",
            &UpdatePlan {
                resize: Some(CapacityUpdate {
                    min_size: None,
                    max_size: None,
                    desired_capacity: Some(3),
                }),
                capacity: Some(CapacityTargets {
                    min_size: 2,
                    desired_capacity: 3,
                    ..CapacityTargets::default()
                }),
                ..UpdatePlan::default()
            },
        )
        .await
        .unwrap();
    assert!(matches!(report.capacity, Some(CapacityOutcome::Satisfied(_))));
    assert_eq!(plane.fleet("web").unwrap().members.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn create_waits_for_launches() {
    let plane = InMemoryControlPlane::new();
    let mut fleet = web();
    fleet.members.clear();
    fleet.load_balancers.clear();
    plane.insert_fleet(fleet);

    let outcome = controller(&plane).create("web", web_targets()).await.unwrap();
    assert!(matches!(outcome, CapacityOutcome::Satisfied(c) if c.fleet == 4));
}

#[tokio::test(start_paused = true)]
async fn delete_drains_protected_fleet_with_warm_pool() {
    let plane = InMemoryControlPlane::new();
    let mut fleet = web();
    for m in &mut fleet.members {
        m.protected_from_scale_in = true;
    }
    fleet.desired_capacity = 2;
    plane.insert_fleet(fleet);
    plane.insert_warm_pool(
        "web",
        WarmPool {
            config: WarmPoolConfig {
                pool_state: "Stopped".to_string(),
                min_size: 1,
                max_prepared_capacity: -1,
                reuse_on_scale_in: false,
            },
            status: WarmPoolStatus::Active,
            members: vec![member("w-1")],
        },
    );

    controller(&plane)
        .delete("web", DeleteOptions::default())
        .await
        .unwrap();

    assert!(plane.fleet("web").is_none());
    let ops: Vec<Operation> = plane.calls().iter().map(ControlCall::operation).collect();
    let position = |op: Operation| ops.iter().position(|o| *o == op).unwrap();
    assert!(position(Operation::SetWarmPoolCapacity) < position(Operation::SetMemberProtection));
    assert!(position(Operation::SetMemberProtection) < position(Operation::SetFleetCapacity));
    assert!(position(Operation::SetFleetCapacity) < position(Operation::DeleteFleet));
    assert_eq!(
        plane.calls_for(Operation::DeleteFleet),
        vec![ControlCall::DeleteFleet {
            name: "web".to_string(),
            force: false,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn force_delete_never_drains() {
    let plane = InMemoryControlPlane::new();
    let mut fleet = web();
    fleet.members[0].protected_from_scale_in = true;
    plane.insert_fleet(fleet);

    controller(&plane)
        .delete(
            "web",
            DeleteOptions {
                force_delete: true,
                force_delete_warm_pool: false,
            },
        )
        .await
        .unwrap();

    assert!(plane.fleet("web").is_none());
    assert!(plane.calls_for(Operation::SetMemberProtection).is_empty());
    assert!(plane.calls_for(Operation::SetFleetCapacity).is_empty());
    assert_eq!(
        plane.calls_for(Operation::DeleteFleet),
        vec![ControlCall::DeleteFleet {
            name: "web".to_string(),
            force: true,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn delete_of_missing_fleet_succeeds() {
    let plane = InMemoryControlPlane::new();
    controller(&plane)
        .delete("web", DeleteOptions::default())
        .await
        .unwrap();
    assert_eq!(plane.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn delete_retries_busy_fleet() {
    let plane = InMemoryControlPlane::new();
    let mut fleet = web();
    fleet.members.clear();
    fleet.desired_capacity = 0;
    fleet.min_size = 0;
    plane.insert_fleet(fleet);
    plane.inject_fault(
        Operation::DeleteFleet,
        FleetError::transient("ResourceInUse", "scaling activity in progress"),
    );

    controller(&plane)
        .delete("web", DeleteOptions::default())
        .await
        .unwrap();
    assert_eq!(plane.calls_for(Operation::DeleteFleet).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_token_abandons_capacity_wait() {
    let plane = InMemoryControlPlane::new().with_behavior(SimBehavior {
        converge_members: false,
        ..SimBehavior::default()
    });
    plane.insert_fleet(web());
    web_health(&plane);
    let token = CancellationToken::new();
    let controller =
        LifecycleController::with_cancellation(Arc::new(plane.clone()), config(), token.clone());

    let cancel = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();
    });
    let err = controller
        .update(
            "web",
            &UpdatePlan {
                capacity: Some(web_targets()),
                ..UpdatePlan::default()
            },
        )
        .await
        .unwrap_err();
    cancel.await.unwrap();
    assert!(matches!(err, FleetError::Cancelled { .. }));
}

#[tokio::test(start_paused = true)]
async fn traffic_sources_reconcile_like_target_groups() {
    let plane = InMemoryControlPlane::new();
    plane.insert_fleet(web());
    let desired = BTreeSet::from(["vpc-lattice-1".to_string()]);

    let report = controller(&plane)
        .update(
            "web",
            &UpdatePlan {
                traffic_sources: Some(desired.clone()),
                ..UpdatePlan::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(report.attachments[0].kind, AttachmentKind::TrafficSource);
    assert_eq!(plane.fleet("web").unwrap().traffic_sources, desired);
}
