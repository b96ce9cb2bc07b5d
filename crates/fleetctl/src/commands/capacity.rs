use serde_json::json;

use fleetgrid_converge::{CapacityOutcome, CapacityTargets, UpdatePlan};

use super::Session;

pub async fn wait(session: &Session, fleet: &str, update: bool, min_balanced: u32) -> anyhow::Result<()> {
    let Some(descriptor) = session.plane.fleet(fleet) else {
        anyhow::bail!("fleet {fleet} is not in the world fixture");
    };
    let targets = CapacityTargets {
        min_size: descriptor.min_size,
        desired_capacity: descriptor.desired_capacity,
        min_balanced_capacity: min_balanced,
        wait_for_balanced_capacity: 0,
    };

    let outcome = if update {
        session
            .controller
            .update(
                fleet,
                &UpdatePlan {
                    capacity: Some(targets),
                    ..UpdatePlan::default()
                },
            )
            .await?
            .capacity
            .unwrap_or(CapacityOutcome::Skipped)
    } else {
        session.controller.create(fleet, targets).await?
    };

    match outcome {
        CapacityOutcome::Satisfied(count) => session.emit(
            &format!(
                "✓ Fleet {fleet} satisfied: {} in fleet, {} behind load balancers",
                count.fleet, count.balanced
            ),
            json!({ "fleet": fleet, "outcome": "satisfied", "have_fleet": count.fleet, "have_balanced": count.balanced }),
        ),
        CapacityOutcome::Skipped => session.emit(
            &format!("- Capacity wait disabled for {fleet}"),
            json!({ "fleet": fleet, "outcome": "skipped" }),
        ),
        CapacityOutcome::Vanished => session.emit(
            &format!("! Fleet {fleet} no longer exists"),
            json!({ "fleet": fleet, "outcome": "vanished" }),
        ),
    }
    session.summarize_calls();
    Ok(())
}
