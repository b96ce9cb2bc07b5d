use serde_json::json;

use fleetgrid_state::RefreshParameters;

use super::Session;

pub async fn start(session: &Session, fleet: &str, wait: bool) -> anyhow::Result<()> {
    let config = session.controller.config();
    let refresh = session.controller.refresh();
    let id = refresh
        .start_refresh(fleet, &RefreshParameters::default(), config.refresh_start_timeout)
        .await?;

    if wait {
        let op = refresh
            .wait_for_refresh(fleet, &id, config.update_timeout)
            .await?;
        session.emit(
            &format!("✓ Refresh {id} on {fleet} finished: {}", op.status),
            json!({ "fleet": fleet, "refresh": id, "status": op.status }),
        );
    } else {
        session.emit(
            &format!("✓ Refresh {id} started on {fleet}"),
            json!({ "fleet": fleet, "refresh": id }),
        );
    }
    session.summarize_calls();
    Ok(())
}

pub async fn cancel(session: &Session, fleet: &str) -> anyhow::Result<()> {
    match session.controller.refresh().cancel_refresh(fleet).await? {
        Some(id) => session.emit(
            &format!("✓ Refresh {id} on {fleet} cancelled"),
            json!({ "fleet": fleet, "cancelled": id }),
        ),
        None => session.emit(
            &format!("- No active refresh on {fleet}"),
            json!({ "fleet": fleet, "cancelled": null }),
        ),
    }
    Ok(())
}
