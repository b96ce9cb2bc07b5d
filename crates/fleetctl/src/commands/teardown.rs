use serde_json::json;

use fleetgrid_converge::DeleteOptions;

use super::Session;

pub async fn drain(session: &Session, fleet: &str, warm_pool: bool) -> anyhow::Result<()> {
    let timeout = session.controller.config().delete_timeout;
    let drain = session.controller.drain();
    if warm_pool {
        drain.drain_warm_pool(fleet, timeout).await?;
    } else {
        drain.drain_fleet(fleet, timeout).await?;
    }

    let target = if warm_pool { "warm pool" } else { "fleet" };
    session.emit(
        &format!("✓ Drained {target} of {fleet}"),
        json!({ "fleet": fleet, "drained": target }),
    );
    session.summarize_calls();
    Ok(())
}

pub async fn delete(session: &Session, fleet: &str, force: bool, force_warm_pool: bool) -> anyhow::Result<()> {
    session
        .controller
        .delete(
            fleet,
            DeleteOptions {
                force_delete: force,
                force_delete_warm_pool: force_warm_pool,
            },
        )
        .await?;

    session.emit(
        &format!("✓ Deleted {fleet}"),
        json!({ "fleet": fleet, "deleted": true, "forced": force }),
    );
    session.summarize_calls();
    Ok(())
}
