use std::collections::BTreeSet;

use serde_json::json;

use fleetgrid_state::AttachmentKind;

use super::Session;

pub async fn reconcile(
    session: &Session,
    fleet: &str,
    kind: AttachmentKind,
    ids: Vec<String>,
) -> anyhow::Result<()> {
    let desired: BTreeSet<String> = ids.into_iter().collect();
    let report = session
        .controller
        .attachments()
        .reconcile(fleet, kind, &desired)
        .await?;

    session.emit(
        &format!(
            "✓ Reconciled {kind} on {fleet}: +{} -{} in {} batches",
            report.added, report.removed, report.batches
        ),
        json!({
            "fleet": fleet,
            "kind": kind,
            "added": report.added,
            "removed": report.removed,
            "batches": report.batches,
            "attached": desired,
        }),
    );
    session.summarize_calls();
    Ok(())
}
