//! Refresh orchestration.
//!
//! A fleet runs at most one refresh at a time. Starting a new one while
//! another is active cancels the active one, waits for it to stop, and
//! tries again, all within the caller's start budget:
//!
//! ```text
//!   start ──ok──▶ id
//!     │
//!     └─ RefreshInProgress ──▶ cancel ──▶ wait until Cancelled | Failed | Successful ──▶ retry start
//! ```
//!
//! Waiting for a started refresh to finish uses a different terminal
//! partition: only `Successful` is success, `Failed` and `Cancelled` are
//! errors.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fleetgrid_state::{
    Completion, FleetControl, FleetError, FleetResult, RefreshOperation, RefreshParameters,
    RefreshStatus, ResultExt,
};

use crate::retry::{Attempt, Waiter};

/// Error code reported when a refresh ends in `Failed` or `Cancelled`.
pub const CODE_REFRESH_FAILED: &str = "RefreshFailed";

/// Decides whether an update needs a refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTrigger {
    /// Changed fields that trigger a refresh besides the launch template.
    #[serde(default)]
    pub fields: BTreeSet<String>,
}

impl RefreshTrigger {
    pub fn should_refresh(&self, launch_template_changed: bool, changed_fields: &BTreeSet<String>) -> bool {
        launch_template_changed || !self.fields.is_disjoint(changed_fields)
    }
}

/// Starts, cancels and waits on fleet refreshes.
pub struct RefreshOrchestrator<C: ?Sized> {
    control: Arc<C>,
    waiter: Waiter,
    cancel_timeout: Duration,
}

impl<C: FleetControl + ?Sized> RefreshOrchestrator<C> {
    /// `cancel_timeout` bounds each wait for a cancelled refresh to stop.
    pub fn new(control: Arc<C>, waiter: Waiter, cancel_timeout: Duration) -> Self {
        Self {
            control,
            waiter,
            cancel_timeout,
        }
    }

    /// Start a refresh, displacing any active one. Returns the new id.
    pub async fn start_refresh(
        &self,
        name: &str,
        params: &RefreshParameters,
        start_budget: Duration,
    ) -> FleetResult<String> {
        let what = format!("refresh of fleet ({name}) to start");
        self.waiter
            .retry(&what, start_budget, move || self.try_start(name, params))
            .await
    }

    async fn try_start(&self, name: &str, params: &RefreshParameters) -> Attempt<String> {
        match self.control.start_refresh(name, params).await {
            Ok(id) => {
                info!(fleet = %name, refresh = %id, "refresh started");
                Attempt::Done(id)
            }
            Err(e) if e.is_refresh_conflict() => {
                info!(fleet = %name, "refresh already active, cancelling it");
                match self.cancel_refresh(name).await {
                    Ok(_) => Attempt::Retry(format!("cancelled conflicting refresh on fleet ({name})")),
                    Err(e) => Attempt::Fatal(e),
                }
            }
            Err(e) => Attempt::Fatal(e.context(format!("starting refresh of fleet ({name})"))),
        }
    }

    /// Cancel the active refresh and wait for it to stop.
    ///
    /// Returns the id of the cancelled refresh, or `None` when nothing was
    /// active.
    pub async fn cancel_refresh(&self, name: &str) -> FleetResult<Option<String>> {
        let cancelled = self
            .control
            .cancel_refresh(name)
            .await
            .context_with(|| format!("cancelling refresh of fleet ({name})"))?;

        let Some(id) = cancelled else {
            debug!(fleet = %name, "no active refresh to cancel");
            return Ok(None);
        };

        let what = format!("refresh ({id}) of fleet ({name}) to stop");
        let status = self
            .waiter
            .retry(&what, self.cancel_timeout, || self.poll_cancellation(name, &id))
            .await?;
        info!(fleet = %name, refresh = %id, ?status, "refresh stopped");
        Ok(Some(id))
    }

    async fn poll_cancellation(&self, name: &str, id: &str) -> Attempt<Option<RefreshStatus>> {
        match self.control.get_refresh(name, id).await {
            // Gone from the listing: no longer active.
            Ok(None) => Attempt::Done(None),
            Ok(Some(op)) if op.status.ends_cancellation_wait() => Attempt::Done(Some(op.status)),
            Ok(Some(op)) => Attempt::Retry(format!("refresh ({id}) is {}", op.status)),
            Err(e) => Attempt::from_result(Err(e)),
        }
    }

    /// Wait for a started refresh to succeed.
    pub async fn wait_for_refresh(
        &self,
        name: &str,
        id: &str,
        budget: Duration,
    ) -> FleetResult<RefreshOperation> {
        let what = format!("refresh ({id}) of fleet ({name}) to complete");
        let op = self
            .waiter
            .retry(&what, budget, move || self.poll_completion(name, id))
            .await?;
        info!(fleet = %name, refresh = %id, "refresh complete");
        Ok(op)
    }

    async fn poll_completion(&self, name: &str, id: &str) -> Attempt<RefreshOperation> {
        let op = match self.control.get_refresh(name, id).await {
            Ok(Some(op)) => op,
            Ok(None) => return Attempt::Fatal(FleetError::not_found(format!("refresh ({id})"))),
            Err(e) => return Attempt::from_result(Err(e)),
        };
        match op.status.completion() {
            Completion::Succeeded => Attempt::Done(op),
            Completion::Failed => {
                let reason = op.status_reason.as_deref().unwrap_or("no reason given");
                Attempt::Fatal(FleetError::fatal(
                    CODE_REFRESH_FAILED,
                    format!("refresh ({id}) of fleet ({name}) ended {}: {reason}", op.status),
                ))
            }
            Completion::Pending => Attempt::Retry(format!(
                "refresh ({id}) is {} ({}% complete)",
                op.status, op.percentage_complete
            )),
        }
    }
}
