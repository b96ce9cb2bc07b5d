//! Lifecycle sequencing: which engine components run, in which order, for
//! create, update and delete of a fleet.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fleetgrid_state::{
    AttachmentKind, CapacityUpdate, FleetControl, FleetResult, RefreshParameters, ResultExt,
};

use crate::attach::{AttachmentReconciler, ReconcileReport};
use crate::capacity::{CapacityOutcome, CapacityPoller, CapacityTargets, CreatePredicate, UpdatePredicate};
use crate::config::EngineConfig;
use crate::drain::DrainSequencer;
use crate::refresh::{RefreshOrchestrator, RefreshTrigger};
use crate::retry::{Attempt, Waiter, remaining};

/// A requested refresh and what decides whether it runs.
#[derive(Debug, Clone, Default)]
pub struct RefreshRequest {
    pub parameters: RefreshParameters,
    pub trigger: RefreshTrigger,
    pub launch_template_changed: bool,
    pub changed_fields: BTreeSet<String>,
}

/// Changes an update applies. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdatePlan {
    pub resize: Option<CapacityUpdate>,
    pub load_balancers: Option<BTreeSet<String>>,
    pub target_groups: Option<BTreeSet<String>>,
    pub traffic_sources: Option<BTreeSet<String>>,
    pub refresh: Option<RefreshRequest>,
    /// Remove the warm pool; the flag forces deletion without draining.
    pub remove_warm_pool: Option<bool>,
    /// Wait for these targets once everything else is applied.
    pub capacity: Option<CapacityTargets>,
}

impl UpdatePlan {
    fn attachments(&self) -> impl Iterator<Item = (AttachmentKind, &BTreeSet<String>)> {
        [
            (AttachmentKind::LoadBalancer, self.load_balancers.as_ref()),
            (AttachmentKind::TargetGroup, self.target_groups.as_ref()),
            (AttachmentKind::TrafficSource, self.traffic_sources.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, desired)| desired.map(|d| (kind, d)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub attachments: Vec<ReconcileReport>,
    pub refresh_id: Option<String>,
    pub warm_pool_removed: bool,
    pub capacity: Option<CapacityOutcome>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete without draining; members are terminated by the control plane.
    pub force_delete: bool,
    pub force_delete_warm_pool: bool,
}

/// Drives the engine components for one fleet operation at a time.
pub struct LifecycleController<C: ?Sized> {
    control: Arc<C>,
    config: EngineConfig,
    waiter: Waiter,
    capacity: CapacityPoller<C>,
    attachments: AttachmentReconciler<C>,
    refresh: RefreshOrchestrator<C>,
    drain: DrainSequencer<C>,
}

impl<C: FleetControl + ?Sized> LifecycleController<C> {
    pub fn new(control: Arc<C>, config: EngineConfig) -> Self {
        Self::with_cancellation(control, config, CancellationToken::new())
    }

    /// Build a controller whose waits are abandoned when `token` is cancelled.
    pub fn with_cancellation(control: Arc<C>, config: EngineConfig, token: CancellationToken) -> Self {
        let waiter = Waiter::new(config.poll).with_cancellation(token);
        Self {
            capacity: CapacityPoller::new(control.clone(), waiter.clone())
                .ignore_failed_activities(config.ignore_failed_scaling_activities),
            attachments: AttachmentReconciler::new(
                control.clone(),
                waiter.clone(),
                config.attachment_batch_size,
                config.update_timeout,
            ),
            refresh: RefreshOrchestrator::new(
                control.clone(),
                waiter.clone(),
                config.refresh_cancel_timeout,
            ),
            drain: DrainSequencer::new(control.clone(), waiter.clone(), config.protection_batch_size),
            control,
            config,
            waiter,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn attachments(&self) -> &AttachmentReconciler<C> {
        &self.attachments
    }

    pub fn refresh(&self) -> &RefreshOrchestrator<C> {
        &self.refresh
    }

    pub fn drain(&self) -> &DrainSequencer<C> {
        &self.drain
    }

    /// After creation, wait for the fleet to reach its configured capacity.
    pub async fn create(&self, name: &str, targets: CapacityTargets) -> FleetResult<CapacityOutcome> {
        info!(fleet = %name, "waiting for new fleet capacity");
        self.capacity
            .wait(name, self.config.capacity_timeout, &CreatePredicate(targets), true)
            .await
    }

    /// Apply an update plan in order: resize, attachments, refresh, warm
    /// pool removal, then the capacity wait.
    pub async fn update(&self, name: &str, plan: &UpdatePlan) -> FleetResult<UpdateReport> {
        let mut report = UpdateReport::default();

        if let Some(resize) = plan.resize {
            self.control
                .set_fleet_capacity(name, resize)
                .await
                .context_with(|| format!("resizing fleet ({name})"))?;
            info!(fleet = %name, ?resize, "fleet resized");
        }

        for (kind, desired) in plan.attachments() {
            report
                .attachments
                .push(self.attachments.reconcile(name, kind, desired).await?);
        }

        if let Some(request) = &plan.refresh {
            if request
                .trigger
                .should_refresh(request.launch_template_changed, &request.changed_fields)
            {
                let id = self
                    .refresh
                    .start_refresh(name, &request.parameters, self.config.refresh_start_timeout)
                    .await?;
                report.refresh_id = Some(id);
            } else {
                debug!(fleet = %name, "no refresh trigger changed");
            }
        }

        if let Some(force) = plan.remove_warm_pool {
            self.drain
                .retire_warm_pool(name, force, self.config.update_timeout)
                .await?;
            report.warm_pool_removed = true;
        }

        if let Some(targets) = plan.capacity {
            report.capacity = Some(
                self.capacity
                    .wait(name, self.config.capacity_timeout, &UpdatePredicate(targets), false)
                    .await?,
            );
        }

        Ok(report)
    }

    /// Retire the warm pool, drain unless forced, then delete the fleet
    /// and wait for it to disappear.
    pub async fn delete(&self, name: &str, options: DeleteOptions) -> FleetResult<()> {
        let deadline = Instant::now() + self.config.delete_timeout;

        let Some(fleet) = self
            .control
            .get_fleet(name)
            .await
            .map_err(|e| e.context(format!("reading fleet ({name})")))?
        else {
            info!(fleet = %name, "fleet already deleted");
            return Ok(());
        };

        if fleet.warm_pool.is_some() {
            let force = options.force_delete || options.force_delete_warm_pool;
            self.drain.retire_warm_pool(name, force, remaining(deadline)).await?;
        }

        if options.force_delete {
            info!(fleet = %name, "force delete, skipping drain");
        } else {
            self.drain.drain_fleet(name, remaining(deadline)).await?;
        }

        let what = format!("fleet ({name}) to accept delete");
        let force = options.force_delete;
        self.waiter
            .retry(&what, remaining(deadline), move || async move {
                match self.control.delete_fleet(name, force).await {
                    Err(e) if e.is_not_found() => Attempt::Done(()),
                    result => Attempt::from_result(result),
                }
            })
            .await?;
        info!(fleet = %name, force, "fleet delete issued");

        let what = format!("fleet ({name}) to be deleted");
        self.waiter
            .retry(&what, remaining(deadline), move || async move {
                match self.control.get_fleet(name).await {
                    Ok(None) => Attempt::Done(()),
                    Ok(Some(fleet)) => Attempt::Retry(format!(
                        "fleet still exists with {} members",
                        fleet.members.len()
                    )),
                    Err(e) => Attempt::from_result(Err(e)),
                }
            })
            .await?;
        info!(fleet = %name, "fleet deleted");
        Ok(())
    }
}
