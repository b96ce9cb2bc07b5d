//! Draining fleets and warm pools ahead of deletion.
//!
//! Fleet drain: lift scale-in protection, zero the capacity, then wait for
//! the member list to empty. Protection goes first because reducing
//! capacity never terminates a protected member.
//!
//! Warm pool drain: zero the pool capacity, wait for its members to go,
//! delete the pool unless a delete is already pending, then wait for the
//! pool itself to disappear.
//!
//! Neither drain deletes the fleet itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use fleetgrid_state::{
    CODE_RESOURCE_IN_USE, CODE_SCALING_ACTIVITY_IN_PROGRESS, CODE_VALIDATION, CapacityUpdate,
    FleetControl, FleetError, FleetResult, WarmPoolStatus,
};

use crate::retry::{Attempt, Waiter, remaining};

/// Protection changes for members that already left the fleet fail with this.
const NOT_PART_OF_FLEET: &str = "not part of";

pub struct DrainSequencer<C: ?Sized> {
    control: Arc<C>,
    waiter: Waiter,
    protection_batch_size: usize,
}

impl<C: FleetControl + ?Sized> DrainSequencer<C> {
    pub fn new(control: Arc<C>, waiter: Waiter, protection_batch_size: usize) -> Self {
        Self {
            control,
            waiter,
            protection_batch_size,
        }
    }

    /// Bring the fleet's member count to zero within `budget`.
    pub async fn drain_fleet(&self, name: &str, budget: Duration) -> FleetResult<()> {
        let Some(fleet) = self
            .control
            .get_fleet(name)
            .await
            .map_err(|e| e.context(format!("reading fleet ({name})")))?
        else {
            debug!(fleet = %name, "fleet already gone, nothing to drain");
            return Ok(());
        };

        let protected = fleet.protected_members();
        if !protected.is_empty() {
            info!(fleet = %name, members = protected.len(), "lifting scale-in protection");
        }
        for batch in protected.chunks(self.protection_batch_size.max(1)) {
            match self.control.set_member_protection(name, batch, false).await {
                Ok(()) => {}
                Err(e) if e.message_contains(CODE_VALIDATION, NOT_PART_OF_FLEET) => {
                    warn!(fleet = %name, error = %e, "ignoring protection change for departed member");
                }
                Err(e) => {
                    return Err(e.context(format!("lifting scale-in protection on fleet ({name})")));
                }
            }
        }

        self.control
            .set_fleet_capacity(name, CapacityUpdate::zero())
            .await
            .map_err(|e| e.context(format!("zeroing capacity of fleet ({name})")))?;
        info!(fleet = %name, "capacity set to zero, waiting for members to terminate");

        let what = format!("fleet ({name}) to drain");
        self.waiter
            .retry(&what, budget, move || async move {
                match self.control.get_fleet(name).await {
                    Ok(None) => Attempt::Done(()),
                    Ok(Some(fleet)) if fleet.members.is_empty() => Attempt::Done(()),
                    Ok(Some(fleet)) => {
                        Attempt::Retry(format!("{} members remaining", fleet.members.len()))
                    }
                    Err(e) => Attempt::from_result(Err(e)),
                }
            })
            .await?;
        info!(fleet = %name, "fleet drained");
        Ok(())
    }

    /// Empty and delete the fleet's warm pool within `budget`.
    pub async fn drain_warm_pool(&self, name: &str, budget: Duration) -> FleetResult<()> {
        let deadline = Instant::now() + budget;

        match self.control.set_warm_pool_capacity(name, 0, 0).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(fleet = %name, "no warm pool to drain");
                return Ok(());
            }
            Err(e) => return Err(e.context(format!("zeroing warm pool of fleet ({name})"))),
        }

        let what = format!("warm pool of fleet ({name}) to drain");
        self.waiter
            .retry(&what, remaining(deadline), move || async move {
                match self.control.get_warm_pool(name).await {
                    Ok(None) => Attempt::Done(()),
                    Ok(Some(pool)) if pool.members.is_empty() => Attempt::Done(()),
                    Ok(Some(pool)) => Attempt::Retry(format!(
                        "{} warm pool members remaining",
                        pool.members.len()
                    )),
                    Err(e) => Attempt::from_result(Err(e)),
                }
            })
            .await?;
        info!(fleet = %name, "warm pool drained");

        self.delete_warm_pool(name, false, deadline).await
    }

    /// Remove the warm pool. Without `force` the pool is drained first.
    pub async fn retire_warm_pool(&self, name: &str, force: bool, budget: Duration) -> FleetResult<()> {
        if force {
            self.delete_warm_pool(name, true, Instant::now() + budget).await
        } else {
            self.drain_warm_pool(name, budget).await
        }
    }

    async fn delete_warm_pool(&self, name: &str, force: bool, deadline: Instant) -> FleetResult<()> {
        let pool = self
            .control
            .get_warm_pool(name)
            .await
            .map_err(|e| e.context(format!("reading warm pool of fleet ({name})")))?;

        match pool {
            None => {
                debug!(fleet = %name, "warm pool already gone");
                return Ok(());
            }
            Some(pool) if pool.status == WarmPoolStatus::PendingDelete => {
                debug!(fleet = %name, "warm pool delete already pending");
            }
            Some(_) => {
                let what = format!("warm pool of fleet ({name}) to accept delete");
                self.waiter
                    .retry(&what, remaining(deadline), move || async move {
                        match self.control.delete_warm_pool(name, force).await {
                            Ok(()) => Attempt::Done(()),
                            Err(e) if e.is_not_found() => Attempt::Done(()),
                            Err(e)
                                if matches!(
                                    e.code(),
                                    Some(CODE_RESOURCE_IN_USE | CODE_SCALING_ACTIVITY_IN_PROGRESS)
                                ) =>
                            {
                                Attempt::Retry(e.to_string())
                            }
                            Err(e) => Attempt::Fatal(e.context(format!("deleting warm pool of fleet ({name})"))),
                        }
                    })
                    .await?;
                info!(fleet = %name, force, "warm pool delete issued");
            }
        }

        let what = format!("warm pool of fleet ({name}) to be deleted");
        self.waiter
            .retry(&what, remaining(deadline), move || async move {
                match self.control.get_warm_pool(name).await {
                    Ok(None) => Attempt::Done(()),
                    Ok(Some(pool)) => Attempt::Retry(format!(
                        "warm pool is {:?} with {} members",
                        pool.status,
                        pool.members.len()
                    )),
                    Err(e) => Attempt::from_result(Err(e)),
                }
            })
            .await?;
        info!(fleet = %name, "warm pool deleted");
        Ok(())
    }
}
