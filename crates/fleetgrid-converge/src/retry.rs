//! Bounded retry with capped exponential backoff.
//!
//! Every wait in the engine runs through [`Waiter::retry`]: the attempt is
//! re-invoked until it reports [`Attempt::Done`] or [`Attempt::Fatal`], or
//! the budget runs out. When the budget runs out on a retryable outcome,
//! one final attempt is always made so a condition that converges exactly
//! at expiry is still reported as success.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use fleetgrid_state::{FleetError, FleetResult};

use crate::config::PollConfig;

/// Outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// Not there yet. Carries a human-readable description of the gap.
    Retry(String),
    Fatal(FleetError),
}

impl<T> Attempt<T> {
    /// Map a control plane result: transient errors retry, others are fatal.
    pub fn from_result(result: FleetResult<T>) -> Self {
        match result {
            Ok(v) => Attempt::Done(v),
            Err(e) if e.is_transient() => Attempt::Retry(e.to_string()),
            Err(e) => Attempt::Fatal(e),
        }
    }
}

/// Doubling delay, capped at the configured maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(poll: &PollConfig) -> Self {
        Self {
            current: poll.min_interval.max(Duration::from_millis(1)),
            max: poll.max_interval.max(poll.min_interval),
        }
    }

    /// The delay to use now; the following one is doubled up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// Runs retry loops with shared poll settings and a cancellation token.
#[derive(Debug, Clone, Default)]
pub struct Waiter {
    poll: PollConfig,
    cancel: CancellationToken,
}

impl Waiter {
    pub fn new(poll: PollConfig) -> Self {
        Self {
            poll,
            cancel: CancellationToken::new(),
        }
    }

    /// Abandon waits when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Retry `attempt` for up to `budget`, then make one last attempt.
    pub async fn retry<T, F, Fut>(&self, what: &str, budget: Duration, mut attempt: F) -> FleetResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let started = Instant::now();
        let mut backoff = Backoff::new(&self.poll);
        let mut attempts = 0u32;

        loop {
            self.check_cancelled(what)?;
            attempts += 1;
            match attempt().await {
                Attempt::Done(v) => return Ok(v),
                Attempt::Fatal(e) => return Err(e),
                Attempt::Retry(gap) => {
                    let elapsed = started.elapsed();
                    if elapsed >= budget {
                        break;
                    }
                    let delay = backoff.next_delay().min(budget - elapsed);
                    debug!(
                        what,
                        attempt = attempts,
                        gap = %gap,
                        delay_ms = delay.as_millis() as u64,
                        "not yet converged"
                    );
                    self.pause(what, delay).await?;
                    if started.elapsed() >= budget {
                        break;
                    }
                }
            }
        }

        // Last chance.
        self.check_cancelled(what)?;
        match attempt().await {
            Attempt::Done(v) => {
                debug!(what, attempts = attempts + 1, "converged on final attempt");
                Ok(v)
            }
            Attempt::Fatal(e) => Err(e),
            Attempt::Retry(gap) => Err(FleetError::Timeout {
                what: what.to_string(),
                elapsed: started.elapsed(),
                last_state: gap,
                activity: None,
            }),
        }
    }

    /// Sleep for `delay` unless the wait is cancelled first.
    pub async fn pause(&self, what: &str, delay: Duration) -> FleetResult<()> {
        tokio::select! {
            _ = sleep(delay) => Ok(()),
            _ = self.cancel.cancelled() => Err(cancelled(what)),
        }
    }

    fn check_cancelled(&self, what: &str) -> FleetResult<()> {
        if self.cancel.is_cancelled() {
            return Err(cancelled(what));
        }
        Ok(())
    }
}

fn cancelled(what: &str) -> FleetError {
    FleetError::Cancelled {
        what: what.to_string(),
    }
}

/// Time left before `deadline`, zero once it has passed.
pub fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
