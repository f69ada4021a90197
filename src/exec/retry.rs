// src/exec/retry.rs

//! Bounded retry around a task callable.

use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::DagflowError;
use crate::exec::callable::{TaskCallable, TaskOutput};
use crate::exec::context::TaskContext;

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Wait the same amount before every retry.
    Fixed(Duration),
    /// Wait `step * n` before the n-th retry.
    Linear(Duration),
    /// Wait `base * 2^(n-1)` before the n-th retry, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::None
    }
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(d) => d,
            Backoff::Linear(step) => step.saturating_mul(retry),
            Backoff::Exponential { base, max } => {
                let shift = retry.saturating_sub(1).min(31);
                base.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

/// How many times a task may be re-attempted after failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::None,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Run `callable` under `policy`.
///
/// `on_retry(attempt, error)` is awaited before each re-attempt, with the
/// number of the attempt that just failed. After the last attempt fails the
/// error is returned as [`DagflowError::TaskExecution`].
pub async fn execute<F, Fut>(
    callable: &dyn TaskCallable,
    ctx: TaskContext,
    policy: RetryPolicy,
    mut on_retry: F,
) -> Result<TaskOutput, DagflowError>
where
    F: FnMut(u32, String) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        let mut attempt_ctx = ctx.clone();
        attempt_ctx.attempt = attempt;

        match callable.call(attempt_ctx).await {
            Ok(output) => {
                debug!(task = %ctx.task_id, run_id = ctx.run_id, attempt, "attempt succeeded");
                return Ok(output);
            }
            Err(err) => {
                let message = format!("{err:#}");
                if attempt >= max_attempts {
                    warn!(
                        task = %ctx.task_id,
                        run_id = ctx.run_id,
                        attempts = attempt,
                        error = %message,
                        "retries exhausted"
                    );
                    return Err(DagflowError::TaskExecution {
                        task: ctx.task_id.clone(),
                        attempts: attempt,
                        message,
                    });
                }

                let delay = policy.backoff.delay_for(attempt);
                warn!(
                    task = %ctx.task_id,
                    run_id = ctx.run_id,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "attempt failed; retrying"
                );
                on_retry(attempt, message).await;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
