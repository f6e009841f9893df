//! Bounded retry around single control-plane mutations

use crate::context::RunContext;
use crate::error::Result;
use rgpurge_cloud::CallOutcome;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One retry sequence against a single target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionAttempt {
    pub target: String,
    pub operation: String,
    pub attempts: u32,
    /// Total time spent backing off between attempts
    pub backoff: Duration,
    pub outcome: CallOutcome,
}

impl DeletionAttempt {
    /// Success or not-found
    pub fn cleared(&self) -> bool {
        self.outcome.is_cleared()
    }
}

/// Applies the run's retry policy to one call at a time.
///
/// Only transient failures are retried. Not-found counts as cleared, and
/// permanent failures come back to the caller, which decides whether to
/// defer, skip or abort.
pub struct RetryExecutor<'a> {
    ctx: &'a RunContext,
}

impl<'a> RetryExecutor<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    pub async fn run<F, Fut>(
        &self,
        target: &str,
        operation: &str,
        mut call: F,
    ) -> Result<DeletionAttempt>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CallOutcome>,
    {
        let policy = &self.ctx.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempts = 0u32;
        let mut backoff = Duration::ZERO;

        loop {
            self.ctx.check_cancelled()?;
            let outcome = call().await;
            attempts += 1;

            if outcome.is_transient() && attempts < max_attempts {
                let delay = policy.delay_for_attempt(attempts - 1);
                debug!(
                    resource = %target,
                    operation,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying: {}",
                    outcome
                );
                self.ctx.sleep(delay).await?;
                backoff += delay;
                continue;
            }

            let attempt = DeletionAttempt {
                target: target.to_string(),
                operation: operation.to_string(),
                attempts,
                backoff,
                outcome,
            };
            log_attempt(&attempt);
            return Ok(attempt);
        }
    }
}

fn log_attempt(attempt: &DeletionAttempt) {
    match &attempt.outcome {
        CallOutcome::Success => info!(
            resource = %attempt.target,
            operation = %attempt.operation,
            attempts = attempt.attempts,
            backoff_ms = attempt.backoff.as_millis() as u64,
            "Done"
        ),
        CallOutcome::NotFound => debug!(
            resource = %attempt.target,
            operation = %attempt.operation,
            "Already gone"
        ),
        CallOutcome::TransientFailure(reason) => warn!(
            resource = %attempt.target,
            operation = %attempt.operation,
            attempts = attempt.attempts,
            "Giving up after repeated transient failures: {}",
            reason
        ),
        CallOutcome::PermanentFailure(failure) => warn!(
            resource = %attempt.target,
            operation = %attempt.operation,
            attempts = attempt.attempts,
            "{}",
            failure
        ),
    }
}
