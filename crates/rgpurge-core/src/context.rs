//! Run context
//!
//! Everything a teardown run needs to know is fixed up front in a
//! [`RunContext`] and handed to every component by reference.

use crate::error::{Result, TeardownError};
use rgpurge_cloud::{ContainerId, RetryConfig};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Operator-facing teardown options
#[derive(Debug, Clone, PartialEq)]
pub struct TeardownOptions {
    /// Skip the interactive confirmation
    pub force_no_confirm: bool,
    /// Poll until the resource group is gone instead of returning after the delete call
    pub synchronous_wait: bool,
    /// Ceiling for the completion poll
    pub timeout: Duration,
    /// Interval between completion polls
    pub poll_interval: Duration,
    /// Permit raw protocol-level deletes of service association links
    pub allow_protocol_level_fallback: bool,
}

impl Default for TeardownOptions {
    fn default() -> Self {
        Self {
            force_no_confirm: false,
            synchronous_wait: false,
            timeout: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(15),
            allow_protocol_level_fallback: false,
        }
    }
}

impl TeardownOptions {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(TeardownError::InvalidOptions(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.synchronous_wait && self.timeout < self.poll_interval {
            return Err(TeardownError::InvalidOptions(format!(
                "timeout ({}s) is shorter than the poll interval ({}s)",
                self.timeout.as_secs(),
                self.poll_interval.as_secs()
            )));
        }
        Ok(())
    }
}

/// Bounded waits, expressed in time units
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    pub unit: Duration,
    /// Passes a subnet gets before it is left deferred
    pub pass_limit: u32,
    /// Units waited after pass `n`, multiplied by `n`
    pub pass_wait_units: u32,
    /// Ceiling for a link to disappear after its delete call
    pub link_wait_units: u32,
    /// Step between link listings while waiting
    pub link_poll_units: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            pass_limit: 4,
            pass_wait_units: 10,
            link_wait_units: 180,
            link_poll_units: 5,
        }
    }
}

impl Timing {
    pub fn with_unit(unit: Duration) -> Self {
        Self {
            unit,
            ..Default::default()
        }
    }

    pub fn units(&self, n: u32) -> Duration {
        self.unit * n
    }

    /// Wait after pass `pass` (1-based)
    pub fn pass_wait(&self, pass: u32) -> Duration {
        self.units(self.pass_wait_units * pass)
    }

    pub fn link_wait(&self) -> Duration {
        self.units(self.link_wait_units)
    }

    pub fn link_poll(&self) -> Duration {
        self.units(self.link_poll_units.max(1))
    }
}

/// Immutable inputs of one teardown run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub container: ContainerId,
    pub options: TeardownOptions,
    pub timing: Timing,
    pub retry: RetryConfig,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(container: ContainerId, options: TeardownOptions) -> Self {
        Self {
            container,
            options,
            timing: Timing::default(),
            retry: RetryConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fail fast once the operator has aborted the run
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(TeardownError::Cancelled);
        }
        Ok(())
    }

    /// Sleep for `delay` unless the run is cancelled first
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        self.or_cancelled(tokio::time::sleep(delay)).await
    }

    /// Await `fut` unless the run is cancelled first
    pub async fn or_cancelled<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            output = fut => Ok(output),
            _ = self.cancel.cancelled() => Err(TeardownError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_wait_grows_linearly() {
        let timing = Timing::default();
        assert_eq!(timing.pass_wait(1), Duration::from_secs(10));
        assert_eq!(timing.pass_wait(3), Duration::from_secs(30));
        assert_eq!(timing.link_wait(), Duration::from_secs(180));
    }

    #[test]
    fn test_time_unit_scales_every_wait() {
        let timing = Timing::with_unit(Duration::from_millis(100));
        assert_eq!(timing.pass_wait(2), Duration::from_secs(2));
        assert_eq!(timing.link_poll(), Duration::from_millis(500));
    }

    #[test]
    fn test_options_validation() {
        assert!(TeardownOptions::default().validate().is_ok());

        let zero_interval = TeardownOptions {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_interval.validate().is_err());

        let short_timeout = TeardownOptions {
            synchronous_wait: true,
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
            ..Default::default()
        };
        assert!(short_timeout.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_is_cancellable() {
        let token = CancellationToken::new();
        let ctx = RunContext::new(ContainerId::new("rg"), TeardownOptions::default())
            .with_cancellation(token.clone());

        assert!(ctx.sleep(Duration::from_secs(1)).await.is_ok());

        token.cancel();
        assert!(matches!(
            ctx.sleep(Duration::from_secs(3600)).await,
            Err(TeardownError::Cancelled)
        ));
        assert!(ctx.check_cancelled().is_err());
    }
}
