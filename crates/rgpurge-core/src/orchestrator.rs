//! Resource group teardown state machine
//!
//! ```text
//! Verifying -> ClearingLocks -> ProcessingSecurityGroups -> BreakingNetworkBlockers
//!           -> FinalLockSweep -> Deleting -> { Deleted | RolledBackDetected | TimedOut }
//! ```
//!
//! Per-blocker failures never abort the run. Only a missing resource group,
//! a rejected delete call or operator cancellation end it early.

use crate::catalog::{self, BlockerKind, Stage};
use crate::context::RunContext;
use crate::error::{Result, TeardownError};
use crate::planner::SubnetTeardownPlanner;
use crate::report::{Phase, TeardownOutcome, TeardownReport};
use crate::retry::RetryExecutor;
use crate::scanner::{ResourceGraphScanner, ScanMode};
use rgpurge_cloud::{
    CallOutcome, ContainerId, ControlPlaneClient, LifecycleState, Patch, ProvisioningState,
    ResourceId, types,
};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Operator confirmation, asked once the resource group is known to exist
pub type Confirm = Arc<dyn Fn(&ContainerId) -> bool + Send + Sync>;

/// Outcome of a run with its report
#[derive(Debug, Clone)]
pub struct TeardownResult {
    pub outcome: TeardownOutcome,
    pub report: TeardownReport,
}

enum Step {
    Next(Phase),
    Done(TeardownOutcome),
}

/// Completion poll bookkeeping
#[derive(Debug, Clone)]
pub struct PollState {
    started: Instant,
    pub last: LifecycleState,
    pub saw_deleting: bool,
    pub polls: u32,
}

impl PollState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last: LifecycleState::Unknown,
            saw_deleting: false,
            polls: 0,
        }
    }

    pub fn observe(&mut self, observed: Option<&ProvisioningState>) -> LifecycleState {
        self.polls += 1;
        self.last = self.last.observe(observed);
        if self.last == LifecycleState::Deleting {
            self.saw_deleting = true;
        }
        self.last
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for PollState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ContainerTeardownOrchestrator<'a> {
    client: &'a dyn ControlPlaneClient,
    ctx: &'a RunContext,
    confirm: Option<Confirm>,
}

impl<'a> ContainerTeardownOrchestrator<'a> {
    pub fn new(client: &'a dyn ControlPlaneClient, ctx: &'a RunContext) -> Self {
        Self {
            client,
            ctx,
            confirm: None,
        }
    }

    pub fn with_confirmation(
        mut self,
        confirm: impl Fn(&ContainerId) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.confirm = Some(Arc::new(confirm));
        self
    }

    /// Run the teardown to a terminal outcome
    pub async fn run(&self) -> TeardownResult {
        let mut report = TeardownReport::new(self.ctx.container.clone());

        let outcome = match self.drive(&mut report).await {
            Ok(outcome) => outcome,
            Err(TeardownError::Cancelled) => {
                warn!(phase = %report.phase(), "Teardown cancelled");
                TeardownOutcome::Cancelled
            }
            Err(e) => {
                error!(phase = %report.phase(), error = %e, "Teardown aborted");
                report.add_failure(&self.ctx.container, "resource group", e.to_string());
                TeardownOutcome::ValidationFailed
            }
        };

        report.finish();
        info!(
            container = %self.ctx.container,
            outcome = %outcome,
            removed = report.removed.len(),
            failed = report.failed.len(),
            deferred = report.deferred_subnets.len(),
            "Teardown finished"
        );
        TeardownResult { outcome, report }
    }

    async fn drive(&self, report: &mut TeardownReport) -> Result<TeardownOutcome> {
        let scanner = ResourceGraphScanner::new(self.client, &self.ctx.container);
        let retry = RetryExecutor::new(self.ctx);
        let mut phase = Phase::Verifying;

        loop {
            self.ctx.check_cancelled()?;
            report.enter(phase);
            info!(container = %self.ctx.container, "Phase: {}", phase);

            let step = match phase {
                Phase::Verifying => self.verify(report).await?,
                Phase::ClearingLocks => {
                    self.clear_locks(&scanner, &retry, report).await?;
                    Step::Next(Phase::ProcessingSecurityGroups)
                }
                Phase::ProcessingSecurityGroups => {
                    self.process_security_groups(&scanner, &retry, report)
                        .await?;
                    Step::Next(Phase::BreakingNetworkBlockers)
                }
                Phase::BreakingNetworkBlockers => {
                    self.break_network_blockers(&scanner, &retry, report)
                        .await?;
                    Step::Next(Phase::FinalLockSweep)
                }
                Phase::FinalLockSweep => {
                    self.clear_locks(&scanner, &retry, report).await?;
                    Step::Next(Phase::Deleting)
                }
                Phase::Deleting => {
                    Step::Done(self.delete_container(&scanner, &retry, report).await?)
                }
            };

            match step {
                Step::Next(next) => phase = next,
                Step::Done(outcome) => return Ok(outcome),
            }
        }
    }

    async fn verify(&self, report: &mut TeardownReport) -> Result<Step> {
        let container = &self.ctx.container;
        self.ctx.options.validate()?;

        let state = match self.client.get_container_state(container).await {
            Ok(Some(state)) => state,
            Ok(None) => return Err(TeardownError::ContainerNotFound(container.to_string())),
            Err(e) => return Err(e.into()),
        };
        info!(container = %container, state = %state, "Resource group found");

        if !self.ctx.options.force_no_confirm {
            let confirmed = match &self.confirm {
                Some(confirm) => {
                    // Prompts block on operator input
                    let confirm = Arc::clone(confirm);
                    let target = container.clone();
                    let answer = tokio::task::spawn_blocking(move || confirm(&target));
                    self.ctx.or_cancelled(answer).await?.unwrap_or(false)
                }
                None => {
                    warn!("No confirmation available and force_no_confirm is not set");
                    false
                }
            };
            if !confirmed {
                report.add_skipped(container, "resource group", "not confirmed");
                return Ok(Step::Done(TeardownOutcome::Declined));
            }
        }
        Ok(Step::Next(Phase::ClearingLocks))
    }

    async fn clear_locks(
        &self,
        scanner: &ResourceGraphScanner<'_>,
        retry: &RetryExecutor<'_>,
        report: &mut TeardownReport,
    ) -> Result<()> {
        let locks = scanner.list_in_container(types::LOCK).await;
        if locks.is_empty() {
            debug!("No locks");
            return Ok(());
        }
        self.delete_each(&locks, BlockerKind::Lock, retry, report)
            .await
    }

    async fn process_security_groups(
        &self,
        scanner: &ResourceGraphScanner<'_>,
        retry: &RetryExecutor<'_>,
        report: &mut TeardownReport,
    ) -> Result<()> {
        let groups = scanner
            .list_in_container(types::NETWORK_SECURITY_GROUP)
            .await;

        for nsg in &groups {
            self.disassociate(nsg, ScanMode::Scoped, scanner, retry, report)
                .await?;
            let mut attempt = retry
                .run(nsg.as_str(), "delete security group", || {
                    self.client.delete_resource(nsg, None)
                })
                .await?;

            if !attempt.cleared() {
                info!(nsg = %nsg, "Delete refused, looking for associations subscription-wide");
                report.add_attempt(attempt);
                self.disassociate(nsg, ScanMode::Broad, scanner, retry, report)
                    .await?;
                attempt = retry
                    .run(nsg.as_str(), "delete security group", || {
                        self.client.delete_resource(nsg, None)
                    })
                    .await?;
            }

            if attempt.cleared() {
                report.add_removed(nsg, "security group", "deleted");
            } else {
                warn!(nsg = %nsg, "Security group still blocked, moving on");
                report.add_failure(nsg, "security group", attempt.outcome.to_string());
            }
            report.add_attempt(attempt);
        }
        Ok(())
    }

    /// Detach a security group from every NIC and subnet carrying it
    async fn disassociate(
        &self,
        nsg: &ResourceId,
        mode: ScanMode,
        scanner: &ResourceGraphScanner<'_>,
        retry: &RetryExecutor<'_>,
        report: &mut TeardownReport,
    ) -> Result<()> {
        let patch = Patch::remove("properties.networkSecurityGroup");

        for record in scanner.scan_security_group(nsg, mode).await {
            let owner = &record.owner;
            let attempt = retry
                .run(owner.as_str(), "detach security group", || {
                    self.client.update_resource(owner, &patch)
                })
                .await?;
            if attempt.cleared() {
                report.add_removed(owner, record.kind, format!("detached {}", nsg.name()));
            } else {
                report.add_failure(owner, record.kind, attempt.outcome.to_string());
            }
            report.add_attempt(attempt);
        }
        Ok(())
    }

    /// Network stages of the catalog order, for every VNet in the resource group
    async fn break_network_blockers(
        &self,
        scanner: &ResourceGraphScanner<'_>,
        retry: &RetryExecutor<'_>,
        report: &mut TeardownReport,
    ) -> Result<()> {
        let vnets = scanner.list_in_container(types::VIRTUAL_NETWORK).await;

        for stage in catalog::CONTAINER_ORDER {
            debug!(stage = ?stage, "Stage");
            match stage {
                Stage::HeavyCompute => {
                    for resource_type in catalog::HEAVY_COMPUTE {
                        let found = scanner.list_in_container(resource_type).await;
                        self.delete_each(&found, BlockerKind::HeavyCompute, retry, report)
                            .await?;
                    }
                }
                Stage::Subnets => {
                    let mut subnets = Vec::new();
                    for vnet in &vnets {
                        subnets.extend(scanner.children(vnet, types::SUBNET).await);
                    }
                    let planner =
                        SubnetTeardownPlanner::new(self.client, self.ctx, scanner, retry);
                    planner.run(&subnets, report).await?;
                }
                Stage::Peerings => {
                    for vnet in &vnets {
                        let mut peerings = scanner.children(vnet, types::VNET_PEERING).await;
                        peerings.extend(scanner.remote_peerings(vnet).await);
                        self.delete_each(&peerings, BlockerKind::VNetPeering, retry, report)
                            .await?;
                    }
                }
                Stage::DnsLinks => {
                    for vnet in &vnets {
                        let links = scanner
                            .referencing(vnet, &[types::PRIVATE_DNS_ZONE_LINK], ScanMode::Broad)
                            .await;
                        self.delete_each(&links, BlockerKind::PrivateDnsLink, retry, report)
                            .await?;
                    }
                }
                Stage::VirtualNetworks => {
                    self.delete_each(&vnets, "virtual network", retry, report)
                        .await?;
                }
                // Owned by their own phases
                Stage::Locks | Stage::FinalLockSweep | Stage::ContainerDelete => {}
            }
        }
        Ok(())
    }

    async fn delete_each(
        &self,
        targets: &[ResourceId],
        kind: impl std::fmt::Display + Copy,
        retry: &RetryExecutor<'_>,
        report: &mut TeardownReport,
    ) -> Result<()> {
        for target in targets {
            let attempt = retry
                .run(target.as_str(), "delete", || {
                    self.client.delete_resource(target, None)
                })
                .await?;
            if attempt.cleared() {
                report.add_removed(target, kind, "deleted");
            } else {
                report.add_failure(target, kind, attempt.outcome.to_string());
            }
            report.add_attempt(attempt);
        }
        Ok(())
    }

    async fn delete_container(
        &self,
        scanner: &ResourceGraphScanner<'_>,
        retry: &RetryExecutor<'_>,
        report: &mut TeardownReport,
    ) -> Result<TeardownOutcome> {
        let container = &self.ctx.container;
        let attempt = retry
            .run(container.name(), "delete resource group", || {
                self.client.delete_container(container)
            })
            .await?;
        let outcome = attempt.outcome.clone();
        report.add_attempt(attempt);

        match outcome {
            CallOutcome::Success => {
                report.add_removed(container, "resource group", "delete issued");
            }
            CallOutcome::NotFound => {
                report.add_skipped(container, "resource group", "already gone");
                return Ok(TeardownOutcome::Deleted);
            }
            rejected => {
                error!(container = %container, "Resource group delete rejected: {}", rejected);
                report.add_failure(container, "resource group", rejected.to_string());
                return Ok(TeardownOutcome::DeleteRejected);
            }
        }

        if !self.ctx.options.synchronous_wait {
            return Ok(TeardownOutcome::DeleteIssued);
        }
        self.poll(scanner, report).await
    }

    /// Poll the resource group until it is gone, rolls back or the timeout elapses
    pub(crate) async fn poll(
        &self,
        scanner: &ResourceGraphScanner<'_>,
        report: &mut TeardownReport,
    ) -> Result<TeardownOutcome> {
        let container = &self.ctx.container;
        let timeout = self.ctx.options.timeout;
        let mut state = PollState::new();

        loop {
            self.ctx.check_cancelled()?;
            match self.client.get_container_state(container).await {
                Ok(observed) => {
                    let lifecycle = state.observe(observed.as_ref());
                    debug!(
                        container = %container,
                        poll = state.polls,
                        state = %lifecycle,
                        elapsed_secs = state.elapsed().as_secs(),
                        "Polled resource group"
                    );
                }
                Err(e) => warn!(container = %container, error = %e, "Poll failed"),
            }

            match state.last {
                LifecycleState::Deleted => return Ok(TeardownOutcome::Deleted),
                LifecycleState::RolledBack => {
                    error!(
                        container = %container,
                        "Resource group left Deleting without disappearing; the platform rolled the delete back"
                    );
                    return Ok(TeardownOutcome::RolledBackDetected);
                }
                _ => {}
            }

            if state.elapsed() >= timeout {
                let remaining = scanner.list_in_container(types::ANY).await;
                warn!(
                    container = %container,
                    remaining = remaining.len(),
                    saw_deleting = state.saw_deleting,
                    "Timed out waiting for deletion"
                );
                report.remaining = remaining;
                return Ok(TeardownOutcome::TimedOut);
            }

            self.ctx.sleep(self.ctx.options.poll_interval).await?;
        }
    }
}
