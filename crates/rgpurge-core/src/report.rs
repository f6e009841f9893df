//! Teardown outcome and report

use crate::retry::DeletionAttempt;
use chrono::{DateTime, Utc};
use rgpurge_cloud::{ContainerId, ResourceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the teardown state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Verifying,
    ClearingLocks,
    ProcessingSecurityGroups,
    BreakingNetworkBlockers,
    FinalLockSweep,
    Deleting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Verifying => "verifying",
            Phase::ClearingLocks => "clearing locks",
            Phase::ProcessingSecurityGroups => "processing security groups",
            Phase::BreakingNetworkBlockers => "breaking network blockers",
            Phase::FinalLockSweep => "final lock sweep",
            Phase::Deleting => "deleting",
        };
        f.write_str(label)
    }
}

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownOutcome {
    /// The resource group is confirmed gone
    Deleted,
    /// The delete call was accepted and completion was not awaited
    DeleteIssued,
    /// The platform reported `Deleting` and then reverted
    RolledBackDetected,
    /// Completion was not observed before the timeout
    TimedOut,
    /// The platform rejected the resource group delete call
    DeleteRejected,
    /// The resource group does not exist or the run was misconfigured
    ValidationFailed,
    /// The operator did not confirm
    Declined,
    /// The operator aborted the run
    Cancelled,
}

impl TeardownOutcome {
    /// Process exit code for the outcome
    pub fn exit_code(self) -> i32 {
        match self {
            TeardownOutcome::Deleted | TeardownOutcome::DeleteIssued => 0,
            TeardownOutcome::Declined => 1,
            TeardownOutcome::ValidationFailed => 2,
            TeardownOutcome::DeleteRejected => 3,
            TeardownOutcome::TimedOut => 4,
            TeardownOutcome::RolledBackDetected => 5,
            TeardownOutcome::Cancelled => 130,
        }
    }

    pub fn is_success(self) -> bool {
        self.exit_code() == 0
    }
}

impl fmt::Display for TeardownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TeardownOutcome::Deleted => "deleted",
            TeardownOutcome::DeleteIssued => "delete issued",
            TeardownOutcome::RolledBackDetected => "rollback detected",
            TeardownOutcome::TimedOut => "timed out",
            TeardownOutcome::DeleteRejected => "delete rejected",
            TeardownOutcome::ValidationFailed => "validation failed",
            TeardownOutcome::Declined => "declined",
            TeardownOutcome::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// One thing the run did, skipped or failed to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub phase: Phase,
    pub target: String,
    pub kind: String,
    pub message: String,
}

/// Everything a run did, for the operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownReport {
    pub container: ContainerId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub removed: Vec<ActionRecord>,
    pub skipped: Vec<ActionRecord>,
    pub failed: Vec<ActionRecord>,
    pub deferred_subnets: Vec<ResourceId>,
    /// Resources still present when the completion poll timed out
    pub remaining: Vec<ResourceId>,
    pub attempts: Vec<DeletionAttempt>,
    #[serde(skip)]
    phase: Option<Phase>,
}

impl TeardownReport {
    pub fn new(container: ContainerId) -> Self {
        Self {
            container,
            started_at: Utc::now(),
            finished_at: None,
            removed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            deferred_subnets: Vec::new(),
            remaining: Vec::new(),
            attempts: Vec::new(),
            phase: None,
        }
    }

    pub fn enter(&mut self, phase: Phase) {
        self.phase = Some(phase);
    }

    pub fn phase(&self) -> Phase {
        self.phase.unwrap_or(Phase::Verifying)
    }

    fn record(
        &self,
        target: impl fmt::Display,
        kind: impl fmt::Display,
        message: impl Into<String>,
    ) -> ActionRecord {
        ActionRecord {
            phase: self.phase(),
            target: target.to_string(),
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    pub fn add_removed(
        &mut self,
        target: impl fmt::Display,
        kind: impl fmt::Display,
        message: impl Into<String>,
    ) {
        let record = self.record(target, kind, message);
        self.removed.push(record);
    }

    pub fn add_skipped(
        &mut self,
        target: impl fmt::Display,
        kind: impl fmt::Display,
        message: impl Into<String>,
    ) {
        let record = self.record(target, kind, message);
        self.skipped.push(record);
    }

    pub fn add_failure(
        &mut self,
        target: impl fmt::Display,
        kind: impl fmt::Display,
        message: impl Into<String>,
    ) {
        let record = self.record(target, kind, message);
        self.failed.push(record);
    }

    pub fn add_attempt(&mut self, attempt: DeletionAttempt) {
        self.attempts.push(attempt);
    }

    /// Calls that were repeated after a transient failure
    pub fn retries(&self) -> u32 {
        self.attempts
            .iter()
            .map(|a| a.attempts.saturating_sub(1))
            .sum()
    }

    /// Whether anything was left failed or deferred along the way
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty() || !self.deferred_subnets.is_empty()
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}
