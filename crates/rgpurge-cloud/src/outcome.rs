//! Outcomes of mutating control-plane calls

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of a single delete or update call.
///
/// Mutations report outcomes as values so every call site decides
/// explicitly whether to retry, defer, or continue past a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum CallOutcome {
    /// The call was accepted
    Success,
    /// The target is already gone
    NotFound,
    /// Throttling, propagation lag, a conflicting operation in flight
    TransientFailure(String),
    /// The platform refused and retrying the same call will not help
    PermanentFailure(Failure),
}

impl CallOutcome {
    pub fn dependency(reason: impl Into<String>) -> Self {
        Self::PermanentFailure(Failure::new(FailureKind::Dependency, reason))
    }

    pub fn permission(reason: impl Into<String>) -> Self {
        Self::PermanentFailure(Failure::new(FailureKind::Permission, reason))
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::PermanentFailure(Failure::new(FailureKind::Rejected, reason))
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientFailure(reason.into())
    }

    /// Success or not-found: the target is no longer in the way
    pub fn is_cleared(&self) -> bool {
        matches!(self, Self::Success | Self::NotFound)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFailure(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::PermanentFailure(failure) => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallOutcome::Success => write!(f, "success"),
            CallOutcome::NotFound => write!(f, "not found"),
            CallOutcome::TransientFailure(reason) => write!(f, "transient failure: {}", reason),
            CallOutcome::PermanentFailure(failure) => write!(f, "{}", failure),
        }
    }
}

/// A permanent refusal with its category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: String,
}

impl Failure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.reason)
    }
}

/// Why a call was permanently refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Another live object still references the target
    Dependency,
    /// Authorization, lock scope, or policy denial
    Permission,
    /// Any other refusal
    Rejected,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Dependency => write!(f, "dependency"),
            FailureKind::Permission => write!(f, "permission"),
            FailureKind::Rejected => write!(f, "rejected"),
        }
    }
}
