//! Lifecycle states for the container under teardown

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provisioning state as reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    Succeeded,
    Deleting,
    Failed,
    Other(String),
}

impl ProvisioningState {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "succeeded" => Self::Succeeded,
            "deleting" => Self::Deleting,
            "failed" => Self::Failed,
            _ => Self::Other(raw.to_string()),
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningState::Succeeded => write!(f, "Succeeded"),
            ProvisioningState::Deleting => write!(f, "Deleting"),
            ProvisioningState::Failed => write!(f, "Failed"),
            ProvisioningState::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// Lifecycle of the container as tracked by a teardown run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Not observed yet
    Unknown,
    /// Present and not being deleted
    Exists,
    /// The platform is processing a delete
    Deleting,
    /// The platform no longer knows the container
    Deleted,
    /// A delete was in progress and the container came back
    RolledBack,
}

impl LifecycleState {
    /// Fold one observation into the tracked lifecycle.
    ///
    /// `None` means the control plane reported the container as not found.
    /// Only a settled state after `Deleting` counts as a rollback; transient
    /// states such as `Updating` leave the lifecycle where it was.
    pub fn observe(self, observed: Option<&ProvisioningState>) -> Self {
        match (self, observed) {
            (_, None) => LifecycleState::Deleted,
            (_, Some(ProvisioningState::Deleting)) => LifecycleState::Deleting,
            (
                LifecycleState::Deleting | LifecycleState::RolledBack,
                Some(ProvisioningState::Succeeded | ProvisioningState::Failed),
            ) => LifecycleState::RolledBack,
            (LifecycleState::Deleting | LifecycleState::RolledBack, Some(_)) => self,
            (_, Some(_)) => LifecycleState::Exists,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Unknown => write!(f, "unknown"),
            LifecycleState::Exists => write!(f, "exists"),
            LifecycleState::Deleting => write!(f, "deleting"),
            LifecycleState::Deleted => write!(f, "deleted"),
            LifecycleState::RolledBack => write!(f, "rolled back"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provisioning_state() {
        assert_eq!(ProvisioningState::parse("Succeeded"), ProvisioningState::Succeeded);
        assert_eq!(ProvisioningState::parse("deleting"), ProvisioningState::Deleting);
        assert_eq!(
            ProvisioningState::parse("Updating"),
            ProvisioningState::Other("Updating".to_string())
        );
    }

    #[test]
    fn test_deleting_then_succeeded_is_rollback() {
        let state = LifecycleState::Unknown
            .observe(Some(&ProvisioningState::Deleting))
            .observe(Some(&ProvisioningState::Deleting))
            .observe(Some(&ProvisioningState::Succeeded));
        assert_eq!(state, LifecycleState::RolledBack);
    }

    #[test]
    fn test_failed_after_deleting_is_rollback() {
        let state = LifecycleState::Unknown
            .observe(Some(&ProvisioningState::Deleting))
            .observe(Some(&ProvisioningState::Failed));
        assert_eq!(state, LifecycleState::RolledBack);
    }

    #[test]
    fn test_transient_state_while_deleting_is_still_in_progress() {
        let updating = ProvisioningState::parse("Updating");
        let state = LifecycleState::Unknown
            .observe(Some(&ProvisioningState::Deleting))
            .observe(Some(&updating));
        assert_eq!(state, LifecycleState::Deleting);
        assert_eq!(state.observe(None), LifecycleState::Deleted);
    }

    #[test]
    fn test_succeeded_before_deleting_is_not_rollback() {
        let state = LifecycleState::Unknown.observe(Some(&ProvisioningState::Succeeded));
        assert_eq!(state, LifecycleState::Exists);
        assert_eq!(state.observe(None), LifecycleState::Deleted);
    }
}
