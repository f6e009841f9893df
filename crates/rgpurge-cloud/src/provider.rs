//! Control-plane client trait definition

use crate::error::Result;
use crate::outcome::CallOutcome;
use crate::query::{Patch, QueryFilter, Scope};
use crate::resource::{ContainerId, ResourceId};
use crate::state::ProvisioningState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Control-plane abstraction
///
/// The teardown engine only ever talks to the cloud through this trait, so the
/// resolution algorithms run unchanged against the `az` CLI or an in-memory
/// double. Credentials are the implementation's concern.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Returns the client name (e.g., "azure-cli")
    fn name(&self) -> &str;

    /// List ids of `resource_type` matching `filter` within `scope`.
    ///
    /// `resource_type` may be [`types::ANY`](crate::types::ANY).
    async fn list_by_query(
        &self,
        resource_type: &str,
        filter: &QueryFilter,
        scope: &Scope,
    ) -> Result<Vec<ResourceId>>;

    /// Fetch the `properties` document of a resource, `None` if it does not exist
    async fn get_resource(&self, id: &ResourceId) -> Result<Option<serde_json::Value>>;

    /// Delete a resource, optionally pinning the API version
    async fn delete_resource(&self, id: &ResourceId, api_version: Option<&str>) -> CallOutcome;

    /// Delete through the raw management protocol, bypassing CLI-side checks
    async fn delete_resource_raw(&self, id: &ResourceId, api_version: &str) -> CallOutcome;

    /// Apply one property edit to a resource
    async fn update_resource(&self, id: &ResourceId, patch: &Patch) -> CallOutcome;

    /// Current provisioning state of the container, `None` if it does not exist
    async fn get_container_state(&self, container: &ContainerId)
    -> Result<Option<ProvisioningState>>;

    /// Start an asynchronous delete of the container itself
    async fn delete_container(&self, container: &ContainerId) -> CallOutcome;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Retry configuration for control-plane mutations
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first call included
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay before the retry that follows attempt `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}
