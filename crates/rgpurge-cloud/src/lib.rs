//! rgpurge Cloud Abstraction
//!
//! This crate defines the provider-neutral vocabulary of rgpurge: resource and
//! container identifiers, the outcome taxonomy of mutating calls, container
//! lifecycle states, and the [`ControlPlaneClient`] trait the teardown engine
//! drives.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  rgpurge CLI                     │
//! │            (rgpurge teardown / scan)             │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                rgpurge-core                      │
//! │   orchestrator · planner · scanner · retry       │
//! └─────────────────┬───────────────────────────────┘
//!                   │  trait ControlPlaneClient
//! ┌─────────────────▼───────────────────────────────┐
//! │                rgpurge-cloud                     │
//! └───────┬─────────────────────────┬───────────────┘
//!         │                         │
//! ┌───────▼───────┐         ┌───────▼───────┐
//! │ rgpurge-azure │         │   in-memory   │
//! │   (az CLI)    │         │  (`testing`)  │
//! └───────────────┘         └───────────────┘
//! ```

pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod outcome;
pub mod provider;
pub mod query;
pub mod resource;
pub mod state;

// Re-exports
pub use error::{CloudError, Result};
pub use outcome::{CallOutcome, Failure, FailureKind};
pub use provider::{AuthStatus, ControlPlaneClient, RetryConfig};
pub use query::{Patch, QueryFilter, Scope, mentions};
pub use resource::{ContainerId, ResourceId, types};
pub use state::{LifecycleState, ProvisioningState};
