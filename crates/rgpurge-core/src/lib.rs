//! rgpurge teardown engine
//!
//! Drives a resource group from "exists" to "deleted" by removing the
//! objects that would make a plain group delete fail or roll back: locks,
//! security group associations, service association links, delegations,
//! peerings and DNS links.
//!
//! ```no_run
//! # async fn run(client: &dyn rgpurge_cloud::ControlPlaneClient) {
//! use rgpurge_cloud::ContainerId;
//! use rgpurge_core::{RunContext, TeardownOptions};
//!
//! let ctx = RunContext::new(
//!     ContainerId::new("rg-sandbox"),
//!     TeardownOptions {
//!         force_no_confirm: true,
//!         ..Default::default()
//!     },
//! );
//! let result = rgpurge_core::teardown(client, &ctx).await;
//! println!("{}", result.outcome);
//! # }
//! ```

pub mod catalog;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod report;
pub mod retry;
pub mod sal;
pub mod scanner;

pub use catalog::{BlockerKind, BlockerRecord};
pub use context::{RunContext, TeardownOptions, Timing};
pub use error::{Result, TeardownError};
pub use orchestrator::{ContainerTeardownOrchestrator, TeardownResult};
pub use planner::{PlanResult, SubnetStatus, SubnetTeardownPlanner};
pub use report::{ActionRecord, Phase, TeardownOutcome, TeardownReport};
pub use retry::{DeletionAttempt, RetryExecutor};
pub use sal::{LinkResolution, LinkResolver};
pub use scanner::{Inventory, ResourceGraphScanner, ScanMode};

use rgpurge_cloud::ControlPlaneClient;

/// Tear down `ctx.container` without a confirmation hook.
///
/// Unless `force_no_confirm` is set the run ends `Declined` before any mutation.
pub async fn teardown(client: &dyn ControlPlaneClient, ctx: &RunContext) -> TeardownResult {
    ContainerTeardownOrchestrator::new(client, ctx).run().await
}
