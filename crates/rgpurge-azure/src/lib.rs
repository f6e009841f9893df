//! Azure control plane for rgpurge
//!
//! This crate implements the `ControlPlaneClient` trait on top of the az CLI,
//! so rgpurge can tear down Azure resource groups.
//!
//! # Requirements
//!
//! - `az` CLI must be installed and logged in (`az login`)
//! - The `resource-graph` extension must be available for `az graph query`
//!
//! # Example
//!
//! ```ignore
//! use rgpurge_azure::AzureControlPlane;
//! use rgpurge_cloud::{ContainerId, ControlPlaneClient};
//!
//! let client = AzureControlPlane::new(Some("0000-subscription".into()));
//!
//! // Check authentication
//! let auth = client.check_auth().await;
//! if !auth.authenticated {
//!     panic!("Not authenticated: {:?}", auth.error);
//! }
//!
//! let state = client.get_container_state(&ContainerId::new("rg-app")).await?;
//! ```

pub mod az;
pub mod error;
pub mod graph;
pub mod provider;

pub use az::{AccountInfo, AzCli, GroupInfo, LockInfo};
pub use error::{AzureError, Result};
pub use provider::AzureControlPlane;
