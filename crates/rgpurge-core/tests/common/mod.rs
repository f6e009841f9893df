#![allow(dead_code)]

use rgpurge_cloud::memory::{Call, InMemoryControlPlane};
use rgpurge_cloud::{ContainerId, ResourceId};
use rgpurge_core::{RunContext, TeardownOptions, TeardownResult};
use serde_json::{Value, json};
use std::time::Duration;

pub const SUBSCRIPTION: &str = "/subscriptions/0000";
pub const GROUP: &str = "rg-app";

/// A resource group in an in-memory control plane, with id helpers
pub struct Fixture {
    pub cp: InMemoryControlPlane,
    pub container: ContainerId,
}

impl Fixture {
    pub fn new() -> Self {
        let cp = InMemoryControlPlane::new();
        let container = cp.add_container(GROUP);
        Self { cp, container }
    }

    pub fn id_in(group: &str, provider_path: &str) -> ResourceId {
        ResourceId::new(format!(
            "{SUBSCRIPTION}/resourceGroups/{group}/providers/{provider_path}"
        ))
    }

    pub fn id(provider_path: &str) -> ResourceId {
        Self::id_in(GROUP, provider_path)
    }

    pub fn add(&self, provider_path: &str, properties: Value) -> ResourceId {
        self.cp.add_resource(Self::id(provider_path), properties)
    }

    pub fn lock(&self, name: &str) -> ResourceId {
        self.add(
            &format!("Microsoft.Authorization/locks/{name}"),
            json!({ "level": "CanNotDelete" }),
        )
    }

    pub fn vnet(&self, name: &str) -> ResourceId {
        self.add(
            &format!("Microsoft.Network/virtualNetworks/{name}"),
            json!({ "addressSpace": { "addressPrefixes": ["10.0.0.0/16"] } }),
        )
    }

    pub fn subnet(&self, vnet: &ResourceId, name: &str, properties: Value) -> ResourceId {
        self.cp.add_resource(vnet.child("subnets", name), properties)
    }

    pub fn options() -> TeardownOptions {
        TeardownOptions {
            force_no_confirm: true,
            synchronous_wait: true,
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(10),
            allow_protocol_level_fallback: false,
        }
    }

    pub fn context(&self) -> RunContext {
        RunContext::new(self.container.clone(), Self::options())
    }

    pub async fn teardown(&self) -> TeardownResult {
        rgpurge_core::teardown(&self.cp, &self.context()).await
    }

    /// Ids of every delete call, in order
    pub fn deletes(&self) -> Vec<ResourceId> {
        self.cp
            .calls()
            .iter()
            .filter_map(Call::deleted_id)
            .cloned()
            .collect()
    }

    pub fn position_of_delete(&self, id: &ResourceId) -> Option<usize> {
        self.cp
            .calls()
            .iter()
            .position(|c| c.deleted_id().is_some_and(|d| d.same_as(id)))
    }
}
