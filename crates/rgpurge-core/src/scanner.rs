//! Resource graph scanner
//!
//! Finds the live objects that reference a subnet, security group or VNet.
//! Scoped scans stay inside the resource group under teardown; broad scans
//! cover the whole subscription and are used as a fallback after a scoped
//! delete attempt has failed.

use crate::catalog::{self, BlockerKind, BlockerRecord};
use rgpurge_cloud::{ContainerId, ControlPlaneClient, QueryFilter, ResourceId, Scope, types};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Scoped,
    Broad,
}

/// Read-only view of what stands between a resource group and its deletion
#[derive(Debug, Clone, Default, Serialize)]
pub struct Inventory {
    pub locks: Vec<ResourceId>,
    pub heavy_compute: Vec<ResourceId>,
    pub security_groups: Vec<(ResourceId, Vec<BlockerRecord>)>,
    pub subnets: Vec<(ResourceId, Vec<BlockerRecord>)>,
    pub networks: Vec<(ResourceId, Vec<BlockerRecord>)>,
}

impl Inventory {
    pub fn blocker_count(&self) -> usize {
        let attached = |entries: &[(ResourceId, Vec<BlockerRecord>)]| {
            entries.iter().map(|(_, records)| records.len()).sum::<usize>()
        };
        self.locks.len()
            + self.heavy_compute.len()
            + attached(&self.security_groups)
            + attached(&self.subnets)
            + attached(&self.networks)
    }
}

pub struct ResourceGraphScanner<'a> {
    client: &'a dyn ControlPlaneClient,
    container: &'a ContainerId,
}

impl<'a> ResourceGraphScanner<'a> {
    pub fn new(client: &'a dyn ControlPlaneClient, container: &'a ContainerId) -> Self {
        Self { client, container }
    }

    fn scope(&self, mode: ScanMode) -> Scope {
        match mode {
            ScanMode::Scoped => Scope::Container(self.container.clone()),
            ScanMode::Broad => Scope::Subscription,
        }
    }

    /// List resources, treating a failed query as an empty result.
    ///
    /// A query outage therefore looks like "no blockers" to every caller,
    /// which can lead to premature delete attempts.
    pub async fn list(
        &self,
        resource_type: &str,
        filter: &QueryFilter,
        mode: ScanMode,
    ) -> Vec<ResourceId> {
        let scope = self.scope(mode);
        match self.client.list_by_query(resource_type, filter, &scope).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(
                    resource_type,
                    scope = %scope,
                    error = %e,
                    "Query failed; treating as no results, blockers may be missed"
                );
                Vec::new()
            }
        }
    }

    /// Every resource of a type in the resource group
    pub async fn list_in_container(&self, resource_type: &str) -> Vec<ResourceId> {
        self.list(resource_type, &QueryFilter::All, ScanMode::Scoped)
            .await
    }

    /// Children of `parent` with the given type
    pub async fn children(&self, parent: &ResourceId, resource_type: &str) -> Vec<ResourceId> {
        self.list(
            resource_type,
            &QueryFilter::ChildOf(parent.clone()),
            ScanMode::Scoped,
        )
        .await
    }

    /// Resources of the given types whose documents mention `target`
    pub async fn referencing(
        &self,
        target: &ResourceId,
        resource_types: &[&str],
        mode: ScanMode,
    ) -> Vec<ResourceId> {
        let filter = QueryFilter::References(target.clone());
        let mut found = BTreeSet::new();
        for resource_type in resource_types {
            for id in self.list(resource_type, &filter, mode).await {
                if !id.same_as(target) {
                    found.insert(id);
                }
            }
        }
        debug!(
            target = %target,
            mode = ?mode,
            count = found.len(),
            "Referencing resources"
        );
        found.into_iter().collect()
    }

    /// Properties of a resource, `None` if it is gone or unreadable
    pub async fn properties(&self, id: &ResourceId) -> Option<Value> {
        match self.client.get_resource(id).await {
            Ok(props) => props,
            Err(e) => {
                warn!(resource = %id, error = %e, "Failed to read resource");
                None
            }
        }
    }

    /// Service association links on a subnet
    pub async fn links(&self, subnet: &ResourceId) -> Vec<ResourceId> {
        self.children(subnet, types::SERVICE_ASSOCIATION_LINK)
            .await
    }

    /// Blockers attached to a subnet
    pub async fn scan_subnet(&self, subnet: &ResourceId, mode: ScanMode) -> Vec<BlockerRecord> {
        let mut records = BTreeSet::new();

        for owner in self
            .referencing(subnet, catalog::SUBNET_REFERRERS, mode)
            .await
        {
            let kind = catalog::referrer_kind(&owner);
            records.insert(BlockerRecord::new(kind, owner, subnet.clone()));
        }

        for link in self.links(subnet).await {
            records.insert(BlockerRecord::new(
                BlockerKind::ServiceAssociationLink,
                link,
                subnet.clone(),
            ));
        }

        if let Some(props) = self.properties(subnet).await {
            for association in catalog::SUBNET_ASSOCIATIONS {
                for owner in association.owners(&props, subnet) {
                    records.insert(BlockerRecord::new(association.kind, owner, subnet.clone()));
                }
            }
        }

        records.into_iter().collect()
    }

    /// NICs and subnets that carry a security group
    pub async fn scan_security_group(
        &self,
        security_group: &ResourceId,
        mode: ScanMode,
    ) -> Vec<BlockerRecord> {
        self.referencing(security_group, catalog::SECURITY_GROUP_REFERRERS, mode)
            .await
            .into_iter()
            .map(|owner| {
                BlockerRecord::new(
                    BlockerKind::SecurityGroupAssociation,
                    owner,
                    security_group.clone(),
                )
            })
            .collect()
    }

    /// Peerings and DNS links that pin a VNet.
    ///
    /// Remote peerings and DNS zone links are looked up subscription-wide,
    /// since they usually live in other resource groups.
    pub async fn scan_network(&self, vnet: &ResourceId) -> Vec<BlockerRecord> {
        let mut records = BTreeSet::new();

        for peering in self.children(vnet, types::VNET_PEERING).await {
            records.insert(BlockerRecord::new(
                BlockerKind::VNetPeering,
                peering,
                vnet.clone(),
            ));
        }
        for remote in self.remote_peerings(vnet).await {
            records.insert(BlockerRecord::new(
                BlockerKind::VNetPeering,
                remote,
                vnet.clone(),
            ));
        }
        for link in self
            .referencing(vnet, &[types::PRIVATE_DNS_ZONE_LINK], ScanMode::Broad)
            .await
        {
            records.insert(BlockerRecord::new(
                BlockerKind::PrivateDnsLink,
                link,
                vnet.clone(),
            ));
        }

        records.into_iter().collect()
    }

    /// Peerings on other VNets that point at `vnet`
    pub async fn remote_peerings(&self, vnet: &ResourceId) -> Vec<ResourceId> {
        self.referencing(vnet, &[types::VNET_PEERING], ScanMode::Broad)
            .await
            .into_iter()
            .filter(|peering| !peering.is_descendant_of(vnet))
            .collect()
    }

    /// Scan the whole resource group without changing anything
    pub async fn survey(&self, mode: ScanMode) -> Inventory {
        let mut inventory = Inventory {
            locks: self.list_in_container(types::LOCK).await,
            ..Default::default()
        };
        for resource_type in catalog::HEAVY_COMPUTE {
            inventory
                .heavy_compute
                .extend(self.list_in_container(resource_type).await);
        }
        for nsg in self
            .list_in_container(types::NETWORK_SECURITY_GROUP)
            .await
        {
            let records = self.scan_security_group(&nsg, mode).await;
            inventory.security_groups.push((nsg, records));
        }
        for vnet in self.list_in_container(types::VIRTUAL_NETWORK).await {
            for subnet in self.children(&vnet, types::SUBNET).await {
                let records = self.scan_subnet(&subnet, mode).await;
                inventory.subnets.push((subnet, records));
            }
            let records = self.scan_network(&vnet).await;
            inventory.networks.push((vnet, records));
        }
        inventory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgpurge_cloud::memory::{Call, InMemoryControlPlane};
    use serde_json::json;

    const RG: &str = "/subscriptions/0000/resourceGroups/rg-app";
    const OTHER_RG: &str = "/subscriptions/0000/resourceGroups/rg-shared";

    fn vnet() -> ResourceId {
        ResourceId::new(format!("{RG}/providers/Microsoft.Network/virtualNetworks/vnet-a"))
    }

    #[tokio::test]
    async fn test_scan_subnet_collects_every_kind() {
        let cp = InMemoryControlPlane::new();
        let container = cp.add_container("rg-app");
        let nsg = format!("{RG}/providers/Microsoft.Network/networkSecurityGroups/nsg-1");
        let subnet = cp.add_resource(
            vnet().child("subnets", "snet-1"),
            json!({
                "networkSecurityGroup": { "id": nsg },
                "delegations": [catalog::delegation_entry("Microsoft.App/environments")]
            }),
        );
        let pe = cp.add_resource(
            format!("{RG}/providers/Microsoft.Network/privateEndpoints/pe-1"),
            json!({ "subnet": { "id": subnet.as_str() } }),
        );
        let link = cp.add_resource(subnet.child("serviceAssociationLinks", "link"), json!({}));

        let scanner = ResourceGraphScanner::new(&cp, &container);
        let records = scanner.scan_subnet(&subnet, ScanMode::Scoped).await;

        let kinds: Vec<BlockerKind> = records.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                BlockerKind::SecurityGroupAssociation,
                BlockerKind::PrivateEndpoint,
                BlockerKind::ServiceAssociationLink,
                BlockerKind::SubnetDelegation,
            ]
        );
        assert!(records.iter().any(|r| r.owner == pe));
        assert!(records.iter().any(|r| r.owner == link));
        assert!(records.iter().all(|r| r.target == subnet));
    }

    #[tokio::test]
    async fn test_scoped_scan_misses_other_groups() {
        let cp = InMemoryControlPlane::new();
        let container = cp.add_container("rg-app");
        let nsg = cp.add_resource(
            format!("{RG}/providers/Microsoft.Network/networkSecurityGroups/nsg-1"),
            json!({}),
        );
        cp.add_resource(
            format!("{OTHER_RG}/providers/Microsoft.Network/networkInterfaces/nic-1"),
            json!({ "networkSecurityGroup": { "id": nsg.as_str() } }),
        );

        let scanner = ResourceGraphScanner::new(&cp, &container);
        assert!(scanner
            .scan_security_group(&nsg, ScanMode::Scoped)
            .await
            .is_empty());
        assert_eq!(
            scanner.scan_security_group(&nsg, ScanMode::Broad).await.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_query_is_empty() {
        let cp = InMemoryControlPlane::new();
        let container = cp.add_container("rg-app");
        cp.add_resource(vnet(), json!({}));
        cp.fail_queries(true);

        let scanner = ResourceGraphScanner::new(&cp, &container);
        assert!(scanner
            .list_in_container(types::VIRTUAL_NETWORK)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_remote_peerings_exclude_local_ones() {
        let cp = InMemoryControlPlane::new();
        let container = cp.add_container("rg-app");
        let vnet = cp.add_resource(vnet(), json!({}));
        let hub = ResourceId::new(format!(
            "{OTHER_RG}/providers/Microsoft.Network/virtualNetworks/hub"
        ));
        cp.add_resource(hub.clone(), json!({}));
        let local = cp.add_resource(
            vnet.child("virtualNetworkPeerings", "to-hub"),
            json!({ "remoteVirtualNetwork": { "id": hub.as_str() } }),
        );
        let remote = cp.add_resource(
            hub.child("virtualNetworkPeerings", "to-app"),
            json!({ "remoteVirtualNetwork": { "id": vnet.as_str() } }),
        );

        let scanner = ResourceGraphScanner::new(&cp, &container);
        assert_eq!(scanner.remote_peerings(&vnet).await, vec![remote.clone()]);

        let records = scanner.scan_network(&vnet).await;
        let owners: Vec<&ResourceId> = records.iter().map(|r| &r.owner).collect();
        assert!(owners.contains(&&local));
        assert!(owners.contains(&&remote));

        let broad = cp
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::List { scope: Scope::Subscription, .. }))
            .count();
        assert!(broad > 0);
    }

    #[tokio::test]
    async fn test_survey_is_read_only() {
        let cp = InMemoryControlPlane::new();
        let container = cp.add_container("rg-app");
        let vnet = cp.add_resource(vnet(), json!({}));
        let nsg = cp.add_resource(
            format!("{RG}/providers/Microsoft.Network/networkSecurityGroups/nsg-1"),
            json!({}),
        );
        cp.add_resource(
            vnet.child("subnets", "snet-1"),
            json!({ "networkSecurityGroup": { "id": nsg.as_str() } }),
        );
        cp.add_resource(
            format!("{RG}/providers/Microsoft.Authorization/locks/no-delete"),
            json!({ "level": "CanNotDelete" }),
        );

        let scanner = ResourceGraphScanner::new(&cp, &container);
        let inventory = scanner.survey(ScanMode::Scoped).await;

        assert_eq!(inventory.locks.len(), 1);
        assert_eq!(inventory.security_groups[0].1.len(), 1);
        assert_eq!(inventory.subnets.len(), 1);
        // the subnet's security group shows up from both sides
        assert_eq!(inventory.blocker_count(), 3);
        assert!(cp.calls().iter().all(|c| matches!(
            c,
            Call::List { .. } | Call::Get(_)
        )));
    }
}
