//! Subnet teardown planner
//!
//! Drives subnets from "has blockers" to deleted, over a bounded number of
//! passes. A subnet whose blockers cannot be cleared yet is deferred to the
//! next pass; subnets still deferred after the last pass are reported and
//! left in place.

use crate::catalog::{self, BlockerKind};
use crate::context::RunContext;
use crate::error::Result;
use crate::report::TeardownReport;
use crate::retry::RetryExecutor;
use crate::sal::{LinkResolution, LinkResolver};
use crate::scanner::{ResourceGraphScanner, ScanMode};
use rgpurge_cloud::{ControlPlaneClient, FailureKind, ResourceId, types};
use tracing::{debug, info, warn};

/// Where one subnet ended up after a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubnetStatus {
    Deleted,
    Deferred(String),
}

/// Result of a planner run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanResult {
    pub deleted: Vec<ResourceId>,
    /// Subnets left in place, with the last reason they were deferred
    pub deferred: Vec<(ResourceId, String)>,
    /// Deferred subnet count after each pass
    pub deferred_per_pass: Vec<usize>,
}

pub struct SubnetTeardownPlanner<'a> {
    client: &'a dyn ControlPlaneClient,
    ctx: &'a RunContext,
    scanner: &'a ResourceGraphScanner<'a>,
    retry: &'a RetryExecutor<'a>,
}

impl<'a> SubnetTeardownPlanner<'a> {
    pub fn new(
        client: &'a dyn ControlPlaneClient,
        ctx: &'a RunContext,
        scanner: &'a ResourceGraphScanner<'a>,
        retry: &'a RetryExecutor<'a>,
    ) -> Self {
        Self {
            client,
            ctx,
            scanner,
            retry,
        }
    }

    pub async fn run(
        &self,
        subnets: &[ResourceId],
        report: &mut TeardownReport,
    ) -> Result<PlanResult> {
        let mut result = PlanResult::default();
        let mut pending: Vec<ResourceId> = subnets.to_vec();
        let pass_limit = self.ctx.timing.pass_limit.max(1);

        for pass in 1..=pass_limit {
            if pending.is_empty() {
                break;
            }
            info!(pass, subnets = pending.len(), "Subnet pass");

            let mut deferred = Vec::new();
            for subnet in &pending {
                match self.process(subnet, report).await? {
                    SubnetStatus::Deleted => result.deleted.push(subnet.clone()),
                    SubnetStatus::Deferred(reason) => {
                        info!(subnet = %subnet, pass, "Deferred: {}", reason);
                        deferred.push((subnet.clone(), reason));
                    }
                }
            }
            result.deferred_per_pass.push(deferred.len());

            if deferred.is_empty() {
                break;
            }
            if pass == pass_limit {
                result.deferred = deferred;
                break;
            }

            pending = deferred.into_iter().map(|(subnet, _)| subnet).collect();
            let wait = self.ctx.timing.pass_wait(pass);
            debug!(pass, wait_ms = wait.as_millis() as u64, "Waiting before next pass");
            self.ctx.sleep(wait).await?;
        }

        for (subnet, reason) in &result.deferred {
            warn!(subnet = %subnet, "Subnet left in place: {}", reason);
            report.add_failure(subnet, "subnet", format!("deferred: {}", reason));
            report.deferred_subnets.push(subnet.clone());
        }
        Ok(result)
    }

    /// One pass over one subnet
    async fn process(
        &self,
        subnet: &ResourceId,
        report: &mut TeardownReport,
    ) -> Result<SubnetStatus> {
        // Consumers may live in other resource groups
        let consumers = self
            .scanner
            .referencing(subnet, catalog::SUBNET_CONSUMERS, ScanMode::Broad)
            .await;
        self.delete_all(&consumers, BlockerKind::HeavyCompute, report)
            .await?;

        let endpoints = self
            .scanner
            .referencing(subnet, &[types::PRIVATE_ENDPOINT], ScanMode::Scoped)
            .await;
        self.delete_all(&endpoints, BlockerKind::PrivateEndpoint, report)
            .await?;

        let resolver = LinkResolver::new(self.client, self.ctx, self.scanner, self.retry);
        if let LinkResolution::Blocked(reason) = resolver.resolve(subnet, report).await? {
            return Ok(SubnetStatus::Deferred(reason));
        }

        let Some(props) = self.scanner.properties(subnet).await else {
            report.add_skipped(subnet, "subnet", "already gone");
            return Ok(SubnetStatus::Deleted);
        };

        // Each association is cleared independently
        let mut changed = false;
        for association in catalog::SUBNET_ASSOCIATIONS {
            if !association.is_present(&props) {
                continue;
            }
            let patch = association.clear_patch();
            let attempt = self
                .retry
                .run(subnet.as_str(), "clear association", || {
                    self.client.update_resource(subnet, &patch)
                })
                .await?;
            if attempt.cleared() {
                changed = true;
                report.add_removed(subnet, association.kind, patch.to_string());
            } else {
                report.add_failure(subnet, association.kind, attempt.outcome.to_string());
            }
            report.add_attempt(attempt);
        }

        if changed {
            let remaining = self
                .scanner
                .properties(subnet)
                .await
                .map(|props| catalog::delegations(&props))
                .unwrap_or_default();
            if !remaining.is_empty() {
                return Ok(SubnetStatus::Deferred(format!(
                    "delegations still present: {}",
                    remaining.join(", ")
                )));
            }
        } else if !catalog::delegations(&props).is_empty() {
            return Ok(SubnetStatus::Deferred("delegations could not be removed".to_string()));
        }

        let links = self.scanner.links(subnet).await;
        if !links.is_empty() {
            let names: Vec<&str> = links.iter().map(|l| l.name()).collect();
            return Ok(SubnetStatus::Deferred(format!(
                "links still present: {}",
                names.join(", ")
            )));
        }

        let attempt = self
            .retry
            .run(subnet.as_str(), "delete subnet", || {
                self.client.delete_resource(subnet, None)
            })
            .await?;
        let cleared = attempt.cleared();
        let outcome = attempt.outcome.clone();
        report.add_attempt(attempt);

        if cleared {
            report.add_removed(subnet, "subnet", "deleted");
            return Ok(SubnetStatus::Deleted);
        }

        let mut reason = outcome.to_string();
        if outcome
            .failure()
            .is_some_and(|f| f.kind == FailureKind::Dependency)
        {
            let holders = self
                .scanner
                .referencing(subnet, catalog::SUBNET_REFERRERS, ScanMode::Broad)
                .await;
            if !holders.is_empty() {
                let names: Vec<&str> = holders.iter().map(|h| h.name()).collect();
                reason = format!("{} (still referenced by {})", reason, names.join(", "));
            }
        }
        Ok(SubnetStatus::Deferred(reason))
    }

    async fn delete_all(
        &self,
        targets: &[ResourceId],
        kind: BlockerKind,
        report: &mut TeardownReport,
    ) -> Result<()> {
        for target in targets {
            let attempt = self
                .retry
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TeardownOptions;
    use async_trait::async_trait;
    use rgpurge_cloud::memory::{Call, InMemoryControlPlane};
    use rgpurge_cloud::{
        CallOutcome, CloudError, ContainerId, Patch, ProvisioningState, QueryFilter, Scope,
    };
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    const RG: &str = "/subscriptions/0000/resourceGroups/rg-app";

    fn vnet() -> ResourceId {
        ResourceId::new(format!("{RG}/providers/Microsoft.Network/virtualNetworks/vnet-a"))
    }

    /// Control plane whose link reads fail and whose first link listings come back empty
    struct UnreliableLinks {
        inner: InMemoryControlPlane,
        unreadable: bool,
        hidden_listings: AtomicU32,
    }

    impl UnreliableLinks {
        fn new(inner: InMemoryControlPlane, unreadable: bool, hidden_listings: u32) -> Self {
            Self {
                inner,
                unreadable,
                hidden_listings: AtomicU32::new(hidden_listings),
            }
        }
    }

    #[async_trait]
    impl ControlPlaneClient for UnreliableLinks {
        fn name(&self) -> &str {
            "unreliable-links"
        }

        async fn list_by_query(
            &self,
            resource_type: &str,
            filter: &QueryFilter,
            scope: &Scope,
        ) -> rgpurge_cloud::Result<Vec<ResourceId>> {
            if resource_type.eq_ignore_ascii_case(types::SERVICE_ASSOCIATION_LINK)
                && self
                    .hidden_listings
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Ok(Vec::new());
            }
            self.inner.list_by_query(resource_type, filter, scope).await
        }

        async fn get_resource(&self, id: &ResourceId) -> rgpurge_cloud::Result<Option<Value>> {
            if self.unreadable && id.is_type(types::SERVICE_ASSOCIATION_LINK) {
                return Err(CloudError::QueryFailed("ResourceNotReadable".to_string()));
            }
            self.inner.get_resource(id).await
        }

        async fn delete_resource(&self, id: &ResourceId, api_version: Option<&str>) -> CallOutcome {
            self.inner.delete_resource(id, api_version).await
        }

        async fn delete_resource_raw(&self, id: &ResourceId, api_version: &str) -> CallOutcome {
            self.inner.delete_resource_raw(id, api_version).await
        }

        async fn update_resource(&self, id: &ResourceId, patch: &Patch) -> CallOutcome {
            self.inner.update_resource(id, patch).await
        }

        async fn get_container_state(
            &self,
            container: &ContainerId,
        ) -> rgpurge_cloud::Result<Option<ProvisioningState>> {
            self.inner.get_container_state(container).await
        }

        async fn delete_container(&self, container: &ContainerId) -> CallOutcome {
            self.inner.delete_container(container).await
        }
    }

    async fn plan(
        cp: &dyn ControlPlaneClient,
        ctx: &RunContext,
        subnets: &[ResourceId],
    ) -> (PlanResult, TeardownReport) {
        let scanner = ResourceGraphScanner::new(cp, &ctx.container);
        let retry = RetryExecutor::new(ctx);
        let planner = SubnetTeardownPlanner::new(cp, ctx, &scanner, &retry);
        let mut report = TeardownReport::new(ctx.container.clone());
        let result = planner.run(subnets, &mut report).await.unwrap();
        (result, report)
    }

    fn ctx() -> RunContext {
        RunContext::new(ContainerId::new("rg-app"), TeardownOptions::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_associations_cleared_before_delete() {
        let cp = InMemoryControlPlane::new();
        cp.add_container("rg-app");
        let rt = cp.add_resource(
            format!("{RG}/providers/Microsoft.Network/routeTables/rt-1"),
            json!({}),
        );
        let subnet = cp.add_resource(
            vnet().child("subnets", "snet-1"),
            json!({
                "routeTable": { "id": rt.as_str() },
                "delegations": [catalog::delegation_entry("Microsoft.Web/serverFarms")],
                "serviceEndpoints": [{ "service": "Microsoft.Storage" }]
            }),
        );
        let ctx = ctx();

        let (result, report) = plan(&cp, &ctx, &[subnet.clone()]).await;
        assert_eq!(result.deleted, vec![subnet.clone()]);
        assert!(result.deferred.is_empty());
        assert!(!cp.exists(&subnet));
        assert!(cp.violations().is_empty());
        assert_eq!(report.removed.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_private_endpoints_removed_first() {
        let cp = InMemoryControlPlane::new();
        cp.add_container("rg-app");
        let subnet = cp.add_resource(vnet().child("subnets", "snet-1"), json!({}));
        let pe = cp.add_resource(
            format!("{RG}/providers/Microsoft.Network/privateEndpoints/pe-1"),
            json!({ "subnet": { "id": subnet.as_str() } }),
        );
        let ctx = ctx();

        let (result, _) = plan(&cp, &ctx, &[subnet.clone()]).await;
        assert_eq!(result.deleted.len(), 1);

        let deletes: Vec<ResourceId> = cp
            .calls()
            .iter()
            .filter_map(|c| c.deleted_id().cloned())
            .collect();
        assert_eq!(deletes, vec![pe, subnet]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferral_is_monotonic_and_bounded() {
        let cp = InMemoryControlPlane::new();
        cp.add_container("rg-app");
        let free = cp.add_resource(vnet().child("subnets", "snet-free"), json!({}));
        let slow = cp.add_resource(vnet().child("subnets", "snet-slow"), json!({}));
        let stuck = cp.add_resource(vnet().child("subnets", "snet-stuck"), json!({}));
        cp.script_delete(&slow, [CallOutcome::dependency("InUseSubnetCannotBeDeleted")]);
        cp.script_delete(
            &stuck,
            std::iter::repeat_n(CallOutcome::dependency("InUseSubnetCannotBeDeleted"), 10),
        );
        let ctx = ctx();

        let started = Instant::now();
        let (result, report) = plan(&cp, &ctx, &[free.clone(), slow.clone(), stuck.clone()]).await;

        assert_eq!(result.deleted, vec![free.clone(), slow.clone()]);
        assert_eq!(result.deferred.len(), 1);
        assert_eq!(result.deferred[0].0, stuck);
        assert_eq!(result.deferred_per_pass, vec![2, 1, 1, 1]);
        assert!(result.deferred_per_pass.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(report.deferred_subnets, vec![stuck.clone()]);

        // waits of 10, 20 and 30 units between the four passes
        assert!(started.elapsed() >= ctx.timing.units(60));

        // deleted subnets are never revisited
        let free_deletes = cp
            .calls()
            .iter()
            .filter(|c| c.deleted_id() == Some(&free))
            .count();
        assert_eq!(free_deletes, 1);
        let stuck_deletes = cp
            .calls()
            .iter()
            .filter(|c| c.deleted_id() == Some(&stuck))
            .count();
        assert_eq!(stuck_deletes, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_link_skips_delete() {
        let cp = InMemoryControlPlane::new();
        cp.add_container("rg-app");
        let subnet = cp.add_resource(vnet().child("subnets", "snet-1"), json!({}));
        let link = cp.add_resource(subnet.child("serviceAssociationLinks", "link"), json!({}));
        cp.script_delete(&link, std::iter::repeat_n(CallOutcome::rejected("refused"), 8));
        let ctx = ctx();

        let (result, _) = plan(&cp, &ctx, &[subnet.clone()]).await;
        assert_eq!(result.deferred.len(), 1);
        assert!(
            !cp.calls()
                .iter()
                .any(|c| matches!(c, Call::Delete { id, .. } if *id == subnet))
        );
        assert!(cp.violations().is_empty());
    }

    fn updates(cp: &InMemoryControlPlane, subnet: &ResourceId) -> Vec<Patch> {
        cp.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update { id, patch } if id == *subnet => Some(patch),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_link_is_still_deleted() {
        let cp = InMemoryControlPlane::new();
        cp.add_container("rg-app");
        let subnet = cp.add_resource(vnet().child("subnets", "snet-1"), json!({}));
        let link = cp.add_resource(
            subnet.child("serviceAssociationLinks", "link"),
            json!({ "linkedResourceType": "Microsoft.Web/serverFarms" }),
        );
        let client = UnreliableLinks::new(cp, true, 0);
        let ctx = ctx();

        let (result, _) = plan(&client, &ctx, &[subnet.clone()]).await;
        let cp = &client.inner;

        assert_eq!(result.deleted, vec![subnet.clone()]);
        assert!(!cp.exists(&link));
        let link_deletes = cp
            .calls()
            .iter()
            .filter(|c| c.deleted_id() == Some(&link))
            .count();
        assert_eq!(link_deletes, 1);
        assert!(cp.violations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subnet_deferred_while_link_is_listed() {
        let cp = InMemoryControlPlane::new();
        cp.add_container("rg-app");
        let subnet = cp.add_resource(vnet().child("subnets", "snet-1"), json!({}));
        let link = cp.add_resource(subnet.child("serviceAssociationLinks", "link"), json!({}));
        // The first link listing misses the link, so resolution reports nothing to do
        let client = UnreliableLinks::new(cp, false, 1);
        let ctx = ctx();

        let (result, _) = plan(&client, &ctx, &[subnet.clone()]).await;
        let cp = &client.inner;

        assert_eq!(result.deleted, vec![subnet.clone()]);
        assert_eq!(result.deferred_per_pass, vec![1, 0]);
        assert!(cp.violations().is_empty());

        let calls = cp.calls();
        let link_delete = calls.iter().position(|c| c.deleted_id() == Some(&link));
        let subnet_delete = calls.iter().position(|c| c.deleted_id() == Some(&subnet));
        assert!(link_delete.unwrap() < subnet_delete.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_association_does_not_block_the_others() {
        let cp = InMemoryControlPlane::new();
        cp.add_container("rg-app");
        let subnet = cp.add_resource(
            vnet().child("subnets", "snet-1"),
            json!({
                "networkSecurityGroup": { "id": format!("{RG}/providers/Microsoft.Network/networkSecurityGroups/nsg") },
                "routeTable": { "id": format!("{RG}/providers/Microsoft.Network/routeTables/rt") },
                "natGateway": { "id": format!("{RG}/providers/Microsoft.Network/natGateways/nat") },
                "delegations": [catalog::delegation_entry("Microsoft.Web/serverFarms")],
                "serviceEndpoints": [{ "service": "Microsoft.Storage" }]
            }),
        );
        cp.script_update(&subnet, [CallOutcome::permission("AuthorizationFailed")]);
        let ctx = ctx();

        let (result, report) = plan(&cp, &ctx, &[subnet.clone()]).await;

        assert_eq!(
            updates(&cp, &subnet),
            vec![
                Patch::remove("properties.networkSecurityGroup"),
                Patch::remove("properties.routeTable"),
                Patch::remove("properties.natGateway"),
                Patch::set("properties.delegations", json!([])),
                Patch::set("properties.serviceEndpoints", json!([])),
            ]
        );
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            report.failed[0].kind,
            BlockerKind::SecurityGroupAssociation.to_string()
        );
        assert_eq!(report.removed.len(), 5);

        // Only the security group clear failed, so the subnet still goes
        assert_eq!(result.deleted, vec![subnet.clone()]);
        assert_eq!(result.deferred_per_pass, vec![0]);
        assert!(cp.violations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delegation_clear_defers_subnet() {
        let cp = InMemoryControlPlane::new();
        cp.add_container("rg-app");
        let subnet = cp.add_resource(
            vnet().child("subnets", "snet-1"),
            json!({
                "delegations": [catalog::delegation_entry("Microsoft.Web/serverFarms")],
                "serviceEndpoints": [{ "service": "Microsoft.Storage" }]
            }),
        );
        cp.script_update(&subnet, [CallOutcome::permission("AuthorizationFailed")]);
        let ctx = ctx();

        let (result, report) = plan(&cp, &ctx, &[subnet.clone()]).await;

        // Pass 1: delegation clear fails, endpoints still cleared, subnet deferred
        // Pass 2: delegation clear succeeds and the subnet is deleted
        assert_eq!(
            updates(&cp, &subnet),
            vec![
                Patch::set("properties.delegations", json!([])),
                Patch::set("properties.serviceEndpoints", json!([])),
                Patch::set("properties.delegations", json!([])),
            ]
        );
        assert_eq!(result.deferred_per_pass, vec![1, 0]);
        assert_eq!(result.deleted, vec![subnet.clone()]);
        assert!(
            report
                .failed
                .iter()
                .any(|r| r.kind == BlockerKind::SubnetDelegation.to_string())
        );

        let calls = cp.calls();
        let subnet_deletes: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| c.deleted_id() == Some(&subnet))
            .map(|(i, _)| i)
            .collect();
        let last_update = calls
            .iter()
            .rposition(|c| matches!(c, Call::Update { id, .. } if *id == subnet));
        assert_eq!(subnet_deletes.len(), 1);
        assert!(subnet_deletes[0] > last_update.unwrap());
        assert!(cp.violations().is_empty());
    }
}
