//! Service association link resolution
//!
//! Links are created by the platform when a service attaches to a subnet and
//! must be gone before the subnet can be deleted. Some services only release
//! a link once their owner resources are deleted, some only while the subnet
//! still carries their delegation, and every link disappears asynchronously
//! after its delete call returns.

use crate::catalog::{self, Anchor, BlockerKind, LinkRule, Relation};
use crate::context::RunContext;
use crate::error::Result;
use crate::report::TeardownReport;
use crate::retry::RetryExecutor;
use crate::scanner::{ResourceGraphScanner, ScanMode};
use rgpurge_cloud::{CallOutcome, ControlPlaneClient, Patch, QueryFilter, ResourceId};
use std::collections::BTreeSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of resolving the links on one subnet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkResolution {
    /// No link remains on the subnet
    Cleared,
    /// At least one link is still present
    Blocked(String),
}

pub struct LinkResolver<'a> {
    client: &'a dyn ControlPlaneClient,
    ctx: &'a RunContext,
    scanner: &'a ResourceGraphScanner<'a>,
    retry: &'a RetryExecutor<'a>,
}

impl<'a> LinkResolver<'a> {
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

    /// Remove every link on `subnet`.
    ///
    /// Running this on a subnet without links makes no mutating call.
    pub async fn resolve(
        &self,
        subnet: &ResourceId,
        report: &mut TeardownReport,
    ) -> Result<LinkResolution> {
        let links = self.scanner.links(subnet).await;
        if links.is_empty() {
            return Ok(LinkResolution::Cleared);
        }
        info!(subnet = %subnet, count = links.len(), "Resolving service association links");

        let mut issued = false;
        let mut blocked = Vec::new();

        for link in &links {
            let rule = match self.client.get_resource(link).await {
                Ok(None) => {
                    debug!(link = %link, "Link already gone");
                    continue;
                }
                Ok(Some(props)) => catalog::link_service_name(&props)
                    .and_then(|service| catalog::link_rule(&service)),
                // Unreadable links still get a plain delete attempt
                Err(e) => {
                    warn!(link = %link, error = %e, "Failed to read link, deleting without owner handling");
                    None
                }
            };

            if let Some(rule) = rule {
                debug!(link = %link, service = rule.service_prefix, "Link needs owner handling");
                if let Some(delegation) = rule.required_delegation {
                    self.ensure_delegation(subnet, delegation, report).await?;
                }
                self.delete_owner_chain(rule, subnet, report).await?;
            }

            if self.delete_link(link, report).await? {
                issued = true;
            } else {
                blocked.push(link.name().to_string());
            }
        }

        if issued && !self.wait_until_gone(subnet).await? {
            return Ok(LinkResolution::Blocked(format!(
                "links on {} still present after {}s",
                subnet.name(),
                self.ctx.timing.link_wait().as_secs()
            )));
        }
        if !blocked.is_empty() {
            return Ok(LinkResolution::Blocked(format!(
                "could not delete {}",
                blocked.join(", ")
            )));
        }
        Ok(LinkResolution::Cleared)
    }

    /// Add `service` as a delegation if the subnet does not carry it
    async fn ensure_delegation(
        &self,
        subnet: &ResourceId,
        service: &str,
        report: &mut TeardownReport,
    ) -> Result<()> {
        let present = self
            .scanner
            .properties(subnet)
            .await
            .map(|props| catalog::delegations(&props))
            .unwrap_or_default();
        if present.iter().any(|d| d.eq_ignore_ascii_case(service)) {
            return Ok(());
        }

        info!(subnet = %subnet, delegation = service, "Adding delegation required for link removal");
        let patch = Patch::append("properties.delegations", catalog::delegation_entry(service));
        let attempt = self
            .retry
            .run(subnet.as_str(), "add delegation", || {
                self.client.update_resource(subnet, &patch)
            })
            .await?;

        if attempt.cleared() {
            report.add_removed(
                subnet,
                BlockerKind::SubnetDelegation,
                format!("added {} for link removal", service),
            );
        } else {
            report.add_failure(
                subnet,
                BlockerKind::SubnetDelegation,
                attempt.outcome.to_string(),
            );
        }
        report.add_attempt(attempt);
        Ok(())
    }

    /// Discover the owner chain level by level, then delete it innermost first
    async fn delete_owner_chain(
        &self,
        rule: &LinkRule,
        subnet: &ResourceId,
        report: &mut TeardownReport,
    ) -> Result<()> {
        let mut levels: Vec<Vec<ResourceId>> = Vec::with_capacity(rule.owner_chain.len());

        for level in rule.owner_chain {
            let found = match level.relation {
                Relation::References(anchor) => {
                    let mut found = BTreeSet::new();
                    for target in anchor_ids(anchor, subnet, &levels) {
                        found.extend(
                            self.scanner
                                .referencing(&target, &[level.resource_type], ScanMode::Broad)
                                .await,
                        );
                    }
                    found
                }
                Relation::ChildOf(anchor) => {
                    let mut found = BTreeSet::new();
                    for parent in anchor_ids(anchor, subnet, &levels) {
                        found.extend(
                            self.scanner
                                .list(
                                    level.resource_type,
                                    &QueryFilter::ChildOf(parent),
                                    ScanMode::Broad,
                                )
                                .await,
                        );
                    }
                    found
                }
                Relation::ParentOf(anchor) => anchor_ids(anchor, subnet, &levels)
                    .into_iter()
                    .filter_map(|child| child.parent())
                    .filter(|parent| parent.is_type(level.resource_type))
                    .collect(),
            };
            levels.push(found.into_iter().collect());
        }

        for &index in rule.delete_order {
            let Some(owners) = levels.get(index) else {
                continue;
            };
            for owner in owners {
                let attempt = self
                    .retry
                    .run(owner.as_str(), "delete link owner", || {
                        self.client.delete_resource(owner, None)
                    })
                    .await?;
                if attempt.cleared() {
                    report.add_removed(owner, BlockerKind::HeavyCompute, "deleted link owner");
                } else {
                    report.add_failure(
                        owner,
                        BlockerKind::HeavyCompute,
                        attempt.outcome.to_string(),
                    );
                }
                report.add_attempt(attempt);
            }
        }
        Ok(())
    }

    /// Delete one link, trying each API version and then the raw fallback.
    ///
    /// Returns whether a delete call was accepted.
    async fn delete_link(&self, link: &ResourceId, report: &mut TeardownReport) -> Result<bool> {
        let mut last = CallOutcome::NotFound;

        for version in catalog::LINK_API_VERSIONS {
            let attempt = self
                .retry
                .run(link.as_str(), "delete link", || {
                    self.client.delete_resource(link, Some(version))
                })
                .await?;
            let cleared = attempt.cleared();
            last = attempt.outcome.clone();
            report.add_attempt(attempt);

            if cleared {
                report.add_removed(
                    link,
                    BlockerKind::ServiceAssociationLink,
                    format!("delete accepted (api-version {})", version),
                );
                return Ok(true);
            }
            debug!(link = %link, api_version = version, "Link delete refused: {}", last);
        }

        if self.ctx.options.allow_protocol_level_fallback {
            let version = catalog::LINK_API_VERSIONS[0];
            warn!(link = %link, "Falling back to a raw protocol-level delete");
            let attempt = self
                .retry
                .run(link.as_str(), "raw delete link", || {
                    self.client.delete_resource_raw(link, version)
                })
                .await?;
            let cleared = attempt.cleared();
            last = attempt.outcome.clone();
            report.add_attempt(attempt);

            if cleared {
                report.add_removed(
                    link,
                    BlockerKind::ServiceAssociationLink,
                    "raw delete accepted",
                );
                return Ok(true);
            }
        } else {
            debug!(link = %link, "Raw delete fallback not enabled");
        }

        report.add_failure(link, BlockerKind::ServiceAssociationLink, last.to_string());
        Ok(false)
    }

    /// Poll the subnet's links until none remain or the ceiling elapses
    async fn wait_until_gone(&self, subnet: &ResourceId) -> Result<bool> {
        let started = Instant::now();
        let ceiling = self.ctx.timing.link_wait();

        loop {
            self.ctx.check_cancelled()?;
            let remaining = self.scanner.links(subnet).await;
            if remaining.is_empty() {
                debug!(
                    subnet = %subnet,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Links gone"
                );
                return Ok(true);
            }
            if started.elapsed() >= ceiling {
                warn!(
                    subnet = %subnet,
                    remaining = remaining.len(),
                    "Links still present after waiting"
                );
                return Ok(false);
            }
            self.ctx.sleep(self.ctx.timing.link_poll()).await?;
        }
    }
}

fn anchor_ids(anchor: Anchor, subnet: &ResourceId, levels: &[Vec<ResourceId>]) -> Vec<ResourceId> {
    match anchor {
        Anchor::Subnet => vec![subnet.clone()],
        Anchor::Level(index) => levels.get(index).cloned().unwrap_or_default(),
    }
}
