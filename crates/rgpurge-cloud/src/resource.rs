//! Resource identifiers and well-known resource types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque control-plane resource identifier.
///
/// Identifiers are ARM-style paths such as
/// `/subscriptions/<sub>/resourceGroups/<rg>/providers/Microsoft.Network/virtualNetworks/<vnet>`.
/// The control plane treats them case-insensitively, so comparisons that
/// cross API boundaries should go through [`ResourceId::same_as`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Last path segment (the resource name)
    pub fn name(&self) -> &str {
        self.segments().last().unwrap_or_default()
    }

    /// Resource group segment, if the id is scoped to one
    pub fn resource_group(&self) -> Option<&str> {
        let mut segments = self.segments();
        while let Some(segment) = segments.next() {
            if segment.eq_ignore_ascii_case("resourceGroups") {
                return segments.next();
            }
        }
        None
    }

    /// Provider-qualified type, e.g. `Microsoft.Network/virtualNetworks/subnets`
    pub fn resource_type(&self) -> Option<String> {
        let segments: Vec<&str> = self.segments().collect();
        let pos = segments
            .iter()
            .rposition(|s| s.eq_ignore_ascii_case("providers"))?;
        let (namespace, pairs) = segments[pos + 1..].split_first()?;
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return None;
        }

        let mut resource_type = namespace.to_string();
        for pair in pairs.chunks(2) {
            resource_type.push('/');
            resource_type.push_str(pair[0]);
        }
        Some(resource_type)
    }

    /// Whether this id has the given resource type (case-insensitive)
    pub fn is_type(&self, resource_type: &str) -> bool {
        self.resource_type()
            .is_some_and(|t| t.eq_ignore_ascii_case(resource_type))
    }

    /// Parent of a child resource (a subnet's VNet, a link's subnet).
    ///
    /// Top-level resources have no parent.
    pub fn parent(&self) -> Option<ResourceId> {
        let resource_type = self.resource_type()?;
        if resource_type.matches('/').count() < 2 {
            return None;
        }
        let trimmed = self.0.trim_end_matches('/');
        let cut = trimmed.rfind('/')?;
        let cut = trimmed[..cut].rfind('/')?;
        Some(Self(trimmed[..cut].to_string()))
    }

    /// Build the id of a child resource
    pub fn child(&self, child_type: &str, name: &str) -> ResourceId {
        Self(format!(
            "{}/{}/{}",
            self.0.trim_end_matches('/'),
            child_type,
            name
        ))
    }

    /// Whether `self` is a (transitive) child of `ancestor`
    pub fn is_descendant_of(&self, ancestor: &ResourceId) -> bool {
        let me = self.0.to_ascii_lowercase();
        let prefix = format!("{}/", ancestor.0.trim_end_matches('/').to_ascii_lowercase());
        me.starts_with(&prefix)
    }

    /// Case-insensitive identity, as the control plane compares ids
    pub fn same_as(&self, other: &ResourceId) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The deletable container (a resource group)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether a resource id lives in this container
    pub fn contains(&self, id: &ResourceId) -> bool {
        id.resource_group()
            .is_some_and(|rg| rg.eq_ignore_ascii_case(&self.0))
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resource types the teardown engine knows about
pub mod types {
    /// Matches every resource type in a query
    pub const ANY: &str = "*";

    pub const LOCK: &str = "Microsoft.Authorization/locks";

    pub const VIRTUAL_NETWORK: &str = "Microsoft.Network/virtualNetworks";
    pub const SUBNET: &str = "Microsoft.Network/virtualNetworks/subnets";
    pub const SERVICE_ASSOCIATION_LINK: &str =
        "Microsoft.Network/virtualNetworks/subnets/serviceAssociationLinks";
    pub const VNET_PEERING: &str = "Microsoft.Network/virtualNetworks/virtualNetworkPeerings";
    pub const NETWORK_SECURITY_GROUP: &str = "Microsoft.Network/networkSecurityGroups";
    pub const NETWORK_INTERFACE: &str = "Microsoft.Network/networkInterfaces";
    pub const PRIVATE_ENDPOINT: &str = "Microsoft.Network/privateEndpoints";
    pub const PRIVATE_DNS_ZONE_LINK: &str = "Microsoft.Network/privateDnsZones/virtualNetworkLinks";
    pub const APPLICATION_GATEWAY: &str = "Microsoft.Network/applicationGateways";
    pub const AZURE_FIREWALL: &str = "Microsoft.Network/azureFirewalls";
    pub const BASTION_HOST: &str = "Microsoft.Network/bastionHosts";

    pub const VIRTUAL_MACHINE: &str = "Microsoft.Compute/virtualMachines";
    pub const MANAGED_ENVIRONMENT: &str = "Microsoft.App/managedEnvironments";
    pub const CONTAINER_GROUP: &str = "Microsoft.ContainerInstance/containerGroups";
    pub const WEB_SITE: &str = "Microsoft.Web/sites";

    pub const DEV_CENTER: &str = "Microsoft.DevCenter/devcenters";
    pub const DEV_CENTER_NETWORK_CONNECTION: &str = "Microsoft.DevCenter/networkConnections";
    pub const DEV_CENTER_PROJECT: &str = "Microsoft.DevCenter/projects";
    pub const DEV_CENTER_ENVIRONMENT_TYPE: &str = "Microsoft.DevCenter/projects/environmentTypes";

    /// Case-insensitive type comparison, `ANY` matching everything
    pub fn matches(pattern: &str, resource_type: &str) -> bool {
        pattern == ANY || pattern.eq_ignore_ascii_case(resource_type)
    }
}
