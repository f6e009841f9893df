//! Blocker catalog
//!
//! Static knowledge of what can pin network infrastructure inside a resource
//! group and the order in which those blockers have to go. Heavy compute
//! goes before subnets because a running environment re-attaches the
//! delegations and links it needs. Locks are cleared on the way in and swept
//! again right before the final delete.

use rgpurge_cloud::{Patch, ResourceId, types};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

/// Category of a reference that keeps a network object alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerKind {
    Lock,
    SecurityGroupAssociation,
    PrivateEndpoint,
    ServiceAssociationLink,
    SubnetDelegation,
    ServiceEndpointBinding,
    RouteTableAssociation,
    NatGatewayAssociation,
    VNetPeering,
    PrivateDnsLink,
    HeavyCompute,
}

impl fmt::Display for BlockerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BlockerKind::Lock => "lock",
            BlockerKind::SecurityGroupAssociation => "security group association",
            BlockerKind::PrivateEndpoint => "private endpoint",
            BlockerKind::ServiceAssociationLink => "service association link",
            BlockerKind::SubnetDelegation => "subnet delegation",
            BlockerKind::ServiceEndpointBinding => "service endpoint",
            BlockerKind::RouteTableAssociation => "route table association",
            BlockerKind::NatGatewayAssociation => "NAT gateway association",
            BlockerKind::VNetPeering => "VNet peering",
            BlockerKind::PrivateDnsLink => "private DNS link",
            BlockerKind::HeavyCompute => "compute resource",
        };
        f.write_str(label)
    }
}

/// A live reference from `owner` to `target`.
///
/// Records are query results and are never persisted between scans.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockerRecord {
    pub kind: BlockerKind,
    pub owner: ResourceId,
    pub target: ResourceId,
}

impl BlockerRecord {
    pub fn new(kind: BlockerKind, owner: ResourceId, target: ResourceId) -> Self {
        Self {
            kind,
            owner,
            target,
        }
    }
}

impl fmt::Display for BlockerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.kind, self.owner.name(), self.target.name())
    }
}

/// Container-level removal order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Locks,
    HeavyCompute,
    Subnets,
    Peerings,
    DnsLinks,
    VirtualNetworks,
    FinalLockSweep,
    ContainerDelete,
}

pub const CONTAINER_ORDER: [Stage; 8] = [
    Stage::Locks,
    Stage::HeavyCompute,
    Stage::Subnets,
    Stage::Peerings,
    Stage::DnsLinks,
    Stage::VirtualNetworks,
    Stage::FinalLockSweep,
    Stage::ContainerDelete,
];

/// Heavy compute anchored to subnets, in deletion order
pub const HEAVY_COMPUTE: &[&str] = &[
    types::MANAGED_ENVIRONMENT,
    types::APPLICATION_GATEWAY,
    types::AZURE_FIREWALL,
    types::BASTION_HOST,
    types::VIRTUAL_MACHINE,
    types::NETWORK_INTERFACE,
];

/// Services that consume a subnet from anywhere in the subscription
pub const SUBNET_CONSUMERS: &[&str] = &[
    types::MANAGED_ENVIRONMENT,
    types::DEV_CENTER_NETWORK_CONNECTION,
];

/// Types whose documents can point at a subnet
pub const SUBNET_REFERRERS: &[&str] = &[
    types::PRIVATE_ENDPOINT,
    types::NETWORK_INTERFACE,
    types::APPLICATION_GATEWAY,
    types::AZURE_FIREWALL,
    types::BASTION_HOST,
    types::MANAGED_ENVIRONMENT,
    types::CONTAINER_GROUP,
    types::WEB_SITE,
    types::DEV_CENTER_NETWORK_CONNECTION,
];

/// Types that attach a network security group
pub const SECURITY_GROUP_REFERRERS: &[&str] = &[types::NETWORK_INTERFACE, types::SUBNET];

/// Kind of blocker a referring resource represents
pub fn referrer_kind(owner: &ResourceId) -> BlockerKind {
    if owner.is_type(types::PRIVATE_ENDPOINT) {
        BlockerKind::PrivateEndpoint
    } else if owner.is_type(types::VNET_PEERING) {
        BlockerKind::VNetPeering
    } else if owner.is_type(types::PRIVATE_DNS_ZONE_LINK) {
        BlockerKind::PrivateDnsLink
    } else if owner.is_type(types::LOCK) {
        BlockerKind::Lock
    } else {
        BlockerKind::HeavyCompute
    }
}

/// An association carried in a subnet document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetAssociation {
    pub kind: BlockerKind,
    /// Key under `properties`
    pub property: &'static str,
}

impl SubnetAssociation {
    /// The patch that clears the association
    pub fn clear_patch(&self) -> Patch {
        let path = format!("properties.{}", self.property);
        match self.kind {
            BlockerKind::SubnetDelegation | BlockerKind::ServiceEndpointBinding => {
                Patch::set(path, json!([]))
            }
            _ => Patch::remove(path),
        }
    }

    /// Whether the subnet document still carries this association
    pub fn is_present(&self, properties: &Value) -> bool {
        match properties.get(self.property) {
            None | Some(Value::Null) => false,
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }

    /// Ids the association points at, or the subnet itself for inline settings
    pub fn owners(&self, properties: &Value, subnet: &ResourceId) -> Vec<ResourceId> {
        match properties.get(self.property) {
            Some(Value::Object(map)) => map
                .get("id")
                .and_then(Value::as_str)
                .map(|id| vec![ResourceId::new(id)])
                .unwrap_or_else(|| vec![subnet.clone()]),
            _ if self.is_present(properties) => vec![subnet.clone()],
            _ => Vec::new(),
        }
    }
}

/// Associations cleared from a subnet before it is deleted, in order
pub const SUBNET_ASSOCIATIONS: &[SubnetAssociation] = &[
    SubnetAssociation {
        kind: BlockerKind::SecurityGroupAssociation,
        property: "networkSecurityGroup",
    },
    SubnetAssociation {
        kind: BlockerKind::RouteTableAssociation,
        property: "routeTable",
    },
    SubnetAssociation {
        kind: BlockerKind::NatGatewayAssociation,
        property: "natGateway",
    },
    SubnetAssociation {
        kind: BlockerKind::SubnetDelegation,
        property: "delegations",
    },
    SubnetAssociation {
        kind: BlockerKind::ServiceEndpointBinding,
        property: "serviceEndpoints",
    },
];

/// Service names delegated on a subnet
pub fn delegations(properties: &Value) -> Vec<String> {
    properties
        .get("delegations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|d| {
                    d.pointer("/properties/serviceName")
                        .or_else(|| d.get("serviceName"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Delegation entry appended to a subnet
pub fn delegation_entry(service: &str) -> Value {
    json!({
        "name": service.replace('/', "."),
        "properties": { "serviceName": service }
    })
}

/// What an owner-chain level is discovered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Subnet,
    Level(usize),
}

/// How a level relates to its anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Resources whose documents mention the anchor
    References(Anchor),
    /// Children of the anchor
    ChildOf(Anchor),
    /// Parents of the anchor
    ParentOf(Anchor),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerLevel {
    pub resource_type: &'static str,
    pub relation: Relation,
}

/// How to clear a link created by one service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRule {
    /// Matched against the start of the link's service name
    pub service_prefix: &'static str,
    /// Delegation the subnet must carry while the link is deleted
    pub required_delegation: Option<&'static str>,
    /// Owner levels, discovered outward from the subnet
    pub owner_chain: &'static [OwnerLevel],
    /// Level indexes in deletion order, innermost owner first
    pub delete_order: &'static [usize],
}

const DEV_CENTER_ATTACHED_NETWORK: &str = "Microsoft.DevCenter/devcenters/attachednetworks";

pub const LINK_RULES: &[LinkRule] = &[
    LinkRule {
        service_prefix: "Microsoft.DevCenter",
        required_delegation: Some("Microsoft.DevCenter/networkConnection"),
        owner_chain: &[
            OwnerLevel {
                resource_type: types::DEV_CENTER_NETWORK_CONNECTION,
                relation: Relation::References(Anchor::Subnet),
            },
            OwnerLevel {
                resource_type: DEV_CENTER_ATTACHED_NETWORK,
                relation: Relation::References(Anchor::Level(0)),
            },
            OwnerLevel {
                resource_type: types::DEV_CENTER,
                relation: Relation::ParentOf(Anchor::Level(1)),
            },
            OwnerLevel {
                resource_type: types::DEV_CENTER_PROJECT,
                relation: Relation::References(Anchor::Level(2)),
            },
            OwnerLevel {
                resource_type: types::DEV_CENTER_ENVIRONMENT_TYPE,
                relation: Relation::ChildOf(Anchor::Level(3)),
            },
        ],
        // environment types, projects, attachments, network connections, dev centers
        delete_order: &[4, 3, 1, 0, 2],
    },
    LinkRule {
        service_prefix: "Microsoft.App",
        required_delegation: Some("Microsoft.App/environments"),
        owner_chain: &[OwnerLevel {
            resource_type: types::MANAGED_ENVIRONMENT,
            relation: Relation::References(Anchor::Subnet),
        }],
        delete_order: &[0],
    },
    LinkRule {
        service_prefix: "Microsoft.Web",
        required_delegation: Some("Microsoft.Web/serverFarms"),
        owner_chain: &[OwnerLevel {
            resource_type: types::WEB_SITE,
            relation: Relation::References(Anchor::Subnet),
        }],
        delete_order: &[0],
    },
    LinkRule {
        service_prefix: "Microsoft.ContainerInstance",
        required_delegation: Some("Microsoft.ContainerInstance/containerGroups"),
        owner_chain: &[OwnerLevel {
            resource_type: types::CONTAINER_GROUP,
            relation: Relation::References(Anchor::Subnet),
        }],
        delete_order: &[0],
    },
];

/// Rule for a link's service name, if the service needs special handling
pub fn link_rule(service_name: &str) -> Option<&'static LinkRule> {
    let service = service_name.to_ascii_lowercase();
    LINK_RULES
        .iter()
        .find(|rule| service.starts_with(&rule.service_prefix.to_ascii_lowercase()))
}

/// Service name recorded on a link document
pub fn link_service_name(properties: &Value) -> Option<String> {
    ["linkedResourceType", "serviceName"]
        .iter()
        .find_map(|key| properties.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// API versions tried for link deletes, newest first
pub const LINK_API_VERSIONS: [&str; 2] = ["2023-09-01", "2020-11-01"];

#[cfg(test)]
mod tests {
    use super::*;

    const SUBNET: &str = "/subscriptions/0/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/v/subnets/a";

    #[test]
    fn test_container_order_ends_with_sweep_and_delete() {
        assert_eq!(CONTAINER_ORDER[0], Stage::Locks);
        assert_eq!(CONTAINER_ORDER[1], Stage::HeavyCompute);
        assert_eq!(CONTAINER_ORDER[6], Stage::FinalLockSweep);
        assert_eq!(CONTAINER_ORDER[7], Stage::ContainerDelete);
        assert!(CONTAINER_ORDER.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_heavy_compute_order() {
        assert_eq!(HEAVY_COMPUTE.first(), Some(&types::MANAGED_ENVIRONMENT));
        assert_eq!(HEAVY_COMPUTE.last(), Some(&types::NETWORK_INTERFACE));
    }

    #[test]
    fn test_link_rule_lookup() {
        let rule = link_rule("Microsoft.DevCenter/networkConnections").unwrap();
        assert_eq!(rule.owner_chain.len(), rule.delete_order.len());
        assert!(link_rule("microsoft.app/environments").is_some());
        assert!(link_rule("Microsoft.Sql/managedInstances").is_none());
    }

    #[test]
    fn test_delete_orders_cover_every_level() {
        for rule in LINK_RULES {
            let mut order = rule.delete_order.to_vec();
            order.sort_unstable();
            assert_eq!(order, (0..rule.owner_chain.len()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_subnet_association_detection() {
        let subnet = ResourceId::new(SUBNET);
        let props = json!({
            "networkSecurityGroup": { "id": "/subscriptions/0/resourceGroups/rg/providers/Microsoft.Network/networkSecurityGroups/nsg" },
            "delegations": [],
            "serviceEndpoints": [{ "service": "Microsoft.Storage" }]
        });

        let present: Vec<BlockerKind> = SUBNET_ASSOCIATIONS
            .iter()
            .filter(|a| a.is_present(&props))
            .map(|a| a.kind)
            .collect();
        assert_eq!(
            present,
            vec![
                BlockerKind::SecurityGroupAssociation,
                BlockerKind::ServiceEndpointBinding
            ]
        );

        let nsg = &SUBNET_ASSOCIATIONS[0];
        assert_eq!(nsg.owners(&props, &subnet)[0].name(), "nsg");
        assert_eq!(SUBNET_ASSOCIATIONS[4].owners(&props, &subnet), vec![subnet]);
    }

    #[test]
    fn test_clear_patches() {
        assert_eq!(
            SUBNET_ASSOCIATIONS[1].clear_patch(),
            Patch::remove("properties.routeTable")
        );
        assert_eq!(
            SUBNET_ASSOCIATIONS[3].clear_patch(),
            Patch::set("properties.delegations", json!([]))
        );
    }

    #[test]
    fn test_delegations_and_service_name() {
        let props = json!({ "delegations": [delegation_entry("Microsoft.App/environments")] });
        assert_eq!(delegations(&props), vec!["Microsoft.App/environments"]);

        let link = json!({ "linkedResourceType": "Microsoft.DevCenter/networkConnections" });
        assert_eq!(
            link_service_name(&link).as_deref(),
            Some("Microsoft.DevCenter/networkConnections")
        );
        assert!(link_service_name(&json!({})).is_none());
    }

    #[test]
    fn test_referrer_kind() {
        let pe = ResourceId::new("/subscriptions/0/resourceGroups/rg/providers/Microsoft.Network/privateEndpoints/pe");
        assert_eq!(referrer_kind(&pe), BlockerKind::PrivateEndpoint);
        let vm = ResourceId::new("/subscriptions/0/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm");
        assert_eq!(referrer_kind(&vm), BlockerKind::HeavyCompute);
    }
}
