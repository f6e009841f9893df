//! Resource Graph query builder
//!
//! Resource Graph indexes top-level resources only. Subnets, their service
//! association links and VNet peerings live inside the parent network's
//! document, so those types are expanded out of `virtualNetworks` rows.

use rgpurge_cloud::{QueryFilter, Scope, types};

/// Where rows for a resource type come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// Indexed directly
    Table,
    /// `properties.subnets` of virtual networks
    Subnets,
    /// `properties.serviceAssociationLinks` of every subnet
    ServiceAssociationLinks,
    /// `properties.virtualNetworkPeerings` of virtual networks
    Peerings,
}

fn source_for(resource_type: &str) -> Source {
    if resource_type.eq_ignore_ascii_case(types::SUBNET) {
        Source::Subnets
    } else if resource_type.eq_ignore_ascii_case(types::SERVICE_ASSOCIATION_LINK) {
        Source::ServiceAssociationLinks
    } else if resource_type.eq_ignore_ascii_case(types::VNET_PEERING) {
        Source::Peerings
    } else {
        Source::Table
    }
}

/// Quote a value as a KQL string literal
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Build the KQL for one `list_by_query` call
pub fn build_query(resource_type: &str, filter: &QueryFilter, scope: &Scope) -> String {
    let source = source_for(resource_type);
    let mut kql = vec!["Resources".to_string()];

    match source {
        Source::Table if resource_type == types::ANY => {}
        Source::Table => kql.push(format!(
            "where type =~ {}",
            quote(&resource_type.to_ascii_lowercase())
        )),
        _ => kql.push(format!(
            "where type =~ {}",
            quote(&types::VIRTUAL_NETWORK.to_ascii_lowercase())
        )),
    }

    if let Scope::Container(container) = scope {
        kql.push(format!("where resourceGroup =~ {}", quote(container.name())));
    }

    match source {
        Source::Table => kql.push("project id, properties".to_string()),
        Source::Subnets => {
            kql.push("mv-expand subnet = properties.subnets".to_string());
            kql.push("project id = tostring(subnet.id), properties = subnet.properties".to_string());
        }
        Source::ServiceAssociationLinks => {
            kql.push("mv-expand subnet = properties.subnets".to_string());
            kql.push("mv-expand link = subnet.properties.serviceAssociationLinks".to_string());
            kql.push("project id = tostring(link.id), properties = link.properties".to_string());
        }
        Source::Peerings => {
            kql.push("mv-expand peering = properties.virtualNetworkPeerings".to_string());
            kql.push(
                "project id = tostring(peering.id), properties = peering.properties".to_string(),
            );
        }
    }
    kql.push("where isnotempty(id)".to_string());

    match filter {
        QueryFilter::All => {}
        // Narrows the rows; exact matching happens on the client
        QueryFilter::References(target) => kql.push(format!(
            "where tostring(properties) contains {}",
            quote(target.as_str())
        )),
        QueryFilter::ChildOf(parent) => kql.push(format!(
            "where id startswith {}",
            quote(&format!("{}/", parent.as_str().trim_end_matches('/')))
        )),
    }

    kql.join("\n| ")
}

/// Property holding the child collection when `parent` is the direct holder.
///
/// These children can be read in real time from the parent document instead
/// of the eventually consistent index.
pub fn direct_children_path(resource_type: &str, parent_type: &str) -> Option<&'static str> {
    if resource_type.eq_ignore_ascii_case(types::SERVICE_ASSOCIATION_LINK)
        && parent_type.eq_ignore_ascii_case(types::SUBNET)
    {
        Some("serviceAssociationLinks")
    } else if resource_type.eq_ignore_ascii_case(types::SUBNET)
        && parent_type.eq_ignore_ascii_case(types::VIRTUAL_NETWORK)
    {
        Some("subnets")
    } else if resource_type.eq_ignore_ascii_case(types::VNET_PEERING)
        && parent_type.eq_ignore_ascii_case(types::VIRTUAL_NETWORK)
    {
        Some("virtualNetworkPeerings")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgpurge_cloud::{ContainerId, ResourceId};

    #[test]
    fn test_table_query_scoped() {
        let kql = build_query(
            types::PRIVATE_ENDPOINT,
            &QueryFilter::All,
            &Scope::Container(ContainerId::new("rg-app")),
        );
        assert_eq!(
            kql,
            "Resources\n\
             | where type =~ 'microsoft.network/privateendpoints'\n\
             | where resourceGroup =~ 'rg-app'\n\
             | project id, properties\n\
             | where isnotempty(id)"
        );
    }

    #[test]
    fn test_subnet_query_expands_vnets() {
        let kql = build_query(types::SUBNET, &QueryFilter::All, &Scope::Subscription);
        assert!(kql.contains("where type =~ 'microsoft.network/virtualnetworks'"));
        assert!(kql.contains("mv-expand subnet = properties.subnets"));
        assert!(!kql.contains("resourceGroup"));
    }

    #[test]
    fn test_link_query_expands_twice() {
        let kql = build_query(
            types::SERVICE_ASSOCIATION_LINK,
            &QueryFilter::All,
            &Scope::Subscription,
        );
        assert!(kql.contains("mv-expand link = subnet.properties.serviceAssociationLinks"));
    }

    #[test]
    fn test_any_type_has_no_type_clause() {
        let kql = build_query(
            types::ANY,
            &QueryFilter::All,
            &Scope::Container(ContainerId::new("rg")),
        );
        assert!(!kql.contains("type =~"));
    }

    #[test]
    fn test_references_and_child_filters() {
        let target = ResourceId::new("/subscriptions/0/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/v");
        let refs = build_query(
            types::NETWORK_INTERFACE,
            &QueryFilter::References(target.clone()),
            &Scope::Subscription,
        );
        assert!(refs.ends_with(&format!("where tostring(properties) contains '{}'", target)));

        let children = build_query(
            types::VNET_PEERING,
            &QueryFilter::ChildOf(target.clone()),
            &Scope::Subscription,
        );
        assert!(children.ends_with(&format!("where id startswith '{}/'", target)));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("rg'x"), r"'rg\'x'");
        assert_eq!(quote(r"a\b"), r"'a\\b'");
    }

    #[test]
    fn test_direct_children_path() {
        assert_eq!(
            direct_children_path(types::SERVICE_ASSOCIATION_LINK, types::SUBNET),
            Some("serviceAssociationLinks")
        );
        assert_eq!(
            direct_children_path(types::VNET_PEERING, types::VIRTUAL_NETWORK),
            Some("virtualNetworkPeerings")
        );
        assert_eq!(direct_children_path(types::SUBNET, types::SUBNET), None);
    }
}
