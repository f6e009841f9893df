//! Azure control-plane implementation

use crate::az::AzCli;
use crate::error::{AzureError, Result};
use crate::graph;
use async_trait::async_trait;
use rgpurge_cloud::{
    AuthStatus, CallOutcome, ContainerId, ControlPlaneClient, Patch, ProvisioningState,
    QueryFilter, ResourceId, Scope, mentions, types,
};
use serde_json::Value;

/// Azure control plane driven through the az CLI
pub struct AzureControlPlane {
    az: AzCli,
}

impl AzureControlPlane {
    pub fn new(subscription: Option<String>) -> Self {
        Self {
            az: AzCli::new(subscription),
        }
    }

    /// Check that az is installed and has a usable session
    pub async fn check_auth(&self) -> AuthStatus {
        match self.az.check_auth().await {
            Ok(account) => {
                let user = account
                    .user
                    .map(|u| format!(" as {}", u.name))
                    .unwrap_or_default();
                AuthStatus::ok(format!("{} ({}){}", account.name, account.id, user))
            }
            Err(AzureError::AzNotFound) => AuthStatus::failed("az CLI is not installed"),
            Err(e) => AuthStatus::failed(e.to_string()),
        }
    }

    async fn list_locks(&self, filter: &QueryFilter, scope: &Scope) -> Result<Vec<ResourceId>> {
        let resource_group = match scope {
            Scope::Container(container) => Some(container.name()),
            Scope::Subscription => None,
        };
        let locks = self.az.lock_list(resource_group).await?;

        Ok(locks
            .into_iter()
            .map(|lock| ResourceId::new(lock.id))
            .filter(|id| match filter {
                QueryFilter::All => true,
                QueryFilter::ChildOf(parent) => id.is_descendant_of(parent),
                QueryFilter::References(_) => false,
            })
            .collect())
    }

    /// Read children straight from the parent document
    async fn list_direct_children(
        &self,
        parent: &ResourceId,
        collection: &str,
    ) -> Result<Vec<ResourceId>> {
        let Some(doc) = self.az.resource_show(parent.as_str()).await? else {
            return Ok(Vec::new());
        };

        let children = doc
            .pointer(&format!("/properties/{}", collection))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(Value::as_str))
                    .map(ResourceId::new)
                    .collect()
            })
            .unwrap_or_default();
        Ok(children)
    }

    async fn list_from_graph(
        &self,
        resource_type: &str,
        filter: &QueryFilter,
        scope: &Scope,
    ) -> Result<Vec<ResourceId>> {
        let kql = graph::build_query(resource_type, filter, scope);
        let rows = self.az.graph_query(&kql).await?;

        Ok(rows
            .into_iter()
            .filter(|row| match filter {
                QueryFilter::All => true,
                QueryFilter::References(target) => {
                    !row.id.eq_ignore_ascii_case(target.as_str())
                        && mentions(&row.properties, target)
                }
                QueryFilter::ChildOf(parent) => ResourceId::new(row.id.as_str()).is_descendant_of(parent),
            })
            .map(|row| ResourceId::new(row.id))
            .collect())
    }
}

/// Translate a patch into `az resource update` arguments
fn update_args(patch: &Patch) -> Vec<String> {
    match patch {
        Patch::Remove { path } => vec!["--remove".to_string(), path.clone()],
        Patch::Set { path, value } => vec!["--set".to_string(), format!("{}={}", path, value)],
        Patch::Append { path, value } => {
            vec!["--add".to_string(), path.clone(), value.to_string()]
        }
    }
}

fn outcome_of(result: Result<()>) -> CallOutcome {
    match result {
        Ok(()) => CallOutcome::Success,
        Err(e) => e.to_outcome(),
    }
}

#[async_trait]
impl ControlPlaneClient for AzureControlPlane {
    fn name(&self) -> &str {
        "azure-cli"
    }

    async fn list_by_query(
        &self,
        resource_type: &str,
        filter: &QueryFilter,
        scope: &Scope,
    ) -> rgpurge_cloud::Result<Vec<ResourceId>> {
        if resource_type.eq_ignore_ascii_case(types::LOCK) {
            return Ok(self.list_locks(filter, scope).await?);
        }

        if let QueryFilter::ChildOf(parent) = filter {
            let direct = parent
                .resource_type()
                .and_then(|parent_type| graph::direct_children_path(resource_type, &parent_type));
            if let Some(collection) = direct {
                return Ok(self.list_direct_children(parent, collection).await?);
            }
        }

        Ok(self.list_from_graph(resource_type, filter, scope).await?)
    }

    async fn get_resource(&self, id: &ResourceId) -> rgpurge_cloud::Result<Option<Value>> {
        let doc = self.az.resource_show(id.as_str()).await?;
        Ok(doc.map(|mut d| d.get_mut("properties").map(Value::take).unwrap_or(Value::Null)))
    }

    async fn delete_resource(&self, id: &ResourceId, api_version: Option<&str>) -> CallOutcome {
        outcome_of(self.az.resource_delete(id.as_str(), api_version).await)
    }

    async fn delete_resource_raw(&self, id: &ResourceId, api_version: &str) -> CallOutcome {
        outcome_of(self.az.rest_delete(id.as_str(), api_version).await)
    }

    async fn update_resource(&self, id: &ResourceId, patch: &Patch) -> CallOutcome {
        outcome_of(self.az.resource_update(id.as_str(), &update_args(patch)).await)
    }

    async fn get_container_state(
        &self,
        container: &ContainerId,
    ) -> rgpurge_cloud::Result<Option<ProvisioningState>> {
        let group = self.az.group_show(container.name()).await?;
        Ok(group.map(|g| {
            g.provisioning_state()
                .map(ProvisioningState::parse)
                .unwrap_or(ProvisioningState::Succeeded)
        }))
    }

    async fn delete_container(&self, container: &ContainerId) -> CallOutcome {
        outcome_of(self.az.group_delete_no_wait(container.name()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_args() {
        assert_eq!(
            update_args(&Patch::remove("properties.networkSecurityGroup")),
            vec!["--remove", "properties.networkSecurityGroup"]
        );
        assert_eq!(
            update_args(&Patch::set("properties.delegations", json!([]))),
            vec!["--set", "properties.delegations=[]"]
        );
        assert_eq!(
            update_args(&Patch::append(
                "properties.delegations",
                json!({ "name": "d" })
            )),
            vec!["--add", "properties.delegations", r#"{"name":"d"}"#]
        );
    }

    #[test]
    fn test_outcome_of_command_failure() {
        let err = AzureError::from_stderr("ERROR: (ScopeLocked) locked\nCode: ScopeLocked");
        let outcome = outcome_of(Err(err));
        assert_eq!(
            outcome.failure().unwrap().kind,
            rgpurge_cloud::FailureKind::Permission
        );
        assert_eq!(outcome_of(Ok(())), CallOutcome::Success);
    }

    #[test]
    fn test_client_name() {
        assert_eq!(AzureControlPlane::new(None).name(), "azure-cli");
    }
}
