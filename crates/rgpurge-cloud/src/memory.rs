//! In-memory control plane
//!
//! A scriptable stand-in for a real cloud. It models the dependency rules the
//! teardown engine has to respect (references pin their targets, locks pin
//! their scope, subnets refuse deletion while links or delegations remain)
//! and records every call so tests can assert on ordering.

use crate::error::{CloudError, Result};
use crate::outcome::CallOutcome;
use crate::provider::ControlPlaneClient;
use crate::query::{Patch, QueryFilter, Scope, mentions};
use crate::resource::{ContainerId, ResourceId, types};
use crate::state::ProvisioningState;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

const LOCK_SEGMENT: &str = "/providers/microsoft.authorization/locks/";

/// A call received by the in-memory control plane
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List {
        resource_type: String,
        filter: QueryFilter,
        scope: Scope,
    },
    Get(ResourceId),
    Delete {
        id: ResourceId,
        api_version: Option<String>,
    },
    DeleteRaw {
        id: ResourceId,
        api_version: String,
    },
    Update {
        id: ResourceId,
        patch: Patch,
    },
    ContainerState(ContainerId),
    DeleteContainer(ContainerId),
}

impl Call {
    /// The resource a delete call targeted, raw or not
    pub fn deleted_id(&self) -> Option<&ResourceId> {
        match self {
            Call::Delete { id, .. } | Call::DeleteRaw { id, .. } => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Entry {
    properties: Value,
    /// Listings left before a deleted entry disappears
    linger: Option<u32>,
}

#[derive(Debug)]
struct ContainerEntry {
    present: bool,
    delete_issued: bool,
    deleting_polls: u32,
    states: VecDeque<Option<ProvisioningState>>,
    delete_outcome: Option<CallOutcome>,
}

#[derive(Debug, Default)]
struct Inner {
    resources: BTreeMap<ResourceId, Entry>,
    containers: BTreeMap<String, ContainerEntry>,
    delete_scripts: HashMap<ResourceId, VecDeque<CallOutcome>>,
    update_scripts: HashMap<ResourceId, VecDeque<CallOutcome>>,
    blocked_by: HashMap<ResourceId, Vec<ResourceId>>,
    required_delegations: HashMap<ResourceId, String>,
    lingering: HashMap<ResourceId, u32>,
    failing_queries: bool,
    calls: Vec<Call>,
    violations: Vec<String>,
}

impl Inner {
    fn key_of(&self, id: &ResourceId) -> Option<ResourceId> {
        self.resources.keys().find(|k| k.same_as(id)).cloned()
    }

    fn exists(&self, id: &ResourceId) -> bool {
        self.key_of(id).is_some()
    }

    fn locked_by(&self, target: &ResourceId) -> Option<ResourceId> {
        if target.is_type(types::LOCK) {
            return None;
        }
        let target_lower = target.as_str().to_ascii_lowercase();
        self.resources
            .keys()
            .filter(|id| id.is_type(types::LOCK))
            .find(|lock| {
                let lock_lower = lock.as_str().to_ascii_lowercase();
                lock_lower.find(LOCK_SEGMENT).is_some_and(|pos| {
                    let scope = &lock_lower[..pos];
                    target_lower == scope || target_lower.starts_with(&format!("{}/", scope))
                })
            })
            .cloned()
    }

    fn container_locked(&self, container: &ContainerId) -> bool {
        self.resources
            .keys()
            .any(|id| id.is_type(types::LOCK) && container.contains(id))
    }

    fn subnet_delegations(&self, subnet: &ResourceId) -> Vec<String> {
        self.key_of(subnet)
            .and_then(|key| self.resources.get(&key))
            .and_then(|entry| entry.properties.get("delegations"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|d| {
                        d.pointer("/properties/serviceName")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn delete(&mut self, id: &ResourceId) -> CallOutcome {
        let Some(key) = self.key_of(id) else {
            return CallOutcome::NotFound;
        };
        if self.resources.get(&key).is_some_and(|e| e.linger.is_some()) {
            return CallOutcome::Success;
        }

        if let Some(lock) = self.locked_by(&key) {
            return CallOutcome::permission(format!("ScopeLocked: {} is locked by {}", key, lock));
        }

        if let Some(blockers) = self.blocked_by.get(&key) {
            if let Some(blocker) = blockers.iter().find(|b| self.exists(b)) {
                return CallOutcome::dependency(format!("{} is still in use by {}", key, blocker));
            }
        }

        if let Some(required) = self.required_delegations.get(&key) {
            let satisfied = key.parent().is_some_and(|subnet| {
                self.subnet_delegations(&subnet)
                    .iter()
                    .any(|d| d.eq_ignore_ascii_case(required))
            });
            if !satisfied {
                return CallOutcome::dependency(format!(
                    "SubnetMissingRequiredDelegation: {} needs {}",
                    key, required
                ));
            }
        }

        let links_remaining = self.resources.keys().any(|other| {
            other.is_type(types::SERVICE_ASSOCIATION_LINK) && other.is_descendant_of(&key)
        });
        if key.is_type(types::SUBNET) {
            let delegations = self.subnet_delegations(&key);
            if links_remaining || !delegations.is_empty() {
                warn!(subnet = %key, "Subnet delete issued with links or delegations present");
                self.violations.push(format!(
                    "subnet delete issued for {} with links or delegations present",
                    key
                ));
                return CallOutcome::dependency(format!("InUseSubnetCannotBeDeleted: {}", key));
            }
        } else if links_remaining {
            return CallOutcome::dependency(format!(
                "InUseSubnetCannotBeDeleted: {} has subnets with service association links",
                key
            ));
        }

        let doomed: Vec<ResourceId> = self
            .resources
            .keys()
            .filter(|other| *other == &key || other.is_descendant_of(&key))
            .cloned()
            .collect();
        for (other, entry) in &self.resources {
            if doomed.contains(other) {
                continue;
            }
            if let Some(target) = doomed.iter().find(|d| mentions(&entry.properties, d)) {
                return CallOutcome::dependency(format!("{} is referenced by {}", target, other));
            }
        }

        if let Some(listings) = self.lingering.get(&key).copied() {
            if let Some(entry) = self.resources.get_mut(&key) {
                entry.linger = Some(listings);
            }
            return CallOutcome::Success;
        }

        for id in doomed {
            self.resources.remove(&id);
        }
        CallOutcome::Success
    }

    fn remove_container_resources(&mut self, container: &ContainerId) {
        self.resources.retain(|id, _| !container.contains(id));
    }
}

/// Scriptable in-memory implementation of [`ControlPlaneClient`]
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    inner: Mutex<Inner>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an existing container
    pub fn add_container(&self, name: &str) -> ContainerId {
        self.lock().containers.insert(
            name.to_ascii_lowercase(),
            ContainerEntry {
                present: true,
                delete_issued: false,
                deleting_polls: 1,
                states: VecDeque::new(),
                delete_outcome: None,
            },
        );
        ContainerId::new(name)
    }

    /// Register a resource with its `properties` document
    pub fn add_resource(&self, id: impl Into<ResourceId>, properties: Value) -> ResourceId {
        let id = id.into();
        self.lock().resources.insert(
            id.clone(),
            Entry {
                properties,
                linger: None,
            },
        );
        id
    }

    /// Outcomes returned by the next `delete_resource` calls for `id`.
    ///
    /// A scripted `Success` also performs the delete.
    pub fn script_delete(&self, id: &ResourceId, outcomes: impl IntoIterator<Item = CallOutcome>) {
        self.lock()
            .delete_scripts
            .entry(id.clone())
            .or_default()
            .extend(outcomes);
    }

    /// Outcomes returned by the next `update_resource` calls for `id`
    pub fn script_update(&self, id: &ResourceId, outcomes: impl IntoIterator<Item = CallOutcome>) {
        self.lock()
            .update_scripts
            .entry(id.clone())
            .or_default()
            .extend(outcomes);
    }

    /// Refuse to delete `id` while any of `blockers` still exists
    pub fn block_delete(&self, id: &ResourceId, blockers: &[ResourceId]) {
        self.lock()
            .blocked_by
            .entry(id.clone())
            .or_default()
            .extend(blockers.iter().cloned());
    }

    /// Refuse to delete a link unless its subnet carries `service` as a delegation
    pub fn require_delegation(&self, link: &ResourceId, service: &str) {
        self.lock()
            .required_delegations
            .insert(link.clone(), service.to_string());
    }

    /// Keep `id` visible to this many listings after a successful delete
    pub fn linger_after_delete(&self, id: &ResourceId, listings: u32) {
        self.lock().lingering.insert(id.clone(), listings);
    }

    /// States returned by the next container polls; the last one repeats
    pub fn script_container_states(
        &self,
        name: &str,
        states: impl IntoIterator<Item = Option<ProvisioningState>>,
    ) {
        if let Some(entry) = self.lock().containers.get_mut(&name.to_ascii_lowercase()) {
            entry.states.extend(states);
        }
    }

    /// Outcome returned by the container delete call
    pub fn script_container_delete(&self, name: &str, outcome: CallOutcome) {
        if let Some(entry) = self.lock().containers.get_mut(&name.to_ascii_lowercase()) {
            entry.delete_outcome = Some(outcome);
        }
    }

    /// Number of polls reporting `Deleting` before the container disappears
    pub fn set_deleting_polls(&self, name: &str, polls: u32) {
        if let Some(entry) = self.lock().containers.get_mut(&name.to_ascii_lowercase()) {
            entry.deleting_polls = polls;
        }
    }

    /// Make every `list_by_query` call fail
    pub fn fail_queries(&self, failing: bool) {
        self.lock().failing_queries = failing;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn exists(&self, id: &ResourceId) -> bool {
        self.lock().exists(id)
    }

    pub fn properties(&self, id: &ResourceId) -> Option<Value> {
        let inner = self.lock();
        inner
            .key_of(id)
            .and_then(|key| inner.resources.get(&key))
            .map(|entry| entry.properties.clone())
    }

    pub fn container_exists(&self, name: &str) -> bool {
        self.lock()
            .containers
            .get(&name.to_ascii_lowercase())
            .is_some_and(|c| c.present)
    }

    /// Invariant breaches observed, e.g. a subnet delete issued with links present
    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }
}

fn apply_patch(doc: &mut Value, patch: &Patch) -> std::result::Result<(), String> {
    let path = patch
        .path()
        .strip_prefix("properties.")
        .ok_or_else(|| format!("unsupported patch path: {}", patch.path()))?;
    let mut parts: Vec<&str> = path.split('.').collect();
    let last = parts.pop().unwrap_or_default();

    let mut cursor = doc;
    for part in parts {
        cursor = cursor
            .as_object_mut()
            .ok_or_else(|| format!("{} is not an object", part))?
            .entry(part)
            .or_insert_with(|| json!({}));
    }
    let object = cursor
        .as_object_mut()
        .ok_or_else(|| format!("cannot patch {}", patch.path()))?;

    match patch {
        Patch::Remove { .. } => {
            object.remove(last);
        }
        Patch::Set { value, .. } => {
            object.insert(last.to_string(), value.clone());
        }
        Patch::Append { value, .. } => match object
            .entry(last)
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(items) => items.push(value.clone()),
            _ => return Err(format!("{} is not an array", patch.path())),
        },
    }
    Ok(())
}

#[async_trait]
impl ControlPlaneClient for InMemoryControlPlane {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn list_by_query(
        &self,
        resource_type: &str,
        filter: &QueryFilter,
        scope: &Scope,
    ) -> Result<Vec<ResourceId>> {
        let mut inner = self.lock();
        inner.calls.push(Call::List {
            resource_type: resource_type.to_string(),
            filter: filter.clone(),
            scope: scope.clone(),
        });
        if inner.failing_queries {
            return Err(CloudError::QueryFailed(format!(
                "query for {} rejected",
                resource_type
            )));
        }

        let matched: Vec<ResourceId> = inner
            .resources
            .iter()
            .filter(|(id, _)| {
                id.resource_type()
                    .is_some_and(|t| types::matches(resource_type, &t))
            })
            .filter(|(id, _)| match scope {
                Scope::Container(container) => container.contains(id),
                Scope::Subscription => true,
            })
            .filter(|(id, entry)| match filter {
                QueryFilter::All => true,
                QueryFilter::References(target) => {
                    !id.same_as(target) && mentions(&entry.properties, target)
                }
                QueryFilter::ChildOf(parent) => id.is_descendant_of(parent),
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut visible = Vec::with_capacity(matched.len());
        for id in matched {
            let expired = match inner.resources.get_mut(&id).and_then(|e| e.linger.as_mut()) {
                Some(0) => true,
                Some(remaining) => {
                    *remaining -= 1;
                    false
                }
                None => false,
            };
            if expired {
                inner.resources.retain(|other, _| *other != id && !other.is_descendant_of(&id));
            } else {
                visible.push(id);
            }
        }
        Ok(visible)
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Value>> {
        let mut inner = self.lock();
        inner.calls.push(Call::Get(id.clone()));
        let properties = inner
            .key_of(id)
            .and_then(|key| inner.resources.get(&key))
            .map(|entry| entry.properties.clone());
        Ok(properties)
    }

    async fn delete_resource(&self, id: &ResourceId, api_version: Option<&str>) -> CallOutcome {
        let mut inner = self.lock();
        inner.calls.push(Call::Delete {
            id: id.clone(),
            api_version: api_version.map(str::to_string),
        });

        let scripted = inner
            .delete_scripts
            .iter_mut()
            .find(|(k, _)| k.same_as(id))
            .and_then(|(_, queue)| queue.pop_front());
        match scripted {
            Some(CallOutcome::Success) => {
                if let Some(key) = inner.key_of(id) {
                    inner.resources.retain(|other, _| *other != key && !other.is_descendant_of(&key));
                }
                CallOutcome::Success
            }
            Some(outcome) => outcome,
            None => inner.delete(id),
        }
    }

    async fn delete_resource_raw(&self, id: &ResourceId, api_version: &str) -> CallOutcome {
        let mut inner = self.lock();
        inner.calls.push(Call::DeleteRaw {
            id: id.clone(),
            api_version: api_version.to_string(),
        });
        inner.delete(id)
    }

    async fn update_resource(&self, id: &ResourceId, patch: &Patch) -> CallOutcome {
        let mut inner = self.lock();
        inner.calls.push(Call::Update {
            id: id.clone(),
            patch: patch.clone(),
        });

        let scripted = inner
            .update_scripts
            .iter_mut()
            .find(|(k, _)| k.same_as(id))
            .and_then(|(_, queue)| queue.pop_front());
        if let Some(outcome) = scripted {
            return outcome;
        }

        let Some(key) = inner.key_of(id) else {
            return CallOutcome::NotFound;
        };
        let Some(entry) = inner.resources.get_mut(&key) else {
            return CallOutcome::NotFound;
        };
        match apply_patch(&mut entry.properties, patch) {
            Ok(()) => CallOutcome::Success,
            Err(reason) => {
                debug!(resource = %id, patch = %patch, "Patch rejected: {}", reason);
                CallOutcome::rejected(reason)
            }
        }
    }

    async fn get_container_state(
        &self,
        container: &ContainerId,
    ) -> Result<Option<ProvisioningState>> {
        let mut inner = self.lock();
        inner.calls.push(Call::ContainerState(container.clone()));

        let Some(entry) = inner.containers.get_mut(&container.name().to_ascii_lowercase()) else {
            return Ok(None);
        };
        if !entry.present {
            return Ok(None);
        }

        if let Some(next) = entry.states.pop_front() {
            if entry.states.is_empty() {
                entry.states.push_back(next.clone());
            }
            return Ok(next);
        }

        if entry.delete_issued {
            if entry.deleting_polls > 0 {
                entry.deleting_polls -= 1;
                return Ok(Some(ProvisioningState::Deleting));
            }
            entry.present = false;
            inner.remove_container_resources(container);
            return Ok(None);
        }

        Ok(Some(ProvisioningState::Succeeded))
    }

    async fn delete_container(&self, container: &ContainerId) -> CallOutcome {
        let mut inner = self.lock();
        inner.calls.push(Call::DeleteContainer(container.clone()));

        let locked = inner.container_locked(container);
        let Some(entry) = inner.containers.get_mut(&container.name().to_ascii_lowercase()) else {
            return CallOutcome::NotFound;
        };
        if !entry.present {
            return CallOutcome::NotFound;
        }

        if let Some(outcome) = entry.delete_outcome.take() {
            if outcome == CallOutcome::Success {
                entry.delete_issued = true;
            }
            return outcome;
        }
        if locked {
            return CallOutcome::permission(format!("ScopeLocked: {} carries a lock", container));
        }
        entry.delete_issued = true;
        CallOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RG: &str = "/subscriptions/0000/resourceGroups/rg-app";

    fn vnet() -> ResourceId {
        ResourceId::new(format!("{RG}/providers/Microsoft.Network/virtualNetworks/vnet-a"))
    }

    #[tokio::test]
    async fn test_reference_pins_target() {
        let cp = InMemoryControlPlane::new();
        let subnet = cp.add_resource(vnet().child("subnets", "snet-1"), json!({}));
        let pe = cp.add_resource(
            format!("{RG}/providers/Microsoft.Network/privateEndpoints/pe-1"),
            json!({ "subnet": { "id": subnet.as_str() } }),
        );

        let outcome = cp.delete_resource(&subnet, None).await;
        assert_eq!(outcome.failure().unwrap().kind, crate::FailureKind::Dependency);

        assert_eq!(cp.delete_resource(&pe, None).await, CallOutcome::Success);
        assert_eq!(cp.delete_resource(&subnet, None).await, CallOutcome::Success);
        assert_eq!(cp.delete_resource(&subnet, None).await, CallOutcome::NotFound);
        assert!(cp.violations().is_empty());
    }

    #[tokio::test]
    async fn test_resource_group_lock_blocks_deletes() {
        let cp = InMemoryControlPlane::new();
        let container = cp.add_container("rg-app");
        let lock = cp.add_resource(
            format!("{RG}/providers/Microsoft.Authorization/locks/no-delete"),
            json!({ "level": "CanNotDelete" }),
        );
        let nsg = cp.add_resource(
            format!("{RG}/providers/Microsoft.Network/networkSecurityGroups/nsg-1"),
            json!({}),
        );

        assert!(cp.delete_resource(&nsg, None).await.failure().is_some());
        assert!(cp.delete_container(&container).await.failure().is_some());
        assert_eq!(cp.delete_resource(&lock, None).await, CallOutcome::Success);
        assert_eq!(cp.delete_resource(&nsg, None).await, CallOutcome::Success);
    }

    #[tokio::test]
    async fn test_lingering_link_disappears_after_listings() {
        let cp = InMemoryControlPlane::new();
        let subnet = cp.add_resource(vnet().child("subnets", "snet-1"), json!({}));
        let link = cp.add_resource(subnet.child("serviceAssociationLinks", "link"), json!({}));
        cp.linger_after_delete(&link, 1);

        assert_eq!(cp.delete_resource(&link, None).await, CallOutcome::Success);
        let filter = QueryFilter::ChildOf(subnet.clone());
        let first = cp
            .list_by_query(types::SERVICE_ASSOCIATION_LINK, &filter, &Scope::Subscription)
            .await
            .unwrap();
        assert_eq!(first, vec![link.clone()]);
        let second = cp
            .list_by_query(types::SERVICE_ASSOCIATION_LINK, &filter, &Scope::Subscription)
            .await
            .unwrap();
        assert!(second.is_empty());
        assert!(!cp.exists(&link));
    }

    #[tokio::test]
    async fn test_patch_application() {
        let cp = InMemoryControlPlane::new();
        let subnet = cp.add_resource(
            vnet().child("subnets", "snet-1"),
            json!({ "routeTable": { "id": "rt" } }),
        );

        cp.update_resource(&subnet, &Patch::remove("properties.routeTable"))
            .await;
        cp.update_resource(
            &subnet,
            &Patch::append(
                "properties.delegations",
                json!({ "name": "d", "properties": { "serviceName": "Microsoft.Web/serverFarms" } }),
            ),
        )
        .await;

        let props = cp.properties(&subnet).unwrap();
        assert!(props.get("routeTable").is_none());
        assert_eq!(props["delegations"].as_array().unwrap().len(), 1);

        let outcome = cp
            .update_resource(&subnet, &Patch::remove("tags.owner"))
            .await;
        assert!(outcome.failure().is_some());
    }

    #[tokio::test]
    async fn test_subnet_delete_with_link_is_a_violation() {
        let cp = InMemoryControlPlane::new();
        let subnet = cp.add_resource(vnet().child("subnets", "snet-1"), json!({}));
        cp.add_resource(subnet.child("serviceAssociationLinks", "link"), json!({}));

        let outcome = cp.delete_resource(&subnet, None).await;
        assert_eq!(outcome.failure().unwrap().kind, crate::FailureKind::Dependency);
        assert!(cp.exists(&subnet));
        assert_eq!(cp.violations().len(), 1);
        assert!(cp.violations()[0].contains("snet-1"));
    }

    #[tokio::test]
    async fn test_container_state_script_repeats_last() {
        let cp = InMemoryControlPlane::new();
        let container = cp.add_container("rg-app");
        cp.script_container_states(
            "rg-app",
            [Some(ProvisioningState::Deleting), Some(ProvisioningState::Succeeded)],
        );

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(cp.get_container_state(&container).await.unwrap());
        }
        assert_eq!(
            seen,
            vec![
                Some(ProvisioningState::Deleting),
                Some(ProvisioningState::Succeeded),
                Some(ProvisioningState::Succeeded),
            ]
        );
    }
}
