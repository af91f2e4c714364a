//! Simulated cloud shared by the in-memory collaborators

use infraproc_backend::{
    BackendError, CookedResolver, InfraId, InstanceId, NodeId, NodeState, Result, StartedNode,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Collaborator operation recorded in the call journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Call {
    CreateInfrastructure {
        infra_id: InfraId,
    },
    RegisterNode {
        node_id: Option<NodeId>,
        backend_id: String,
    },
    CreateNode {
        node_id: Option<NodeId>,
        backend_id: String,
    },
    RegisterStartedNode {
        infra_id: InfraId,
        node_name: String,
    },
    /// Cloud handler side of DropNode
    DestroyNode {
        instance_id: Option<InstanceId>,
    },
    /// Service composer side of DropNode
    UnregisterNode {
        node_id: NodeId,
    },
    DropInfrastructure {
        infra_id: InfraId,
    },
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::CreateInfrastructure { .. } => "create_infrastructure",
            Call::RegisterNode { .. } => "register_node",
            Call::CreateNode { .. } => "create_node",
            Call::RegisterStartedNode { .. } => "register_started_node",
            Call::DestroyNode { .. } => "destroy_node",
            Call::UnregisterNode { .. } => "unregister_node",
            Call::DropInfrastructure { .. } => "drop_infrastructure",
        }
    }
}

/// Collaborator operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    CreateInfrastructure,
    RegisterNode,
    CreateNode,
    RegisterStartedNode,
    DestroyNode,
    UnregisterNode,
    DropInfrastructure,
}

#[derive(Debug, Clone)]
struct FailureRule {
    point: FailurePoint,
    /// Restrict the failure to one backend; `None` fails every call
    backend_id: Option<String>,
}

/// A provisioned instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryInstance {
    pub instance_id: InstanceId,
    pub node_id: Option<NodeId>,
    pub backend_id: String,
    pub state: NodeState,
    pub address: String,
    pub ip_address: String,
}

#[derive(Debug)]
struct CloudState {
    definitions: HashMap<String, Value>,
    infrastructures: BTreeMap<InfraId, Value>,
    registered: HashMap<NodeId, String>,
    instances: BTreeMap<InstanceId, MemoryInstance>,
    started: Vec<StartedNode>,
    attributes: HashMap<String, Value>,
    sites: HashMap<String, bool>,
    calls: Vec<Call>,
    failures: Vec<FailureRule>,
    initial_state: NodeState,
    reachable: bool,
    instance_prefix: String,
    next_instance: u64,
}

impl Default for CloudState {
    fn default() -> Self {
        Self {
            definitions: HashMap::new(),
            infrastructures: BTreeMap::new(),
            registered: HashMap::new(),
            instances: BTreeMap::new(),
            started: Vec::new(),
            attributes: HashMap::new(),
            sites: HashMap::new(),
            calls: Vec::new(),
            failures: Vec::new(),
            initial_state: NodeState::Ready,
            reachable: true,
            instance_prefix: "vm-".to_string(),
            next_instance: 1,
        }
    }
}

/// Handle to a simulated cloud
///
/// Clones share the same state, so the service composer, cloud handler,
/// store and information broker built from one `MemoryCloud` all see each
/// other's effects. Tests configure node types, failures and node states
/// here and inspect the call journal afterwards.
#[derive(Debug, Clone, Default)]
pub struct MemoryCloud {
    inner: Arc<Mutex<CloudState>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CloudState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer `node.definition` for descriptions of `node_type`
    pub fn define_node_type(&self, node_type: impl Into<String>, definition: Value) {
        self.state().definitions.insert(node_type.into(), definition);
    }

    /// Define `node_type` as an already resolved definition on `backend_id`
    pub fn define_cooked(&self, node_type: impl Into<String>, backend_id: impl Into<String>) {
        self.define_node_type(
            node_type,
            json!({
                "backend_id": backend_id.into(),
                "implementation_type": CookedResolver::IMPLEMENTATION_TYPE,
            }),
        );
    }

    /// State new instances start in (default `ready`)
    pub fn set_initial_state(&self, state: NodeState) {
        self.state().initial_state = state;
    }

    /// Number used for the next instance id (`vm-<n>`)
    pub fn set_next_instance_number(&self, next: u64) {
        self.state().next_instance = next;
    }

    pub fn set_instance_prefix(&self, prefix: impl Into<String>) {
        self.state().instance_prefix = prefix.into();
    }

    /// Answer for `synch.node_reachable` on existing instances
    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Answer for `synch.site_available.<url>`; unknown URLs are unavailable
    pub fn set_site_available(&self, url: impl Into<String>, available: bool) {
        self.state().sites.insert(url.into(), available);
    }

    /// Value for `node.attribute.<name>`
    pub fn set_attribute(&self, name: impl Into<String>, value: Value) {
        self.state().attributes.insert(name.into(), value);
    }

    pub fn set_node_state(&self, instance_id: &InstanceId, state: NodeState) -> Result<()> {
        let mut cloud = self.state();
        let instance = cloud
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| BackendError::NotFound(format!("instance {}", instance_id)))?;
        instance.state = state;
        Ok(())
    }

    /// Move every existing instance to `state`
    pub fn set_all_states(&self, state: NodeState) {
        for instance in self.state().instances.values_mut() {
            instance.state = state;
        }
    }

    /// Make every call at `point` fail
    pub fn fail_on(&self, point: FailurePoint) {
        self.state().failures.push(FailureRule {
            point,
            backend_id: None,
        });
    }

    /// Make calls at `point` fail for nodes on `backend_id`
    pub fn fail_on_backend(&self, point: FailurePoint, backend_id: impl Into<String>) {
        self.state().failures.push(FailureRule {
            point,
            backend_id: Some(backend_id.into()),
        });
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Every collaborator call made so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Names of the calls made so far, in order
    pub fn call_names(&self) -> Vec<&'static str> {
        self.state().calls.iter().map(Call::name).collect()
    }

    pub fn instances(&self) -> Vec<MemoryInstance> {
        self.state().instances.values().cloned().collect()
    }

    pub fn instance(&self, instance_id: &InstanceId) -> Option<MemoryInstance> {
        self.state().instances.get(instance_id).cloned()
    }

    pub fn infrastructures(&self) -> Vec<InfraId> {
        self.state().infrastructures.keys().cloned().collect()
    }

    /// Backend of every node registered with the service composer
    pub fn registered_nodes(&self) -> HashMap<NodeId, String> {
        self.state().registered.clone()
    }

    /// Nodes recorded by the store
    pub fn started_nodes(&self) -> Vec<StartedNode> {
        self.state().started.clone()
    }

    // Collaborator-side operations. Each records its call before checking
    // for an injected failure.

    pub(crate) fn create_infrastructure(&self, infra_id: &InfraId) -> Result<Value> {
        let mut cloud = self.state();
        cloud.calls.push(Call::CreateInfrastructure {
            infra_id: infra_id.clone(),
        });
        cloud.check(FailurePoint::CreateInfrastructure, None)?;

        if cloud.infrastructures.contains_key(infra_id) {
            return Err(BackendError::AlreadyExists(format!(
                "infrastructure {}",
                infra_id
            )));
        }
        let handle = json!({
            "infra_id": infra_id.as_str(),
            "sequence": cloud.infrastructures.len() + 1,
        });
        cloud
            .infrastructures
            .insert(infra_id.clone(), handle.clone());
        Ok(handle)
    }

    pub(crate) fn register_node(&self, node_id: Option<NodeId>, backend_id: &str) -> Result<()> {
        let mut cloud = self.state();
        cloud.calls.push(Call::RegisterNode {
            node_id,
            backend_id: backend_id.to_string(),
        });
        cloud.check(FailurePoint::RegisterNode, Some(backend_id))?;

        let node_id = node_id.ok_or_else(|| {
            BackendError::InvalidDefinition("resolved definition has no node_id".to_string())
        })?;
        cloud.registered.insert(node_id, backend_id.to_string());
        Ok(())
    }

    pub(crate) fn create_node(&self, node_id: Option<NodeId>, backend_id: &str) -> Result<InstanceId> {
        let mut cloud = self.state();
        cloud.calls.push(Call::CreateNode {
            node_id,
            backend_id: backend_id.to_string(),
        });
        cloud.check(FailurePoint::CreateNode, Some(backend_id))?;

        let number = cloud.next_instance;
        cloud.next_instance += 1;
        let instance_id = InstanceId::new(format!("{}{}", cloud.instance_prefix, number));
        let instance = MemoryInstance {
            instance_id: instance_id.clone(),
            node_id,
            backend_id: backend_id.to_string(),
            state: cloud.initial_state,
            address: format!("{}.{}.internal", instance_id, backend_id),
            ip_address: format!("10.0.{}.{}", number / 256, number % 256),
        };
        cloud.instances.insert(instance_id.clone(), instance);
        Ok(instance_id)
    }

    pub(crate) fn register_started_node(&self, node: StartedNode) -> Result<()> {
        let mut cloud = self.state();
        cloud.calls.push(Call::RegisterStartedNode {
            infra_id: node.infra_id.clone(),
            node_name: node.node_name.clone(),
        });
        let backend_id = node.instance_data.backend_id().map(str::to_string);
        cloud.check(FailurePoint::RegisterStartedNode, backend_id.as_deref())?;

        cloud
            .started
            .retain(|n| !(n.infra_id == node.infra_id && n.node_name == node.node_name));
        cloud.started.push(node);
        Ok(())
    }

    pub(crate) fn destroy_node(
        &self,
        instance_id: Option<&InstanceId>,
        backend_id: Option<&str>,
    ) -> Result<()> {
        let mut cloud = self.state();
        cloud.calls.push(Call::DestroyNode {
            instance_id: instance_id.cloned(),
        });
        cloud.check(FailurePoint::DestroyNode, backend_id)?;

        let instance_id = instance_id.ok_or_else(|| {
            BackendError::StateError("node has not been provisioned".to_string())
        })?;
        cloud
            .instances
            .remove(instance_id)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(format!("instance {}", instance_id)))
    }

    pub(crate) fn unregister_node(&self, node_id: NodeId, backend_id: Option<&str>) -> Result<()> {
        let mut cloud = self.state();
        cloud.calls.push(Call::UnregisterNode { node_id });
        cloud.check(FailurePoint::UnregisterNode, backend_id)?;

        cloud.registered.remove(&node_id);
        Ok(())
    }

    pub(crate) fn drop_infrastructure(&self, infra_id: &InfraId) -> Result<()> {
        let mut cloud = self.state();
        cloud.calls.push(Call::DropInfrastructure {
            infra_id: infra_id.clone(),
        });
        cloud.check(FailurePoint::DropInfrastructure, None)?;

        cloud
            .infrastructures
            .remove(infra_id)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(format!("infrastructure {}", infra_id)))
    }

    pub(crate) fn definition(&self, node_type: &str) -> Option<Value> {
        self.state().definitions.get(node_type).cloned()
    }

    pub(crate) fn attribute(&self, name: &str) -> Option<Value> {
        self.state().attributes.get(name).cloned()
    }

    pub(crate) fn reachable(&self) -> bool {
        self.state().reachable
    }

    pub(crate) fn site_available(&self, url: &str) -> bool {
        self.state().sites.get(url).copied().unwrap_or(false)
    }
}

impl CloudState {
    fn check(&self, point: FailurePoint, backend_id: Option<&str>) -> Result<()> {
        let triggered = self.failures.iter().any(|rule| {
            rule.point == point
                && match (&rule.backend_id, backend_id) {
                    (None, _) => true,
                    (Some(expected), Some(actual)) => expected == actual,
                    (Some(_), None) => false,
                }
        });
        if triggered {
            tracing::debug!("Injected failure at {:?}", point);
            return Err(BackendError::ApiError(format!(
                "injected failure at {:?}",
                point
            )));
        }
        Ok(())
    }
}
