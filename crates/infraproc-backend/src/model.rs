//! Node and instance data model
//!
//! A node travels through three shapes while it is being created:
//!
//! 1. [`NodeDescription`]: the abstract, backend-independent request.
//! 2. [`ResolvedNodeDefinition`]: the concrete, backend-bound definition
//!    produced by a resolver.
//! 3. [`InstanceData`]: the record of one creation attempt, which accumulates
//!    the above plus the provisioned instance identifier.

use crate::error::{BackendError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Internal unique identifier of a node instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Identifier of an infrastructure instance, pre-generated upstream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InfraId(String);

impl InfraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InfraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InfraId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for InfraId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque identifier returned by a cloud handler for a provisioned instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for InstanceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Abstract description of a node to be created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub user_id: String,

    pub infra_id: InfraId,

    /// Node name, unique within its infrastructure
    pub name: String,

    /// Node type, used to look up the node definition
    #[serde(rename = "type", default)]
    pub node_type: String,

    /// Preselected backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<String>,

    /// Preselected backend candidates, used when `backend_id` is absent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backend_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_selection_strategy: Option<String>,

    /// Template variables consumed by resolvers
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
}

impl NodeDescription {
    pub fn new(
        user_id: impl Into<String>,
        infra_id: impl Into<InfraId>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            infra_id: infra_id.into(),
            name: name.into(),
            node_type: String::new(),
            backend_id: None,
            backend_ids: Vec::new(),
            backend_selection_strategy: None,
            variables: Map::new(),
        }
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self
    }

    pub fn with_backend(mut self, backend_id: impl Into<String>) -> Self {
        self.backend_id = Some(backend_id.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    /// Backends the requester restricted this node to, if any
    pub fn preselected_backends(&self) -> Vec<&str> {
        match &self.backend_id {
            Some(id) => vec![id.as_str()],
            None => self.backend_ids.iter().map(String::as_str).collect(),
        }
    }
}

/// Readiness synchronization selected by a node definition
///
/// Either a bare protocol name (`synch_strategy: basic`) or a parameter map
/// carrying the protocol (`synch_strategy: {protocol: basic, ping: false}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SynchStrategySpec {
    Named(String),
    Parameterized(SynchParams),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynchParams {
    pub protocol: String,

    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl SynchStrategySpec {
    pub fn protocol(&self) -> &str {
        match self {
            SynchStrategySpec::Named(name) => name,
            SynchStrategySpec::Parameterized(p) => &p.protocol,
        }
    }

    /// Get a strategy parameter; bare names carry no parameters
    pub fn param(&self, key: &str) -> Option<&Value> {
        match self {
            SynchStrategySpec::Named(_) => None,
            SynchStrategySpec::Parameterized(p) => p.params.get(key),
        }
    }
}

/// Concrete, backend-bound definition of a node
///
/// Produced by a resolver from a [`NodeDescription`] and consumed by the
/// service composer and the cloud handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedNodeDefinition {
    /// Backend servicing this node
    pub backend_id: String,

    /// Selects the resolver (and possibly the readiness check)
    pub implementation_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infra_id: Option<InfraId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synch_strategy: Option<SynchStrategySpec>,

    /// Attributes that must be available before the node counts as ready
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synch_attrs: Vec<String>,

    /// Backend-specific settings
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl ResolvedNodeDefinition {
    pub fn new(backend_id: impl Into<String>, implementation_type: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            implementation_type: implementation_type.into(),
            node_id: None,
            infra_id: None,
            user_id: None,
            synch_strategy: None,
            synch_attrs: Vec::new(),
            attributes: Map::new(),
        }
    }

    /// Parse a definition as returned by the information broker
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| BackendError::InvalidDefinition(e.to_string()))
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// How far a creation attempt has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstanceStage {
    /// Only the description and the node id are known
    Described,
    /// Resolution completed; `backend_id` is known
    Resolved,
    /// The cloud handler returned an instance id
    Provisioned,
}

impl fmt::Display for InstanceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStage::Described => write!(f, "described"),
            InstanceStage::Resolved => write!(f, "resolved"),
            InstanceStage::Provisioned => write!(f, "provisioned"),
        }
    }
}

/// Record of one node creation attempt
///
/// Fields are only ever added: each `record_*` method refuses to overwrite
/// data recorded by an earlier stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceData {
    node_id: NodeId,

    user_id: String,

    node_description: NodeDescription,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    resolved_node_definition: Option<ResolvedNodeDefinition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    backend_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    instance_id: Option<InstanceId>,
}

impl InstanceData {
    /// Start a new creation attempt with a freshly generated node id
    pub fn new(node_description: NodeDescription) -> Self {
        Self::with_node_id(NodeId::generate(), node_description)
    }

    pub fn with_node_id(node_id: NodeId, node_description: NodeDescription) -> Self {
        Self {
            node_id,
            user_id: node_description.user_id.clone(),
            node_description,
            resolved_node_definition: None,
            backend_id: None,
            instance_id: None,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn node_description(&self) -> &NodeDescription {
        &self.node_description
    }

    pub fn infra_id(&self) -> &InfraId {
        &self.node_description.infra_id
    }

    pub fn name(&self) -> &str {
        &self.node_description.name
    }

    pub fn resolved_node_definition(&self) -> Option<&ResolvedNodeDefinition> {
        self.resolved_node_definition.as_ref()
    }

    pub fn backend_id(&self) -> Option<&str> {
        self.backend_id.as_deref()
    }

    pub fn instance_id(&self) -> Option<&InstanceId> {
        self.instance_id.as_ref()
    }

    pub fn stage(&self) -> InstanceStage {
        if self.instance_id.is_some() {
            InstanceStage::Provisioned
        } else if self.backend_id.is_some() {
            InstanceStage::Resolved
        } else {
            InstanceStage::Described
        }
    }

    /// Record the outcome of resolution (definition and its backend)
    pub fn record_resolution(&mut self, resolved: ResolvedNodeDefinition) -> Result<()> {
        if self.resolved_node_definition.is_some() {
            return Err(BackendError::StageAlreadyRecorded("a resolved node definition"));
        }
        self.backend_id = Some(resolved.backend_id.clone());
        self.resolved_node_definition = Some(resolved);
        Ok(())
    }

    /// Record the instance id returned by the cloud handler
    pub fn record_instance(&mut self, instance_id: InstanceId) -> Result<()> {
        if self.instance_id.is_some() {
            return Err(BackendError::StageAlreadyRecorded("an instance id"));
        }
        if self.resolved_node_definition.is_none() {
            return Err(BackendError::InvalidDefinition(format!(
                "node {} was provisioned before being resolved",
                self.node_id
            )));
        }
        self.instance_id = Some(instance_id);
        Ok(())
    }
}

/// Operational status of a node as reported under `node.state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Being started or configured
    Pending,
    /// Started and configured
    Ready,
    /// Shut down
    Shutdown,
    /// Failed
    Fail,
    /// Status is unknown
    Unknown,
}

impl NodeState {
    /// Terminal states can never turn into [`NodeState::Ready`]
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Shutdown | NodeState::Fail)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Pending => write!(f, "pending"),
            NodeState::Ready => write!(f, "ready"),
            NodeState::Shutdown => write!(f, "shutdown"),
            NodeState::Fail => write!(f, "fail"),
            NodeState::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn description() -> NodeDescription {
        NodeDescription::new("u1", "i1", "n1").with_type("web")
    }

    #[test]
    fn test_node_ids_are_unique() {
        let a = InstanceData::new(description());
        let b = InstanceData::new(description());
        assert_ne!(a.node_id(), b.node_id());
        assert_eq!(a.node_id().to_string().len(), 36);
    }

    #[test]
    fn test_stages_progress_in_order() {
        let mut data = InstanceData::new(description());
        assert_eq!(data.stage(), InstanceStage::Described);
        assert!(data.backend_id().is_none());

        data.record_resolution(ResolvedNodeDefinition::new("b1", "cooked"))
            .unwrap();
        assert_eq!(data.stage(), InstanceStage::Resolved);
        assert_eq!(data.backend_id(), Some("b1"));

        data.record_instance(InstanceId::new("vm-42")).unwrap();
        assert_eq!(data.stage(), InstanceStage::Provisioned);
        assert_eq!(data.instance_id().unwrap().as_str(), "vm-42");
    }

    #[test]
    fn test_recorded_fields_are_never_overwritten() {
        let mut data = InstanceData::new(description());
        data.record_resolution(ResolvedNodeDefinition::new("b1", "cooked"))
            .unwrap();

        let err = data
            .record_resolution(ResolvedNodeDefinition::new("b2", "cooked"))
            .unwrap_err();
        assert!(matches!(err, BackendError::StageAlreadyRecorded(_)));
        assert_eq!(data.backend_id(), Some("b1"));

        data.record_instance(InstanceId::new("vm-1")).unwrap();
        assert!(data.record_instance(InstanceId::new("vm-2")).is_err());
        assert_eq!(data.instance_id().unwrap().as_str(), "vm-1");
    }

    #[test]
    fn test_instance_requires_resolution() {
        let mut data = InstanceData::new(description());
        assert!(data.record_instance(InstanceId::new("vm-1")).is_err());
        assert_eq!(data.stage(), InstanceStage::Described);
    }

    #[test]
    fn test_description_from_yaml() {
        let yaml = r#"
user_id: u1
infra_id: i1
name: db
type: mysql
backend_ids: [east, west]
variables:
  port: 3306
"#;
        let desc: NodeDescription = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(desc.node_type, "mysql");
        assert_eq!(desc.preselected_backends(), vec!["east", "west"]);
        assert_eq!(desc.variables.get("port"), Some(&json!(3306)));
    }

    #[test]
    fn test_synch_strategy_forms() {
        let named: ResolvedNodeDefinition = serde_json::from_value(json!({
            "backend_id": "b1",
            "implementation_type": "cooked",
            "synch_strategy": "basic",
        }))
        .unwrap();
        let spec = named.synch_strategy.unwrap();
        assert_eq!(spec.protocol(), "basic");
        assert_eq!(spec.param("ping"), None);

        let parameterized: ResolvedNodeDefinition = serde_json::from_value(json!({
            "backend_id": "b1",
            "implementation_type": "cooked",
            "synch_strategy": {"protocol": "basic", "ping": false},
            "flavor": "m1.small",
        }))
        .unwrap();
        let spec = parameterized.synch_strategy.clone().unwrap();
        assert_eq!(spec.protocol(), "basic");
        assert_eq!(spec.param("ping"), Some(&json!(false)));
        assert_eq!(parameterized.attributes.get("flavor"), Some(&json!("m1.small")));
    }

    #[test]
    fn test_definition_without_backend_is_invalid() {
        let err = ResolvedNodeDefinition::from_value(json!({"implementation_type": "cooked"}))
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidDefinition(_)));
    }

    #[test]
    fn test_terminal_states() {
        assert!(NodeState::Fail.is_terminal());
        assert!(NodeState::Shutdown.is_terminal());
        assert!(!NodeState::Pending.is_terminal());
        assert!(!NodeState::Ready.is_terminal());
    }
}
