//! Collaborator trait definitions
//!
//! The processor never talks to a concrete cloud or configuration-management
//! system. Everything goes through these traits, injected at construction.
//! Implementations are shared between concurrently executing commands, so
//! every trait requires `Send + Sync`.

use crate::error::Result;
use crate::model::{InfraId, InstanceData, InstanceId, NodeState, ResolvedNodeDefinition};
use async_trait::async_trait;
use serde_json::Value;

/// Configuration / service-composition backend
///
/// Stages configuration for nodes before they exist and removes it after
/// they are gone.
#[async_trait]
pub trait ServiceComposer: Send + Sync {
    /// Register a new infrastructure instance; returns an opaque handle.
    /// Idempotency is not assumed.
    async fn create_infrastructure(&self, infra_id: &InfraId) -> Result<Value>;

    /// Stage configuration for a node that is not provisioned yet
    async fn register_node(&self, resolved: &ResolvedNodeDefinition) -> Result<()>;

    /// Remove a node's configuration registration
    async fn drop_node(&self, instance_data: &InstanceData) -> Result<()>;

    /// Remove infrastructure-level configuration
    async fn drop_infrastructure(&self, infra_id: &InfraId) -> Result<()>;
}

/// Node / VM provisioning backend
#[async_trait]
pub trait CloudHandler: Send + Sync {
    /// Provision an instance and return its identifier
    async fn create_node(&self, resolved: &ResolvedNodeDefinition) -> Result<InstanceId>;

    /// Terminate or release an instance.
    ///
    /// Callers only pass instance data that reached the provisioned stage;
    /// detecting violations is left to the implementation.
    async fn drop_node(&self, instance_data: &InstanceData) -> Result<()>;
}

/// Persistent user data store
#[async_trait]
pub trait UserDataStore: Send + Sync {
    /// Durably record a started node so it can be discovered later
    async fn register_started_node(
        &self,
        infra_id: &InfraId,
        node_name: &str,
        instance_data: &InstanceData,
    ) -> Result<()>;
}

/// Read-only lookup of derived facts about nodes
///
/// Keys are path-like strings such as `node.state` or
/// `node.resource.address`; the instance data gives the query its context.
#[async_trait]
pub trait InfoBroker: Send + Sync {
    async fn get(&self, key: &str, instance_data: &InstanceData) -> Result<Value>;
}

/// Typed accessors over [`InfoBroker::get`]
#[async_trait]
pub trait InfoBrokerExt: InfoBroker {
    /// Status of the node under `node.state`
    async fn node_state(&self, instance_data: &InstanceData) -> Result<NodeState> {
        let value = self.get(keys::NODE_STATE, instance_data).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Boolean fact; anything other than `true` counts as false
    async fn get_flag(&self, key: &str, instance_data: &InstanceData) -> Result<bool> {
        let value = self.get(key, instance_data).await?;
        Ok(value.as_bool().unwrap_or(false))
    }
}

impl<B: InfoBroker + ?Sized> InfoBrokerExt for B {}

/// Well-known information broker keys
pub mod keys {
    /// Abstract node definition for a node description
    pub const NODE_DEFINITION: &str = "node.definition";
    /// Node status, see [`NodeState`](crate::NodeState)
    pub const NODE_STATE: &str = "node.state";
    pub const NODE_ADDRESS: &str = "node.resource.address";
    pub const NODE_IP_ADDRESS: &str = "node.resource.ip_address";
    pub const NODE_REACHABLE: &str = "synch.node_reachable";
    /// Prefix of URL availability lookups: `synch.site_available.<url>`
    pub const SITE_AVAILABLE_PREFIX: &str = "synch.site_available.";
    /// Prefix of per-attribute lookups: `node.attribute.<name>`
    pub const NODE_ATTRIBUTE_PREFIX: &str = "node.attribute.";

    pub fn node_attribute(name: &str) -> String {
        format!("{NODE_ATTRIBUTE_PREFIX}{name}")
    }

    pub fn site_available(url: &str) -> String {
        format!("{SITE_AVAILABLE_PREFIX}{url}")
    }
}
