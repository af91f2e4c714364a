//! Collaborator implementations over a [`MemoryCloud`]

use crate::cloud::MemoryCloud;
use async_trait::async_trait;
use chrono::Utc;
use infraproc_backend::{
    BackendError, CloudHandler, InfoBroker, InfraId, InstanceData, InstanceId, ResolvedNodeDefinition,
    Result, ServiceComposer, StartedNode, UserDataStore, keys,
};
use serde_json::{Value, json};

/// Service composer keeping registrations in the simulated cloud
#[derive(Debug, Clone)]
pub struct MemoryServiceComposer {
    cloud: MemoryCloud,
}

impl MemoryServiceComposer {
    pub fn new(cloud: MemoryCloud) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl ServiceComposer for MemoryServiceComposer {
    async fn create_infrastructure(&self, infra_id: &InfraId) -> Result<Value> {
        self.cloud.create_infrastructure(infra_id)
    }

    async fn register_node(&self, resolved: &ResolvedNodeDefinition) -> Result<()> {
        self.cloud.register_node(resolved.node_id, &resolved.backend_id)
    }

    async fn drop_node(&self, instance_data: &InstanceData) -> Result<()> {
        self.cloud
            .unregister_node(instance_data.node_id(), instance_data.backend_id())
    }

    async fn drop_infrastructure(&self, infra_id: &InfraId) -> Result<()> {
        self.cloud.drop_infrastructure(infra_id)
    }
}

/// Cloud handler provisioning simulated instances
#[derive(Debug, Clone)]
pub struct MemoryCloudHandler {
    cloud: MemoryCloud,
}

impl MemoryCloudHandler {
    pub fn new(cloud: MemoryCloud) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl CloudHandler for MemoryCloudHandler {
    async fn create_node(&self, resolved: &ResolvedNodeDefinition) -> Result<InstanceId> {
        let instance_id = self
            .cloud
            .create_node(resolved.node_id, &resolved.backend_id)?;
        tracing::debug!(
            "Created instance {} on backend {}",
            instance_id,
            resolved.backend_id
        );
        Ok(instance_id)
    }

    async fn drop_node(&self, instance_data: &InstanceData) -> Result<()> {
        self.cloud
            .destroy_node(instance_data.instance_id(), instance_data.backend_id())
    }
}

/// User data store recording started nodes in the simulated cloud
#[derive(Debug, Clone)]
pub struct MemoryStore {
    cloud: MemoryCloud,
}

impl MemoryStore {
    pub fn new(cloud: MemoryCloud) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl UserDataStore for MemoryStore {
    async fn register_started_node(
        &self,
        infra_id: &InfraId,
        node_name: &str,
        instance_data: &InstanceData,
    ) -> Result<()> {
        self.cloud.register_started_node(StartedNode {
            infra_id: infra_id.clone(),
            node_name: node_name.to_string(),
            registered_at: Utc::now(),
            instance_data: instance_data.clone(),
        })
    }
}

/// Information broker answering from the simulated cloud
///
/// Known keys:
/// - `node.definition`: the definition registered for the description's type;
///   a preselected `backend_id` on the description overrides the definition's
/// - `node.state`, `node.resource.address`, `node.resource.ip_address`:
///   facts about the provisioned instance
/// - `synch.node_reachable`: reachability of the provisioned instance
/// - `synch.site_available.<url>`: whether a URL answers, as set on the cloud
/// - `node.attribute.<name>`: attributes set on the cloud
///
/// Anything else, and any instance fact asked before provisioning, is
/// [`BackendError::NotFound`].
#[derive(Debug, Clone)]
pub struct MemoryInfoBroker {
    cloud: MemoryCloud,
}

impl MemoryInfoBroker {
    pub fn new(cloud: MemoryCloud) -> Self {
        Self { cloud }
    }

    fn node_definition(&self, instance_data: &InstanceData) -> Result<Value> {
        let description = instance_data.node_description();
        let mut definition = self.cloud.definition(&description.node_type).ok_or_else(|| {
            BackendError::NotFound(format!("node definition for type {:?}", description.node_type))
        })?;

        let preselected = description.preselected_backends();
        if let (Some(backend_id), Some(object)) = (preselected.first(), definition.as_object_mut()) {
            object.insert("backend_id".to_string(), json!(backend_id));
        }
        Ok(definition)
    }

    fn instance_fact(&self, key: &str, instance_data: &InstanceData) -> Result<Value> {
        let instance = instance_data
            .instance_id()
            .and_then(|id| self.cloud.instance(id))
            .ok_or_else(|| {
                BackendError::NotFound(format!(
                    "{} of node {} (no instance)",
                    key,
                    instance_data.node_id()
                ))
            })?;

        match key {
            keys::NODE_STATE => Ok(serde_json::to_value(instance.state)?),
            keys::NODE_ADDRESS => Ok(json!(instance.address)),
            keys::NODE_IP_ADDRESS => Ok(json!(instance.ip_address)),
            keys::NODE_REACHABLE => Ok(json!(self.cloud.reachable())),
            _ => Err(BackendError::NotFound(key.to_string())),
        }
    }
}

#[async_trait]
impl InfoBroker for MemoryInfoBroker {
    async fn get(&self, key: &str, instance_data: &InstanceData) -> Result<Value> {
        if key == keys::NODE_DEFINITION {
            return self.node_definition(instance_data);
        }
        if let Some(url) = key.strip_prefix(keys::SITE_AVAILABLE_PREFIX) {
            return Ok(json!(self.cloud.site_available(url)));
        }
        if let Some(name) = key.strip_prefix(keys::NODE_ATTRIBUTE_PREFIX) {
            return self
                .cloud
                .attribute(name)
                .ok_or_else(|| BackendError::NotFound(key.to_string()));
        }
        self.instance_fact(key, instance_data)
    }
}
