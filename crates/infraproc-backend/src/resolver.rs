//! Node resolution
//!
//! Turns an abstract [`NodeDescription`] into a [`ResolvedNodeDefinition`].
//! The right algorithm depends on the node definition's implementation type,
//! so [`ResolverMap`] looks the definition up and dispatches to the resolver
//! registered for that type.

use crate::collaborator::{InfoBroker, keys};
use crate::error::{BackendError, Result};
use crate::model::{InstanceData, NodeDescription, NodeId, ResolvedNodeDefinition};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Expands a node description into a concrete, backend-bound definition
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve_node(
        &self,
        broker: &dyn InfoBroker,
        node_id: &NodeId,
        node_description: &NodeDescription,
    ) -> Result<ResolvedNodeDefinition>;
}

/// Resolution step for one implementation type
///
/// Receives the node definition selected by the broker and fills in whatever
/// the service composer and cloud handler need.
#[async_trait]
pub trait ImplementationResolver: Send + Sync {
    async fn resolve(
        &self,
        broker: &dyn InfoBroker,
        node_id: &NodeId,
        node_description: &NodeDescription,
        definition: ResolvedNodeDefinition,
    ) -> Result<ResolvedNodeDefinition>;
}

/// Resolver for definitions that are already fully resolved
///
/// Returns the definition as-is, stamped with the node's identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct CookedResolver;

impl CookedResolver {
    pub const IMPLEMENTATION_TYPE: &'static str = "cooked";
}

#[async_trait]
impl ImplementationResolver for CookedResolver {
    async fn resolve(
        &self,
        _broker: &dyn InfoBroker,
        node_id: &NodeId,
        node_description: &NodeDescription,
        mut definition: ResolvedNodeDefinition,
    ) -> Result<ResolvedNodeDefinition> {
        definition.node_id = Some(*node_id);
        definition.infra_id = Some(node_description.infra_id.clone());
        definition.user_id = Some(node_description.user_id.clone());
        Ok(definition)
    }
}

/// Dispatching resolver keyed by implementation type
#[derive(Clone, Default)]
pub struct ResolverMap {
    resolvers: HashMap<String, Arc<dyn ImplementationResolver>>,
}

impl ResolverMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map with [`CookedResolver`] registered
    pub fn with_cooked() -> Self {
        Self::new().register(CookedResolver::IMPLEMENTATION_TYPE, Arc::new(CookedResolver))
    }

    pub fn register(
        mut self,
        implementation_type: impl Into<String>,
        resolver: Arc<dyn ImplementationResolver>,
    ) -> Self {
        self.resolvers.insert(implementation_type.into(), resolver);
        self
    }

    pub fn implementation_types(&self) -> impl Iterator<Item = &str> {
        self.resolvers.keys().map(String::as_str)
    }
}

#[async_trait]
impl Resolver for ResolverMap {
    async fn resolve_node(
        &self,
        broker: &dyn InfoBroker,
        node_id: &NodeId,
        node_description: &NodeDescription,
    ) -> Result<ResolvedNodeDefinition> {
        // The broker answers in the context of an instance; at this point the
        // instance is nothing more than its id and description.
        let context = InstanceData::with_node_id(*node_id, node_description.clone());
        let value = broker.get(keys::NODE_DEFINITION, &context).await?;
        let definition = ResolvedNodeDefinition::from_value(value)?;

        let resolver = self
            .resolvers
            .get(&definition.implementation_type)
            .ok_or_else(|| {
                BackendError::UnknownImplementation(definition.implementation_type.clone())
            })?;

        tracing::debug!(
            "Resolving node {} with implementation type {:?}",
            node_id,
            definition.implementation_type
        );
        resolver
            .resolve(broker, node_id, node_description, definition)
            .await
    }
}
