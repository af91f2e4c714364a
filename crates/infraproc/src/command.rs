//! Infrastructure processor commands
//!
//! Every primitive of the processor is a self-contained [`Command`]
//! (operation + input data) rather than a method call, so primitives can be
//! batched, serialized and replayed. Commands are performed against an
//! [`ExecutionContext`] supplying the collaborators.

use crate::cancel::CancelSignal;
use crate::error::{Error, Result};
use crate::outcome::CommandOutput;
use crate::processor::ExecutionContext;
use crate::sync;
use infraproc_backend::{InfraId, InstanceData, NodeDescription, keys};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One orchestration operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Register a new infrastructure instance with the service composer.
    /// The id is pre-generated upstream.
    CreateInfrastructure { infra_id: InfraId },

    /// Resolve, register, provision, persist and wait for a node
    CreateNode { node_description: NodeDescription },

    /// Tear down a provisioned node: cloud handler first, then service composer
    DropNode { instance_data: InstanceData },

    /// Remove infrastructure-level configuration. Member nodes must have
    /// been dropped already; this is not checked.
    DropInfrastructure { infra_id: InfraId },
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::CreateInfrastructure { .. } => "create_infrastructure",
            Command::CreateNode { .. } => "create_node",
            Command::DropNode { .. } => "drop_node",
            Command::DropInfrastructure { .. } => "drop_infrastructure",
        }
    }

    /// Short identifying label for logs and task names
    pub fn label(&self) -> String {
        match self {
            Command::CreateInfrastructure { infra_id }
            | Command::DropInfrastructure { infra_id } => {
                format!("{}-{}", self.kind(), infra_id)
            }
            Command::CreateNode { node_description } => {
                format!("{}-{}", self.kind(), node_description.name)
            }
            Command::DropNode { instance_data } => {
                format!("{}-{}", self.kind(), instance_data.node_id())
            }
        }
    }

    /// Perform the operation represented by this command
    pub async fn perform(
        &self,
        ctx: &ExecutionContext,
        cancel: &CancelSignal,
    ) -> Result<CommandOutput> {
        match self {
            Command::CreateInfrastructure { infra_id } => {
                let handle = ctx.service_composer().create_infrastructure(infra_id).await?;
                Ok(CommandOutput::InfrastructureCreated { handle })
            }
            Command::CreateNode { node_description } => {
                let instance_data = create_node(ctx, node_description, cancel).await?;
                Ok(CommandOutput::NodeCreated { instance_data })
            }
            Command::DropNode { instance_data } => {
                ctx.cloud_handler().drop_node(instance_data).await?;
                ctx.service_composer().drop_node(instance_data).await?;
                tracing::info!(
                    "Node {}/{}/{} has been dropped",
                    instance_data.infra_id(),
                    instance_data.name(),
                    instance_data.node_id()
                );
                Ok(CommandOutput::NodeDropped)
            }
            Command::DropInfrastructure { infra_id } => {
                ctx.service_composer().drop_infrastructure(infra_id).await?;
                Ok(CommandOutput::InfrastructureDropped)
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

async fn create_node(
    ctx: &ExecutionContext,
    node_description: &NodeDescription,
    cancel: &CancelSignal,
) -> Result<InstanceData> {
    let mut instance_data = InstanceData::new(node_description.clone());

    match perform_create(ctx, &mut instance_data, cancel).await {
        Ok(()) => {
            tracing::info!(
                "Node {}/{}/{} has started",
                node_description.infra_id,
                node_description.name,
                instance_data.node_id()
            );
            Ok(instance_data)
        }
        // Intentional cancellation is not a creation error
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(err) => Err(Error::node_creation(instance_data, err)),
    }
}

async fn perform_create(
    ctx: &ExecutionContext,
    instance_data: &mut InstanceData,
    cancel: &CancelSignal,
) -> Result<()> {
    let node_id = instance_data.node_id();
    let broker = ctx.info_broker();

    tracing::debug!(
        "Performing CreateNode on node {{\n{}}}",
        to_yaml(instance_data.node_description())
    );

    let resolved = ctx
        .resolver()
        .resolve_node(broker, &node_id, instance_data.node_description())
        .await?;
    tracing::debug!("Resolved node definition:\n{}", to_yaml(&resolved));
    instance_data.record_resolution(resolved.clone())?;

    ctx.service_composer().register_node(&resolved).await?;
    let instance_id = ctx.cloud_handler().create_node(&resolved).await?;
    instance_data.record_instance(instance_id)?;

    ctx.store()
        .register_started_node(instance_data.infra_id(), instance_data.name(), instance_data)
        .await?;

    log_address(broker, instance_data).await;

    sync::wait_for_node(broker, instance_data, ctx.readiness(), ctx.sync_options(), cancel).await
}

async fn log_address(broker: &dyn infraproc_backend::InfoBroker, instance_data: &InstanceData) {
    let address = broker.get(keys::NODE_ADDRESS, instance_data).await;
    let ip_address = broker.get(keys::NODE_IP_ADDRESS, instance_data).await;
    match (address, ip_address) {
        (Ok(address), Ok(ip_address)) => tracing::info!(
            "Node {}/{}/{} received address: {} ({})",
            instance_data.infra_id(),
            instance_data.name(),
            instance_data.node_id(),
            address,
            ip_address
        ),
        (Err(e), _) | (_, Err(e)) => tracing::debug!(
            "Address of node {} is not available yet: {}",
            instance_data.node_id(),
            e
        ),
    }
}

fn to_yaml<T: Serialize>(value: &T) -> String {
    serde_yaml::to_string(value).unwrap_or_else(|e| format!("<unprintable: {e}>"))
}
