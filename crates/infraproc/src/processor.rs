//! The infrastructure processor facade

use crate::cancel::CancelSignal;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::outcome::{CommandOutcome, CommandOutput};
use crate::strategy::{self, Strategy};
use crate::sync::{ReadinessCheck, ReadinessChecks, SyncOptions};
use infraproc_backend::{
    CloudHandler, InfoBroker, InfraId, InstanceData, NodeDescription, Resolver, ServiceComposer,
    UserDataStore,
};
use infraproc_config::ProcessorConfig;
use std::sync::{Arc, Mutex, MutexGuard};

/// The external systems the processor delegates to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn UserDataStore>,
    pub cloud_handler: Arc<dyn CloudHandler>,
    pub service_composer: Arc<dyn ServiceComposer>,
    pub info_broker: Arc<dyn InfoBroker>,
    pub resolver: Arc<dyn Resolver>,
}

/// Everything a command needs to be performed
///
/// Shared read-only between the concurrently executing commands of a batch.
pub struct ExecutionContext {
    collaborators: Collaborators,
    readiness: ReadinessChecks,
    sync: SyncOptions,
    rollback_failed_nodes: bool,
}

impl ExecutionContext {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            readiness: ReadinessChecks::default(),
            sync: SyncOptions::default(),
            rollback_failed_nodes: false,
        }
    }

    pub fn store(&self) -> &dyn UserDataStore {
        self.collaborators.store.as_ref()
    }

    pub fn cloud_handler(&self) -> &dyn CloudHandler {
        self.collaborators.cloud_handler.as_ref()
    }

    pub fn service_composer(&self) -> &dyn ServiceComposer {
        self.collaborators.service_composer.as_ref()
    }

    pub fn info_broker(&self) -> &dyn InfoBroker {
        self.collaborators.info_broker.as_ref()
    }

    pub fn resolver(&self) -> &dyn Resolver {
        self.collaborators.resolver.as_ref()
    }

    pub fn readiness(&self) -> &ReadinessChecks {
        &self.readiness
    }

    pub fn sync_options(&self) -> &SyncOptions {
        &self.sync
    }

    pub fn rollback_failed_nodes(&self) -> bool {
        self.rollback_failed_nodes
    }
}

/// Entry point for orchestration commands
///
/// Builds commands, hands batches to the configured strategy and owns the
/// cancellation signal of in-flight batches.
pub struct InfraProcessor {
    context: Arc<ExecutionContext>,
    strategy: Box<dyn Strategy>,
    cancel: Mutex<CancelSignal>,
}

impl InfraProcessor {
    /// Processor with default options and the sequential strategy
    pub fn new(collaborators: Collaborators) -> Self {
        Self::builder(collaborators).build()
    }

    pub fn builder(collaborators: Collaborators) -> InfraProcessorBuilder {
        InfraProcessorBuilder::new(collaborators)
    }

    pub fn cri_create_infrastructure(infra_id: impl Into<InfraId>) -> Command {
        Command::CreateInfrastructure {
            infra_id: infra_id.into(),
        }
    }

    pub fn cri_create_node(node_description: NodeDescription) -> Command {
        Command::CreateNode { node_description }
    }

    pub fn cri_drop_node(instance_data: InstanceData) -> Command {
        Command::DropNode { instance_data }
    }

    pub fn cri_drop_infrastructure(infra_id: impl Into<InfraId>) -> Command {
        Command::DropInfrastructure {
            infra_id: infra_id.into(),
        }
    }

    /// Perform a batch of independent commands with the configured strategy
    ///
    /// Outputs are in submission order. The batch observes the cancellation
    /// signal current at submission; [`InfraProcessor::cancel_pending`]
    /// aborts it.
    pub async fn push_instructions(
        &self,
        batch: impl IntoIterator<Item = Command>,
    ) -> Result<Vec<CommandOutput>> {
        let batch: Vec<Command> = batch.into_iter().collect();
        let cancel = self.cancel_signal();
        tracing::info!(
            "Pushing {} commands ({} strategy)",
            batch.len(),
            self.strategy.name()
        );
        self.strategy.perform(&self.context, batch, &cancel).await
    }

    /// Perform a single command; see [`InfraProcessor::push_instructions`]
    ///
    /// The command's own error is returned under either strategy, never a
    /// one-command batch error.
    pub async fn push_instruction(&self, command: Command) -> Result<CommandOutput> {
        match self.push_instructions([command]).await {
            Ok(mut outputs) => outputs.pop().ok_or(Error::MissingOutput),
            Err(Error::BatchCancelled(_)) => Err(Error::Cancelled),
            Err(Error::Batch(failure)) => Err(failure
                .outcomes
                .into_iter()
                .find_map(|outcome| match outcome {
                    CommandOutcome::Failed(err) => Some(err),
                    _ => None,
                })
                .unwrap_or(Error::MissingOutput)),
            Err(err) => Err(err),
        }
    }

    /// Cancel every batch submitted so far
    ///
    /// Batches submitted afterwards run under a fresh signal.
    pub fn cancel_pending(&self) {
        let mut current = self.lock_cancel();
        tracing::info!("Cancelling pending commands");
        current.cancel();
        *current = CancelSignal::new();
    }

    /// Signal observed by the next submitted batch
    pub fn cancel_signal(&self) -> CancelSignal {
        self.lock_cancel().clone()
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    fn lock_cancel(&self) -> MutexGuard<'_, CancelSignal> {
        // A CancelSignal is always valid, even after a panic elsewhere
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Builder for [`InfraProcessor`]
pub struct InfraProcessorBuilder {
    context: ExecutionContext,
    strategy: Option<Box<dyn Strategy>>,
}

impl InfraProcessorBuilder {
    fn new(collaborators: Collaborators) -> Self {
        Self {
            context: ExecutionContext::new(collaborators),
            strategy: None,
        }
    }

    /// Apply strategy, polling, timeout and rollback options
    pub fn config(mut self, config: &ProcessorConfig) -> Self {
        self.context.sync = SyncOptions {
            poll_interval: config.poll_interval(),
            timeout: config.ready_timeout(),
        };
        self.context.rollback_failed_nodes = config.rollback_failed_nodes;
        self.strategy = Some(strategy::from_kind(config.strategy));
        self
    }

    pub fn strategy(mut self, strategy: Box<dyn Strategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn sync_options(mut self, sync: SyncOptions) -> Self {
        self.context.sync = sync;
        self
    }

    pub fn rollback_failed_nodes(mut self, enabled: bool) -> Self {
        self.context.rollback_failed_nodes = enabled;
        self
    }

    /// Make a readiness check available under `protocol`
    pub fn readiness_check(
        mut self,
        protocol: impl Into<String>,
        check: Arc<dyn ReadinessCheck>,
    ) -> Self {
        self.context.readiness.register(protocol, check);
        self
    }

    pub fn build(self) -> InfraProcessor {
        let strategy = self
            .strategy
            .unwrap_or_else(|| Box::new(strategy::SequentialStrategy));
        InfraProcessor {
            context: Arc::new(self.context),
            strategy,
            cancel: Mutex::new(CancelSignal::new()),
        }
    }
}
