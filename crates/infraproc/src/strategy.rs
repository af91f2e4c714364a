//! Strategies for performing a batch of independent commands

use crate::cancel::CancelSignal;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::outcome::{BatchFailure, CommandOutcome, CommandOutput};
use crate::processor::ExecutionContext;
use async_trait::async_trait;
use futures_util::future::join_all;
use infraproc_backend::{InstanceData, InstanceStage};
use infraproc_config::StrategyKind;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::AbortHandle;

/// Policy for performing a batch of commands
///
/// Commands of one batch are independent: none may rely on another having
/// completed.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Perform every command of `batch`, returning outputs in submission order
    async fn perform(
        &self,
        ctx: &Arc<ExecutionContext>,
        batch: Vec<Command>,
        cancel: &CancelSignal,
    ) -> Result<Vec<CommandOutput>>;
}

/// Build the strategy selected by configuration
pub fn from_kind(kind: StrategyKind) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::Sequential => Box::new(SequentialStrategy),
        StrategyKind::Parallel => Box::new(ParallelStrategy),
    }
}

/// Performs commands one after another, in submission order
///
/// The first failure aborts the rest of the batch and is returned on its own;
/// outputs of already completed commands are discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialStrategy;

#[async_trait]
impl Strategy for SequentialStrategy {
    fn name(&self) -> &str {
        "sequential"
    }

    async fn perform(
        &self,
        ctx: &Arc<ExecutionContext>,
        batch: Vec<Command>,
        cancel: &CancelSignal,
    ) -> Result<Vec<CommandOutput>> {
        tracing::debug!("Performing {} commands SEQUENTIALLY", batch.len());

        let total = batch.len();
        let mut outputs = Vec::with_capacity(total);
        for (index, command) in batch.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::debug!("Batch cancelled before command #{} ({})", index, command);
                return Err(Error::Cancelled);
            }

            match perform_command(ctx, command, cancel).await {
                Ok(output) => outputs.push(output),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    tracing::error!(
                        "Command #{} ({}) failed, aborting remaining {} commands in this batch: {}",
                        index,
                        command,
                        total - index - 1,
                        err
                    );
                    return Err(err);
                }
            }
        }
        Ok(outputs)
    }
}

/// Performs every command in its own task and waits for all of them
///
/// A failing command does not cancel its siblings. Once every task has
/// finished:
/// - if any command observed cancellation, the batch is
///   [`Error::BatchCancelled`]
/// - else if any failed, the batch is [`Error::Batch`]
/// - else the outputs are returned in submission order
///
/// Both errors hold one outcome per command in submission order. Dropping
/// the returned future aborts every task of the batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelStrategy;

#[async_trait]
impl Strategy for ParallelStrategy {
    fn name(&self) -> &str {
        "parallel"
    }

    async fn perform(
        &self,
        ctx: &Arc<ExecutionContext>,
        batch: Vec<Command>,
        cancel: &CancelSignal,
    ) -> Result<Vec<CommandOutput>> {
        tracing::debug!("Performing {} commands in PARALLEL", batch.len());
        let started = Instant::now();

        let handles: Vec<_> = batch
            .into_iter()
            .map(|command| {
                let ctx = Arc::clone(ctx);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let label = command.label();
                    tracing::debug!("Started task {}", label);
                    let result = perform_command(&ctx, &command, &cancel).await;
                    tracing::debug!("Finished task {}", label);
                    result
                })
            })
            .collect();
        let _tasks = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());

        let outcomes: Vec<CommandOutcome> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(result) => CommandOutcome::from(result),
                Err(join_error) => CommandOutcome::Failed(Error::Worker(join_error.to_string())),
            })
            .collect();

        aggregate(outcomes, started)
    }
}

/// Aborts the tasks of a batch whose future is dropped before they finish
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

fn aggregate(outcomes: Vec<CommandOutcome>, started: Instant) -> Result<Vec<CommandOutput>> {
    if outcomes.iter().all(CommandOutcome::is_success) {
        return Ok(outcomes
            .into_iter()
            .filter_map(|o| match o {
                CommandOutcome::Succeeded(output) => Some(output),
                _ => None,
            })
            .collect());
    }

    let failure = BatchFailure::new(outcomes, started.elapsed().as_millis() as u64);
    for (index, err) in failure.failed() {
        tracing::error!("Command #{} failed: {}", index, err);
    }

    if failure.is_cancelled() {
        tracing::info!("Batch cancelled ({})", failure.summary());
        return Err(Error::BatchCancelled(failure));
    }

    tracing::error!("{}", failure);
    Err(Error::Batch(failure))
}

/// Perform one command, undoing a half-created node if so configured
async fn perform_command(
    ctx: &ExecutionContext,
    command: &Command,
    cancel: &CancelSignal,
) -> Result<CommandOutput> {
    let result = command.perform(ctx, cancel).await;
    if ctx.rollback_failed_nodes() {
        if let Err(Error::NodeCreation { instance_data, .. }) = &result {
            rollback_node(ctx, instance_data, cancel).await;
        }
    }
    result
}

async fn rollback_node(ctx: &ExecutionContext, instance_data: &InstanceData, cancel: &CancelSignal) {
    if instance_data.stage() != InstanceStage::Provisioned {
        tracing::debug!(
            "Node {} failed at stage {}; nothing to roll back",
            instance_data.node_id(),
            instance_data.stage()
        );
        return;
    }

    tracing::info!("Dropping partially started node {}", instance_data.node_id());
    let undo = Command::DropNode {
        instance_data: instance_data.clone(),
    };
    if let Err(e) = undo.perform(ctx, cancel).await {
        tracing::warn!(
            "IGNORING error while dropping partially started node {}: {}",
            instance_data.node_id(),
            e
        );
    }
}
