//! Processor error types

use crate::outcome::BatchFailure;
use infraproc_backend::{BackendError, InstanceData, NodeId, NodeState};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by commands, strategies and the readiness wait
///
/// [`Error::Cancelled`] is an intentional operator abort, not a failure:
/// every layer passes it through unchanged.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Operation cancelled")]
    Cancelled,

    /// A collaborator failed; propagated without added context
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Node {node_id} did not become ready within {}s", .timeout.as_secs())]
    NotReadyInTime { node_id: NodeId, timeout: Duration },

    #[error("Node {node_id} entered terminal state '{state}'")]
    NodeFailed { node_id: NodeId, state: NodeState },

    /// Failure during node creation, carrying whatever instance data had been
    /// accumulated when it happened
    #[error(
        "Failed to create node {}/{} ({}): {source}",
        .instance_data.infra_id(),
        .instance_data.name(),
        .instance_data.node_id()
    )]
    NodeCreation {
        instance_data: Box<InstanceData>,
        source: Box<Error>,
    },

    #[error("{0}")]
    Batch(BatchFailure),

    /// A batch interrupted by cancellation; outcomes of the commands that
    /// finished anyway are kept
    #[error("Batch cancelled ({})", .0.summary())]
    BatchCancelled(BatchFailure),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Strategy returned no output for the command")]
    MissingOutput,
}

impl Error {
    /// Wrap a node creation failure. Cancellation is never wrapped.
    pub fn node_creation(instance_data: InstanceData, source: Error) -> Self {
        match source {
            Error::Cancelled => Error::Cancelled,
            source => Error::NodeCreation {
                instance_data: Box::new(instance_data),
                source: Box::new(source),
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::BatchCancelled(_))
    }

    /// Per-command outcomes of a failed or cancelled parallel batch
    pub fn batch_outcomes(&self) -> Option<&BatchFailure> {
        match self {
            Error::Batch(failure) | Error::BatchCancelled(failure) => Some(failure),
            _ => None,
        }
    }

    /// Whether retrying the operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::NotReadyInTime { .. } => true,
            Error::NodeCreation { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Partial instance data of a failed node creation
    pub fn instance_data(&self) -> Option<&InstanceData> {
        match self {
            Error::NodeCreation { instance_data, .. } => Some(instance_data.as_ref()),
            _ => None,
        }
    }

    /// The error underneath node-creation wrapping
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::NodeCreation { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
