//! Infrastructure processor
//!
//! Executes orchestration commands (create/drop infrastructure, create/drop
//! node) against injected collaborators, batching independent commands under
//! a sequential or parallel strategy.
//!
//! ```no_run
//! # async fn example(collaborators: infraproc::Collaborators) -> infraproc::Result<()> {
//! use infraproc::{InfraProcessor, NodeDescription};
//!
//! let processor = InfraProcessor::new(collaborators);
//! let outputs = processor
//!     .push_instructions([
//!         InfraProcessor::cri_create_node(NodeDescription::new("u1", "i1", "web")),
//!         InfraProcessor::cri_create_node(NodeDescription::new("u1", "i1", "db")),
//!     ])
//!     .await?;
//! assert_eq!(outputs.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod command;
pub mod error;
pub mod outcome;
pub mod processor;
pub mod strategy;
pub mod sync;

pub use cancel::CancelSignal;
pub use command::Command;
pub use error::{Error, Result};
pub use outcome::{BatchFailure, BatchSummary, CommandOutcome, CommandOutput};
pub use processor::{Collaborators, ExecutionContext, InfraProcessor, InfraProcessorBuilder};
pub use strategy::{ParallelStrategy, SequentialStrategy, Strategy};
pub use sync::{BasicReadiness, ReadinessCheck, ReadinessChecks, SyncOptions};

pub use infraproc_backend::{
    BackendError, CloudHandler, InfoBroker, InfraId, InstanceData, InstanceId, InstanceStage,
    NodeDescription, NodeId, NodeState, ResolvedNodeDefinition, Resolver, ServiceComposer,
    UserDataStore,
};
pub use infraproc_config::{ProcessorConfig, StrategyKind};
