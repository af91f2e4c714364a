//! Infrastructure processor backends
//!
//! This crate defines the contracts of everything the infrastructure
//! processor delegates to, together with the data model that flows between
//! them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   infraproc                      │
//! │     (commands, strategies, readiness wait)       │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               infraproc-backend                  │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  trait CloudHandler / ServiceComposer     │   │
//! │  │  trait UserDataStore / InfoBroker         │   │
//! │  │  trait Resolver                           │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │  Data model  │  │  FileStore   │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │   in-memory   │ │  real cloud / │
//! │   backends    │ │  config mgmt  │
//! └───────────────┘ └───────────────┘
//! ```

pub mod collaborator;
pub mod error;
pub mod model;
pub mod resolver;
pub mod store;

// Re-exports
pub use collaborator::{
    CloudHandler, InfoBroker, InfoBrokerExt, ServiceComposer, UserDataStore, keys,
};
pub use error::{BackendError, Result};
pub use model::{
    InfraId, InstanceData, InstanceId, InstanceStage, NodeDescription, NodeId, NodeState,
    ResolvedNodeDefinition, SynchParams, SynchStrategySpec,
};
pub use resolver::{CookedResolver, ImplementationResolver, Resolver, ResolverMap};
pub use store::{FileStore, StartedNode, StoreDocument, StoreLock};
