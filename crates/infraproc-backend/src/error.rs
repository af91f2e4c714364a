//! Collaborator error types

use thiserror::Error;

/// Errors reported by the processor's collaborators
/// (cloud handler, service composer, store, information broker, resolver)
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid node definition: {0}")]
    InvalidDefinition(String),

    #[error("Unknown implementation type: {0}")]
    UnknownImplementation(String),

    #[error("Unknown synch strategy: {0}")]
    UnknownSynchStrategy(String),

    #[error("Instance data already has {0}")]
    StageAlreadyRecorded(&'static str),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BackendError>;
