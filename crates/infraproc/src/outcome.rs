//! Command results and batch outcomes

use crate::error::Error;
use infraproc_backend::InstanceData;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Result of a successfully performed command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutput {
    /// Opaque handle returned by the service composer
    InfrastructureCreated { handle: Value },
    NodeCreated { instance_data: InstanceData },
    NodeDropped,
    InfrastructureDropped,
}

impl CommandOutput {
    pub fn instance_data(&self) -> Option<&InstanceData> {
        match self {
            CommandOutput::NodeCreated { instance_data } => Some(instance_data),
            _ => None,
        }
    }

    pub fn into_instance_data(self) -> Option<InstanceData> {
        match self {
            CommandOutput::NodeCreated { instance_data } => Some(instance_data),
            _ => None,
        }
    }
}

/// What happened to one command of a batch
#[derive(Debug)]
pub enum CommandOutcome {
    Succeeded(CommandOutput),
    Cancelled,
    Failed(Error),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Succeeded(_))
    }

    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            CommandOutcome::Succeeded(output) => Some(output),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            CommandOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<crate::Result<CommandOutput>> for CommandOutcome {
    fn from(result: crate::Result<CommandOutput>) -> Self {
        match result {
            Ok(output) => CommandOutcome::Succeeded(output),
            Err(Error::Cancelled) => CommandOutcome::Cancelled,
            Err(err) => CommandOutcome::Failed(err),
        }
    }
}

/// A batch in which at least one command failed or was cancelled
///
/// Holds one outcome per command, in submission order, so successes are
/// reported alongside the failures.
#[derive(Debug)]
pub struct BatchFailure {
    pub outcomes: Vec<CommandOutcome>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl BatchFailure {
    pub fn new(outcomes: Vec<CommandOutcome>, duration_ms: u64) -> Self {
        Self {
            outcomes,
            duration_ms,
        }
    }

    /// Successful commands with their batch index
    pub fn succeeded(&self) -> impl Iterator<Item = (usize, &CommandOutput)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, outcome)| outcome.output().map(|o| (index, o)))
    }

    /// Failed commands with their batch index
    pub fn failed(&self) -> impl Iterator<Item = (usize, &Error)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, outcome)| outcome.error().map(|e| (index, e)))
    }

    /// The failure with the lowest batch index
    pub fn first_failure(&self) -> Option<(usize, &Error)> {
        self.failed().next()
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o, CommandOutcome::Cancelled))
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for outcome in &self.outcomes {
            match outcome {
                CommandOutcome::Succeeded(_) => summary.succeeded += 1,
                CommandOutcome::Cancelled => summary.cancelled += 1,
                CommandOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Batch failed ({})", self.summary())?;
        if let Some((index, err)) = self.first_failure() {
            write!(f, "; first failure at command #{}: {}", index, err)?;
        }
        Ok(())
    }
}

/// Outcome counts of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} cancelled",
            self.succeeded, self.failed, self.cancelled
        )
    }
}
