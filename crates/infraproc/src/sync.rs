//! Readiness synchronization
//!
//! Node creation finishes only once the node is fully started and
//! configured, as observed through the information broker. The check that
//! decides "ready" is pluggable per node definition; the waiting itself is a
//! poll loop bounded by an optional timeout and interruptible by the
//! cancellation signal.

use crate::cancel::CancelSignal;
use crate::error::{Error, Result};
use async_trait::async_trait;
use infraproc_backend::{
    BackendError, InfoBroker, InfoBrokerExt, InstanceData, NodeState, ResolvedNodeDefinition,
    keys,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tera::{Context, Tera};
use tokio::time::{Instant, sleep_until};

/// Name of the default readiness check
pub const BASIC: &str = "basic";

/// Decides whether a node is ready to be used
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    async fn is_ready(
        &self,
        broker: &dyn InfoBroker,
        instance_data: &InstanceData,
    ) -> infraproc_backend::Result<bool>;
}

/// Default readiness check
///
/// In order, lazily:
/// - the node status is `ready`
/// - the node is reachable over the network (skipped with `ping: false`)
/// - every URL listed under `urls` is available; URLs are templates over
///   `addr`, `node_id` and the description's `variables`
/// - every attribute listed in `synch_attrs` has a value
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicReadiness;

#[async_trait]
impl ReadinessCheck for BasicReadiness {
    async fn is_ready(
        &self,
        broker: &dyn InfoBroker,
        instance_data: &InstanceData,
    ) -> infraproc_backend::Result<bool> {
        let node_id = instance_data.node_id();
        let resolved = instance_data.resolved_node_definition();

        let state = broker.node_state(instance_data).await?;
        tracing::debug!("Status of node {} is {}", node_id, state);
        if state != NodeState::Ready {
            return Ok(false);
        }

        let ping = resolved
            .and_then(|d| d.synch_strategy.as_ref())
            .and_then(|s| s.param("ping"))
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if ping && !broker.get_flag(keys::NODE_REACHABLE, instance_data).await? {
            tracing::info!("Node {} is not reachable yet", node_id);
            return Ok(false);
        }

        let urls = resolved
            .and_then(|d| d.synch_strategy.as_ref())
            .and_then(|s| s.param("urls"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if !urls.is_empty() {
            let context = url_context(broker, instance_data).await?;
            for template in urls {
                let url = resolve_url(template, &context)?;
                tracing::debug!("Checking URL availability: {:?}", url);
                if !broker.get_flag(&keys::site_available(&url), instance_data).await? {
                    tracing::info!("Site {:?} is still not available", url);
                    return Ok(false);
                }
                tracing::info!("Site {:?} has become available", url);
            }
        }

        let synch_attrs = resolved
            .map(|d| d.synch_attrs.as_slice())
            .unwrap_or_default();
        for attribute in synch_attrs {
            match broker
                .get(&keys::node_attribute(attribute), instance_data)
                .await
            {
                Ok(Value::Null) => {
                    tracing::info!("Attribute {:?} is still unavailable (no value)", attribute);
                    return Ok(false);
                }
                Ok(_) => {}
                Err(BackendError::NotFound(_)) => {
                    tracing::info!("Attribute {:?} is still unavailable (not found)", attribute);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(true)
    }
}

/// Template data for `urls` entries
async fn url_context(
    broker: &dyn InfoBroker,
    instance_data: &InstanceData,
) -> infraproc_backend::Result<Context> {
    let mut context = Context::new();
    context.insert("addr", &broker.get(keys::NODE_ADDRESS, instance_data).await?);
    context.insert("node_id", &instance_data.node_id().to_string());
    context.insert("variables", &instance_data.node_description().variables);
    Ok(context)
}

fn resolve_url(template: &Value, context: &Context) -> infraproc_backend::Result<String> {
    let template = template.as_str().ok_or_else(|| {
        BackendError::InvalidDefinition(format!("URL template must be a string, got {}", template))
    })?;
    Tera::one_off(template, context, false).map_err(|e| {
        BackendError::InvalidDefinition(format!("URL template {:?}: {}", template, e))
    })
}

/// Readiness checks available to node definitions, keyed by protocol name
#[derive(Clone)]
pub struct ReadinessChecks {
    checks: HashMap<String, Arc<dyn ReadinessCheck>>,
}

impl Default for ReadinessChecks {
    fn default() -> Self {
        let mut checks: HashMap<String, Arc<dyn ReadinessCheck>> = HashMap::new();
        checks.insert(BASIC.to_string(), Arc::new(BasicReadiness));
        Self { checks }
    }
}

impl ReadinessChecks {
    /// Registry holding only [`BasicReadiness`]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, protocol: impl Into<String>, check: Arc<dyn ReadinessCheck>) {
        self.checks.insert(protocol.into(), check);
    }

    pub fn contains(&self, protocol: &str) -> bool {
        self.checks.contains_key(protocol)
    }

    /// Pick the check for a node
    ///
    /// An explicit `synch_strategy` wins and must be registered. Otherwise a
    /// check registered under the implementation type is used, falling back
    /// to [`BASIC`].
    pub fn select(
        &self,
        resolved: &ResolvedNodeDefinition,
    ) -> Result<(String, Arc<dyn ReadinessCheck>)> {
        let protocol = match &resolved.synch_strategy {
            Some(spec) => {
                let protocol = spec.protocol();
                if !self.contains(protocol) {
                    return Err(BackendError::UnknownSynchStrategy(protocol.to_string()).into());
                }
                protocol
            }
            None if self.contains(&resolved.implementation_type) => {
                &resolved.implementation_type
            }
            None => BASIC,
        };

        let check = self
            .checks
            .get(protocol)
            .cloned()
            .ok_or_else(|| BackendError::UnknownSynchStrategy(protocol.to_string()))?;
        Ok((protocol.to_string(), check))
    }
}

/// Poll loop parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Time to wait between polls
    pub poll_interval: Duration,

    /// Give up after this long; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: None,
        }
    }
}

/// Wait until the node described by `instance_data` is ready
///
/// Fails with [`Error::NotReadyInTime`] when the timeout elapses, with
/// [`Error::NodeFailed`] when the node reaches a terminal state, and with
/// [`Error::Cancelled`] as soon as `cancel` fires.
pub async fn wait_for_node(
    broker: &dyn InfoBroker,
    instance_data: &InstanceData,
    checks: &ReadinessChecks,
    options: &SyncOptions,
    cancel: &CancelSignal,
) -> Result<()> {
    let node_id = instance_data.node_id();
    let resolved = instance_data.resolved_node_definition().ok_or_else(|| {
        BackendError::InvalidDefinition(format!("node {} has not been resolved", node_id))
    })?;
    let (protocol, check) = checks.select(resolved)?;
    tracing::info!("Synchronization strategy for node {} is {:?}", node_id, protocol);

    let deadline = match options.timeout {
        Some(timeout) => {
            tracing::info!(
                "Waiting for node {} to become ready with {}s timeout",
                node_id,
                timeout.as_secs()
            );
            Some(Instant::now() + timeout)
        }
        None => {
            tracing::warn!("Waiting for node {} to become ready. No timeout.", node_id);
            None
        }
    };

    loop {
        if cancel.is_cancelled() {
            tracing::debug!("Waiting for node {} has been cancelled", node_id);
            return Err(Error::Cancelled);
        }

        if check.is_ready(broker, instance_data).await? {
            tracing::info!("Node {} is ready", node_id);
            return Ok(());
        }

        if let (Some(deadline), Some(timeout)) = (deadline, options.timeout) {
            if Instant::now() >= deadline {
                return Err(Error::NotReadyInTime { node_id, timeout });
            }
        }

        let state = broker.node_state(instance_data).await?;
        if state.is_terminal() {
            return Err(Error::NodeFailed { node_id, state });
        }

        tracing::debug!(
            "Node {} is not ready, waiting {:?}",
            node_id,
            options.poll_interval
        );
        let mut wake_at = Instant::now() + options.poll_interval;
        if let Some(deadline) = deadline {
            wake_at = wake_at.min(deadline);
        }

        tokio::select! {
            _ = sleep_until(wake_at) => {}
            _ = cancel.cancelled() => {
                tracing::debug!("Waiting for node {} has been cancelled", node_id);
                return Err(Error::Cancelled);
            }
        }
    }
}
