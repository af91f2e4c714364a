//! Batch files
//!
//! ```yaml
//! node_types:
//!   web:
//!     backend_id: b1
//!     implementation_type: cooked
//! batches:
//!   - - command: create_infrastructure
//!       infra_id: i1
//!   - - command: create_node
//!       node_description: {user_id: u1, infra_id: i1, name: web, type: web}
//! ```
//!
//! Batches run one after another; the commands inside one batch are
//! independent and run under the configured strategy.

use anyhow::Context;
use infraproc::{Command, NodeState};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchFile {
    /// Node definitions answered for `node.definition`, keyed by node type
    #[serde(default)]
    pub node_types: BTreeMap<String, Value>,

    /// State simulated instances start in
    #[serde(default)]
    pub initial_state: Option<NodeState>,

    pub batches: Vec<Vec<Command>>,
}

impl BatchFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid batch file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn command_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch_file() {
        let batch = BatchFile::parse(
            r#"
node_types:
  web: {backend_id: b1, implementation_type: cooked}
initial_state: pending
batches:
  - - command: create_infrastructure
      infra_id: i1
  - - command: create_node
      node_description: {user_id: u1, infra_id: i1, name: a, type: web}
    - command: create_node
      node_description: {user_id: u1, infra_id: i1, name: b, type: web}
"#,
        )
        .unwrap();

        assert_eq!(batch.batches.len(), 2);
        assert_eq!(batch.command_count(), 3);
        assert_eq!(batch.initial_state, Some(NodeState::Pending));
        assert_eq!(batch.node_types["web"]["backend_id"], "b1");
    }

    #[test]
    fn test_unknown_command_rejected() {
        let result = BatchFile::parse("batches:\n  - - command: reboot_node\n");
        assert!(result.is_err());
    }
}
