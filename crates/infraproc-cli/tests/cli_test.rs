#![allow(deprecated)] // Command::cargo_bin

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const BATCH: &str = r#"
node_types:
  web:
    backend_id: b1
    implementation_type: cooked
batches:
  - - command: create_infrastructure
      infra_id: i1
  - - command: create_node
      node_description: {user_id: u1, infra_id: i1, name: web-1, type: web}
    - command: create_node
      node_description: {user_id: u1, infra_id: i1, name: web-2, type: web}
"#;

struct TestProject {
    root: TempDir,
}

impl TestProject {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("infraproc.yaml"), "poll_interval_secs: 1\n").unwrap();
        Self { root }
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn infraproc(&self) -> Command {
        let mut cmd = Command::cargo_bin("infraproc").unwrap();
        cmd.current_dir(self.root.path())
            .env_remove("INFRAPROC_CONFIG_PATH")
            .env_remove("RUST_LOG");
        cmd
    }
}

/// Help lists every subcommand
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("infraproc").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("version"));
}

/// Version output names the binary
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("infraproc").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("infraproc"));
}

/// Validation counts batches and lists commands
#[test]
fn test_validate_batch_file() {
    let project = TestProject::new();
    let batch = project.write("batch.yaml", BATCH);

    project
        .infraproc()
        .arg("validate")
        .arg(&batch)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 batches, 3 commands"))
        .stdout(predicate::str::contains("create_node-web-2"));
}

/// A parallel run starts every node
#[test]
fn test_run_batch() {
    let project = TestProject::new();
    let batch = project.write("batch.yaml", BATCH);

    project
        .infraproc()
        .arg("run")
        .arg(&batch)
        .arg("--parallel")
        .assert()
        .success()
        .stdout(predicate::str::contains("(parallel)"))
        .stdout(predicate::str::contains("started as vm-"))
        .stdout(predicate::str::contains("All batches completed"));
}

/// Started nodes are persisted under the state directory and torn down
#[test]
fn test_run_with_teardown_and_state_dir() {
    let project = TestProject::new();
    let batch = project.write("batch.yaml", BATCH);
    let state_dir = project.root.path().join("state");

    project
        .infraproc()
        .arg("run")
        .arg(&batch)
        .arg("--state-dir")
        .arg(&state_dir)
        .arg("--teardown")
        .assert()
        .success()
        .stdout(predicate::str::contains("teardown completed"));

    let document = fs::read_to_string(state_dir.join(".infraproc/nodes.json")).unwrap();
    assert!(document.contains("i1/web-1"));
    assert!(document.contains("i1/web-2"));
}

/// A failed command is printed and fails the run
#[test]
fn test_run_reports_failed_command() {
    let project = TestProject::new();
    let batch = project.write(
        "batch.yaml",
        r#"
batches:
  - - command: create_node
      node_description: {user_id: u1, infra_id: i1, name: ghost, type: missing}
"#,
    );

    project
        .infraproc()
        .arg("run")
        .arg(&batch)
        .assert()
        .failure()
        .stdout(predicate::str::contains("Failed to create node i1/ghost"))
        .stderr(predicate::str::contains("Batch #1 failed"));
}

/// Nodes started before a sequential failure are still torn down
#[test]
fn test_teardown_after_sequential_failure() {
    let project = TestProject::new();
    let batch = project.write(
        "batch.yaml",
        r#"
node_types:
  web:
    backend_id: b1
    implementation_type: cooked
batches:
  - - command: create_infrastructure
      infra_id: i1
  - - command: create_node
      node_description: {user_id: u1, infra_id: i1, name: a, type: web}
    - command: create_node
      node_description: {user_id: u1, infra_id: i1, name: b, type: missing}
"#,
    );

    project
        .infraproc()
        .arg("run")
        .arg(&batch)
        .arg("--teardown")
        .assert()
        .failure()
        .stdout(predicate::str::contains("dropped 1 nodes"))
        .stdout(predicate::str::contains("dropped 1 infrastructures"))
        .stdout(predicate::str::contains("teardown completed"))
        .stderr(predicate::str::contains("Batch #2 failed"));
}

/// Unknown config keys are rejected
#[test]
fn test_unknown_config_option_rejected() {
    let project = TestProject::new();
    let batch = project.write("batch.yaml", BATCH);
    let config = project.write("bad.yaml", "poll_delay: 5\n");

    project
        .infraproc()
        .arg("run")
        .arg(&batch)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown field"));
}
