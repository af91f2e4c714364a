mod common;

use common::{TestCloud, node, parallel_config};
use async_trait::async_trait;
use infraproc::{
    BackendError, CommandOutcome, Error, InfoBroker, InfraProcessor, InstanceData, NodeState,
    ParallelStrategy, ProcessorConfig, ReadinessCheck,
};
use infraproc_memory::FailurePoint;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Sequential outputs keep submission order
#[tokio::test]
async fn test_sequential_outputs_in_submission_order() {
    let test = TestCloud::new();
    let processor = test.processor();
    assert_eq!(processor.strategy_name(), "sequential");

    let outputs = processor
        .push_instructions(["a", "b", "c"].map(|name| InfraProcessor::cri_create_node(node(name, "web"))))
        .await
        .unwrap();

    let names: Vec<&str> = outputs
        .iter()
        .map(|o| o.instance_data().unwrap().name())
        .collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}

/// Sequential batches stop at the first failure
#[tokio::test]
async fn test_sequential_stops_at_first_failure() {
    let test = TestCloud::new();
    let processor = test.processor();

    let err = processor
        .push_instructions([
            InfraProcessor::cri_create_node(node("a", "web")),
            InfraProcessor::cri_create_node(node("b", "unknown")),
            InfraProcessor::cri_create_node(node("c", "web")),
        ])
        .await
        .unwrap_err();

    // The failure is returned on its own, not as a batch
    assert_eq!(err.instance_data().unwrap().name(), "b");
    let started: Vec<String> = test
        .cloud
        .started_nodes()
        .into_iter()
        .map(|n| n.node_name)
        .collect();
    assert_eq!(started, vec!["a"]);
    // "c" was never attempted
    let provisioned = test
        .cloud
        .call_names()
        .into_iter()
        .filter(|name| *name == "create_node")
        .count();
    assert_eq!(provisioned, 1);
}

/// A cancelled sequential batch performs nothing
#[tokio::test]
async fn test_sequential_checks_cancellation_before_each_command() {
    let test = TestCloud::new();
    let processor = test.processor();
    let cancel = processor.cancel_signal();
    cancel.cancel();

    let err = processor
        .push_instructions([InfraProcessor::cri_create_node(node("a", "web"))])
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(test.cloud.calls().is_empty());
}

/// Parallel batches create every node with distinct ids
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_creates_every_node() {
    let test = TestCloud::new();
    let processor = test.processor_with(&parallel_config());
    assert_eq!(processor.strategy_name(), "parallel");

    let names: Vec<String> = (0..8).map(|i| format!("node-{i}")).collect();
    let outputs = processor
        .push_instructions(
            names
                .iter()
                .map(|name| InfraProcessor::cri_create_node(node(name, "web"))),
        )
        .await
        .unwrap();

    assert_eq!(outputs.len(), 8);
    let output_names: Vec<&str> = outputs
        .iter()
        .map(|o| o.instance_data().unwrap().name())
        .collect();
    assert_eq!(output_names, names);

    let node_ids: HashSet<_> = outputs
        .iter()
        .map(|o| o.instance_data().unwrap().node_id())
        .collect();
    assert_eq!(node_ids.len(), 8);
    assert_eq!(test.cloud.started_nodes().len(), 8);
    assert_eq!(test.cloud.instances().len(), 8);
}

/// Parallel failures are collected with their siblings' successes
#[tokio::test]
async fn test_parallel_collects_all_outcomes() {
    let test = TestCloud::new();
    test.cloud.define_cooked("flaky", "b2");
    test.cloud.fail_on_backend(FailurePoint::CreateNode, "b2");
    let processor = test.processor_with(&parallel_config());

    let err = processor
        .push_instructions([
            InfraProcessor::cri_create_node(node("a", "web")),
            InfraProcessor::cri_create_node(node("b", "unknown")),
            InfraProcessor::cri_create_node(node("c", "web")),
            InfraProcessor::cri_create_node(node("d", "flaky")),
        ])
        .await
        .unwrap_err();

    let Error::Batch(failure) = &err else {
        panic!("expected a batch failure, got {err}");
    };
    let summary = failure.summary();
    assert_eq!((summary.succeeded, summary.failed, summary.cancelled), (2, 2, 0));

    let succeeded: Vec<usize> = failure.succeeded().map(|(i, _)| i).collect();
    assert_eq!(succeeded, vec![0, 2]);
    assert!(matches!(failure.outcomes[3], CommandOutcome::Failed(_)));

    let (index, first) = failure.first_failure().unwrap();
    assert_eq!(index, 1);
    assert!(matches!(
        first.root_cause(),
        Error::Backend(BackendError::NotFound(_))
    ));
    assert!(err.to_string().contains("first failure at command #1"));

    // Siblings of the failures were not cancelled
    assert_eq!(test.cloud.started_nodes().len(), 2);
}

/// Readiness check that never waits
struct Immediate;

#[async_trait]
impl ReadinessCheck for Immediate {
    async fn is_ready(
        &self,
        _broker: &dyn InfoBroker,
        _instance_data: &InstanceData,
    ) -> infraproc_backend::Result<bool> {
        Ok(true)
    }
}

/// Readiness check that panics inside the command's task
struct Exploding;

#[async_trait]
impl ReadinessCheck for Exploding {
    async fn is_ready(
        &self,
        _broker: &dyn InfoBroker,
        instance_data: &InstanceData,
    ) -> infraproc_backend::Result<bool> {
        panic!("readiness check exploded for {}", instance_data.name());
    }
}

/// Defines `node_type` on `b1` with the named readiness check
fn define_with_check(test: &TestCloud, node_type: &str, check: &str) {
    test.cloud.define_node_type(
        node_type,
        json!({
            "backend_id": "b1",
            "implementation_type": "cooked",
            "synch_strategy": check,
        }),
    );
}

/// Cancellation wins over a sibling's failure, and the batch still reports
/// every outcome
#[tokio::test(start_paused = true)]
async fn test_parallel_cancellation_beats_failure() {
    let test = TestCloud::new();
    test.cloud.set_initial_state(NodeState::Pending);
    define_with_check(&test, "quick", "immediate");
    let processor = Arc::new(
        InfraProcessor::builder(test.collaborators())
            .strategy(Box::new(ParallelStrategy))
            .readiness_check("immediate", Arc::new(Immediate))
            .build(),
    );

    let pending = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            processor
                .push_instructions([
                    InfraProcessor::cri_create_node(node("fast", "quick")),
                    InfraProcessor::cri_create_node(node("waiting", "web")),
                    InfraProcessor::cri_create_node(node("broken", "unknown")),
                ])
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(5)).await;
    processor.cancel_pending();
    let err = pending.await.unwrap().unwrap_err();

    assert!(err.is_cancelled());
    let Error::BatchCancelled(outcomes) = &err else {
        panic!("expected a cancelled batch, got {err}");
    };
    let summary = outcomes.summary();
    assert_eq!((summary.succeeded, summary.failed, summary.cancelled), (1, 1, 1));

    // The node that did start stays reachable for cleanup
    let (index, output) = outcomes.succeeded().next().unwrap();
    assert_eq!(index, 0);
    let fast = output.instance_data().unwrap();
    assert_eq!(fast.name(), "fast");
    assert!(fast.instance_id().is_some());
    assert!(matches!(outcomes.outcomes[1], CommandOutcome::Cancelled));
    assert_eq!(outcomes.first_failure().unwrap().0, 2);
}

/// A panicking task fails its own index only
#[tokio::test]
async fn test_parallel_panic_is_a_failed_outcome() {
    let test = TestCloud::new();
    define_with_check(&test, "fragile", "exploding");
    let processor = InfraProcessor::builder(test.collaborators())
        .strategy(Box::new(ParallelStrategy))
        .readiness_check("exploding", Arc::new(Exploding))
        .build();

    let err = processor
        .push_instructions([
            InfraProcessor::cri_create_node(node("a", "web")),
            InfraProcessor::cri_create_node(node("b", "fragile")),
            InfraProcessor::cri_create_node(node("c", "web")),
        ])
        .await
        .unwrap_err();

    let Error::Batch(failure) = &err else {
        panic!("expected a batch failure, got {err}");
    };
    assert!(failure.outcomes[0].is_success());
    assert!(matches!(
        failure.outcomes[1],
        CommandOutcome::Failed(Error::Worker(_))
    ));
    assert!(failure.outcomes[2].is_success());
}

/// A single command reports its own error under the parallel strategy
#[tokio::test]
async fn test_parallel_single_command_error_is_unwrapped() {
    let test = TestCloud::new();
    let processor = test.processor_with(&parallel_config());

    let err = processor
        .push_instruction(InfraProcessor::cri_create_node(node("n1", "unknown")))
        .await
        .unwrap_err();

    assert_eq!(err.instance_data().unwrap().name(), "n1");
}

/// Readiness check that is never satisfied and counts its polls
#[derive(Default)]
struct Counting(AtomicUsize);

#[async_trait]
impl ReadinessCheck for Counting {
    async fn is_ready(
        &self,
        _broker: &dyn InfoBroker,
        _instance_data: &InstanceData,
    ) -> infraproc_backend::Result<bool> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }
}

/// Dropping a parallel batch aborts its tasks
#[tokio::test(start_paused = true)]
async fn test_dropped_parallel_batch_aborts_tasks() {
    let test = TestCloud::new();
    test.cloud.set_initial_state(NodeState::Pending);
    define_with_check(&test, "stuck", "counting");
    let polls = Arc::new(Counting::default());
    let processor = InfraProcessor::builder(test.collaborators())
        .strategy(Box::new(ParallelStrategy))
        .readiness_check("counting", polls.clone())
        .build();

    let batch = processor.push_instructions([InfraProcessor::cri_create_node(node("n1", "stuck"))]);
    let timed_out = tokio::time::timeout(Duration::from_secs(15), batch).await;
    assert!(timed_out.is_err());

    let seen = polls.0.load(Ordering::SeqCst);
    assert!(seen >= 2);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(polls.0.load(Ordering::SeqCst), seen);
}

/// Rollback drops a node that was provisioned
#[tokio::test]
async fn test_rollback_drops_provisioned_node() {
    let test = TestCloud::new();
    test.cloud.set_initial_state(NodeState::Fail);
    let config = ProcessorConfig {
        rollback_failed_nodes: true,
        ..ProcessorConfig::default()
    };
    let processor = test.processor_with(&config);

    let err = processor
        .push_instruction(InfraProcessor::cri_create_node(node("n1", "web")))
        .await
        .unwrap_err();

    // The creation error is still reported
    assert!(matches!(err.root_cause(), Error::NodeFailed { .. }));
    assert!(test.cloud.instances().is_empty());
    assert!(test.cloud.registered_nodes().is_empty());
    let names = test.cloud.call_names();
    assert_eq!(&names[names.len() - 2..], ["destroy_node", "unregister_node"]);
}

/// Rollback leaves unprovisioned nodes alone
#[tokio::test]
async fn test_rollback_skips_unprovisioned_node() {
    let test = TestCloud::new();
    test.cloud.fail_on(FailurePoint::CreateNode);
    let config = ProcessorConfig {
        rollback_failed_nodes: true,
        ..ProcessorConfig::default()
    };
    let processor = test.processor_with(&config);

    processor
        .push_instruction(InfraProcessor::cri_create_node(node("n1", "web")))
        .await
        .unwrap_err();

    assert!(!test.cloud.call_names().contains(&"destroy_node"));
}

/// Rollback errors do not replace the creation error
#[tokio::test]
async fn test_rollback_errors_are_ignored() {
    let test = TestCloud::new();
    test.cloud.set_initial_state(NodeState::Shutdown);
    test.cloud.fail_on(FailurePoint::DestroyNode);
    let config = ProcessorConfig {
        rollback_failed_nodes: true,
        ..ProcessorConfig::default()
    };
    let processor = test.processor_with(&config);

    let err = processor
        .push_instruction(InfraProcessor::cri_create_node(node("n1", "web")))
        .await
        .unwrap_err();

    assert!(matches!(
        err.root_cause(),
        Error::NodeFailed {
            state: NodeState::Shutdown,
            ..
        }
    ));
    assert_eq!(test.cloud.instances().len(), 1);
}

/// Failed nodes are left in place by default
#[tokio::test]
async fn test_no_cleanup_by_default() {
    let test = TestCloud::new();
    test.cloud.set_initial_state(NodeState::Fail);
    let processor = test.processor();

    processor
        .push_instruction(InfraProcessor::cri_create_node(node("n1", "web")))
        .await
        .unwrap_err();

    assert_eq!(test.cloud.instances().len(), 1);
    assert!(!test.cloud.call_names().contains(&"destroy_node"));
}
