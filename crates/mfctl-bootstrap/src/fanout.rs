//! Scatter/gather over nodes.

use std::future::Future;
use std::sync::Arc;

use mfctl_core::Node;
use mfctl_core::RemoteError;
use mfctl_core::RemoteExecutor;
use tokio::task::JoinSet;
use tracing::warn;

/// Outcome of one node's task.
#[derive(Debug)]
pub struct NodeResult<T> {
    pub node: String,
    pub result: Result<T, RemoteError>,
}

/// Run `op` for every node concurrently and wait for all of them.
///
/// One task per node, no queueing. Results come back in `nodes` order no
/// matter which task finishes first. A task that panics is reported as a
/// transport failure for its node; its siblings are unaffected. All tasks
/// have finished (or been aborted with the set) when this returns.
pub async fn scatter_gather<T, F, Fut>(
    executor: &Arc<dyn RemoteExecutor>,
    nodes: &[Node],
    op: F,
) -> Vec<NodeResult<T>>
where
    T: Send + 'static,
    F: Fn(Arc<dyn RemoteExecutor>, Node) -> Fut,
    Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for (index, node) in nodes.iter().enumerate() {
        let work = op(Arc::clone(executor), node.clone());
        tasks.spawn(async move { (index, work.await) });
    }

    let mut slots: Vec<Option<Result<T, RemoteError>>> = nodes.iter().map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(err) => warn!(error = %err, "node task did not complete"),
        }
    }

    nodes
        .iter()
        .zip(slots)
        .map(|(node, slot)| NodeResult {
            node: node.name.clone(),
            result: slot.unwrap_or_else(|| {
                Err(RemoteError::Transport {
                    node: node.name.clone(),
                    operation: "fan-out".to_string(),
                    message: "task ended before producing a result".to_string(),
                })
            }),
        })
        .collect()
}

/// Names of the nodes whose task failed, each logged with its error.
pub(crate) fn failed_nodes<T>(results: &[NodeResult<T>], operation: &str) -> Vec<String> {
    results
        .iter()
        .filter_map(|r| match &r.result {
            Ok(_) => None,
            Err(err) => {
                warn!(node = %r.node, operation, error = %err, "node task failed");
                Some(r.node.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mfctl_core::CommandOutput;
    use mfctl_testing::SimulatedExecutor;
    use mfctl_testing::fixtures;

    use super::*;

    #[tokio::test]
    async fn test_results_follow_node_order() {
        let simulated = Arc::new(SimulatedExecutor::new());
        simulated.respond_on("meas-node", "hostname", CommandOutput::stdout("meas-node\n")).await;
        simulated.respond_on("node1", "hostname", CommandOutput::stdout("node1\n")).await;
        simulated.respond_on("node2", "hostname", CommandOutput::stdout("node2\n")).await;
        let executor: Arc<dyn RemoteExecutor> = simulated;
        let nodes = fixtures::three_node_topology().nodes;

        let results = scatter_gather(&executor, &nodes, |executor, node| async move {
            // Later nodes finish first.
            let delay = if node.name == "meas-node" { 30 } else { 0 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            executor.execute(&node, "hostname").await.map(|out| out.stdout.trim().to_string())
        })
        .await;

        let got: Vec<(&str, &str)> =
            results.iter().map(|r| (r.node.as_str(), r.result.as_deref().unwrap())).collect();
        assert_eq!(got, vec![("meas-node", "meas-node"), ("node1", "node1"), ("node2", "node2")]);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_siblings() {
        let simulated = Arc::new(SimulatedExecutor::new());
        simulated.fail_command_on("node1", "useradd").await;
        let executor: Arc<dyn RemoteExecutor> = simulated.clone();
        let nodes = fixtures::three_node_topology().nodes;

        let results = scatter_gather(&executor, &nodes, |executor, node| async move {
            executor.execute(&node, "sudo useradd -m mfuser").await.map(|_| ())
        })
        .await;

        assert_eq!(failed_nodes(&results, "useradd"), vec!["node1"]);
        assert_eq!(simulated.commands().await.len(), 3);
    }

    #[tokio::test]
    async fn test_panicking_task_reports_transport_failure() {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(SimulatedExecutor::new());
        let nodes = fixtures::three_node_topology().nodes;

        let results = scatter_gather(&executor, &nodes, |_executor, node| async move {
            if node.name == "node2" {
                panic!("task blew up");
            }
            Ok(node.name.len())
        })
        .await;

        assert!(results[0].result.is_ok());
        assert!(results[1].result.is_ok());
        assert!(matches!(results[2].result, Err(RemoteError::Transport { ref node, .. }) if node == "node2"));
    }

    #[tokio::test]
    async fn test_empty_node_list() {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(SimulatedExecutor::new());
        let results = scatter_gather(&executor, &[], |_executor, _node| async move { Ok(()) }).await;
        assert!(results.is_empty());
    }
}
