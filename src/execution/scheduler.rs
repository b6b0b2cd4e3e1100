//! Scheduler - runs every node of a graph concurrently and settles the outcome

use crate::core::error::{NodeRef, PipelineError};
use crate::core::state::{NodeExit, NodeState, NodeSummary, Outcome, RunReport};
use crate::core::stream::StreamReceiver;
use crate::execution::graph::Graph;
use chrono::Utc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Run a graph to completion
///
/// Every node runs as its own task. The first node to fail on its own
/// account sets the run's failure and cancels the rest of the graph; later
/// failures are kept as secondary errors. `on_node` sees each node's
/// summary as soon as that node closes. Returns only once every node has
/// closed.
pub async fn run<F>(graph: Graph, mut on_node: F) -> RunReport
where
    F: FnMut(&NodeSummary) + Send,
{
    let started_at = Utc::now();
    let (run_id, wired, output, cancel, config) = graph.into_parts();
    let refs: Vec<NodeRef> = wired.iter().map(|w| w.node.node().clone()).collect();

    let mut tasks = JoinSet::new();
    for (index, w) in wired.into_iter().enumerate() {
        let node = tokio::spawn(w.node.run(w.input, w.output, cancel.clone()));
        // The outer task never panics, so a panicking node is still attributed
        tasks.spawn(async move { (index, node.await) });
    }

    let drain = output.map(|rx| tokio::spawn(discard(rx)));
    let timer = config.timeout.map(|limit| tokio::spawn(deadline(limit, cancel.clone())));

    let mut summaries: Vec<Option<NodeSummary>> = vec![None; refs.len()];
    let mut primary: Option<PipelineError> = None;
    let mut secondary = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        let (index, result) = match joined {
            Ok(joined) => joined,
            Err(e) => {
                error!("Run {}: node monitor failed: {}", run_id, e);
                continue;
            }
        };
        let summary = match result {
            Ok(summary) => summary,
            Err(e) => panicked(&refs[index], e),
        };

        if let NodeExit::Failed(failure) = &summary.exit {
            if primary.is_none() && !cancel.is_cancelled() {
                info!("Run {}: {} failed, cancelling the rest", run_id, summary.node);
                primary = Some(failure.clone());
                cancel.cancel();
            } else {
                debug!("Run {}: secondary failure: {}", run_id, failure);
                secondary.push(failure.clone());
            }
        }

        on_node(&summary);
        summaries[index] = Some(summary);
    }

    if let Some(timer) = timer {
        timer.abort();
    }
    if let Some(drain) = drain {
        let _ = drain.await;
    }

    let nodes: Vec<NodeSummary> = summaries.into_iter().flatten().collect();
    let outcome = match primary {
        Some(error) => Outcome::Failure { error, secondary },
        None if nodes.iter().any(|n| n.exit == NodeExit::Cancelled) => {
            Outcome::Cancelled { secondary }
        }
        None => Outcome::Success {
            emitted: nodes.last().map_or(0, |n| n.sent),
        },
    };

    RunReport {
        run_id,
        outcome,
        nodes,
        started_at,
        finished_at: Utc::now(),
    }
}

/// Summary for a node whose task panicked
///
/// Unwinding drops the operator without calling `Operator::close`; its
/// resources are released by their `Drop` impls and the dropped output
/// stream reaches the consumer as a protocol error.
fn panicked(node: &NodeRef, error: JoinError) -> NodeSummary {
    error!("{} panicked: {}", node, error);
    NodeSummary {
        node: node.clone(),
        exit: NodeExit::Failed(PipelineError::Transform {
            node: node.clone(),
            message: format!("node task panicked: {}", error),
        }),
        state: NodeState::Closed,
        sent: 0,
    }
}

/// Consume an output stream nobody else is reading
async fn discard(mut output: StreamReceiver) {
    while let Ok(Some(_)) = output.recv().await {}
}

async fn deadline(limit: Duration, cancel: CancellationToken) {
    tokio::time::sleep(limit).await;
    if !cancel.is_cancelled() {
        warn!("Run exceeded its {:?} timeout, cancelling", limit);
        cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::callable::{Callable, Expr};
    use crate::core::config::EngineConfig;
    use crate::core::env::Bindings;
    use crate::core::template::{NodeSpec, OperatorSpec, Reducer};
    use crate::core::value::Value;
    use crate::operators::sinks::Collector;

    async fn build(specs: Vec<NodeSpec>, config: EngineConfig) -> Graph {
        Graph::build(&specs, Bindings::new().into_shared(), &config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_counts_emitted_values() {
        let graph = build(
            vec![OperatorSpec::gen(5).into(), OperatorSpec::head(3).into()],
            EngineConfig::default(),
        )
        .await;
        let mut closed = Vec::new();
        let report = run(graph, |summary| closed.push(summary.node.index)).await;

        assert_eq!(report.outcome, Outcome::Success { emitted: 3 });
        assert_eq!(report.nodes.len(), 2);
        closed.sort();
        assert_eq!(closed, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_even_sum() {
        let collector = Collector::new();
        let even = Expr::eq(Expr::rem(Expr::arg(0), Expr::lit(2)), Expr::lit(0));
        let graph = build(
            vec![
                OperatorSpec::Gen {
                    count: crate::core::template::Arg::lit(5),
                    start: Some(crate::core::template::Arg::lit(1)),
                }
                .into(),
                OperatorSpec::select(even).into(),
                OperatorSpec::red(vec![Reducer::Function(Callable::builtin("+"))]).into(),
                OperatorSpec::collect(&collector).into(),
            ],
            EngineConfig::default(),
        )
        .await;

        let report = run(graph, |_| {}).await;
        assert!(report.outcome.is_success());
        assert_eq!(collector.values(), vec![Value::Int(6)]);
    }

    #[tokio::test]
    async fn test_failure_cancels_endless_source() {
        let graph = build(
            vec![
                OperatorSpec::Timer {
                    interval: crate::core::template::Arg::lit("1"),
                    limit: None,
                    components: false,
                }
                .into(),
                OperatorSpec::map(Expr::call("no_such_function", vec![])).into(),
            ],
            EngineConfig::default(),
        )
        .await;

        let report = tokio::time::timeout(Duration::from_secs(5), run(graph, |_| {}))
            .await
            .expect("failure should stop the whole graph");
        match report.outcome {
            Outcome::Failure { error, .. } => {
                assert_eq!(error.node().map(|n| n.index), Some(1));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        // The source sees either the cancellation or its consumer leaving
        assert!(matches!(
            report.nodes[0].exit,
            NodeExit::Cancelled | NodeExit::StoppedEarly
        ));
    }

    #[tokio::test]
    async fn test_send_after_close_fails_the_run() {
        let mut graph = build(
            vec![OperatorSpec::gen(3).into(), OperatorSpec::head(10).into()],
            EngineConfig::default(),
        )
        .await;
        graph.wired_mut()[0].output.close_normally();

        let report = run(graph, |_| {}).await;
        match report.outcome {
            Outcome::Failure { error, .. } => {
                assert!(matches!(error, PipelineError::StreamProtocol { .. }));
                assert_eq!(error.node().map(|n| n.index), Some(0));
            }
            other => panic!("expected a protocol failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_cancels_run() {
        let graph = build(
            vec![OperatorSpec::Timer {
                interval: crate::core::template::Arg::lit("1"),
                limit: None,
                components: false,
            }
            .into()],
            EngineConfig::default().with_timeout(Some(Duration::from_millis(100))),
        )
        .await;

        let report = run(graph, |_| {}).await;
        assert!(matches!(report.outcome, Outcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_external_cancel() {
        let graph = build(
            vec![OperatorSpec::Timer {
                interval: crate::core::template::Arg::lit("1"),
                limit: None,
                components: false,
            }
            .into()],
            EngineConfig::default(),
        )
        .await;
        let handle = graph.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let report = run(graph, |_| {}).await;
        assert_eq!(report.outcome, Outcome::Cancelled { secondary: vec![] });
    }
}
