//! Test: external cancellation and run timeouts

use crate::helpers::*;
use pipeshell::core::state::{NodeExit, Outcome};
use pipeshell::core::template::{Arg, OperatorSpec};
use pipeshell::{EngineConfig, PipelineTemplate};
use std::time::Duration;

fn endless_timer() -> OperatorSpec {
    OperatorSpec::Timer {
        interval: Arg::lit("1"),
        limit: None,
        components: false,
    }
}

#[tokio::test]
async fn test_external_cancel_closes_every_node() {
    let engine = test_engine(EngineConfig::default());
    let graph = engine
        .build_graph(&[endless_timer().into(), OperatorSpec::head(100).into()])
        .await
        .unwrap();
    let cancel = graph.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(5), engine.run(graph))
        .await
        .expect("cancellation should unblock every node");

    assert!(matches!(report.outcome, Outcome::Cancelled { .. }));
    assert_eq!(report.nodes.len(), 2);
    assert_eq!(report.node(0).unwrap().exit, NodeExit::Cancelled);
}

#[tokio::test]
async fn test_timeout_cancels_run() {
    let result = run_collecting(
        vec![endless_timer().into()],
        EngineConfig::default().with_timeout(Some(Duration::from_millis(100))),
    )
    .await;

    assert_cancelled(&result);
    assert_no_node_failed(&result.report);
}

#[tokio::test]
async fn test_invocation_cancel_settles_run() {
    let engine = test_engine(EngineConfig::default());
    let template = PipelineTemplate::new("ticks").then(endless_timer());

    let mut invocation = engine.invoke(&template, vec![]).await.unwrap();
    let first = invocation.next().await;
    assert!(matches!(first, Some(Ok(_))));

    invocation.cancel();
    let report = tokio::time::timeout(Duration::from_secs(5), invocation.finish())
        .await
        .expect("finish should return after cancel");
    assert!(matches!(report.outcome, Outcome::Cancelled { .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancel_terminates_external_program() {
    let engine = test_engine(EngineConfig::default());
    let graph = engine
        .build_graph(&[pipeshell::ProcessSpec::new("sleep").arg("30").into()])
        .await
        .unwrap();
    let cancel = graph.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(5), engine.run(graph))
        .await
        .expect("the program should be terminated within the grace period");
    assert!(matches!(report.outcome, Outcome::Cancelled { .. }));
}
