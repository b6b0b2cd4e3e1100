//! Test: a transform failing mid-stream is reported against its own node

use crate::helpers::*;
use pipeshell::core::callable::Callable;
use pipeshell::core::state::{NodeExit, NodeState, Outcome};
use pipeshell::core::template::OperatorSpec;
use pipeshell::{EngineConfig, PipelineError};

#[tokio::test]
async fn test_failure_on_second_value_is_attributed() {
    let capacity = 1;
    let result = run_collecting(
        vec![
            OperatorSpec::gen(5).into(),
            OperatorSpec::map(Callable::registered("fail_on_one")).into(),
        ],
        EngineConfig::default().with_buffer_capacity(capacity),
    )
    .await;

    assert_failed_at(&result, 1);
    match &result.report.outcome {
        Outcome::Failure { error, secondary } => {
            assert!(matches!(error, PipelineError::Transform { .. }));
            assert!(error.to_string().contains("refusing value 1"));
            assert!(secondary.is_empty(), "unexpected secondary: {:?}", secondary);
        }
        other => panic!("expected failure, got {:?}", other),
    }

    // Only the value before the failing one made it through
    assert_eq!(result.values, ints(&[0]));

    // The source stopped within one buffer of what the failing node consumed
    let source = result.report.node(0).unwrap();
    assert!(!source.exit.is_failure());
    assert!(source.sent <= 2 + capacity, "source sent {}", source.sent);

    let sink = result.report.node(2).unwrap();
    assert!(matches!(
        sink.exit,
        NodeExit::UpstreamFailed(_) | NodeExit::Cancelled
    ));
}

#[tokio::test]
async fn test_every_node_closes_after_failure() {
    let result = run_collecting(
        vec![
            OperatorSpec::gen(1_000_000).into(),
            OperatorSpec::map(Callable::registered("fail_on_one")).into(),
            OperatorSpec::head(10).into(),
        ],
        EngineConfig::default(),
    )
    .await;

    assert_failed_at(&result, 1);
    assert_eq!(result.report.nodes.len(), 4);
    for summary in &result.report.nodes {
        assert_eq!(summary.state, NodeState::Closed, "{} left open", summary.node);
    }
}

#[tokio::test]
async fn test_unknown_variable_is_construction_error() {
    let engine = test_engine(EngineConfig::default());
    let specs = vec![OperatorSpec::Head {
        count: pipeshell::core::template::Arg::var("missing"),
    }
    .into()];
    let err = match engine.build_graph(&specs).await {
        Err(err) => err,
        Ok(_) => panic!("unresolved variable should fail construction"),
    };
    assert!(err.is_construction());
    assert_eq!(err.node().map(|n| n.index), Some(0));
}

#[tokio::test]
async fn test_integer_overflow_fails_the_node_cleanly() {
    use pipeshell::Expr;

    let result = run_collecting(
        vec![
            OperatorSpec::Project {
                expr: Expr::lit(i64::MIN),
            }
            .into(),
            OperatorSpec::map(Expr::rem(Expr::arg(0), Expr::lit(-1))).into(),
        ],
        EngineConfig::default(),
    )
    .await;

    assert_failed_at(&result, 1);
    let error = result.report.outcome.error().unwrap();
    assert!(matches!(error, PipelineError::Transform { .. }));
    assert!(!error.to_string().contains("panicked"), "{}", error);
}
