//! Test: integers filtered to evens and summed

use crate::helpers::*;
use pipeshell::core::callable::{Callable, Expr};
use pipeshell::core::template::{Arg, OperatorSpec, Reducer};
use pipeshell::core::state::NodeExit;
use pipeshell::{EngineConfig, Value};

fn one_to_five() -> OperatorSpec {
    OperatorSpec::Gen {
        count: Arg::lit(5),
        start: Some(Arg::lit(1)),
    }
}

fn is_even() -> Expr {
    Expr::eq(Expr::rem(Expr::arg(0), Expr::lit(2)), Expr::lit(0))
}

#[tokio::test]
async fn test_even_sum() {
    let result = run_collecting(
        vec![
            one_to_five().into(),
            OperatorSpec::select(is_even()).into(),
            OperatorSpec::red(vec![Reducer::Function(Callable::builtin("+"))]).into(),
        ],
        EngineConfig::default(),
    )
    .await;

    assert_success(&result);
    assert_eq!(result.values, vec![Value::Int(6)]);

    for summary in &result.report.nodes {
        assert_eq!(summary.exit, NodeExit::Completed, "{}", summary.node);
    }
    assert_eq!(result.report.nodes[0].sent, 5);
    assert_eq!(result.report.nodes[1].sent, 2);
    assert_eq!(result.report.nodes[2].sent, 1);
}

#[tokio::test]
async fn test_filter_rejecting_everything_is_success() {
    let result = run_collecting(
        vec![
            one_to_five().into(),
            OperatorSpec::select(Expr::gt(Expr::arg(0), Expr::lit(100))).into(),
        ],
        EngineConfig::default(),
    )
    .await;

    assert_success(&result);
    assert!(result.values.is_empty());
}

#[tokio::test]
async fn test_order_is_preserved_across_stages() {
    let result = run_collecting(
        vec![
            OperatorSpec::gen(500).into(),
            OperatorSpec::map(Callable::registered("double")).into(),
        ],
        EngineConfig::default().with_buffer_capacity(4),
    )
    .await;

    assert_success(&result);
    let expected: Vec<i64> = (0..500).map(|n| n * 2).collect();
    assert_eq!(result.values, ints(&expected));
}

#[tokio::test]
async fn test_transform_in_first_position_sees_empty_input() {
    let result = run_collecting(
        vec![OperatorSpec::map(Callable::registered("double")).into()],
        EngineConfig::default(),
    )
    .await;

    assert_success(&result);
    assert!(result.values.is_empty());
}
