//! Test: templates are re-instantiated on every invocation

use crate::helpers::*;
use pipeshell::core::callable::{Callable, Expr};
use pipeshell::core::template::{Arg, OperatorSpec, Reducer};
use pipeshell::{EngineConfig, PipelineError, PipelineTemplate, Value};

fn sum_below() -> PipelineTemplate {
    PipelineTemplate::new("sum_below")
        .param("n")
        .then(OperatorSpec::Gen {
            count: Arg::var("n"),
            start: None,
        })
        .then(OperatorSpec::red(vec![Reducer::Function(Callable::builtin("+"))]))
}

#[tokio::test]
async fn test_invocations_are_independent() {
    let engine = test_engine(EngineConfig::default());
    let template = sum_below();

    let (small, large) = tokio::join!(
        async {
            engine
                .invoke(&template, vec![Value::Int(4)])
                .await
                .unwrap()
                .collect()
                .await
        },
        async {
            engine
                .invoke(&template, vec![Value::Int(10)])
                .await
                .unwrap()
                .collect()
                .await
        },
    );

    assert_eq!(small.unwrap(), ints(&[6]));
    assert_eq!(large.unwrap(), ints(&[45]));

    // Still reusable afterwards
    let again = engine
        .invoke(&template, vec![Value::Int(4)])
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(again, ints(&[6]));
}

#[tokio::test]
async fn test_wrong_arity_is_template_error() {
    let engine = test_engine(EngineConfig::default());
    let result = engine.invoke(&sum_below(), vec![]).await;
    assert!(matches!(result, Err(PipelineError::Template(_))));
}

#[tokio::test]
async fn test_expression_template() {
    let engine = test_engine(EngineConfig::default());
    let template = PipelineTemplate::expression("answer", Expr::mul(Expr::lit(6), Expr::lit(7)));
    let values = engine
        .invoke(&template, vec![])
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(values, ints(&[42]));
}

#[tokio::test]
async fn test_collect_returns_primary_error() {
    let engine = test_engine(EngineConfig::default());
    let template = PipelineTemplate::new("bad")
        .then(OperatorSpec::gen(3))
        .then(OperatorSpec::map(Callable::registered("fail_on_one")));

    let err = engine
        .invoke(&template, vec![])
        .await
        .unwrap()
        .collect()
        .await
        .unwrap_err();
    assert_eq!(err.node().map(|n| n.index), Some(1));
}
