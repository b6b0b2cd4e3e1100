//! Test utility functions for pipeshell

#![allow(dead_code)]

use pipeshell::core::error::EvaluationError;
use pipeshell::core::state::{NodeExit, Outcome, RunReport};
use pipeshell::core::template::{NodeSpec, OperatorSpec};
use pipeshell::{Bindings, Collector, EngineConfig, Engine, Value};

/// Default bindings plus a few native functions scenarios rely on
pub fn test_bindings() -> Bindings {
    Bindings::new()
        .with_var("greeting", "hello")
        .with_function("fail_on_one", |args: &[Value]| match args.first() {
            Some(Value::Int(1)) => Err(EvaluationError::Failed("refusing value 1".into())),
            Some(value) => Ok(value.clone()),
            None => Ok(Value::Null),
        })
        .with_function("double", |args: &[Value]| match args.first() {
            Some(Value::Int(n)) => Ok(Value::Int(n * 2)),
            other => Err(EvaluationError::Failed(format!("cannot double {:?}", other))),
        })
}

pub fn test_engine(config: EngineConfig) -> Engine {
    Engine::new(test_bindings().into_shared()).with_config(config)
}

/// Outcome plus everything the trailing collect sink saw
pub struct PipelineTestResult {
    pub report: RunReport,
    pub values: Vec<Value>,
}

/// Append a collect sink, build the graph and run it to completion
pub async fn run_collecting(specs: Vec<NodeSpec>, config: EngineConfig) -> PipelineTestResult {
    let collector = Collector::new();
    let mut specs = specs;
    specs.push(OperatorSpec::collect(&collector).into());

    let engine = test_engine(config);
    let graph = engine
        .build_graph(&specs)
        .await
        .expect("graph should open");
    let report = engine.run(graph).await;

    PipelineTestResult {
        report,
        values: collector.take(),
    }
}

pub fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| Value::Int(*v)).collect()
}

pub fn strs(values: &[&str]) -> Vec<Value> {
    values.iter().map(|v| Value::str(*v)).collect()
}

pub fn assert_success(result: &PipelineTestResult) {
    assert!(
        result.report.outcome.is_success(),
        "expected success, got {:?}",
        result.report.outcome
    );
}

/// Assert the run failed and the primary error names node `index`
pub fn assert_failed_at(result: &PipelineTestResult, index: usize) {
    match &result.report.outcome {
        Outcome::Failure { error, .. } => {
            assert_eq!(
                error.node().map(|n| n.index),
                Some(index),
                "failure attributed to the wrong node: {}",
                error
            );
        }
        other => panic!("expected failure at node {}, got {:?}", index, other),
    }
}

pub fn assert_cancelled(result: &PipelineTestResult) {
    assert!(
        matches!(result.report.outcome, Outcome::Cancelled { .. }),
        "expected cancellation, got {:?}",
        result.report.outcome
    );
}

/// Every node reached a terminal state and none failed on its own account
pub fn assert_no_node_failed(report: &RunReport) {
    for summary in &report.nodes {
        assert!(
            !matches!(summary.exit, NodeExit::Failed(_)),
            "{} failed: {:?}",
            summary.node,
            summary.exit
        );
    }
}
