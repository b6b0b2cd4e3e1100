//! Test: external programs as pipeline stages
#![cfg(unix)]

use crate::helpers::*;
use pipeshell::core::state::NodeExit;
use pipeshell::core::template::{Arg, OperatorSpec, ProcessSpec};
use pipeshell::{EngineConfig, PipelineError, Value};
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn test_lines_through_uppercase_filter() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("input.txt");
    std::fs::write(&path, "alpha\nbeta\ngamma\n").unwrap();

    let result = run_collecting(
        vec![
            OperatorSpec::Read {
                path: Arg::lit(path.to_string_lossy().to_string()),
            }
            .into(),
            ProcessSpec::new("tr").args(["a-z", "A-Z"]).into(),
        ],
        EngineConfig::default(),
    )
    .await;

    assert_success(&result);
    assert_eq!(result.values, strs(&["ALPHA", "BETA", "GAMMA"]));
}

#[tokio::test]
async fn test_numbers_survive_a_process_hop() {
    let result = run_collecting(
        vec![OperatorSpec::gen(4).into(), ProcessSpec::new("cat").into()],
        EngineConfig::default(),
    )
    .await;

    assert_success(&result);
    assert_eq!(result.values, ints(&[0, 1, 2, 3]));
}

#[tokio::test]
async fn test_missing_program_fails_construction() {
    let engine = test_engine(EngineConfig::default());
    let specs = vec![
        OperatorSpec::gen(3).into(),
        ProcessSpec::new("pipeshell-no-such-program").into(),
    ];

    match engine.build_graph(&specs).await {
        Err(PipelineError::Construction { node, reason }) => {
            assert_eq!(node.index, 1);
            assert!(reason.contains("pipeshell-no-such-program"));
        }
        Err(other) => panic!("expected construction error, got {}", other),
        Ok(_) => panic!("graph should not open"),
    }
}

#[tokio::test]
async fn test_non_zero_exit_carries_code_and_stderr() {
    let result = run_collecting(
        vec![
            OperatorSpec::gen(3).into(),
            ProcessSpec::new("sh")
                .args(["-c", "cat >/dev/null; echo broken >&2; exit 3"])
                .into(),
        ],
        EngineConfig::default(),
    )
    .await;

    assert_failed_at(&result, 1);
    match result.report.outcome.error() {
        Some(PipelineError::ProcessExit { code, stderr, .. }) => {
            assert_eq!(*code, 3);
            assert!(stderr.contains("broken"));
        }
        other => panic!("expected process exit error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_endless_program_stopped_by_head() {
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        run_collecting(
            vec![ProcessSpec::new("yes").into(), OperatorSpec::head(2).into()],
            EngineConfig::default(),
        ),
    )
    .await
    .expect("yes should be terminated once head is satisfied");

    assert_success(&result);
    assert_eq!(result.values, vec![Value::str("y"), Value::str("y")]);
    assert_eq!(result.report.node(0).unwrap().exit, NodeExit::StoppedEarly);
}

#[tokio::test]
async fn test_program_arguments_from_variables() {
    let result = run_collecting(
        vec![ProcessSpec {
            program: Arg::lit("echo"),
            args: vec![Arg::var("greeting")],
            separator: None,
        }
        .into()],
        EngineConfig::default(),
    )
    .await;

    assert_success(&result);
    assert_eq!(result.values, strs(&["hello"]));
}
