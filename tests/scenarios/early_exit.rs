//! Test: a downstream that stops early releases everything upstream

use crate::helpers::*;
use pipeshell::core::stream::DEFAULT_CAPACITY;
use pipeshell::core::state::NodeExit;
use pipeshell::core::template::OperatorSpec;
use pipeshell::EngineConfig;
use std::time::Duration;

#[tokio::test]
async fn test_head_stops_large_source() {
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        run_collecting(
            vec![OperatorSpec::gen(10_000_000).into(), OperatorSpec::head(3).into()],
            EngineConfig::default(),
        ),
    )
    .await
    .expect("head should end the run early");

    assert_success(&result);
    assert_eq!(result.values, ints(&[0, 1, 2]));

    let source = result.report.node(0).unwrap();
    assert_eq!(source.exit, NodeExit::StoppedEarly);
    assert!(source.sent <= 3 + DEFAULT_CAPACITY + 1, "source sent {}", source.sent);
}

#[tokio::test]
async fn test_head_zero_emits_nothing() {
    let result = run_collecting(
        vec![OperatorSpec::gen(5).into(), OperatorSpec::head(0).into()],
        EngineConfig::default(),
    )
    .await;

    assert_success(&result);
    assert!(result.values.is_empty());
}

#[tokio::test]
async fn test_tail_keeps_last_values() {
    let result = run_collecting(
        vec![
            OperatorSpec::gen(10).into(),
            OperatorSpec::Tail {
                count: pipeshell::core::template::Arg::lit(2),
            }
            .into(),
        ],
        EngineConfig::default(),
    )
    .await;

    assert_success(&result);
    assert_eq!(result.values, ints(&[8, 9]));
}

#[tokio::test]
async fn test_head_stops_source_between_ticks() {
    let timer = OperatorSpec::Timer {
        interval: pipeshell::core::template::Arg::lit("0:20"),
        limit: None,
        components: false,
    };
    let result = tokio::time::timeout(
        Duration::from_secs(4),
        run_collecting(
            vec![timer.into(), OperatorSpec::head(1).into()],
            EngineConfig::default(),
        ),
    )
    .await
    .expect("head should not wait for the next tick");

    assert_success(&result);
    assert_eq!(result.values.len(), 1);
    assert_eq!(result.report.node(0).unwrap().exit, NodeExit::StoppedEarly);
}

#[cfg(unix)]
#[tokio::test]
async fn test_head_stops_quiet_program() {
    let program = pipeshell::ProcessSpec::new("sh").args(["-c", "echo a; sleep 20; echo b"]);
    let result = tokio::time::timeout(
        Duration::from_secs(4),
        run_collecting(
            vec![program.into(), OperatorSpec::head(1).into()],
            EngineConfig::default(),
        ),
    )
    .await
    .expect("head should not wait for the program's next line");

    assert_success(&result);
    assert_eq!(result.values, strs(&["a"]));
    assert_eq!(result.report.node(0).unwrap().exit, NodeExit::StoppedEarly);
}
