//! Test: templates loaded from a YAML pipeline file

use crate::helpers::*;
use pipeshell::{Engine, PipelineFile, Value};
use std::time::Duration;
use tempfile::tempdir;

const PIPELINES: &str = r#"
engine:
  buffer_capacity: 8
  timeout_secs: 20
variables:
  greeting: hello
templates:
  evens:
    description: Sum of the even numbers below n
    params: [n]
    stages:
      - op: gen
        count: {var: n}
      - op: select
        predicate:
          expression:
            eq: [{rem: [{arg: 0}, {lit: 2}]}, {lit: 0}]
      - op: red
        functions: ["+"]
  shout:
    stages:
      - op: project
        expr: {var: greeting}
      - exec: tr
        args: [a-z, A-Z]
  first_three:
    stages:
      - op: gen
        count: 100
      - op: head
        count: 3
  broken:
    stages:
      - op: head
        count: 1
      - op: gen
        count: 3
"#;

async fn run_template(file: &PipelineFile, name: &str, args: Vec<Value>) -> Vec<Value> {
    let engine = Engine::new(file.bindings().into_shared()).with_config(file.engine_config());
    let template = file.template(name).unwrap();
    engine
        .invoke(&template, args)
        .await
        .unwrap()
        .collect()
        .await
        .unwrap()
}

#[test]
fn test_misplaced_source_rejected_by_validation() {
    let err = PipelineFile::from_yaml(PIPELINES).unwrap_err();
    assert!(format!("{:#}", err).contains("broken"));
}

#[tokio::test]
async fn test_templates_from_file() {
    let yaml = PIPELINES.split("  broken:").next().unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("pipelines.yaml");
    std::fs::write(&path, yaml).unwrap();

    let file = PipelineFile::from_file(&path).unwrap();
    assert_eq!(file.engine_config().buffer_capacity, 8);
    assert_eq!(file.engine_config().timeout, Some(Duration::from_secs(20)));

    assert_eq!(run_template(&file, "evens", vec![Value::Int(10)]).await, ints(&[20]));
    assert_eq!(run_template(&file, "first_three", vec![]).await, ints(&[0, 1, 2]));

    if cfg!(unix) {
        assert_eq!(run_template(&file, "shout", vec![]).await, strs(&["HELLO"]));
    }
}
