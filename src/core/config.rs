//! Engine and pipeline configuration
//!
//! [`EngineConfig`] holds the runtime knobs of the engine. [`PipelineFile`]
//! is the YAML format the CLI loads: engine settings, global variables and
//! a set of named pipeline templates.

use crate::core::callable::Expr;
use crate::core::env::Bindings;
use crate::core::stream::DEFAULT_CAPACITY;
use crate::core::template::{validate_nodes, NodeSpec, PipelineTemplate};
use crate::core::value::Value;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cap on captured stderr per process node
pub const DEFAULT_STDERR_LIMIT: usize = 64 * 1024;

/// Default time a process gets between the terminate signal and a hard kill
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

/// Runtime configuration of the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Values a stream buffers before its producer suspends
    pub buffer_capacity: usize,
    /// Bytes of stderr kept per process node; the rest is dropped
    pub stderr_limit: usize,
    pub kill_grace: Duration,
    /// Cancel runs that take longer than this
    pub timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            stderr_limit: DEFAULT_STDERR_LIMIT,
            kill_grace: DEFAULT_KILL_GRACE,
            timeout: None,
        }
    }
}

impl EngineConfig {
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_stderr_limit(mut self, limit: usize) -> Self {
        self.stderr_limit = limit;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The `engine:` section of a pipeline file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub buffer_capacity: Option<usize>,
    #[serde(default)]
    pub stderr_limit: Option<usize>,
    #[serde(default)]
    pub kill_grace_ms: Option<u64>,
    /// Default run timeout (in seconds)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl EngineSettings {
    pub fn to_engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            buffer_capacity: self.buffer_capacity.unwrap_or(defaults.buffer_capacity),
            stderr_limit: self.stderr_limit.unwrap_or(defaults.stderr_limit),
            kill_grace: self
                .kill_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.kill_grace),
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Variable definition: a plain value or a file path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableDefinition {
    /// Path bound as a string, optionally checked at load time
    File {
        path: PathBuf,
        #[serde(default)]
        validate_exists: bool,
    },
    Value(Value),
}

impl VariableDefinition {
    pub fn to_value(&self) -> Value {
        match self {
            VariableDefinition::File { path, .. } => Value::Str(path.display().to_string()),
            VariableDefinition::Value(value) => value.clone(),
        }
    }
}

/// A named pipeline as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default)]
    pub description: Option<String>,

    /// Positional parameter names
    #[serde(default)]
    pub params: Vec<String>,

    /// Pipeline stages, first to last
    #[serde(default)]
    pub stages: Vec<NodeSpec>,

    /// Bare expression; shorthand for a single `project` stage
    #[serde(default)]
    pub expr: Option<Expr>,
}

/// Top-level pipeline file loaded from YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineFile {
    #[serde(default)]
    pub engine: EngineSettings,

    /// Global variables visible to every template
    #[serde(default)]
    pub variables: BTreeMap<String, VariableDefinition>,

    #[serde(default)]
    pub templates: BTreeMap<String, TemplateConfig>,
}

impl PipelineFile {
    /// Load a pipeline file from disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse a pipeline file from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: PipelineFile = serde_yaml::from_str(yaml)?;
        file.validate()?;
        Ok(file)
    }

    /// Default location: `<config dir>/pipeshell/pipelines.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pipeshell").join("pipelines.yaml"))
    }

    /// Validate the engine settings, variables and every template
    pub fn validate(&self) -> Result<()> {
        if self.engine.buffer_capacity == Some(0) {
            anyhow::bail!("engine.buffer_capacity must be greater than zero");
        }

        for (name, definition) in &self.variables {
            if let VariableDefinition::File {
                path,
                validate_exists: true,
            } = definition
            {
                if !path.exists() {
                    anyhow::bail!(
                        "Variable '{}' references file that doesn't exist: {}",
                        name,
                        path.display()
                    );
                }
            }
        }

        for (name, config) in &self.templates {
            let mut seen = HashSet::new();
            for param in &config.params {
                if !seen.insert(param) {
                    anyhow::bail!("Template '{}' declares parameter '{}' twice", name, param);
                }
            }

            match (&config.expr, config.stages.is_empty()) {
                (Some(_), false) => {
                    anyhow::bail!("Template '{}' has both 'expr' and 'stages'", name)
                }
                (None, true) => anyhow::bail!("Template '{}' has no stages", name),
                (None, false) => validate_nodes(&config.stages)
                    .with_context(|| format!("Invalid template '{}'", name))?,
                (Some(_), true) => {}
            }
        }

        Ok(())
    }

    pub fn template_names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    /// Build the named template
    pub fn template(&self, name: &str) -> Result<PipelineTemplate> {
        let config = self.templates.get(name).with_context(|| {
            format!(
                "No template named '{}' (available: {})",
                name,
                self.template_names().join(", ")
            )
        })?;

        let mut template = match &config.expr {
            Some(expr) => PipelineTemplate::expression(name, expr.clone()),
            None => config
                .stages
                .iter()
                .cloned()
                .fold(PipelineTemplate::new(name), |template, node| template.then(node)),
        };
        template.params = config.params.clone();
        template.description = config.description.clone();
        Ok(template)
    }

    /// Global variables as an environment
    pub fn bindings(&self) -> Bindings {
        self.variables
            .iter()
            .fold(Bindings::new(), |bindings, (name, definition)| {
                bindings.with_var(name.clone(), definition.to_value())
            })
    }

    pub fn engine_config(&self) -> EngineConfig {
        self.engine.to_engine_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::env::Environment;
    use crate::core::template::{NodeSpec, OperatorSpec, Role};

    const SAMPLE: &str = r#"
engine:
  buffer_capacity: 16
  timeout_secs: 30
variables:
  greeting: hello
  limit: 3
templates:
  evens:
    description: Even numbers below n, summed
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
  answer:
    expr: {mul: [{lit: 6}, {lit: 7}]}
"#;

    #[test]
    fn test_parse_pipeline_file() {
        let file = PipelineFile::from_yaml(SAMPLE).unwrap();
        assert_eq!(file.template_names(), vec!["answer", "evens", "shout"]);

        let config = file.engine_config();
        assert_eq!(config.buffer_capacity, 16);
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.stderr_limit, DEFAULT_STDERR_LIMIT);

        let evens = file.template("evens").unwrap();
        assert_eq!(evens.params, vec!["n".to_string()]);
        assert_eq!(evens.nodes.len(), 3);
        assert_eq!(evens.nodes[0].role(), Role::Source);

        let shout = file.template("shout").unwrap();
        assert!(matches!(shout.nodes[1], NodeSpec::Process(_)));
    }

    #[test]
    fn test_expression_template_is_single_project() {
        let file = PipelineFile::from_yaml(SAMPLE).unwrap();
        let answer = file.template("answer").unwrap();
        assert_eq!(answer.nodes.len(), 1);
        assert!(matches!(
            answer.nodes[0],
            NodeSpec::Operator(OperatorSpec::Project { .. })
        ));
    }

    #[test]
    fn test_bindings_from_variables() {
        let file = PipelineFile::from_yaml(SAMPLE).unwrap();
        let env = file.bindings();
        assert_eq!(env.resolve("greeting"), Some(Value::str("hello")));
        assert_eq!(env.resolve("limit"), Some(Value::Int(3)));
    }

    #[test]
    fn test_unknown_template() {
        let file = PipelineFile::from_yaml(SAMPLE).unwrap();
        let err = file.template("nope").unwrap_err().to_string();
        assert!(err.contains("No template named 'nope'"));
    }

    #[test]
    fn test_source_in_middle_rejected() {
        let yaml = r#"
templates:
  bad:
    stages:
      - op: gen
        count: 3
      - op: ls
"#;
        assert!(PipelineFile::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_duplicate_params_rejected() {
        let yaml = r#"
templates:
  bad:
    params: [a, a]
    expr: {arg: 0}
"#;
        let err = PipelineFile::from_yaml(yaml).unwrap_err().to_string();
        assert!(err.contains("twice"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let yaml = r#"
engine:
  buffer_capacity: 0
"#;
        assert!(PipelineFile::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_missing_file_variable() {
        let yaml = r#"
variables:
  input:
    path: /definitely/not/here.txt
    validate_exists: true
"#;
        let err = PipelineFile::from_yaml(yaml).unwrap_err().to_string();
        assert!(err.contains("doesn't exist"));
    }

    #[test]
    fn test_file_variable_binds_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        std::fs::write(&path, "x\n").unwrap();
        let yaml = format!(
            "variables:\n  input:\n    path: {}\n    validate_exists: true\n",
            path.display()
        );

        let file = PipelineFile::from_yaml(&yaml).unwrap();
        assert_eq!(
            file.bindings().resolve("input"),
            Some(Value::Str(path.display().to_string()))
        );
    }
}
