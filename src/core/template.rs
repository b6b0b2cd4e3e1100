//! Pipeline templates and node specifications
//!
//! A template is an ordered list of node specifications plus the names of
//! its free parameters. It holds no live streams or operator state: every
//! invocation binds its arguments and builds a fresh graph.

use crate::core::callable::{Callable, Expr};
use crate::core::env::{Environment, Scoped};
use crate::core::error::{NodeRef, PipelineError};
use crate::core::value::Value;
use crate::operators::sinks::Collector;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// An operator argument: a literal, or a variable resolved when the graph is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    Var { var: String },
    Value(Value),
}

impl Arg {
    pub fn lit(value: impl Into<Value>) -> Self {
        Arg::Value(value.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Arg::Var { var: name.into() }
    }

    pub fn resolve(&self, env: &dyn Environment) -> Result<Value, String> {
        match self {
            Arg::Value(value) => Ok(value.clone()),
            Arg::Var { var } => env
                .resolve(var)
                .ok_or_else(|| format!("variable '{}' is not defined", var)),
        }
    }

    /// Resolve to a non-negative count
    pub fn resolve_count(&self, env: &dyn Environment, what: &str) -> Result<usize, String> {
        let value = self.resolve(env)?;
        match value.as_int() {
            Some(n) if n >= 0 => Ok(n as usize),
            _ => Err(format!("{} must be a non-negative integer, got {}", what, value)),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

/// Where an operator may sit in a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Generates values; must be first
    Source,
    /// Consumes and produces values
    Transform,
    /// Consumes values for a side effect; must be last
    Sink,
}

/// How far `ls` descends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LsDepth {
    /// Only the named paths
    Entries,
    /// The named paths and the contents of named directories
    #[default]
    Children,
    /// Everything below the named paths
    Recursive,
}

/// One reduction slot of `red`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ReducerArg", into = "ReducerArg")]
pub enum Reducer {
    /// Field is part of the grouping key (`.`)
    Group,
    /// Field is reduced with this binary function
    Function(Callable),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ReducerArg {
    Symbol(String),
    Callable(Callable),
}

impl From<ReducerArg> for Reducer {
    fn from(arg: ReducerArg) -> Self {
        match arg {
            ReducerArg::Symbol(s) if s == "." => Reducer::Group,
            ReducerArg::Symbol(s) => Reducer::Function(Callable::Builtin(s)),
            ReducerArg::Callable(c) => Reducer::Function(c),
        }
    }
}

impl From<Reducer> for ReducerArg {
    fn from(reducer: Reducer) -> Self {
        match reducer {
            Reducer::Group => ReducerArg::Symbol(".".to_string()),
            Reducer::Function(Callable::Builtin(name)) => ReducerArg::Symbol(name),
            Reducer::Function(other) => ReducerArg::Callable(other),
        }
    }
}

/// Specification of a native operator node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperatorSpec {
    /// Integers `start .. start + count`
    Gen {
        count: Arg,
        #[serde(default)]
        start: Option<Arg>,
    },
    /// Filesystem entries
    Ls {
        #[serde(default)]
        paths: Vec<Arg>,
        #[serde(default)]
        depth: LsDepth,
        #[serde(default)]
        file: bool,
        #[serde(default)]
        dir: bool,
        #[serde(default)]
        symlink: bool,
    },
    /// Lines of a text file
    Read { path: Arg },
    /// Timestamps separated by an `[[HH:]MM:]SS` interval
    Timer {
        interval: Arg,
        #[serde(default)]
        limit: Option<Arg>,
        #[serde(default)]
        components: bool,
    },
    /// A single value computed from an expression
    Project { expr: Expr },
    Map { function: Callable },
    Select { predicate: Callable },
    Red {
        functions: Vec<Reducer>,
        #[serde(default)]
        incremental: bool,
    },
    Head { count: Arg },
    Tail { count: Arg },
    Sort {
        #[serde(default)]
        key: Option<Callable>,
        #[serde(default)]
        reverse: bool,
    },
    Unique,
    Expand {
        #[serde(default)]
        position: Option<usize>,
    },
    Label { value: Arg },
    Write {
        #[serde(default)]
        json: bool,
    },
    #[serde(skip)]
    Collect { sink: Collector },
}

impl OperatorSpec {
    pub fn name(&self) -> &'static str {
        match self {
            OperatorSpec::Gen { .. } => "gen",
            OperatorSpec::Ls { .. } => "ls",
            OperatorSpec::Read { .. } => "read",
            OperatorSpec::Timer { .. } => "timer",
            OperatorSpec::Project { .. } => "project",
            OperatorSpec::Map { .. } => "map",
            OperatorSpec::Select { .. } => "select",
            OperatorSpec::Red { .. } => "red",
            OperatorSpec::Head { .. } => "head",
            OperatorSpec::Tail { .. } => "tail",
            OperatorSpec::Sort { .. } => "sort",
            OperatorSpec::Unique => "unique",
            OperatorSpec::Expand { .. } => "expand",
            OperatorSpec::Label { .. } => "label",
            OperatorSpec::Write { .. } => "write",
            OperatorSpec::Collect { .. } => "collect",
        }
    }

    pub fn role(&self) -> Role {
        match self {
            OperatorSpec::Gen { .. }
            | OperatorSpec::Ls { .. }
            | OperatorSpec::Read { .. }
            | OperatorSpec::Timer { .. }
            | OperatorSpec::Project { .. } => Role::Source,
            OperatorSpec::Write { .. } | OperatorSpec::Collect { .. } => Role::Sink,
            _ => Role::Transform,
        }
    }

    pub fn gen(count: i64) -> Self {
        OperatorSpec::Gen {
            count: Arg::lit(count),
            start: None,
        }
    }

    pub fn map(function: impl Into<Callable>) -> Self {
        OperatorSpec::Map {
            function: function.into(),
        }
    }

    pub fn select(predicate: impl Into<Callable>) -> Self {
        OperatorSpec::Select {
            predicate: predicate.into(),
        }
    }

    pub fn red(functions: Vec<Reducer>) -> Self {
        OperatorSpec::Red {
            functions,
            incremental: false,
        }
    }

    pub fn head(count: i64) -> Self {
        OperatorSpec::Head {
            count: Arg::lit(count),
        }
    }

    pub fn collect(sink: &Collector) -> Self {
        OperatorSpec::Collect { sink: sink.clone() }
    }
}

/// Specification of an external program node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessSpec {
    #[serde(rename = "exec")]
    pub program: Arg,
    #[serde(default)]
    pub args: Vec<Arg>,
    /// Joins record fields when writing a record to the program
    #[serde(default)]
    pub separator: Option<String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: Arg::lit(program.into()),
            args: Vec::new(),
            separator: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(Arg::lit(arg));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Value>,
    {
        self.args.extend(args.into_iter().map(Arg::lit));
        self
    }

    /// Program name for attribution before arguments are resolved
    pub fn display_name(&self) -> String {
        match &self.program {
            Arg::Value(v) => v.to_text(),
            Arg::Var { var } => format!("${}", var),
        }
    }
}

/// A node of a pipeline: native operator or external program
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeSpec {
    Process(ProcessSpec),
    Operator(OperatorSpec),
}

impl NodeSpec {
    pub fn name(&self) -> String {
        match self {
            NodeSpec::Operator(op) => op.name().to_string(),
            NodeSpec::Process(process) => process.display_name(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            NodeSpec::Operator(op) => op.role(),
            NodeSpec::Process(_) => Role::Transform,
        }
    }
}

impl From<OperatorSpec> for NodeSpec {
    fn from(spec: OperatorSpec) -> Self {
        NodeSpec::Operator(spec)
    }
}

impl From<ProcessSpec> for NodeSpec {
    fn from(spec: ProcessSpec) -> Self {
        NodeSpec::Process(spec)
    }
}

/// A named pipeline definition, instantiated afresh on every invocation
#[derive(Debug, Clone)]
pub struct PipelineTemplate {
    pub name: String,
    pub description: Option<String>,
    pub params: Vec<String>,
    pub nodes: Vec<NodeSpec>,
}

impl PipelineTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            params: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// A pipeline made of a single bare expression: one implicit `project` node
    pub fn expression(name: impl Into<String>, expr: Expr) -> Self {
        Self::new(name).then(OperatorSpec::Project { expr })
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(name.into());
        self
    }

    pub fn then(mut self, node: impl Into<NodeSpec>) -> Self {
        self.nodes.push(node.into());
        self
    }

    /// Check the structural rules a graph needs before it can be built
    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_nodes(&self.nodes)?;

        let mut seen = HashSet::new();
        for param in &self.params {
            if !seen.insert(param) {
                return Err(PipelineError::Template(format!(
                    "template '{}' declares parameter '{}' twice",
                    self.name, param
                )));
            }
        }
        Ok(())
    }

    /// Bind positional arguments to the template's parameters
    pub fn bind(
        &self,
        parent: Arc<dyn Environment>,
        args: Vec<Value>,
    ) -> Result<Arc<dyn Environment>, PipelineError> {
        if args.len() != self.params.len() {
            return Err(PipelineError::Template(format!(
                "template '{}' expects {} argument(s) ({}), got {}",
                self.name,
                self.params.len(),
                self.params.join(", "),
                args.len()
            )));
        }
        if self.params.is_empty() {
            return Ok(parent);
        }

        let locals: HashMap<String, Value> = self.params.iter().cloned().zip(args).collect();
        Ok(Arc::new(Scoped::new(parent, locals)))
    }
}

/// Linear-chain rules: non-empty, sources first, sinks last
///
/// A misplaced stage is a construction error attributed to that stage.
pub fn validate_nodes(nodes: &[NodeSpec]) -> Result<(), PipelineError> {
    if nodes.is_empty() {
        return Err(PipelineError::Template("pipeline has no stages".to_string()));
    }

    let last = nodes.len() - 1;
    for (index, node) in nodes.iter().enumerate() {
        match node.role() {
            Role::Source if index != 0 => {
                return Err(PipelineError::Construction {
                    node: NodeRef::new(index, node.name()),
                    reason: "a source cannot receive input from a pipe".to_string(),
                });
            }
            Role::Sink if index != last => {
                return Err(PipelineError::Construction {
                    node: NodeRef::new(index, node.name()),
                    reason: "a sink must be the last stage".to_string(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}
