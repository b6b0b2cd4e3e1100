//! Error taxonomy for pipeline construction and execution

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifies one node of a graph: its position and operator/program name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub index: usize,
    pub name: String,
}

impl NodeRef {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node #{} ({})", self.index, self.name)
    }
}

/// Errors reported for a pipeline run
///
/// Every variant except `Cancelled`, `Template` and `Aborted` is attributed
/// to the node that raised it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// A node could not be opened; the graph never started running
    #[error("cannot open {node}: {reason}")]
    Construction { node: NodeRef, reason: String },

    /// An operator's transform raised while running
    #[error("{node} failed: {message}")]
    Transform { node: NodeRef, message: String },

    /// An external program exited with a non-zero status
    #[error("{node} exited with code {code}{}", stderr_suffix(.stderr))]
    ProcessExit {
        node: NodeRef,
        code: i32,
        stderr: String,
    },

    /// A node broke the stream contract (e.g. sent after closing)
    #[error("stream protocol violation at {node}: {detail}")]
    StreamProtocol { node: NodeRef, detail: String },

    /// The run was cancelled before it completed naturally
    #[error("pipeline cancelled")]
    Cancelled,

    /// The pipeline description itself is unusable (empty, bad arity, ...)
    #[error("invalid pipeline: {0}")]
    Template(String),

    /// The runner itself died before producing an outcome
    #[error("run aborted: {0}")]
    Aborted(String),
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

impl PipelineError {
    /// The node this error is attributed to, if any
    pub fn node(&self) -> Option<&NodeRef> {
        match self {
            PipelineError::Construction { node, .. }
            | PipelineError::Transform { node, .. }
            | PipelineError::ProcessExit { node, .. }
            | PipelineError::StreamProtocol { node, .. } => Some(node),
            PipelineError::Cancelled | PipelineError::Template(_) | PipelineError::Aborted(_) => {
                None
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            PipelineError::Construction { .. } | PipelineError::Template(_)
        )
    }
}

/// Errors raised while evaluating a callable
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("name not found: {0}")]
    NotFound(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("argument {index} out of range ({len} given)")]
    MissingArgument { index: usize, len: usize },

    #[error("{operation} not supported for {left} and {right}")]
    TypeMismatch {
        operation: String,
        left: String,
        right: String,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in {0}")]
    Overflow(String),

    #[error("{0}")]
    Failed(String),
}

/// Errors raised by an operator during open or while running
///
/// Drivers attribute these to a node: failures in `open` become
/// [`PipelineError::Construction`], the rest [`PipelineError::Transform`].
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Invalid(String),
}

impl OperatorError {
    pub fn invalid(message: impl Into<String>) -> Self {
        OperatorError::Invalid(message.into())
    }
}
