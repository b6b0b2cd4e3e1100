//! Run state models

use crate::core::error::{NodeRef, PipelineError};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lifecycle of a node inside one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Operator instantiated, resources not yet acquired
    Created,
    /// Resources acquired (process spawned, files opened)
    Open,
    /// Consuming and producing values
    Running,
    /// Output stream terminated and resources released
    Closed,
}

impl NodeState {
    /// True when a node may move from this state straight to `next`
    ///
    /// A node that never runs goes from `Created` or `Open` straight to
    /// `Closed`.
    pub fn can_advance_to(self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Created, Open) | (Open, Running) | (Running, Closed) | (Created, Closed) | (Open, Closed)
        )
    }
}

/// How a node's run ended
#[derive(Debug, Clone, PartialEq)]
pub enum NodeExit {
    /// Input exhausted (or generation finished) and output closed normally
    Completed,
    /// Stopped because it had enough input, or its consumer went away
    StoppedEarly,
    /// Raised an error of its own
    Failed(PipelineError),
    /// Forwarded an error raised upstream
    UpstreamFailed(PipelineError),
    /// Unblocked by cancellation
    Cancelled,
}

impl NodeExit {
    /// True when this node is the origin of a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, NodeExit::Failed(_))
    }
}

/// Per-node result of a run
#[derive(Debug, Clone)]
pub struct NodeSummary {
    pub node: NodeRef,
    pub exit: NodeExit,
    /// State the node was left in; `Closed` once its resources are released
    pub state: NodeState,
    /// Values written to the node's output stream
    pub sent: usize,
}

/// Final status of a graph run
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Every node finished; `emitted` values left the last node
    Success { emitted: usize },
    /// The run failed; `error` is the first failure, `secondary` the rest
    Failure {
        error: PipelineError,
        secondary: Vec<PipelineError>,
    },
    /// The run was cancelled before it finished
    Cancelled { secondary: Vec<PipelineError> },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            Outcome::Failure { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Label used in logs and terminal output
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::Failure { .. } => "failure",
            Outcome::Cancelled { .. } => "cancelled",
        }
    }
}

/// Everything known about a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Unique run ID
    pub run_id: Uuid,
    pub outcome: Outcome,
    pub nodes: Vec<NodeSummary>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Convert the report into a result carrying the primary failure
    pub fn into_result(self) -> Result<RunReport, PipelineError> {
        match &self.outcome {
            Outcome::Failure { error, .. } => Err(error.clone()),
            Outcome::Cancelled { .. } => Err(PipelineError::Cancelled),
            Outcome::Success { .. } => Ok(self),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn node(&self, index: usize) -> Option<&NodeSummary> {
        self.nodes.iter().find(|summary| summary.node.index == index)
    }
}
