//! Graph nodes and the operator driver
//!
//! A [`Node`] is either a native operator or an external program. Both
//! variants are created, opened, then run with one input and one output
//! stream; the scheduler never needs to know which is which.

use crate::core::config::EngineConfig;
use crate::core::env::Environment;
use crate::core::error::{NodeRef, OperatorError, PipelineError};
use crate::core::state::{NodeExit, NodeState, NodeSummary};
use crate::core::stream::{StreamError, StreamReceiver, StreamSender};
use crate::core::template::{NodeSpec, Role};
use crate::operators::{self, Emitter, Flow, Operator};
use crate::process::{ProcessCommand, ProcessNode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

enum Body {
    Operator(Box<dyn Operator>),
    /// Resolved but not spawned
    Command(ProcessCommand),
    Process(ProcessNode),
}

/// A node of a graph, from creation until it is closed
pub struct Node {
    node: NodeRef,
    role: Role,
    state: NodeState,
    body: Option<Body>,
}

impl Node {
    /// Instantiate the node at `index` without acquiring any resource
    pub fn create(
        index: usize,
        spec: &NodeSpec,
        env: &Arc<dyn Environment>,
    ) -> Result<Node, PipelineError> {
        let node = NodeRef::new(index, spec.name());
        let body = match spec {
            NodeSpec::Operator(op) => {
                Body::Operator(operators::build(op, env).map_err(|error| {
                    PipelineError::Construction {
                        node: node.clone(),
                        reason: error.to_string(),
                    }
                })?)
            }
            NodeSpec::Process(process) => {
                Body::Command(ProcessCommand::resolve(&node, process, env.as_ref())?)
            }
        };

        Ok(Node {
            node,
            role: spec.role(),
            state: NodeState::Created,
            body: Some(body),
        })
    }

    /// Create the node at `index` and open it
    ///
    /// Opening acquires resources (spawns the program, opens files) but
    /// never waits for data. A node that fails to open is closed before
    /// the error is returned.
    pub async fn open(
        index: usize,
        spec: &NodeSpec,
        env: &Arc<dyn Environment>,
        config: &EngineConfig,
    ) -> Result<Node, PipelineError> {
        let mut node = Node::create(index, spec, env)?;
        node.acquire(config).await?;
        Ok(node)
    }

    async fn acquire(&mut self, config: &EngineConfig) -> Result<(), PipelineError> {
        let opened = match self.body.take() {
            Some(Body::Operator(mut operator)) => {
                if let Err(error) = operator.open().await {
                    operator.close().await;
                    self.advance(NodeState::Closed);
                    return Err(PipelineError::Construction {
                        node: self.node.clone(),
                        reason: error.to_string(),
                    });
                }
                Some(Body::Operator(operator))
            }
            Some(Body::Command(command)) => {
                match ProcessNode::start(self.node.clone(), command, config) {
                    Ok(process) => Some(Body::Process(process)),
                    Err(error) => {
                        self.advance(NodeState::Closed);
                        return Err(error);
                    }
                }
            }
            other => other,
        };
        self.body = opened;
        self.advance(NodeState::Open);
        Ok(())
    }

    fn advance(&mut self, next: NodeState) {
        if !self.state.can_advance_to(next) {
            warn!("{} moved from {:?} to {:?}", self.node, self.state, next);
        }
        debug!("{} {:?} -> {:?}", self.node, self.state, next);
        self.state = next;
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Release a node that will never run
    pub async fn discard(mut self) {
        match self.body.take() {
            Some(Body::Operator(mut operator)) => operator.close().await,
            // Dropping the child handle kills the program
            Some(Body::Process(process)) => drop(process),
            Some(Body::Command(_)) | None => {}
        }
        self.advance(NodeState::Closed);
    }

    /// Run until the node reaches `Closed`; the output stream is always closed
    pub async fn run(
        mut self,
        input: StreamReceiver,
        mut output: StreamSender,
        cancel: CancellationToken,
    ) -> NodeSummary {
        self.advance(NodeState::Running);

        let mut summary = match self.body.take() {
            Some(Body::Operator(operator)) => {
                drive(operator, self.node.clone(), input, output, cancel).await
            }
            Some(Body::Process(process)) => process.run(input, output, cancel).await,
            Some(Body::Command(_)) | None => {
                let error = PipelineError::StreamProtocol {
                    node: self.node.clone(),
                    detail: "node ran before it was opened".to_string(),
                };
                output.close_with_error(error.clone());
                NodeSummary {
                    node: self.node.clone(),
                    exit: NodeExit::Failed(error),
                    state: NodeState::Closed,
                    sent: 0,
                }
            }
        };

        self.advance(NodeState::Closed);
        summary.state = self.state;
        debug!("{} closed: {:?}", summary.node, summary.exit);
        summary
    }
}

/// Run an operator over its streams, then close it exactly once
async fn drive(
    mut operator: Box<dyn Operator>,
    node: NodeRef,
    mut input: StreamReceiver,
    mut output: StreamSender,
    cancel: CancellationToken,
) -> NodeSummary {
    let exit = pump(operator.as_mut(), &node, &mut input, &mut output, &cancel).await;

    operator.close().await;
    // Lets a still-running upstream see that nobody is reading
    input.close();

    match &exit {
        NodeExit::Completed | NodeExit::StoppedEarly => output.close_normally(),
        NodeExit::Failed(error) | NodeExit::UpstreamFailed(error) => {
            output.close_with_error(error.clone())
        }
        NodeExit::Cancelled => output.close_with_error(PipelineError::Cancelled),
    }

    NodeSummary {
        node,
        exit,
        state: NodeState::Closed,
        sent: output.sent(),
    }
}

fn transform_error(node: &NodeRef, error: OperatorError) -> NodeExit {
    NodeExit::Failed(PipelineError::Transform {
        node: node.clone(),
        message: error.to_string(),
    })
}

/// Send everything the operator emitted; `Some` when the node must stop
async fn flush(out: &mut Emitter, output: &mut StreamSender) -> Option<NodeExit> {
    for value in out.drain() {
        match output.send(value).await {
            Ok(()) => {}
            Err(StreamError::Disconnected) => return Some(NodeExit::StoppedEarly),
            Err(StreamError::Cancelled) => return Some(NodeExit::Cancelled),
            Err(StreamError::Closed) => {
                return Some(NodeExit::Failed(PipelineError::StreamProtocol {
                    node: output.producer().clone(),
                    detail: StreamError::Closed.to_string(),
                }))
            }
        }
    }
    None
}

async fn pump(
    operator: &mut dyn Operator,
    node: &NodeRef,
    input: &mut StreamReceiver,
    output: &mut StreamSender,
    cancel: &CancellationToken,
) -> NodeExit {
    let mut out = Emitter::new();
    let mut stopped = false;

    // Sinks finish their side effect even when nobody reads their output
    let watch_consumer = operator.role() != Role::Sink;

    if operator.role() == Role::Source {
        loop {
            let generated = tokio::select! {
                biased;
                _ = cancel.cancelled() => return NodeExit::Cancelled,
                _ = output.closed() => return NodeExit::StoppedEarly,
                generated = operator.generate(&mut out) => generated,
            };
            let flow = match generated {
                Ok(flow) => flow,
                Err(e) => return transform_error(node, e),
            };
            if let Some(exit) = flush(&mut out, output).await {
                return exit;
            }
            if flow == Flow::Stop {
                break;
            }
        }
    } else {
        loop {
            let received = tokio::select! {
                biased;
                _ = output.closed(), if watch_consumer => return NodeExit::StoppedEarly,
                received = input.recv() => received,
            };
            let value = match received {
                Ok(Some(value)) => value,
                Ok(None) => break,
                Err(PipelineError::Cancelled) => return NodeExit::Cancelled,
                Err(error) => return NodeExit::UpstreamFailed(error),
            };

            let processed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return NodeExit::Cancelled,
                _ = output.closed(), if watch_consumer => return NodeExit::StoppedEarly,
                processed = operator.process(value, &mut out) => processed,
            };
            let mut flow = match processed {
                Ok(flow) => flow,
                Err(e) => return transform_error(node, e),
            };
            if let Some(exit) = flush(&mut out, output).await {
                return exit;
            }
            while flow == Flow::Pending {
                let resumed = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return NodeExit::Cancelled,
                    _ = output.closed(), if watch_consumer => return NodeExit::StoppedEarly,
                    resumed = operator.resume(&mut out) => resumed,
                };
                flow = match resumed {
                    Ok(flow) => flow,
                    Err(e) => return transform_error(node, e),
                };
                if let Some(exit) = flush(&mut out, output).await {
                    return exit;
                }
            }
            if flow == Flow::Stop {
                // Enough input: release the upstream before finishing
                input.close();
                stopped = true;
                break;
            }
        }
    }

    let finished = tokio::select! {
        biased;
        _ = cancel.cancelled() => return NodeExit::Cancelled,
        finished = operator.finish(&mut out) => finished,
    };
    if let Err(e) = finished {
        return transform_error(node, e);
    }
    if let Some(exit) = flush(&mut out, output).await {
        return exit;
    }

    if stopped || output.is_disconnected() {
        NodeExit::StoppedEarly
    } else {
        NodeExit::Completed
    }
}
