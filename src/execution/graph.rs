//! Pipeline graphs: opened nodes joined by streams

use crate::core::config::EngineConfig;
use crate::core::env::Environment;
use crate::core::error::{NodeRef, PipelineError};
use crate::core::stream::{channel, StreamReceiver, StreamSender};
use crate::core::template::{validate_nodes, NodeSpec};
use crate::execution::node::Node;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One node together with the two stream ends it will run with
pub(crate) struct Wired {
    pub node: Node,
    pub input: StreamReceiver,
    pub output: StreamSender,
}

/// A fully opened graph, ready to be handed to the scheduler
///
/// Node `i` reads stream `i` and writes stream `i + 1`. Stream `0` is
/// empty and already closed, so a transform in first position sees an
/// empty input. The last stream is the graph's output.
pub struct Graph {
    run_id: Uuid,
    wired: Vec<Wired>,
    output: Option<StreamReceiver>,
    cancel: CancellationToken,
    config: EngineConfig,
}

impl Graph {
    /// Open every node in order, then connect adjacent nodes with streams
    ///
    /// If any node fails to open, the nodes opened before it are released
    /// and the construction error is returned; nothing runs.
    pub async fn build(
        specs: &[NodeSpec],
        env: Arc<dyn Environment>,
        config: &EngineConfig,
    ) -> Result<Graph, PipelineError> {
        validate_nodes(specs)?;
        let run_id = Uuid::new_v4();
        debug!("Building graph {} with {} node(s)", run_id, specs.len());

        let mut nodes: Vec<Node> = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            match Node::open(index, spec, &env, config).await {
                Ok(node) => nodes.push(node),
                Err(error) => {
                    warn!("Graph {} construction failed: {}", run_id, error);
                    for opened in nodes.into_iter().rev() {
                        opened.discard().await;
                    }
                    return Err(error);
                }
            }
        }

        let cancel = CancellationToken::new();
        let (mut head, mut upstream) = channel(
            NodeRef::new(0, "<empty>"),
            config.buffer_capacity,
            cancel.clone(),
        );
        head.close_normally();

        let mut wired = Vec::with_capacity(nodes.len());
        for node in nodes {
            let (output, next) = channel(node.node().clone(), config.buffer_capacity, cancel.clone());
            let input = std::mem::replace(&mut upstream, next);
            wired.push(Wired {
                node,
                input,
                output,
            });
        }

        info!("Graph {} opened: {}", run_id, describe(&wired));
        Ok(Graph {
            run_id,
            wired,
            output: Some(upstream),
            cancel,
            config: config.clone(),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn len(&self) -> usize {
        self.wired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wired.is_empty()
    }

    pub fn nodes(&self) -> Vec<NodeRef> {
        self.wired.iter().map(|w| w.node.node().clone()).collect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Request cooperative cancellation of every node
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that cancels this graph, usable after it was handed off
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Take the graph's output stream to consume it directly
    ///
    /// When nobody takes it, the scheduler drains and discards it.
    pub fn take_output(&mut self) -> Option<StreamReceiver> {
        self.output.take()
    }

    #[cfg(test)]
    pub(crate) fn wired_mut(&mut self) -> &mut [Wired] {
        &mut self.wired
    }

    pub(crate) fn into_parts(
        mut self,
    ) -> (
        Uuid,
        Vec<Wired>,
        Option<StreamReceiver>,
        CancellationToken,
        EngineConfig,
    ) {
        (
            self.run_id,
            std::mem::take(&mut self.wired),
            self.output.take(),
            self.cancel.clone(),
            self.config.clone(),
        )
    }
}

impl Drop for Graph {
    /// A graph dropped before it ran releases its nodes without running them
    ///
    /// Inside a runtime the nodes are discarded on a spawned task, so every
    /// operator is still closed exactly once. Without one they are only
    /// dropped; child programs are killed either way.
    fn drop(&mut self) {
        if self.wired.is_empty() {
            return;
        }
        debug!("Graph {} dropped without running", self.run_id);
        self.cancel.cancel();
        let wired = std::mem::take(&mut self.wired);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let run_id = self.run_id;
                handle.spawn(async move {
                    for Wired { node, mut output, .. } in wired.into_iter().rev() {
                        output.close_normally();
                        node.discard().await;
                    }
                    debug!("Graph {} released", run_id);
                });
            }
            Err(_) => {
                for mut w in wired {
                    w.output.close_normally();
                }
            }
        }
    }
}

fn describe(wired: &[Wired]) -> String {
    wired
        .iter()
        .map(|w| w.node.node().name.clone())
        .collect::<Vec<_>>()
        .join(" | ")
}
