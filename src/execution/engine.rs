//! Main execution engine - builds graphs from templates and runs them

use crate::core::config::EngineConfig;
use crate::core::env::Environment;
use crate::core::error::{NodeRef, PipelineError};
use crate::core::state::{NodeExit, NodeSummary, Outcome, RunReport};
use crate::core::template::{NodeSpec, PipelineTemplate};
use crate::core::value::Value;
use crate::execution::graph::Graph;
use crate::execution::invocation::Invocation;
use crate::execution::scheduler;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum GraphEvent {
    RunStarted {
        run_id: Uuid,
        nodes: Vec<NodeRef>,
    },
    NodeOpened {
        run_id: Uuid,
        node: NodeRef,
    },
    NodeClosed {
        run_id: Uuid,
        node: NodeRef,
        sent: usize,
    },
    NodeFailed {
        run_id: Uuid,
        node: NodeRef,
        error: PipelineError,
    },
    RunFinished {
        run_id: Uuid,
        outcome: Outcome,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(GraphEvent) + Send + Sync>;

/// Pipeline engine: an environment, runtime settings and event handlers
///
/// Cloning is cheap; clones share the environment and the handlers.
#[derive(Clone)]
pub struct Engine {
    env: Arc<dyn Environment>,
    config: EngineConfig,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl Engine {
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self {
            env,
            config: EngineConfig::default(),
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn env(&self) -> &Arc<dyn Environment> {
        &self.env
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(GraphEvent) + Send + Sync + 'static,
    {
        match self.event_handlers.lock() {
            Ok(mut handlers) => handlers.push(Arc::new(handler)),
            Err(poisoned) => poisoned.into_inner().push(Arc::new(handler)),
        }
    }

    fn handlers(&self) -> Vec<EventHandler> {
        match self.event_handlers.lock() {
            Ok(handlers) => handlers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: GraphEvent) {
        for handler in self.handlers() {
            handler(event.clone());
        }
    }

    /// Build a graph against the engine's own environment
    pub async fn build_graph(&self, specs: &[NodeSpec]) -> Result<Graph, PipelineError> {
        self.build_graph_in(specs, self.env.clone()).await
    }

    /// Build a graph against a given environment
    pub async fn build_graph_in(
        &self,
        specs: &[NodeSpec],
        env: Arc<dyn Environment>,
    ) -> Result<Graph, PipelineError> {
        let graph = Graph::build(specs, env, &self.config).await?;
        for node in graph.nodes() {
            self.emit_event(GraphEvent::NodeOpened {
                run_id: graph.run_id(),
                node,
            });
        }
        Ok(graph)
    }

    /// Run an opened graph until every node has closed
    pub async fn run(&self, graph: Graph) -> RunReport {
        let run_id = graph.run_id();
        info!("Starting run {} ({} node(s))", run_id, graph.len());
        self.emit_event(GraphEvent::RunStarted {
            run_id,
            nodes: graph.nodes(),
        });

        let handlers = self.handlers();
        let report = scheduler::run(graph, |summary: &NodeSummary| {
            let event = match &summary.exit {
                NodeExit::Failed(error) => GraphEvent::NodeFailed {
                    run_id,
                    node: summary.node.clone(),
                    error: error.clone(),
                },
                _ => GraphEvent::NodeClosed {
                    run_id,
                    node: summary.node.clone(),
                    sent: summary.sent,
                },
            };
            for handler in &handlers {
                handler(event.clone());
            }
        })
        .await;

        match &report.outcome {
            Outcome::Success { emitted } => {
                info!("Run {} succeeded: {} value(s) emitted", run_id, emitted)
            }
            Outcome::Failure { error, secondary } => {
                error!("Run {} failed: {}", run_id, error);
                for other in secondary {
                    warn!("Run {} secondary error: {}", run_id, other);
                }
            }
            Outcome::Cancelled { .. } => warn!("Run {} cancelled", run_id),
        }
        self.emit_event(GraphEvent::RunFinished {
            run_id,
            outcome: report.outcome.clone(),
        });
        report
    }

    /// Bind `args` to a template and build a fresh graph for it
    pub async fn instantiate(
        &self,
        template: &PipelineTemplate,
        args: Vec<Value>,
    ) -> Result<Graph, PipelineError> {
        template.validate()?;
        let env = template.bind(self.env.clone(), args)?;
        self.build_graph_in(&template.nodes, env).await
    }

    /// Instantiate a template and run it, discarding its output
    pub async fn execute(
        &self,
        template: &PipelineTemplate,
        args: Vec<Value>,
    ) -> Result<RunReport, PipelineError> {
        let graph = self.instantiate(template, args).await?;
        Ok(self.run(graph).await)
    }

    /// Instantiate a template and run it in the background, handing its
    /// output to the caller as a lazy sequence
    pub async fn invoke(
        &self,
        template: &PipelineTemplate,
        args: Vec<Value>,
    ) -> Result<Invocation, PipelineError> {
        let mut graph = self.instantiate(template, args).await?;
        let output = graph.take_output().ok_or_else(|| {
            PipelineError::Aborted("graph output was already taken".to_string())
        })?;
        let run_id = graph.run_id();
        let cancel = graph.cancel_handle();

        let engine = self.clone();
        let runner = tokio::spawn(async move { engine.run(graph).await });
        Ok(Invocation::new(run_id, output, cancel, runner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::callable::Expr;
    use crate::core::env::Bindings;
    use crate::core::template::{Arg, OperatorSpec};

    #[tokio::test]
    async fn test_events_are_emitted_in_order() {
        let engine = Engine::new(Bindings::new().into_shared());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine.add_event_handler(move |event| {
            let label = match event {
                GraphEvent::RunStarted { .. } => "started",
                GraphEvent::NodeOpened { .. } => "opened",
                GraphEvent::NodeClosed { .. } => "closed",
                GraphEvent::NodeFailed { .. } => "failed",
                GraphEvent::RunFinished { .. } => "finished",
            };
            sink.lock().unwrap().push(label);
        });

        let template = PipelineTemplate::new("two").then(OperatorSpec::gen(2));
        let report = engine.execute(&template, vec![]).await.unwrap();
        assert!(report.outcome.is_success());

        let events = events.lock().unwrap().clone();
        assert_eq!(events, vec!["opened", "started", "closed", "finished"]);
    }

    #[tokio::test]
    async fn test_failure_event_names_node() {
        let engine = Engine::new(Bindings::new().into_shared());
        let failed = Arc::new(Mutex::new(None));
        let sink = failed.clone();
        engine.add_event_handler(move |event| {
            if let GraphEvent::NodeFailed { node, .. } = event {
                *sink.lock().unwrap() = Some(node.index);
            }
        });

        let template = PipelineTemplate::new("bad")
            .then(OperatorSpec::gen(3))
            .then(OperatorSpec::map(Expr::Field(Box::new(Expr::arg(0)), 4)));
        let report = engine.execute(&template, vec![]).await.unwrap();
        assert!(!report.outcome.is_success());
        assert_eq!(*failed.lock().unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_template_arguments() {
        let engine = Engine::new(Bindings::new().into_shared());
        let template = PipelineTemplate::new("count")
            .param("n")
            .then(OperatorSpec::Gen {
                count: Arg::var("n"),
                start: None,
            });

        let values = engine
            .invoke(&template, vec![Value::Int(4)])
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(values.len(), 4);

        let wrong = engine.invoke(&template, vec![]).await;
        assert!(matches!(wrong, Err(PipelineError::Template(_))));
    }
}
