//! Native operators
//!
//! An operator is the in-process body of an operator node. The node driver
//! (see `execution::node`) owns the streams; operators only see values and
//! an [`Emitter`] to push results into. That keeps operators free of any
//! stream or cancellation plumbing and lets them be tested directly.

pub mod reduce;
pub mod sinks;
pub mod sources;
pub mod transforms;

use crate::core::env::Environment;
use crate::core::error::OperatorError;
use crate::core::template::{OperatorSpec, Role};
use crate::core::value::Value;
use async_trait::async_trait;
use std::sync::Arc;

/// Whether an operator wants more input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// No more input is needed (or, for sources, nothing more to generate)
    Stop,
    /// More output for the current input is ready; call `resume` before
    /// the next input
    Pending,
}

/// Buffer an operator pushes its output values into
#[derive(Debug, Default)]
pub struct Emitter {
    pending: Vec<Value>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, value: impl Into<Value>) {
        self.pending.push(value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Take everything emitted since the last drain, in order
    pub fn drain(&mut self) -> std::vec::Drain<'_, Value> {
        self.pending.drain(..)
    }
}

/// The body of an operator node
///
/// The driver calls `open` once, then either `generate` repeatedly (sources)
/// or `process` once per input value (transforms and sinks), then `finish`
/// once the input has ended, and finally `close` exactly once whatever the
/// outcome. While `process` or `resume` answer [`Flow::Pending`], the
/// driver sends what was emitted and calls `resume` again.
#[async_trait]
pub trait Operator: Send {
    fn name(&self) -> &str;

    fn role(&self) -> Role;

    /// Acquire resources before any value flows
    async fn open(&mut self) -> Result<(), OperatorError> {
        Ok(())
    }

    /// Produce the next values of a source
    async fn generate(&mut self, _out: &mut Emitter) -> Result<Flow, OperatorError> {
        Ok(Flow::Stop)
    }

    /// Handle one input value
    async fn process(&mut self, input: Value, out: &mut Emitter) -> Result<Flow, OperatorError>;

    /// Continue the output of the current input in another batch
    async fn resume(&mut self, _out: &mut Emitter) -> Result<Flow, OperatorError> {
        Ok(Flow::Continue)
    }

    /// Input has ended; emit anything held back
    async fn finish(&mut self, _out: &mut Emitter) -> Result<(), OperatorError> {
        Ok(())
    }

    /// Release resources
    async fn close(&mut self) {}
}

/// Instantiate an operator, resolving its arguments against `env`
pub fn build(
    spec: &OperatorSpec,
    env: &Arc<dyn Environment>,
) -> Result<Box<dyn Operator>, OperatorError> {
    let operator: Box<dyn Operator> = match spec {
        OperatorSpec::Gen { count, start } => {
            let count = count
                .resolve_count(env.as_ref(), "gen count")
                .map_err(OperatorError::Invalid)?;
            let start = match start {
                Some(start) => start
                    .resolve(env.as_ref())
                    .map_err(OperatorError::Invalid)?
                    .as_int()
                    .ok_or_else(|| OperatorError::invalid("gen start must be an integer"))?,
                None => 0,
            };
            Box::new(sources::Gen::new(count, start))
        }
        OperatorSpec::Ls {
            paths,
            depth,
            file,
            dir,
            symlink,
        } => {
            let paths = paths
                .iter()
                .map(|p| p.resolve(env.as_ref()).map(|v| v.to_text().into()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(OperatorError::Invalid)?;
            let filter = sources::KindFilter::new(*file, *dir, *symlink);
            Box::new(sources::Ls::new(paths, *depth, filter))
        }
        OperatorSpec::Read { path } => {
            let path = path.resolve(env.as_ref()).map_err(OperatorError::Invalid)?;
            Box::new(sources::Read::new(path.to_text().into()))
        }
        OperatorSpec::Timer {
            interval,
            limit,
            components,
        } => {
            let interval = interval.resolve(env.as_ref()).map_err(OperatorError::Invalid)?;
            let interval = sources::parse_interval(&interval.to_text())?;
            let limit = limit
                .as_ref()
                .map(|l| l.resolve_count(env.as_ref(), "timer limit"))
                .transpose()
                .map_err(OperatorError::Invalid)?;
            Box::new(sources::Timer::new(interval, limit, *components))
        }
        OperatorSpec::Project { expr } => Box::new(sources::Project::new(expr.clone(), env.clone())),
        OperatorSpec::Map { function } => {
            Box::new(transforms::Map::new(function.clone(), env.clone()))
        }
        OperatorSpec::Select { predicate } => {
            Box::new(transforms::Select::new(predicate.clone(), env.clone()))
        }
        OperatorSpec::Red {
            functions,
            incremental,
        } => Box::new(reduce::Red::new(functions.clone(), *incremental, env.clone())?),
        OperatorSpec::Head { count } => {
            let count = count
                .resolve_count(env.as_ref(), "head count")
                .map_err(OperatorError::Invalid)?;
            Box::new(transforms::Head::new(count))
        }
        OperatorSpec::Tail { count } => {
            let count = count
                .resolve_count(env.as_ref(), "tail count")
                .map_err(OperatorError::Invalid)?;
            Box::new(transforms::Tail::new(count))
        }
        OperatorSpec::Sort { key, reverse } => Box::new(transforms::Sort::new(
            key.clone(),
            *reverse,
            env.clone(),
        )),
        OperatorSpec::Unique => Box::new(transforms::Unique::new()),
        OperatorSpec::Expand { position } => Box::new(transforms::Expand::new(*position)),
        OperatorSpec::Label { value } => {
            let value = value.resolve(env.as_ref()).map_err(OperatorError::Invalid)?;
            Box::new(transforms::Label::new(value))
        }
        OperatorSpec::Write { json } => Box::new(sinks::Write::stdout(*json)),
        OperatorSpec::Collect { sink } => Box::new(sinks::Collect::new(sink.clone())),
    };
    Ok(operator)
}

/// Run an operator over `inputs` outside of any graph
#[cfg(test)]
pub(crate) async fn run_operator(
    operator: &mut dyn Operator,
    inputs: Vec<Value>,
) -> Result<Vec<Value>, OperatorError> {
    let mut out = Emitter::new();
    let mut produced = Vec::new();
    operator.open().await?;

    if operator.role() == Role::Source {
        loop {
            let flow = operator.generate(&mut out).await?;
            produced.extend(out.drain());
            if flow == Flow::Stop {
                break;
            }
        }
    } else {
        for input in inputs {
            let mut flow = operator.process(input, &mut out).await?;
            produced.extend(out.drain());
            while flow == Flow::Pending {
                flow = operator.resume(&mut out).await?;
                produced.extend(out.drain());
            }
            if flow == Flow::Stop {
                break;
            }
        }
    }

    operator.finish(&mut out).await?;
    produced.extend(out.drain());
    operator.close().await;
    Ok(produced)
}
