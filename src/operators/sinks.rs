//! Sink operators: they consume values and must come last

use crate::core::error::OperatorError;
use crate::core::template::Role;
use crate::core::value::Value;
use crate::operators::{Emitter, Flow, Operator};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Shared in-memory buffer filled by a `collect` sink
///
/// Clones share the same buffer, so a caller keeps one handle and gives a
/// clone to the pipeline.
#[derive(Clone, Default)]
pub struct Collector {
    values: Arc<Mutex<Vec<Value>>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, value: Value) {
        match self.values.lock() {
            Ok(mut values) => values.push(value),
            Err(poisoned) => poisoned.into_inner().push(value),
        }
    }

    /// Copy of everything collected so far
    pub fn values(&self) -> Vec<Value> {
        match self.values.lock() {
            Ok(values) => values.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Remove and return everything collected so far
    pub fn take(&self) -> Vec<Value> {
        match self.values.lock() {
            Ok(mut values) => std::mem::take(&mut *values),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        self.values.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector").field("len", &self.len()).finish()
    }
}

/// `collect`: append every value to a [`Collector`]
#[derive(Debug)]
pub struct Collect {
    sink: Collector,
}

impl Collect {
    pub fn new(sink: Collector) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Operator for Collect {
    fn name(&self) -> &str {
        "collect"
    }

    fn role(&self) -> Role {
        Role::Sink
    }

    async fn process(&mut self, input: Value, _out: &mut Emitter) -> Result<Flow, OperatorError> {
        self.sink.push(input);
        Ok(Flow::Continue)
    }
}

/// `write`: one line per value
pub struct Write {
    json: bool,
    target: Box<dyn AsyncWrite + Send + Unpin>,
}

impl Write {
    pub fn new(json: bool, target: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self { json, target }
    }

    pub fn stdout(json: bool) -> Self {
        Self::new(json, Box::new(tokio::io::stdout()))
    }

    fn render(&self, value: &Value) -> Result<String, OperatorError> {
        if self.json {
            serde_json::to_string(value)
                .map_err(|e| OperatorError::invalid(format!("cannot encode value as JSON: {}", e)))
        } else {
            Ok(value.to_text())
        }
    }
}

#[async_trait]
impl Operator for Write {
    fn name(&self) -> &str {
        "write"
    }

    fn role(&self) -> Role {
        Role::Sink
    }

    async fn process(&mut self, input: Value, _out: &mut Emitter) -> Result<Flow, OperatorError> {
        let mut line = self.render(&input)?;
        line.push('\n');
        self.target.write_all(line.as_bytes()).await?;
        Ok(Flow::Continue)
    }

    async fn finish(&mut self, _out: &mut Emitter) -> Result<(), OperatorError> {
        self.target.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.target.flush().await;
    }
}
