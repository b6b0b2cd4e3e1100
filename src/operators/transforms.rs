//! Transform operators: one input stream, one output stream

use crate::core::callable::Callable;
use crate::core::env::Environment;
use crate::core::error::OperatorError;
use crate::core::template::Role;
use crate::core::value::{HostObject, Value};
use crate::operators::{Emitter, Flow, Operator};
use crate::process::wire::line_text;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader, Split};

/// `map`: apply a function to the fields of each value
pub struct Map {
    function: Callable,
    env: Arc<dyn Environment>,
}

impl Map {
    pub fn new(function: Callable, env: Arc<dyn Environment>) -> Self {
        Self { function, env }
    }
}

#[async_trait]
impl Operator for Map {
    fn name(&self) -> &str {
        "map"
    }

    fn role(&self) -> Role {
        Role::Transform
    }

    async fn process(&mut self, input: Value, out: &mut Emitter) -> Result<Flow, OperatorError> {
        let result = self.env.invoke(&self.function, &input.into_fields())?;
        out.emit(result);
        Ok(Flow::Continue)
    }
}

/// `select`: keep values for which the predicate is truthy
pub struct Select {
    predicate: Callable,
    env: Arc<dyn Environment>,
}

impl Select {
    pub fn new(predicate: Callable, env: Arc<dyn Environment>) -> Self {
        Self { predicate, env }
    }
}

#[async_trait]
impl Operator for Select {
    fn name(&self) -> &str {
        "select"
    }

    fn role(&self) -> Role {
        Role::Transform
    }

    async fn process(&mut self, input: Value, out: &mut Emitter) -> Result<Flow, OperatorError> {
        if self.env.invoke(&self.predicate, &input.fields())?.is_truthy() {
            out.emit(input);
        }
        Ok(Flow::Continue)
    }
}

/// `head`: pass the first `count` values, then stop reading
#[derive(Debug)]
pub struct Head {
    count: usize,
    passed: usize,
}

impl Head {
    pub fn new(count: usize) -> Self {
        Self { count, passed: 0 }
    }
}

#[async_trait]
impl Operator for Head {
    fn name(&self) -> &str {
        "head"
    }

    fn role(&self) -> Role {
        Role::Transform
    }

    async fn process(&mut self, input: Value, out: &mut Emitter) -> Result<Flow, OperatorError> {
        if self.passed < self.count {
            self.passed += 1;
            out.emit(input);
        }
        if self.passed >= self.count {
            Ok(Flow::Stop)
        } else {
            Ok(Flow::Continue)
        }
    }
}

/// `tail`: the last `count` values, emitted once input ends
#[derive(Debug)]
pub struct Tail {
    count: usize,
    window: VecDeque<Value>,
}

impl Tail {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            window: VecDeque::with_capacity(count.min(1024)),
        }
    }
}

#[async_trait]
impl Operator for Tail {
    fn name(&self) -> &str {
        "tail"
    }

    fn role(&self) -> Role {
        Role::Transform
    }

    async fn process(&mut self, input: Value, _out: &mut Emitter) -> Result<Flow, OperatorError> {
        if self.count > 0 {
            if self.window.len() == self.count {
                self.window.pop_front();
            }
            self.window.push_back(input);
        }
        Ok(Flow::Continue)
    }

    async fn finish(&mut self, out: &mut Emitter) -> Result<(), OperatorError> {
        for value in self.window.drain(..) {
            out.emit(value);
        }
        Ok(())
    }
}

/// `sort`: buffer everything, emit in order once input ends
///
/// Values of different kinds are ordered by kind first. The sort is stable.
pub struct Sort {
    key: Option<Callable>,
    reverse: bool,
    env: Arc<dyn Environment>,
    buffered: Vec<(Value, Value)>,
}

impl Sort {
    pub fn new(key: Option<Callable>, reverse: bool, env: Arc<dyn Environment>) -> Self {
        Self {
            key,
            reverse,
            env,
            buffered: Vec::new(),
        }
    }
}

#[async_trait]
impl Operator for Sort {
    fn name(&self) -> &str {
        "sort"
    }

    fn role(&self) -> Role {
        Role::Transform
    }

    async fn process(&mut self, input: Value, _out: &mut Emitter) -> Result<Flow, OperatorError> {
        let key = match &self.key {
            Some(key) => self.env.invoke(key, &input.fields())?,
            None => input.clone(),
        };
        self.buffered.push((key, input));
        Ok(Flow::Continue)
    }

    async fn finish(&mut self, out: &mut Emitter) -> Result<(), OperatorError> {
        let mut buffered = std::mem::take(&mut self.buffered);
        if self.reverse {
            buffered.sort_by(|(a, _), (b, _)| b.compare(a));
        } else {
            buffered.sort_by(|(a, _), (b, _)| a.compare(b));
        }
        for (_, value) in buffered {
            out.emit(value);
        }
        Ok(())
    }
}

/// `unique`: drop values already seen
#[derive(Debug, Default)]
pub struct Unique {
    seen: HashSet<String>,
}

impl Unique {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Operator for Unique {
    fn name(&self) -> &str {
        "unique"
    }

    fn role(&self) -> Role {
        Role::Transform
    }

    async fn process(&mut self, input: Value, out: &mut Emitter) -> Result<Flow, OperatorError> {
        if self.seen.insert(input.key()) {
            out.emit(input);
        }
        Ok(Flow::Continue)
    }
}

/// Lines of a file object read per `resume` call
const EXPAND_BATCH: usize = 64;

/// A file object whose lines are still being expanded
struct PendingLines {
    lines: Split<BufReader<fs::File>>,
    /// The other fields of the record, when expanding at a position
    fields: Option<Vec<Value>>,
}

/// `expand`: flatten records into their fields
///
/// Without a position each field of a record becomes its own value. With a
/// position, the record is repeated once per element of that field, with
/// the element in its place. A file object expands to its lines, which are
/// read in batches so a large file never sits in memory.
pub struct Expand {
    position: Option<usize>,
    pending: Option<PendingLines>,
}

impl Expand {
    pub fn new(position: Option<usize>) -> Self {
        Self {
            position,
            pending: None,
        }
    }

    fn place(&self, fields: Option<&Vec<Value>>, element: Value, out: &mut Emitter) {
        match (fields, self.position) {
            (Some(fields), Some(position)) => {
                let mut expanded = fields.clone();
                expanded.insert(position, element);
                out.emit(Value::from_fields(expanded));
            }
            _ => out.emit(element),
        }
    }
}

#[async_trait]
impl Operator for Expand {
    fn name(&self) -> &str {
        "expand"
    }

    fn role(&self) -> Role {
        Role::Transform
    }

    async fn process(&mut self, input: Value, out: &mut Emitter) -> Result<Flow, OperatorError> {
        let (fields, target) = match self.position {
            None => (None, input),
            Some(position) => {
                let mut fields = input.into_fields();
                if position >= fields.len() {
                    out.emit(Value::from_fields(fields));
                    return Ok(Flow::Continue);
                }
                let target = fields.remove(position);
                (Some(fields), target)
            }
        };

        match target {
            Value::Object(HostObject::File(info)) => {
                let file = fs::File::open(&info.path).await.map_err(|e| {
                    OperatorError::Io(std::io::Error::new(
                        e.kind(),
                        format!("{}: {}", info.path.display(), e),
                    ))
                })?;
                self.pending = Some(PendingLines {
                    lines: BufReader::new(file).split(b'\n'),
                    fields,
                });
                self.resume(out).await
            }
            Value::Record(elements) => {
                for element in elements {
                    self.place(fields.as_ref(), element, out);
                }
                Ok(Flow::Continue)
            }
            other => {
                self.place(fields.as_ref(), other, out);
                Ok(Flow::Continue)
            }
        }
    }

    async fn resume(&mut self, out: &mut Emitter) -> Result<Flow, OperatorError> {
        let Some(mut pending) = self.pending.take() else {
            return Ok(Flow::Continue);
        };
        for _ in 0..EXPAND_BATCH {
            match pending.lines.next_segment().await? {
                Some(bytes) => self.place(pending.fields.as_ref(), Value::str(line_text(&bytes)), out),
                None => return Ok(Flow::Continue),
            }
        }
        self.pending = Some(pending);
        Ok(Flow::Pending)
    }

    async fn close(&mut self) {
        self.pending = None;
    }
}

/// `label`: prefix every value with a fixed field
#[derive(Debug)]
pub struct Label {
    value: Value,
}

impl Label {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

#[async_trait]
impl Operator for Label {
    fn name(&self) -> &str {
        "label"
    }

    fn role(&self) -> Role {
        Role::Transform
    }

    async fn process(&mut self, input: Value, out: &mut Emitter) -> Result<Flow, OperatorError> {
        let mut fields = Vec::with_capacity(2);
        fields.push(self.value.clone());
        fields.extend(input.into_fields());
        out.emit(Value::Record(fields));
        Ok(Flow::Continue)
    }
}
