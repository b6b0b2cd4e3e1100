//! `red`: reduce values field by field with binary functions
//!
//! Each input value is treated as a record; field `i` is folded with
//! function `i`. Fields marked `.` instead form a grouping key, and one
//! accumulator is kept per distinct key, in first-seen order.
//!
//! In incremental mode one value is emitted per input: the input's fields
//! followed by the current accumulated values of its group.

use crate::core::callable::Callable;
use crate::core::env::Environment;
use crate::core::error::OperatorError;
use crate::core::template::{Reducer, Role};
use crate::core::value::Value;
use crate::operators::{Emitter, Flow, Operator};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

struct Group {
    key: Vec<Value>,
    accumulator: Vec<Option<Value>>,
}

pub struct Red {
    reducers: Vec<Reducer>,
    incremental: bool,
    env: Arc<dyn Environment>,
    groups: Vec<Group>,
    index: HashMap<String, usize>,
}

impl Red {
    pub fn new(
        reducers: Vec<Reducer>,
        incremental: bool,
        env: Arc<dyn Environment>,
    ) -> Result<Self, OperatorError> {
        if reducers.is_empty() {
            return Err(OperatorError::invalid("red needs at least one function"));
        }
        Ok(Self {
            reducers,
            incremental,
            env,
            groups: Vec::new(),
            index: HashMap::new(),
        })
    }

    fn group_key(&self, fields: &[Value]) -> Vec<Value> {
        self.reducers
            .iter()
            .zip(fields)
            .filter(|(reducer, _)| matches!(reducer, Reducer::Group))
            .map(|(_, field)| field.clone())
            .collect()
    }

    fn fold(&self, function: &Callable, acc: Option<&Value>, x: &Value) -> Result<Value, OperatorError> {
        match (function, acc) {
            // Builtins treat a null accumulator as "nothing yet" themselves
            (Callable::Builtin(_), acc) => Ok(self
                .env
                .invoke(function, &[acc.cloned().unwrap_or(Value::Null), x.clone()])?),
            (_, None) => Ok(x.clone()),
            (_, Some(acc)) => Ok(self.env.invoke(function, &[acc.clone(), x.clone()])?),
        }
    }

    /// Output fields of a group: key fields in place, reduced fields after folding
    fn output(&self, group: &Group) -> Value {
        let mut key = group.key.iter();
        let fields = self
            .reducers
            .iter()
            .zip(&group.accumulator)
            .map(|(reducer, acc)| match reducer {
                Reducer::Group => key.next().cloned().unwrap_or(Value::Null),
                Reducer::Function(_) => acc.clone().unwrap_or(Value::Null),
            })
            .collect();
        Value::from_fields(fields)
    }

    /// Accumulated (non-key) values of a group
    fn running(&self, group: &Group) -> Vec<Value> {
        self.reducers
            .iter()
            .zip(&group.accumulator)
            .filter(|(reducer, _)| matches!(reducer, Reducer::Function(_)))
            .map(|(_, acc)| acc.clone().unwrap_or(Value::Null))
            .collect()
    }
}

#[async_trait]
impl Operator for Red {
    fn name(&self) -> &str {
        "red"
    }

    fn role(&self) -> Role {
        Role::Transform
    }

    async fn process(&mut self, input: Value, out: &mut Emitter) -> Result<Flow, OperatorError> {
        let fields = input.into_fields();
        if fields.len() < self.reducers.len() {
            return Err(OperatorError::invalid(format!(
                "red has {} functions but the input has {} field(s)",
                self.reducers.len(),
                fields.len()
            )));
        }

        let key = self.group_key(&fields);
        let slot = match self.index.get(&Value::Record(key.clone()).key()) {
            Some(&slot) => slot,
            None => {
                self.index
                    .insert(Value::Record(key.clone()).key(), self.groups.len());
                self.groups.push(Group {
                    key,
                    accumulator: vec![None; self.reducers.len()],
                });
                self.groups.len() - 1
            }
        };

        let mut accumulator = std::mem::take(&mut self.groups[slot].accumulator);
        for (i, reducer) in self.reducers.iter().enumerate() {
            if let Reducer::Function(function) = reducer {
                accumulator[i] = Some(self.fold(function, accumulator[i].as_ref(), &fields[i])?);
            }
        }
        self.groups[slot].accumulator = accumulator;

        if self.incremental {
            let mut row = fields;
            row.extend(self.running(&self.groups[slot]));
            out.emit(Value::Record(row));
        }
        Ok(Flow::Continue)
    }

    async fn finish(&mut self, out: &mut Emitter) -> Result<(), OperatorError> {
        if !self.incremental {
            for group in &self.groups {
                out.emit(self.output(group));
            }
        }
        Ok(())
    }
}
