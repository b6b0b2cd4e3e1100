//! Environment: name resolution and callable invocation for operators
//!
//! The engine only consumes the [`Environment`] trait. [`Bindings`] is the
//! default in-memory implementation; [`Scoped`] overlays call-time
//! arguments on top of a parent environment without mutating it.
//!
//! An environment is read by every operator of a running graph. The engine
//! takes no locks around it; implementations that allow mutation while a
//! graph runs must serialize that themselves.

use crate::core::callable::{builtins, evaluate, Callable};
use crate::core::error::EvaluationError;
use crate::core::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name resolution and callable invocation, supplied by the host shell
pub trait Environment: Send + Sync {
    /// Look up a variable
    fn resolve(&self, name: &str) -> Option<Value>;

    /// Invoke a callable with positional arguments
    fn invoke(&self, callable: &Callable, args: &[Value]) -> Result<Value, EvaluationError>;
}

/// A native function registered with [`Bindings`]
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, EvaluationError> + Send + Sync>;

/// Default environment: variables plus registered native functions
#[derive(Clone, Default)]
pub struct Bindings {
    variables: HashMap<String, Value>,
    functions: HashMap<String, NativeFn>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_var(name, value);
        self
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Register a native function callable as `Callable::Registered(name)`
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, EvaluationError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn with_function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, EvaluationError> + Send + Sync + 'static,
    {
        self.register(name, function);
        self
    }

    pub fn variable_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.variables.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    pub fn into_shared(self) -> Arc<dyn Environment> {
        Arc::new(self)
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bindings")
            .field("variables", &self.variables)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Environment for Bindings {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.variables.get(name).cloned()
    }

    fn invoke(&self, callable: &Callable, args: &[Value]) -> Result<Value, EvaluationError> {
        match callable {
            Callable::Builtin(name) => builtins::call(name, args)
                .unwrap_or_else(|| Err(EvaluationError::UnknownFunction(name.clone()))),
            Callable::Registered(name) => match self.functions.get(name) {
                Some(function) => function(args),
                None => Err(EvaluationError::UnknownFunction(name.clone())),
            },
            Callable::Expression(expr) => evaluate(expr, args, self),
        }
    }
}

/// Call-time bindings layered over a parent environment
pub struct Scoped {
    parent: Arc<dyn Environment>,
    locals: HashMap<String, Value>,
}

impl Scoped {
    pub fn new(parent: Arc<dyn Environment>, locals: HashMap<String, Value>) -> Self {
        Self { parent, locals }
    }
}

impl Environment for Scoped {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.locals
            .get(name)
            .cloned()
            .or_else(|| self.parent.resolve(name))
    }

    fn invoke(&self, callable: &Callable, args: &[Value]) -> Result<Value, EvaluationError> {
        match callable {
            // Evaluate here so variables see the local bindings
            Callable::Expression(expr) => evaluate(expr, args, self),
            other => self.parent.invoke(other, args),
        }
    }
}
