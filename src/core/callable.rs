//! Callables: the functions operators apply to stream values
//!
//! A callable is one of three things: a built-in named function (`+`, `max`,
//! `upper`, ...), a reference to a function registered with the
//! environment, or a compiled expression tree. Callables are always
//! evaluated in the engine's own process; they are never shipped to an
//! external program.

use crate::core::env::Environment;
use crate::core::error::EvaluationError;
use crate::core::value::Value;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// A function reference usable as an operator argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Callable {
    /// Built-in named function
    Builtin(String),
    /// Function registered with the environment under this name
    Registered(String),
    /// Compiled expression
    Expression(Expr),
}

impl Callable {
    pub fn builtin(name: impl Into<String>) -> Self {
        Callable::Builtin(name.into())
    }

    pub fn registered(name: impl Into<String>) -> Self {
        Callable::Registered(name.into())
    }

    /// Short human-readable form for logs and errors
    pub fn describe(&self) -> String {
        match self {
            Callable::Builtin(name) => name.clone(),
            Callable::Registered(name) => format!("fn:{}", name),
            Callable::Expression(_) => "<expr>".to_string(),
        }
    }
}

impl From<Expr> for Callable {
    fn from(expr: Expr) -> Self {
        Callable::Expression(expr)
    }
}

/// Restricted expression tree
///
/// Positional arguments (`Arg`) refer to the fields of the input value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Lit(Value),
    Arg(usize),
    Var(String),
    Field(Box<Expr>, usize),
    Record(Vec<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Rem(Box<Expr>, Box<Expr>),
    Matches(Box<Expr>, Pattern),
    Call(String, Vec<Expr>),
}

impl Expr {
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Lit(value.into())
    }

    pub fn arg(index: usize) -> Self {
        Expr::Arg(index)
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::Eq(Box::new(left), Box::new(right))
    }

    pub fn gt(left: Expr, right: Expr) -> Self {
        Expr::Gt(Box::new(left), Box::new(right))
    }

    pub fn add(left: Expr, right: Expr) -> Self {
        Expr::Add(Box::new(left), Box::new(right))
    }

    pub fn mul(left: Expr, right: Expr) -> Self {
        Expr::Mul(Box::new(left), Box::new(right))
    }

    pub fn rem(left: Expr, right: Expr) -> Self {
        Expr::Rem(Box::new(left), Box::new(right))
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call(name.into(), args)
    }
}

/// A regular expression compiled when the expression is built
#[derive(Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, EvaluationError> {
        Regex::new(pattern)
            .map(Pattern)
            .map_err(|e| EvaluationError::Failed(format!("invalid pattern: {}", e)))
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.0.as_str())
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Regex::new(&source)
            .map(Pattern)
            .map_err(serde::de::Error::custom)
    }
}

/// Evaluate an expression against positional arguments
pub fn evaluate(
    expr: &Expr,
    args: &[Value],
    env: &dyn Environment,
) -> Result<Value, EvaluationError> {
    let eval = |e: &Expr| evaluate(e, args, env);

    match expr {
        Expr::Lit(value) => Ok(value.clone()),
        Expr::Arg(index) => args
            .get(*index)
            .cloned()
            .ok_or(EvaluationError::MissingArgument {
                index: *index,
                len: args.len(),
            }),
        Expr::Var(name) => env
            .resolve(name)
            .ok_or_else(|| EvaluationError::NotFound(name.clone())),
        Expr::Field(inner, index) => {
            let value = eval(inner)?;
            let fields = value.into_fields();
            let len = fields.len();
            fields
                .into_iter()
                .nth(*index)
                .ok_or(EvaluationError::MissingArgument { index: *index, len })
        }
        Expr::Record(items) => items
            .iter()
            .map(eval)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Record),
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner)?.is_truthy())),
        Expr::And(left, right) => {
            let l = eval(left)?;
            if !l.is_truthy() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(right)?.is_truthy()))
        }
        Expr::Or(left, right) => {
            let l = eval(left)?;
            if l.is_truthy() {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(right)?.is_truthy()))
        }
        Expr::Eq(l, r) => Ok(Value::Bool(
            eval(l)?.partial_compare(&eval(r)?) == Some(Ordering::Equal),
        )),
        Expr::Ne(l, r) => Ok(Value::Bool(
            eval(l)?.partial_compare(&eval(r)?) != Some(Ordering::Equal),
        )),
        Expr::Lt(l, r) => ordering("<", &eval(l)?, &eval(r)?, |o| o == Ordering::Less),
        Expr::Le(l, r) => ordering("<=", &eval(l)?, &eval(r)?, |o| o != Ordering::Greater),
        Expr::Gt(l, r) => ordering(">", &eval(l)?, &eval(r)?, |o| o == Ordering::Greater),
        Expr::Ge(l, r) => ordering(">=", &eval(l)?, &eval(r)?, |o| o != Ordering::Less),
        Expr::Add(l, r) => add(&eval(l)?, &eval(r)?),
        Expr::Sub(l, r) => arithmetic("-", &eval(l)?, &eval(r)?, i64::checked_sub, |a, b| a - b),
        Expr::Mul(l, r) => arithmetic("*", &eval(l)?, &eval(r)?, i64::checked_mul, |a, b| a * b),
        Expr::Div(l, r) => divide(&eval(l)?, &eval(r)?),
        Expr::Rem(l, r) => remainder(&eval(l)?, &eval(r)?),
        Expr::Matches(inner, pattern) => Ok(Value::Bool(pattern.is_match(&eval(inner)?.to_text()))),
        Expr::Call(name, items) => {
            let values = items.iter().map(eval).collect::<Result<Vec<_>, _>>()?;
            match builtins::call(name, &values) {
                Some(result) => result,
                None => env.invoke(&Callable::Registered(name.clone()), &values),
            }
        }
    }
}

fn mismatch(operation: &str, left: &Value, right: &Value) -> EvaluationError {
    EvaluationError::TypeMismatch {
        operation: operation.to_string(),
        left: left.type_name().to_string(),
        right: right.type_name().to_string(),
    }
}

fn ordering(
    operation: &str,
    left: &Value,
    right: &Value,
    test: impl Fn(Ordering) -> bool,
) -> Result<Value, EvaluationError> {
    left.partial_compare(right)
        .map(|o| Value::Bool(test(o)))
        .ok_or_else(|| mismatch(operation, left, right))
}

fn arithmetic(
    operation: &str,
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, EvaluationError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b)
            .map(Value::Int)
            .ok_or_else(|| EvaluationError::Overflow(operation.to_string())),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(*a as f64, *b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(*a, *b as f64))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
        _ => Err(mismatch(operation, left, right)),
    }
}

fn add(left: &Value, right: &Value) -> Result<Value, EvaluationError> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        (Value::Record(a), Value::Record(b)) => {
            Ok(Value::Record(a.iter().chain(b.iter()).cloned().collect()))
        }
        _ => arithmetic("+", left, right, i64::checked_add, |a, b| a + b),
    }
}

fn divide(left: &Value, right: &Value) -> Result<Value, EvaluationError> {
    let (Some(a), Some(b)) = (number(left), number(right)) else {
        return Err(mismatch("/", left, right));
    };
    if b == 0.0 {
        return Err(EvaluationError::DivisionByZero);
    }
    Ok(Value::Float(a / b))
}

fn remainder(left: &Value, right: &Value) -> Result<Value, EvaluationError> {
    match (left, right) {
        (Value::Int(_), Value::Int(0)) => Err(EvaluationError::DivisionByZero),
        (Value::Int(a), Value::Int(b)) => a
            .checked_rem_euclid(*b)
            .map(Value::Int)
            .ok_or_else(|| EvaluationError::Overflow("%".to_string())),
        _ => {
            let (Some(a), Some(b)) = (number(left), number(right)) else {
                return Err(mismatch("%", left, right));
            };
            if b == 0.0 {
                return Err(EvaluationError::DivisionByZero);
            }
            Ok(Value::Float(a.rem_euclid(b)))
        }
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Built-in named functions
///
/// The binary reducers treat a `Null` accumulator as "no value yet", so
/// `red +` starts from the first input rather than from zero.
pub mod builtins {
    use super::{add, arithmetic, mismatch};
    use crate::core::error::EvaluationError;
    use crate::core::value::Value;
    use std::cmp::Ordering;

    pub const NAMES: &[&str] = &[
        "+", "*", "min", "max", "count", "concat", "and", "or", "upper", "lower", "len", "str",
    ];

    pub fn is_builtin(name: &str) -> bool {
        NAMES.contains(&name)
    }

    /// Call a built-in; `None` if no built-in has this name
    pub fn call(name: &str, args: &[Value]) -> Option<Result<Value, EvaluationError>> {
        let result = match name {
            "+" => reduce(args, |a, b| add(a, b)),
            "*" => reduce(args, |a, b| {
                arithmetic("*", a, b, i64::checked_mul, |x, y| x * y)
            }),
            "min" => reduce(args, |a, b| extreme("min", a, b, Ordering::Less)),
            "max" => reduce(args, |a, b| extreme("max", a, b, Ordering::Greater)),
            "count" => count(args),
            "concat" => reduce(args, |a, b| {
                Ok(Value::Str(format!("{}{}", a.to_text(), b.to_text())))
            }),
            "and" => reduce(args, |a, b| Ok(Value::Bool(a.is_truthy() && b.is_truthy()))),
            "or" => reduce(args, |a, b| Ok(Value::Bool(a.is_truthy() || b.is_truthy()))),
            "upper" => unary(args, |v| Ok(Value::Str(v.to_text().to_uppercase()))),
            "lower" => unary(args, |v| Ok(Value::Str(v.to_text().to_lowercase()))),
            "len" => unary(args, |v| {
                let len = match v {
                    Value::Str(s) => s.chars().count(),
                    Value::Record(fields) => fields.len(),
                    Value::Null => 0,
                    _ => 1,
                };
                Ok(Value::Int(len as i64))
            }),
            "str" => unary(args, |v| Ok(Value::Str(v.to_text()))),
            _ => return None,
        };
        Some(result)
    }

    fn reduce(
        args: &[Value],
        op: impl Fn(&Value, &Value) -> Result<Value, EvaluationError>,
    ) -> Result<Value, EvaluationError> {
        let mut acc = Value::Null;
        for arg in args {
            acc = match (&acc, arg) {
                (Value::Null, x) => x.clone(),
                (a, Value::Null) => a.clone(),
                (a, b) => op(a, b)?,
            };
        }
        Ok(acc)
    }

    fn count(args: &[Value]) -> Result<Value, EvaluationError> {
        match args.first() {
            Some(Value::Int(n)) => n
                .checked_add(1)
                .map(Value::Int)
                .ok_or_else(|| EvaluationError::Overflow("count".to_string())),
            Some(Value::Null) | None => Ok(Value::Int(1)),
            Some(other) => Err(EvaluationError::Failed(format!(
                "count accumulator must be an int, got {}",
                other.type_name()
            ))),
        }
    }

    fn extreme(
        name: &str,
        a: &Value,
        b: &Value,
        keep: Ordering,
    ) -> Result<Value, EvaluationError> {
        match b.partial_compare(a) {
            Some(o) if o == keep => Ok(b.clone()),
            Some(_) => Ok(a.clone()),
            None => Err(mismatch(name, a, b)),
        }
    }

    fn unary(
        args: &[Value],
        op: impl Fn(&Value) -> Result<Value, EvaluationError>,
    ) -> Result<Value, EvaluationError> {
        match args {
            [single] => op(single),
            _ => Err(EvaluationError::Failed(format!(
                "expected 1 argument, got {}",
                args.len()
            ))),
        }
    }
}
