//! Structured values carried by pipeline streams

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

/// A single item flowing through a stream
///
/// Records are ordered tuples of values. A one-field record and the scalar
/// it contains are treated as the same thing by operators (see
/// [`Value::from_fields`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Record(Vec<Value>),
    Object(HostObject),
}

/// Opaque objects owned by the host system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostObject {
    File(FileInfo),
}

/// Kind of filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    Other,
}

/// A filesystem entry as produced by `ls`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub kind: FileKind,
    pub size: u64,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn record<I: IntoIterator<Item = Value>>(fields: I) -> Self {
        Value::Record(fields.into_iter().collect())
    }

    /// Build a value from a list of fields; a single field is unwrapped
    pub fn from_fields(mut fields: Vec<Value>) -> Self {
        if fields.len() == 1 {
            fields.pop().unwrap_or(Value::Null)
        } else {
            Value::Record(fields)
        }
    }

    /// The fields of this value: a record's contents, or the value itself
    pub fn fields(&self) -> Vec<Value> {
        match self {
            Value::Record(fields) => fields.clone(),
            other => vec![other.clone()],
        }
    }

    pub fn into_fields(self) -> Vec<Value> {
        match self {
            Value::Record(fields) => fields,
            other => vec![other],
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Record(_) => "record",
            Value::Object(HostObject::File(_)) => "file",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Record(fields) => !fields.is_empty(),
            Value::Object(_) => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Natural text form: strings verbatim, everything else as displayed
    pub fn to_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Stable key for grouping and de-duplication
    pub fn key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }

    /// Compare values of compatible kinds; `None` when the kinds differ
    pub fn partial_compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Record(a), Value::Record(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.partial_compare(y)? {
                        Ordering::Equal => continue,
                        unequal => return Some(unequal),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            (Value::Object(a), Value::Object(b)) => (a == b).then_some(Ordering::Equal),
            (a, b) => {
                let (x, y) = (a.as_number()?, b.as_number()?);
                Some(x.total_cmp(&y))
            }
        }
    }

    /// Total order used for sorting mixed streams: kinds first, then values
    pub fn compare(&self, other: &Value) -> Ordering {
        self.partial_compare(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::Record(_) => 4,
            Value::Object(_) => 5,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            // Debug keeps the fractional part so floats survive a text hop
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::Record(fields) => {
                write!(f, "(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match field {
                        Value::Str(s) => write!(f, "{:?}", s)?,
                        Value::Null => write!(f, "null")?,
                        other => write!(f, "{}", other)?,
                    }
                }
                write!(f, ")")
            }
            Value::Object(object) => write!(f, "{}", object),
        }
    }
}

impl fmt::Display for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostObject::File(info) => write!(f, "{}", info.path.display()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<FileInfo> for Value {
    fn from(v: FileInfo) -> Self {
        Value::Object(HostObject::File(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_field_unwraps() {
        assert_eq!(Value::from_fields(vec![Value::Int(3)]), Value::Int(3));
        assert_eq!(
            Value::from_fields(vec![Value::Int(1), Value::Int(2)]),
            Value::record([Value::Int(1), Value::Int(2)])
        );
        assert_eq!(Value::Int(7).fields(), vec![Value::Int(7)]);
    }

    #[test]
    fn test_numeric_comparison_across_kinds() {
        assert_eq!(
            Value::Int(2).partial_compare(&Value::Float(2.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(Value::str("a").partial_compare(&Value::Int(1)), None);
        assert_eq!(Value::Int(5).compare(&Value::str("a")), Ordering::Less);
    }

    #[test]
    fn test_display() {
        let v = Value::record([Value::Int(1), Value::str("x"), Value::Float(2.5)]);
        assert_eq!(v.to_string(), "(1, \"x\", 2.5)");
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::str("abc").to_text(), "abc");
    }

    #[test]
    fn test_yaml_deserialization() {
        let v: Value = serde_yaml::from_str("[1, 2.5, foo, true, null]").unwrap();
        assert_eq!(
            v,
            Value::record([
                Value::Int(1),
                Value::Float(2.5),
                Value::str("foo"),
                Value::Bool(true),
                Value::Null
            ])
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::str("x").is_truthy());
        assert!(!Value::Record(vec![]).is_truthy());
    }
}
