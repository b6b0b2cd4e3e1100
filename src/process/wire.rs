//! Line wire format between the engine and external programs
//!
//! One value per line. Scalars are written in their natural text form;
//! records are written as their fields joined by a separator. Lines read
//! back become integers or floats when they parse as such, strings
//! otherwise. Values containing a newline do not survive a round trip.

use crate::core::value::Value;

/// Default separator between record fields
pub const DEFAULT_SEPARATOR: &str = " ";

/// Encodes values to lines and decodes lines to values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineCodec {
    separator: String,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl LineCodec {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    /// Text of a value followed by a single newline
    pub fn encode(&self, value: &Value) -> String {
        let mut line = match value {
            Value::Record(fields) => fields
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(&self.separator),
            other => other.to_text(),
        };
        line.push('\n');
        line
    }

    /// Value of one line, with the trailing newline already removed
    pub fn decode(&self, line: &str) -> Value {
        decode(line)
    }
}

/// Parse a line as an integer, then as a finite float, else keep it as text
pub fn decode(line: &str) -> Value {
    if let Ok(n) = line.parse::<i64>() {
        return Value::Int(n);
    }
    // Rules out "inf", "NaN" and friends, which would not read as numbers
    let numeric = line
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    if numeric {
        if let Ok(x) = line.parse::<f64>() {
            if x.is_finite() {
                return Value::Float(x);
            }
        }
    }
    Value::Str(line.to_string())
}

/// Strip the line terminator from a raw stdout segment
pub fn line_text(segment: &[u8]) -> String {
    let segment = segment.strip_suffix(b"\n").unwrap_or(segment);
    String::from_utf8_lossy(segment).into_owned()
}
