//! Declared variable types and value helpers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The declared type of a variable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarType {
    /// Any JSON value.
    #[default]
    Any,
    /// A boolean.
    Bool,
    /// An integral number.
    Integer,
    /// Any number.
    Number,
    /// A string.
    String,
    /// An array of any values.
    Array,
    /// A mapping.
    Object,
    /// Tabular data: an array of row objects.
    Table,
}

impl VarType {
    /// Returns true if `value` conforms to this type. `null` never conforms
    /// except to `Any`.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Table => value
                .as_array()
                .is_some_and(|rows| rows.iter().all(Value::is_object)),
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Bool => write!(f, "bool"),
            Self::Integer => write!(f, "integer"),
            Self::Number => write!(f, "number"),
            Self::String => write!(f, "string"),
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
            Self::Table => write!(f, "table"),
        }
    }
}

/// Returns the truthiness of a JSON value.
///
/// `null`, `false`, zero, and empty strings, arrays and objects are falsy.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Returns the JSON type name of a value, for diagnostics.
#[must_use]
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!({})));

        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(-1)));
        assert!(is_truthy(&json!("no")));
        assert!(is_truthy(&json!([0])));
    }

    #[test]
    fn test_var_type_accepts() {
        assert!(VarType::Any.accepts(&Value::Null));
        assert!(VarType::Integer.accepts(&json!(3)));
        assert!(!VarType::Integer.accepts(&json!(3.5)));
        assert!(VarType::Number.accepts(&json!(3.5)));
        assert!(VarType::Table.accepts(&json!([{"a": 1}, {"a": 2}])));
        assert!(VarType::Table.accepts(&json!([])));
        assert!(!VarType::Table.accepts(&json!([1, 2])));
        assert!(!VarType::String.accepts(&Value::Null));
    }

    #[test]
    fn test_json_type_name() {
        assert_eq!(json_type_name(&json!(1)), "integer");
        assert_eq!(json_type_name(&json!(1.5)), "number");
        assert_eq!(json_type_name(&json!({"a": 1})), "object");
    }
}
