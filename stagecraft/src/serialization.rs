//! Dictionary conversion for typed variables.
//!
//! Typed records cross process and storage boundaries as JSON mappings.
//! [`DictSerializable`] is implemented for every serde type, so a record
//! with enum fields and nested records converts to a mapping and back
//! without any per-type code. Keys can optionally be rewritten to
//! camelCase for consumers that expect it.

use crate::core::json_type_name;
use crate::errors::SerializationError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON mapping.
pub type Dict = Map<String, Value>;

/// Key style of a dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyCase {
    /// Keys as serde produces them.
    #[default]
    AsIs,
    /// `snake_case` keys rewritten to `camelCase`.
    Camel,
}

/// Conversion to and from JSON mappings.
pub trait DictSerializable: Sized {
    /// Converts the value to a mapping.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::NotAMapping`] if the value does not
    /// serialize to a JSON object.
    fn to_dict(&self) -> Result<Dict, SerializationError> {
        self.to_dict_with(KeyCase::AsIs)
    }

    /// Converts the value to a mapping with the given key style.
    ///
    /// # Errors
    ///
    /// See [`DictSerializable::to_dict`].
    fn to_dict_with(&self, case: KeyCase) -> Result<Dict, SerializationError>;

    /// Rebuilds a value from a mapping.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::Json`] if the mapping does not match
    /// the type.
    fn from_dict(dict: Dict) -> Result<Self, SerializationError> {
        Self::from_dict_with(dict, KeyCase::AsIs)
    }

    /// Rebuilds a value from a mapping written with the given key style.
    ///
    /// # Errors
    ///
    /// See [`DictSerializable::from_dict`].
    fn from_dict_with(dict: Dict, case: KeyCase) -> Result<Self, SerializationError>;
}

impl<T> DictSerializable for T
where
    T: Serialize + DeserializeOwned,
{
    fn to_dict_with(&self, case: KeyCase) -> Result<Dict, SerializationError> {
        let value = serde_json::to_value(self)?;
        let value = match case {
            KeyCase::AsIs => value,
            KeyCase::Camel => rename_keys(value, &to_camel_case),
        };
        match value {
            Value::Object(map) => Ok(map),
            other => Err(SerializationError::NotAMapping {
                found: json_type_name(&other).to_string(),
            }),
        }
    }

    fn from_dict_with(dict: Dict, case: KeyCase) -> Result<Self, SerializationError> {
        let value = match case {
            KeyCase::AsIs => Value::Object(dict),
            KeyCase::Camel => rename_keys(Value::Object(dict), &to_snake_case),
        };
        Ok(serde_json::from_value(value)?)
    }
}

/// Rewrites every object key in `value`, recursing into arrays and nested
/// objects.
#[must_use]
pub fn rename_keys(value: Value, rename: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (rename(&k), rename_keys(v, rename)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| rename_keys(v, rename)).collect())
        }
        other => other,
    }
}

/// Converts `snake_case` to `camelCase`.
#[must_use]
pub fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' && !out.is_empty() {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Converts `camelCase` to `snake_case`.
#[must_use]
pub fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
