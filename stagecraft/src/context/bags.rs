//! Scope frames holding variable values.

use std::collections::{HashMap, HashSet};

/// One lexical scope of the pipeline context.
///
/// Frames are pushed when a sub-stage group or a loop iteration starts and
/// popped when it ends. Names in `exports` are copied into the enclosing
/// frame when the frame is popped after a successful exit.
#[derive(Debug, Clone, Default)]
pub struct ScopeFrame {
    label: String,
    values: HashMap<String, serde_json::Value>,
    exports: HashSet<String>,
}

impl ScopeFrame {
    /// Creates a new empty frame.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            values: HashMap::new(),
            exports: HashSet::new(),
        }
    }

    /// Returns the frame label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Gets a value from this frame only.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Checks if this frame holds a key.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Sets a value, overwriting any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    /// Sets a value and marks it for propagation to the enclosing frame.
    pub fn set_exported(&mut self, key: impl Into<String>, value: serde_json::Value) {
        let key = key.into();
        self.exports.insert(key.clone());
        self.values.insert(key, value);
    }

    /// Removes a value from this frame.
    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.exports.remove(key);
        self.values.remove(key)
    }

    /// Returns true if the key is marked for propagation.
    #[must_use]
    pub fn is_exported(&self, key: &str) -> bool {
        self.exports.contains(key)
    }

    /// Consumes the frame and returns its exported entries.
    #[must_use]
    pub fn into_exports(mut self) -> Vec<(String, serde_json::Value)> {
        let mut exported: Vec<(String, serde_json::Value)> = self
            .exports
            .iter()
            .filter_map(|key| self.values.remove(key).map(|v| (key.clone(), v)))
            .collect();
        exported.sort_by(|a, b| a.0.cmp(&b.0));
        exported
    }

    /// Returns an iterator over the frame's entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.values.iter()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
