//! Immutable context snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A point-in-time copy of the variables visible in a pipeline context.
///
/// Inner frames shadow outer ones, so each name maps to the value a stage
/// would have read at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Visible variables.
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
    /// Configuration flags.
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    /// Number of frames on the stack at capture time.
    pub depth: usize,
    /// When the snapshot was taken.
    pub captured_at: DateTime<Utc>,
}

impl Default for ContextSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            config: BTreeMap::new(),
            depth: 1,
            captured_at: Utc::now(),
        }
    }

    /// Sets the frame depth.
    #[must_use]
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Gets a captured variable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Checks if a variable was captured.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Converts the snapshot to a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "values": self.values,
            "config": self.config,
            "depth": self.depth,
            "captured_at": self.captured_at.to_rfc3339(),
        })
    }
}
