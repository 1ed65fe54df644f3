//! The frame-scoped pipeline context.

use super::{ContextSnapshot, ScopeFrame};
use std::collections::HashMap;

const ROOT_FRAME: &str = "root";

/// The shared, mutable store for one pipeline run.
///
/// Holds variable values in a stack of [`ScopeFrame`]s plus a flat map of
/// configuration flags. Reads resolve against the innermost frame first and
/// fall back outward; writes always target the innermost frame. The root
/// frame can never be popped.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    frames: Vec<ScopeFrame>,
    config: HashMap<String, serde_json::Value>,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineContext {
    /// Creates a new context with an empty root frame.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: vec![ScopeFrame::new(ROOT_FRAME)],
            config: HashMap::new(),
        }
    }

    /// Seeds the root frame with initial variable values.
    #[must_use]
    pub fn with_values(
        mut self,
        values: impl IntoIterator<Item = (impl Into<String>, serde_json::Value)>,
    ) -> Self {
        for (key, value) in values {
            self.frames[0].set(key, value);
        }
        self
    }

    /// Sets the configuration map.
    #[must_use]
    pub fn with_config(
        mut self,
        config: impl IntoIterator<Item = (impl Into<String>, serde_json::Value)>,
    ) -> Self {
        self.config
            .extend(config.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    /// Gets a configuration value.
    #[must_use]
    pub fn config(&self, key: &str) -> Option<&serde_json::Value> {
        self.config.get(key)
    }

    /// Sets a configuration value.
    pub fn set_config(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.config.insert(key.into(), value);
    }

    /// Returns the full configuration map.
    #[must_use]
    pub fn config_map(&self) -> &HashMap<String, serde_json::Value> {
        &self.config
    }

    /// Gets a variable, searching from the innermost frame outward.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(key))
    }

    /// Checks if a variable is visible from the innermost frame.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Checks if the innermost frame itself holds a variable.
    #[must_use]
    pub fn contains_in_scope(&self, key: &str) -> bool {
        self.current().contains_key(key)
    }

    /// Sets a variable in the innermost frame.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.current_mut().set(key, value);
    }

    /// Sets a variable in the innermost frame and marks it for propagation
    /// to the enclosing frame on a successful pop.
    pub fn set_exported(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.current_mut().set_exported(key, value);
    }

    /// Removes a variable from the innermost frame.
    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.current_mut().remove(key)
    }

    /// Pushes a new innermost frame and returns the new depth.
    pub fn push_frame(&mut self, label: impl Into<String>) -> usize {
        let frame = ScopeFrame::new(label);
        tracing::trace!(frame = frame.label(), depth = self.frames.len() + 1, "Frame pushed");
        self.frames.push(frame);
        self.frames.len()
    }

    /// Pops the innermost frame, merging its exported variables into the
    /// enclosing frame. Exported names stay exported there, so they keep
    /// travelling outward through nested scopes.
    ///
    /// Returns false if only the root frame remains.
    pub fn pop_frame(&mut self) -> bool {
        if self.frames.len() <= 1 {
            return false;
        }
        let Some(frame) = self.frames.pop() else {
            return false;
        };
        tracing::trace!(frame = frame.label(), "Frame popped");
        let parent = self.current_mut();
        for (key, value) in frame.into_exports() {
            parent.set_exported(key, value);
        }
        true
    }

    /// Pops the innermost frame without merging anything.
    ///
    /// Returns false if only the root frame remains.
    pub fn discard_frame(&mut self) -> bool {
        if self.frames.len() <= 1 {
            return false;
        }
        if let Some(frame) = self.frames.pop() {
            tracing::trace!(frame = frame.label(), "Frame discarded");
        }
        true
    }

    /// Discards frames until at most `depth` remain (never below the root).
    pub fn truncate(&mut self, depth: usize) {
        while self.frames.len() > depth.max(1) {
            self.discard_frame();
        }
    }

    /// Returns the number of frames, including the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Returns frame labels from the root inward.
    #[must_use]
    pub fn frame_labels(&self) -> Vec<&str> {
        self.frames.iter().map(ScopeFrame::label).collect()
    }

    /// Returns the names visible from the innermost frame, sorted.
    #[must_use]
    pub fn visible_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .frames
            .iter()
            .flat_map(|frame| frame.iter().map(|(k, _)| k.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Captures the visible variables and configuration.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        let mut snapshot = ContextSnapshot::new().with_depth(self.frames.len());
        for frame in &self.frames {
            for (key, value) in frame.iter() {
                snapshot.values.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in &self.config {
            snapshot.config.insert(key.clone(), value.clone());
        }
        snapshot
    }

    fn current(&self) -> &ScopeFrame {
        // The root frame is never removed.
        &self.frames[self.frames.len() - 1]
    }

    fn current_mut(&mut self) -> &mut ScopeFrame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
}
