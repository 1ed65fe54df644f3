//! Runner configuration.

use super::FailureMode;
use crate::errors::StagecraftError;
use serde::{Deserialize, Serialize};
use std::env;

/// Environment variable selecting the failure mode.
pub const ENV_FAILURE_MODE: &str = "STAGECRAFT_FAILURE_MODE";
/// Environment variable setting the default loop bound.
pub const ENV_MAX_LOOP_ITERATIONS: &str = "STAGECRAFT_MAX_LOOP_ITERATIONS";
/// Environment variable naming the default loop index variable.
pub const ENV_LOOP_INDEX_VARIABLE: &str = "STAGECRAFT_LOOP_INDEX_VARIABLE";

/// Default bound for loops that declare none.
pub const DEFAULT_MAX_LOOP_ITERATIONS: usize = 10_000;
/// Default name of the per-iteration index variable.
pub const DEFAULT_LOOP_INDEX_VARIABLE: &str = "iteration";

fn default_max_loop_iterations() -> usize {
    DEFAULT_MAX_LOOP_ITERATIONS
}

fn default_loop_index_variable() -> String {
    DEFAULT_LOOP_INDEX_VARIABLE.to_string()
}

/// Configuration of a [`PipelineRunner`](super::PipelineRunner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// What happens to remaining stages after a failure.
    #[serde(default)]
    pub failure_mode: FailureMode,
    /// Bound applied to loops without an explicit one.
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: usize,
    /// Index variable name for loops without an explicit one.
    #[serde(default = "default_loop_index_variable")]
    pub loop_index_variable: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            failure_mode: FailureMode::default(),
            max_loop_iterations: default_max_loop_iterations(),
            loop_index_variable: default_loop_index_variable(),
        }
    }
}

impl RunnerConfig {
    /// Sets the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Sets the default loop bound.
    #[must_use]
    pub fn with_max_loop_iterations(mut self, max: usize) -> Self {
        self.max_loop_iterations = max;
        self
    }

    /// Sets the default loop index variable.
    #[must_use]
    pub fn with_loop_index_variable(mut self, name: impl Into<String>) -> Self {
        self.loop_index_variable = name.into();
        self
    }

    /// Parses a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StagecraftError::Config`] if the document is invalid.
    pub fn from_json_str(raw: &str) -> Result<Self, StagecraftError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| StagecraftError::Config(format!("invalid runner config: {e}")))?;
        config.validate()
    }

    /// Builds a configuration from `STAGECRAFT_*` environment variables,
    /// falling back to defaults for unset ones.
    ///
    /// # Errors
    ///
    /// Returns [`StagecraftError::Config`] if a set variable cannot be parsed.
    pub fn from_env() -> Result<Self, StagecraftError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StagecraftError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_FAILURE_MODE) {
            config.failure_mode = raw
                .parse()
                .map_err(|e| StagecraftError::Config(format!("{ENV_FAILURE_MODE}: {e}")))?;
        }
        if let Some(raw) = lookup(ENV_MAX_LOOP_ITERATIONS) {
            config.max_loop_iterations = raw.trim().parse().map_err(|e| {
                StagecraftError::Config(format!("{ENV_MAX_LOOP_ITERATIONS}: {e}"))
            })?;
        }
        if let Some(raw) = lookup(ENV_LOOP_INDEX_VARIABLE) {
            config.loop_index_variable = raw.trim().to_string();
        }
        config.validate()
    }

    fn validate(self) -> Result<Self, StagecraftError> {
        if self.max_loop_iterations == 0 {
            return Err(StagecraftError::Config(
                "max_loop_iterations must be positive".to_string(),
            ));
        }
        if self.loop_index_variable.trim().is_empty() {
            return Err(StagecraftError::Config(
                "loop_index_variable cannot be empty".to_string(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.failure_mode, FailureMode::FailFast);
        assert_eq!(config.max_loop_iterations, 10_000);
        assert_eq!(config.loop_index_variable, "iteration");
    }

    #[test]
    fn test_from_json_with_partial_fields() {
        let config =
            RunnerConfig::from_json_str(r#"{"failure_mode": "best_effort", "max_loop_iterations": 5}"#)
                .unwrap();
        assert_eq!(
            config,
            RunnerConfig::default()
                .with_failure_mode(FailureMode::BestEffort)
                .with_max_loop_iterations(5)
        );
    }

    #[test]
    fn test_from_json_rejects_zero_bound() {
        let err = RunnerConfig::from_json_str(r#"{"max_loop_iterations": 0}"#).unwrap_err();
        assert!(matches!(err, StagecraftError::Config(_)));
    }

    #[test]
    fn test_from_lookup() {
        let config = RunnerConfig::from_lookup(lookup(&[
            (ENV_FAILURE_MODE, "continue-on-failure"),
            (ENV_MAX_LOOP_ITERATIONS, " 25 "),
            (ENV_LOOP_INDEX_VARIABLE, "page"),
        ]))
        .unwrap();
        assert_eq!(config.failure_mode, FailureMode::ContinueOnFailure);
        assert_eq!(config.max_loop_iterations, 25);
        assert_eq!(config.loop_index_variable, "page");
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        assert!(RunnerConfig::from_lookup(lookup(&[(ENV_MAX_LOOP_ITERATIONS, "many")])).is_err());
        assert!(RunnerConfig::from_lookup(lookup(&[(ENV_FAILURE_MODE, "yolo")])).is_err());
        assert_eq!(RunnerConfig::from_lookup(lookup(&[])).unwrap(), RunnerConfig::default());
    }
}
