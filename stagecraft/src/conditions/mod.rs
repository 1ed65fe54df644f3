//! Stage conditions.
//!
//! A [`StageCondition`] decides whether a stage executes. Conditions form a
//! closed set of variants combined with [`StageCondition::And`] and
//! [`StageCondition::Or`]; arbitrary logic goes through
//! [`StageCondition::Custom`], whose failures are reported as
//! [`StageError::ConditionEvaluation`].

use crate::context::PipelineContext;
use crate::core::is_truthy;
use crate::errors::StageError;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A fallible predicate over the context and the gated stage's name.
pub type ConditionFn = Arc<dyn Fn(&PipelineContext, &str) -> anyhow::Result<bool> + Send + Sync>;

/// A predicate over a single context value.
pub type ValuePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// The outcome of evaluating a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionVerdict {
    /// Whether the stage should execute.
    pub execute: bool,
    /// Why the stage is skipped; `None` when it executes.
    pub reason: Option<String>,
}

impl ConditionVerdict {
    /// A verdict to execute.
    #[must_use]
    pub fn run() -> Self {
        Self {
            execute: true,
            reason: None,
        }
    }

    /// A verdict to skip, with the reason.
    #[must_use]
    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            execute: false,
            reason: Some(reason.into()),
        }
    }

    /// Returns the skip reason, or an empty string.
    #[must_use]
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or_default()
    }
}

/// A predicate deciding whether a stage executes.
#[derive(Clone, Default)]
pub enum StageCondition {
    /// Always execute.
    #[default]
    Always,
    /// Never execute.
    Never,
    /// Execute when a configuration flag is truthy.
    ///
    /// Reads `config` when given, otherwise the context's configuration.
    ConfigFlag {
        /// The flag key.
        key: String,
        /// An explicit configuration map overriding the context's.
        config: Option<HashMap<String, Value>>,
    },
    /// Execute when a variable is visible in the context.
    VariableExists(String),
    /// Execute when a variable is visible and truthy.
    InputNotEmpty(String),
    /// Execute when a variable is visible and satisfies a predicate.
    Variable {
        /// The variable name.
        name: String,
        /// The predicate applied to its value.
        predicate: ValuePredicate,
    },
    /// Execute when every sub-condition holds; the first failing
    /// sub-condition supplies the reason.
    And(Vec<StageCondition>),
    /// Execute when any sub-condition holds.
    Or(Vec<StageCondition>),
    /// Execute when a caller-supplied predicate returns true.
    Custom {
        /// The predicate.
        predicate: ConditionFn,
        /// The reason reported when the predicate returns false.
        skip_reason: String,
    },
}

impl StageCondition {
    /// Creates a configuration flag condition reading the context's configuration.
    #[must_use]
    pub fn config_flag(key: impl Into<String>) -> Self {
        Self::ConfigFlag {
            key: key.into(),
            config: None,
        }
    }

    /// Creates a configuration flag condition reading an explicit map.
    #[must_use]
    pub fn config_flag_in(
        key: impl Into<String>,
        config: impl IntoIterator<Item = (impl Into<String>, Value)>,
    ) -> Self {
        Self::ConfigFlag {
            key: key.into(),
            config: Some(config.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    /// Creates a variable-exists condition.
    #[must_use]
    pub fn variable_exists(name: impl Into<String>) -> Self {
        Self::VariableExists(name.into())
    }

    /// Creates an input-not-empty condition.
    #[must_use]
    pub fn input_not_empty(name: impl Into<String>) -> Self {
        Self::InputNotEmpty(name.into())
    }

    /// Creates a value predicate condition.
    pub fn variable<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::Variable {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Creates a custom condition.
    pub fn custom<F>(skip_reason: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&PipelineContext, &str) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self::Custom {
            predicate: Arc::new(predicate),
            skip_reason: skip_reason.into(),
        }
    }

    /// Combines with another condition; both must hold.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::And(mut conditions) => {
                conditions.push(other);
                Self::And(conditions)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Combines with another condition; either may hold.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Or(mut conditions) => {
                conditions.push(other);
                Self::Or(conditions)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// Evaluates the condition for the named stage.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::ConditionEvaluation`] if a custom predicate fails.
    pub fn evaluate(
        &self,
        context: &PipelineContext,
        stage: &str,
    ) -> Result<ConditionVerdict, StageError> {
        let verdict = match self {
            Self::Always => ConditionVerdict::run(),
            Self::Never => ConditionVerdict::skip("Stage is set to never execute"),
            Self::ConfigFlag { key, config } => {
                let value = match config {
                    Some(map) => map.get(key),
                    None => context.config(key),
                };
                match value {
                    Some(v) if is_truthy(v) => ConditionVerdict::run(),
                    Some(_) => ConditionVerdict::skip(format!("Config flag '{key}' is disabled")),
                    None => ConditionVerdict::skip(format!("Config flag '{key}' is not set")),
                }
            }
            Self::VariableExists(name) => {
                if context.contains(name) {
                    ConditionVerdict::run()
                } else {
                    ConditionVerdict::skip(format!("Variable '{name}' does not exist"))
                }
            }
            Self::InputNotEmpty(name) => match context.get(name) {
                Some(v) if is_truthy(v) => ConditionVerdict::run(),
                Some(_) => ConditionVerdict::skip(format!("Input '{name}' is empty")),
                None => ConditionVerdict::skip(format!("Input '{name}' does not exist")),
            },
            Self::Variable { name, predicate } => match context.get(name) {
                Some(v) if predicate(v) => ConditionVerdict::run(),
                Some(_) => {
                    ConditionVerdict::skip(format!("Variable '{name}' does not satisfy predicate"))
                }
                None => ConditionVerdict::skip(format!("Variable '{name}' does not exist")),
            },
            Self::And(conditions) => {
                for condition in conditions {
                    let verdict = condition.evaluate(context, stage)?;
                    if !verdict.execute {
                        return Ok(verdict);
                    }
                }
                ConditionVerdict::run()
            }
            Self::Or(conditions) => {
                let mut reasons = Vec::with_capacity(conditions.len());
                for condition in conditions {
                    let verdict = condition.evaluate(context, stage)?;
                    if verdict.execute {
                        return Ok(verdict);
                    }
                    reasons.push(verdict.reason().to_string());
                }
                if reasons.is_empty() {
                    ConditionVerdict::skip("No alternative condition given")
                } else {
                    ConditionVerdict::skip(format!("None of the alternatives hold: {}", reasons.join("; ")))
                }
            }
            Self::Custom {
                predicate,
                skip_reason,
            } => {
                let holds =
                    predicate(context, stage).map_err(|source| StageError::ConditionEvaluation {
                        stage: stage.to_string(),
                        source,
                    })?;
                if holds {
                    ConditionVerdict::run()
                } else {
                    ConditionVerdict::skip(skip_reason.clone())
                }
            }
        };
        Ok(verdict)
    }
}

impl fmt::Debug for StageCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::Never => write!(f, "Never"),
            Self::ConfigFlag { key, config } => f
                .debug_struct("ConfigFlag")
                .field("key", key)
                .field("explicit_config", &config.is_some())
                .finish(),
            Self::VariableExists(name) => f.debug_tuple("VariableExists").field(name).finish(),
            Self::InputNotEmpty(name) => f.debug_tuple("InputNotEmpty").field(name).finish(),
            Self::Variable { name, .. } => f.debug_struct("Variable").field("name", name).finish(),
            Self::And(conditions) => f.debug_tuple("And").field(conditions).finish(),
            Self::Or(conditions) => f.debug_tuple("Or").field(conditions).finish(),
            Self::Custom { skip_reason, .. } => f
                .debug_struct("Custom")
                .field("skip_reason", skip_reason)
                .finish(),
        }
    }
}
