//! Looping stage groups.

use super::EtlStage;
use crate::conditions::StageCondition;
use crate::context::PipelineContext;
use crate::core::is_truthy;
use crate::errors::StageError;
use std::fmt;
use std::sync::Arc;

/// Decides, before each iteration, whether a loop continues.
#[derive(Clone)]
pub enum LoopPredicate {
    /// Continue while a context variable is truthy.
    Variable(String),
    /// Continue while a stage condition holds.
    Condition(StageCondition),
    /// Continue while a closure over the context and the zero-based
    /// iteration index returns true.
    Custom(Arc<dyn Fn(&PipelineContext, usize) -> bool + Send + Sync>),
}

impl LoopPredicate {
    /// Continues while the named variable is truthy.
    #[must_use]
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// Continues while the condition holds.
    #[must_use]
    pub fn condition(condition: StageCondition) -> Self {
        Self::Condition(condition)
    }

    /// Continues while the closure returns true.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&PipelineContext, usize) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// Runs exactly `n` iterations.
    #[must_use]
    pub fn times(n: usize) -> Self {
        Self::custom(move |_, iteration| iteration < n)
    }

    /// Evaluates the predicate before iteration `iteration`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::ConditionEvaluation`] if a condition fails.
    pub fn should_continue(
        &self,
        context: &PipelineContext,
        stage: &str,
        iteration: usize,
    ) -> Result<bool, StageError> {
        match self {
            Self::Variable(name) => Ok(context.get(name).is_some_and(is_truthy)),
            Self::Condition(condition) => Ok(condition.evaluate(context, stage)?.execute),
            Self::Custom(predicate) => Ok(predicate(context, iteration)),
        }
    }
}

impl fmt::Debug for LoopPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable(name) => f.debug_tuple("Variable").field(name).finish(),
            Self::Condition(condition) => f.debug_tuple("Condition").field(condition).finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// A body of stages executed repeatedly while a predicate holds.
///
/// Each iteration runs in its own context frame seeded with the iteration
/// index; only values written through propagating slots outlive it. The
/// loop fails with [`StageError::LoopBoundExceeded`] if the predicate still
/// holds once `max_iterations` iterations have run.
#[derive(Debug, Clone)]
pub struct StageLoop {
    body: Vec<EtlStage>,
    predicate: LoopPredicate,
    max_iterations: Option<usize>,
    index_variable: Option<String>,
}

impl StageLoop {
    /// Creates a loop over the body stages.
    #[must_use]
    pub fn new(body: impl IntoIterator<Item = EtlStage>, predicate: LoopPredicate) -> Self {
        Self {
            body: body.into_iter().collect(),
            predicate,
            max_iterations: None,
            index_variable: None,
        }
    }

    /// Sets the iteration bound. Without one the runner's configured bound applies.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Sets the name of the variable holding the iteration index.
    #[must_use]
    pub fn with_index_variable(mut self, name: impl Into<String>) -> Self {
        self.index_variable = Some(name.into());
        self
    }

    /// Wraps the loop in a stage named after its first body stages.
    #[must_use]
    pub fn into_stage(self) -> EtlStage {
        let lead: Vec<&str> = self.body.iter().take(2).map(EtlStage::name).collect();
        let name = format!("loop_{}_etc", lead.join("_"));
        let description = format!("Loop executing {} stages", self.body.len());
        EtlStage::looping(name, self).with_description(description)
    }

    /// Returns the body stages.
    #[must_use]
    pub fn body(&self) -> &[EtlStage] {
        &self.body
    }

    /// Returns the predicate.
    #[must_use]
    pub fn predicate(&self) -> &LoopPredicate {
        &self.predicate
    }

    /// Returns the explicit iteration bound.
    #[must_use]
    pub fn max_iterations(&self) -> Option<usize> {
        self.max_iterations
    }

    /// Returns the explicit index variable name.
    #[must_use]
    pub fn index_variable(&self) -> Option<&str> {
        self.index_variable.as_deref()
    }

    /// Returns the index variable name, or `fallback` if none is set.
    #[must_use]
    pub fn index_variable_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.index_variable.as_deref().unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_variable_predicate_uses_truthiness() {
        let predicate = LoopPredicate::variable("has_more");
        let ctx = PipelineContext::new();
        assert!(!predicate.should_continue(&ctx, "l", 0).unwrap());

        let ctx = PipelineContext::new().with_values([("has_more", json!(true))]);
        assert!(predicate.should_continue(&ctx, "l", 0).unwrap());

        let ctx = PipelineContext::new().with_values([("has_more", json!(0))]);
        assert!(!predicate.should_continue(&ctx, "l", 0).unwrap());
    }

    #[test]
    fn test_times_predicate() {
        let predicate = LoopPredicate::times(2);
        let ctx = PipelineContext::new();
        let results: Vec<bool> = (0..4)
            .map(|i| predicate.should_continue(&ctx, "l", i).unwrap())
            .collect();
        assert_eq!(results, vec![true, true, false, false]);
    }

    #[test]
    fn test_condition_predicate() {
        let predicate = LoopPredicate::condition(StageCondition::config_flag("paginate"));
        let ctx = PipelineContext::new().with_config([("paginate", json!(true))]);
        assert!(predicate.should_continue(&ctx, "l", 5).unwrap());
    }

    #[test]
    fn test_into_stage_derives_name() {
        let stage = StageLoop::new(
            [EtlStage::new("fetch"), EtlStage::new("parse"), EtlStage::new("store")],
            LoopPredicate::times(1),
        )
        .with_max_iterations(5)
        .into_stage();

        assert_eq!(stage.name(), "loop_fetch_parse_etc");
        assert_eq!(stage.description(), Some("Loop executing 3 stages"));
        assert_eq!(stage.children().len(), 3);
    }

    #[test]
    fn test_index_variable_fallback() {
        let plain = StageLoop::new([EtlStage::new("a")], LoopPredicate::times(1));
        assert_eq!(plain.index_variable_or("iteration"), "iteration");

        let named = plain.with_index_variable("page");
        assert_eq!(named.index_variable(), Some("page"));
        assert_eq!(named.index_variable_or("iteration"), "page");
    }
}
