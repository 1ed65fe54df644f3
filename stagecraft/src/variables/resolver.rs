//! Binding variable slots against a pipeline context.
//!
//! A stage execution goes through two phases here. [`VariableResolver::bind`]
//! resolves every slot before the recipe runs, and
//! [`VariableResolver::commit`] writes the produced and transformed values
//! back once the recipe has succeeded. Nothing touches the context or any
//! sink in between, so a failing recipe leaves no partial output behind.

use super::{SlotRole, StageRef, VariableSlot};
use crate::context::PipelineContext;
use crate::core::json_type_name;
use crate::errors::{StageError, ValidationError};
use crate::variables::Discrepancy;
use serde_json::Value;
use std::collections::HashMap;

/// The slot values bound for one stage execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageBinding {
    values: HashMap<String, Value>,
    order: Vec<String>,
}

impl StageBinding {
    /// Creates an empty binding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a bound value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Returns true if the name is bound.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Binds a value, keeping the position of an existing binding.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if !self.values.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.values.insert(name, value);
    }

    /// Returns bound names in the order they were bound.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Returns the number of bound values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the bound values keyed by name.
    #[must_use]
    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }
}

/// Resolves the slots of one stage.
#[derive(Debug, Clone, Copy)]
pub struct VariableResolver<'a> {
    stage: &'a str,
    description: Option<&'a str>,
    slots: &'a [VariableSlot],
    params: &'a HashMap<String, Value>,
}

impl<'a> VariableResolver<'a> {
    /// Creates a resolver for the named stage's slots and parameters.
    #[must_use]
    pub fn new(
        stage: &'a str,
        slots: &'a [VariableSlot],
        params: &'a HashMap<String, Value>,
    ) -> Self {
        Self {
            stage,
            description: None,
            slots,
            params,
        }
    }

    /// Sets the stage description visible to stage-aware factories.
    #[must_use]
    pub fn with_description(mut self, description: Option<&'a str>) -> Self {
        self.description = description;
        self
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage(&self) -> &str {
        self.stage
    }

    /// Resolves a single slot.
    ///
    /// `bound` holds the sibling values resolved so far and is what a
    /// stage-aware factory sees. Resolution order, first match wins:
    ///
    /// 1. the pinned value,
    /// 2. for consume and transform slots, the value visible in the context,
    /// 3. for consume and transform slots, a load from a readable source,
    /// 4. the default or factory.
    ///
    /// Returns `Ok(None)` for a produce slot with neither a pinned value nor
    /// a default; its recipe is expected to set it.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::UnresolvedVariable`] if a reading slot has no
    /// value, [`StageError::Source`] if loading fails, or
    /// [`StageError::Validation`] if a loaded value breaks the slot's schema.
    pub fn resolve(
        &self,
        slot: &VariableSlot,
        context: &PipelineContext,
        bound: &HashMap<String, Value>,
    ) -> Result<Option<Value>, StageError> {
        let view = StageRef::new(self.stage, self.description, self.params, bound, context);

        if let Some(pinned) = slot.value() {
            return Ok(Some(pinned.resolve(&view)));
        }

        if slot.role().reads() {
            if let Some(value) = context.get(slot.name()) {
                return Ok(Some(value.clone()));
            }

            if let Some(source) = slot.source().filter(|s| s.mode().can_read()) {
                tracing::debug!(
                    stage = self.stage,
                    variable = slot.name(),
                    source = %source.describe(),
                    "Loading variable from source"
                );
                let loaded = source.load().map_err(|source| StageError::Source {
                    stage: self.stage.to_string(),
                    variable: slot.name().to_string(),
                    source,
                })?;
                self.validate_schema(slot, &loaded)?;
                return Ok(Some(loaded));
            }
        }

        if let Some(default) = slot.default() {
            return Ok(Some(default.resolve(&view)));
        }

        if slot.role().reads() {
            return Err(StageError::UnresolvedVariable {
                stage: self.stage.to_string(),
                variable: slot.name().to_string(),
            });
        }
        Ok(None)
    }

    /// Resolves every slot in declaration order.
    ///
    /// Factories run exactly once per call. A produce slot whose name is
    /// already held by the innermost context frame is rejected unless it is
    /// marked `force_overwrite`.
    ///
    /// # Errors
    ///
    /// Returns the first resolution, duplicate-production or type error.
    pub fn bind(&self, context: &PipelineContext) -> Result<StageBinding, StageError> {
        let mut binding = StageBinding::new();

        for slot in self.slots {
            if slot.role() == SlotRole::Produce
                && !slot.is_force_overwrite()
                && context.contains_in_scope(slot.name())
            {
                return Err(StageError::DuplicateProduction {
                    stage: self.stage.to_string(),
                    variable: slot.name().to_string(),
                });
            }

            if let Some(value) = self.resolve(slot, context, binding.values())? {
                self.check_type(slot, &value)?;
                binding.insert(slot.name(), value);
            }
        }

        tracing::trace!(stage = self.stage, bound = binding.len(), "Slots bound");
        Ok(binding)
    }

    /// Writes produced and transformed values back after a successful recipe.
    ///
    /// Every written value is type- and schema-checked first; only then are
    /// values saved to writable sinks and finally stored in the context's
    /// innermost frame (exported when the slot propagates). Produce slots
    /// the recipe left unset are skipped with a warning.
    ///
    /// Returns the names written, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Validation`] or [`StageError::Source`]; the
    /// context is left untouched in either case.
    pub fn commit(
        &self,
        binding: &StageBinding,
        context: &mut PipelineContext,
    ) -> Result<Vec<String>, StageError> {
        let mut pending: Vec<(&VariableSlot, &Value)> = Vec::new();
        for slot in self.slots.iter().filter(|s| s.role().writes()) {
            match binding.get(slot.name()) {
                Some(value) => {
                    self.check_type(slot, value)?;
                    self.validate_schema(slot, value)?;
                    pending.push((slot, value));
                }
                None => tracing::warn!(
                    stage = self.stage,
                    variable = slot.name(),
                    "Produce slot was not set by the recipe"
                ),
            }
        }

        for (slot, value) in &pending {
            if let Some(sink) = slot.source().filter(|s| s.mode().can_write()) {
                tracing::debug!(
                    stage = self.stage,
                    variable = slot.name(),
                    sink = %sink.describe(),
                    "Saving variable to sink"
                );
                sink.save(value).map_err(|source| StageError::Source {
                    stage: self.stage.to_string(),
                    variable: slot.name().to_string(),
                    source,
                })?;
            }
        }

        let mut written = Vec::with_capacity(pending.len());
        for (slot, value) in pending {
            if slot.is_propagated() {
                context.set_exported(slot.name(), value.clone());
            } else {
                context.set(slot.name(), value.clone());
            }
            written.push(slot.name().to_string());
        }
        Ok(written)
    }

    fn check_type(&self, slot: &VariableSlot, value: &Value) -> Result<(), ValidationError> {
        if slot.var_type().accepts(value) {
            return Ok(());
        }
        Err(ValidationError {
            stage: self.stage.to_string(),
            variable: slot.name().to_string(),
            diffs: vec![Discrepancy::new(format!(
                "expected {}, found {}",
                slot.var_type(),
                json_type_name(value)
            ))],
        })
    }

    fn validate_schema(&self, slot: &VariableSlot, value: &Value) -> Result<(), ValidationError> {
        let Some(schema) = slot.schema() else {
            return Ok(());
        };
        let result = schema.validate(value);
        if result.ok {
            return Ok(());
        }
        tracing::debug!(
            stage = self.stage,
            variable = slot.name(),
            schema = schema.name(),
            diffs = result.diffs.len(),
            "Schema validation failed"
        );
        Err(ValidationError {
            stage: self.stage.to_string(),
            variable: slot.name().to_string(),
            diffs: result.diffs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VarType;
    use crate::variables::{ColumnSpec, MemorySource, TableSchema};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn no_params() -> HashMap<String, Value> {
        HashMap::new()
    }

    #[test]
    fn test_pinned_value_wins_over_context() {
        let slots = vec![VariableSlot::consume("x").with_value(json!("pinned"))];
        let params = no_params();
        let ctx = PipelineContext::new().with_values([("x", json!("context"))]);

        let binding = VariableResolver::new("s", &slots, &params).bind(&ctx).unwrap();
        assert_eq!(binding.get("x"), Some(&json!("pinned")));
    }

    #[test]
    fn test_context_wins_over_default() {
        let slots = vec![VariableSlot::consume("x").with_default(json!("default"))];
        let params = no_params();
        let ctx = PipelineContext::new().with_values([("x", json!("context"))]);

        let binding = VariableResolver::new("s", &slots, &params).bind(&ctx).unwrap();
        assert_eq!(binding.get("x"), Some(&json!("context")));
    }

    #[test]
    fn test_consume_without_value_is_unresolved() {
        let slots = vec![VariableSlot::consume("raw")];
        let params = no_params();
        let ctx = PipelineContext::new();

        let err = VariableResolver::new("clean", &slots, &params)
            .bind(&ctx)
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::UnresolvedVariable { ref stage, ref variable }
                if stage == "clean" && variable == "raw"
        ));
    }

    #[test]
    fn test_produce_without_value_is_left_unbound() {
        let slots = vec![VariableSlot::produce("out")];
        let params = no_params();
        let binding = VariableResolver::new("s", &slots, &params)
            .bind(&PipelineContext::new())
            .unwrap();
        assert!(binding.is_empty());
    }

    #[test]
    fn test_duplicate_production_checks_current_frame_only() {
        let slots = vec![VariableSlot::produce("total")];
        let params = no_params();
        let resolver = VariableResolver::new("sum", &slots, &params);

        let mut ctx = PipelineContext::new().with_values([("total", json!(1))]);
        assert!(matches!(
            resolver.bind(&ctx),
            Err(StageError::DuplicateProduction { .. })
        ));

        ctx.push_frame("iteration");
        assert!(resolver.bind(&ctx).is_ok());
    }

    #[test]
    fn test_force_overwrite_allows_reproduction() {
        let slots = vec![VariableSlot::produce("total").force_overwrite()];
        let params = no_params();
        let ctx = PipelineContext::new().with_values([("total", json!(1))]);
        assert!(VariableResolver::new("sum", &slots, &params).bind(&ctx).is_ok());
    }

    #[test]
    fn test_factory_reads_params_and_earlier_siblings() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let slots = vec![
            VariableSlot::consume("dir").with_default(json!("/tmp")),
            VariableSlot::produce("path").with_factory(move |stage| {
                counter.fetch_add(1, Ordering::SeqCst);
                json!(format!(
                    "{}/{}.{}",
                    stage.get("dir").and_then(Value::as_str).unwrap_or("?"),
                    stage.name(),
                    stage.param("ext").and_then(Value::as_str).unwrap_or("?"),
                ))
            }),
        ];
        let mut params = no_params();
        params.insert("ext".to_string(), json!("csv"));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let binding = VariableResolver::new("export", &slots, &params)
            .bind(&PipelineContext::new())
            .unwrap();
        assert_eq!(binding.get("path"), Some(&json!("/tmp/export.csv")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(binding.names(), &["dir".to_string(), "path".to_string()]);
    }

    #[test]
    fn test_source_is_loaded_when_context_is_empty() {
        let source = Arc::new(MemorySource::with_data("raw", json!([{"id": 1}])));
        let slots = vec![VariableSlot::consume("raw").with_source(source)];
        let params = no_params();

        let binding = VariableResolver::new("s", &slots, &params)
            .bind(&PipelineContext::new())
            .unwrap();
        assert_eq!(binding.get("raw"), Some(&json!([{"id": 1}])));
    }

    #[test]
    fn test_loaded_value_is_schema_checked() {
        let schema = TableSchema::new("ids").column(ColumnSpec::new("id", VarType::Integer));
        let source = Arc::new(MemorySource::with_data("raw", json!([{"id": "one"}])));
        let slots = vec![VariableSlot::consume("raw")
            .with_source(source)
            .with_schema(Arc::new(schema))];
        let params = no_params();

        let err = VariableResolver::new("s", &slots, &params)
            .bind(&PipelineContext::new())
            .unwrap_err();
        let StageError::Validation(validation) = err else {
            panic!("expected validation error");
        };
        assert_eq!(validation.variable, "raw");
        assert_eq!(validation.diffs[0].row, Some(0));
        assert_eq!(validation.diffs[0].column.as_deref(), Some("id"));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let slots = vec![VariableSlot::consume("n").with_type(VarType::Integer)];
        let params = no_params();
        let ctx = PipelineContext::new().with_values([("n", json!("seven"))]);

        let err = VariableResolver::new("s", &slots, &params)
            .bind(&ctx)
            .unwrap_err();
        assert_eq!(err.code(), "STAGE-VALIDATION");
    }

    #[test]
    fn test_commit_writes_context_and_sink() {
        let sink = Arc::new(MemorySource::new("out").write_only());
        let slots = vec![
            VariableSlot::consume("raw"),
            VariableSlot::produce("clean").with_source(sink.clone()),
            VariableSlot::produce("unset"),
        ];
        let params = no_params();
        let resolver = VariableResolver::new("s", &slots, &params);
        let mut ctx = PipelineContext::new().with_values([("raw", json!([1, 2]))]);

        let mut binding = resolver.bind(&ctx).unwrap();
        binding.insert("clean", json!([2]));
        let written = resolver.commit(&binding, &mut ctx).unwrap();

        assert_eq!(written, vec!["clean".to_string()]);
        assert_eq!(ctx.get("clean"), Some(&json!([2])));
        assert_eq!(sink.get(), Some(json!([2])));
        assert!(!ctx.contains("unset"));
    }

    #[test]
    fn test_failed_commit_leaves_context_untouched() {
        let sink = Arc::new(MemorySource::new("out"));
        let slots = vec![
            VariableSlot::produce("a").with_source(sink.clone()),
            VariableSlot::produce("b").with_type(VarType::Integer),
        ];
        let params = no_params();
        let resolver = VariableResolver::new("s", &slots, &params);
        let mut ctx = PipelineContext::new();

        let mut binding = StageBinding::new();
        binding.insert("a", json!(1));
        binding.insert("b", json!("not a number"));

        assert!(resolver.commit(&binding, &mut ctx).is_err());
        assert!(!ctx.contains("a"));
        assert!(sink.get().is_none());
    }

    #[test]
    fn test_propagated_commit_is_exported() {
        let slots = vec![VariableSlot::produce("result").propagate()];
        let params = no_params();
        let resolver = VariableResolver::new("s", &slots, &params);
        let mut ctx = PipelineContext::new();
        ctx.push_frame("iteration");

        let mut binding = StageBinding::new();
        binding.insert("result", json!("done"));
        resolver.commit(&binding, &mut ctx).unwrap();

        ctx.pop_frame();
        assert_eq!(ctx.get("result"), Some(&json!("done")));
    }
}
