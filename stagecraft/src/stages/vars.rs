//! Recipe-facing access to bound slot values.

use crate::context::PipelineContext;
use crate::errors::StageError;
use crate::variables::{SlotRole, StageBinding, VariableSlot};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The variables a recipe may read and write.
///
/// Reads are limited to consume and transform slots, writes to produce and
/// transform slots. Writes land in the stage's binding and reach the
/// context only after the recipe returns successfully.
pub struct StageVars<'a> {
    stage: &'a str,
    slots: &'a [VariableSlot],
    params: &'a HashMap<String, Value>,
    context: &'a PipelineContext,
    binding: &'a mut StageBinding,
    info: &'a mut Map<String, Value>,
}

impl<'a> StageVars<'a> {
    pub(crate) fn new(
        stage: &'a str,
        slots: &'a [VariableSlot],
        params: &'a HashMap<String, Value>,
        context: &'a PipelineContext,
        binding: &'a mut StageBinding,
        info: &'a mut Map<String, Value>,
    ) -> Self {
        Self {
            stage,
            slots,
            params,
            context,
            binding,
            info,
        }
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        self.stage
    }

    /// Reads a consume or transform slot.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::UndeclaredVariable`] or
    /// [`StageError::AccessViolation`] for a produce slot.
    pub fn get(&self, name: &str) -> Result<&Value, StageError> {
        let slot = self.slot(name)?;
        if !slot.role().reads() {
            return Err(self.violation(slot, "read"));
        }
        self.binding
            .get(name)
            .ok_or_else(|| StageError::UnresolvedVariable {
                stage: self.stage.to_string(),
                variable: name.to_string(),
            })
    }

    /// Reads a slot and deserializes it.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`StageVars::get`], or
    /// [`StageError::Serialization`] if the value has the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, StageError> {
        let value = self.get(name)?;
        T::deserialize(value).map_err(|source| StageError::Serialization {
            stage: self.stage.to_string(),
            variable: name.to_string(),
            source,
        })
    }

    /// Sets a produce or transform slot.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::UndeclaredVariable`] or
    /// [`StageError::AccessViolation`] for a consume slot.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), StageError> {
        let slot = self.slot(name)?;
        if !slot.role().writes() {
            return Err(self.violation(slot, "write"));
        }
        self.binding.insert(name, value);
        Ok(())
    }

    /// Serializes a value into a produce or transform slot.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`StageVars::set`], or
    /// [`StageError::Serialization`] if the value cannot be serialized.
    pub fn set_as<T: Serialize>(&mut self, name: &str, value: &T) -> Result<(), StageError> {
        let value = serde_json::to_value(value).map_err(|source| StageError::Serialization {
            stage: self.stage.to_string(),
            variable: name.to_string(),
            source,
        })?;
        self.set(name, value)
    }

    /// Gets a stage parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Gets a configuration value.
    #[must_use]
    pub fn config(&self, key: &str) -> Option<&Value> {
        self.context.config(key)
    }

    /// Attaches additional information to this execution's trace entry.
    pub fn record(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.info.insert(key.into(), value.into());
    }

    fn slot(&self, name: &str) -> Result<&'a VariableSlot, StageError> {
        self.slots
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| StageError::UndeclaredVariable {
                stage: self.stage.to_string(),
                variable: name.to_string(),
            })
    }

    fn violation(&self, slot: &VariableSlot, operation: &'static str) -> StageError {
        StageError::AccessViolation {
            stage: self.stage.to_string(),
            variable: slot.name().to_string(),
            role: slot.role(),
            operation,
        }
    }
}

impl std::fmt::Debug for StageVars<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageVars")
            .field("stage", &self.stage)
            .field("bound", &self.binding.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: u32,
        name: String,
    }

    fn fixture() -> (Vec<VariableSlot>, HashMap<String, Value>, PipelineContext) {
        let slots = vec![
            VariableSlot::consume("rows"),
            VariableSlot::produce("count"),
            VariableSlot::transform("log"),
        ];
        let mut params = HashMap::new();
        params.insert("limit".to_string(), json!(10));
        let ctx = PipelineContext::new().with_config([("verbose", json!(true))]);
        (slots, params, ctx)
    }

    #[test]
    fn test_reads_and_writes_follow_roles() {
        let (slots, params, ctx) = fixture();
        let mut binding = StageBinding::new();
        binding.insert("rows", json!([{"id": 1, "name": "a"}]));
        binding.insert("log", json!([]));
        let mut info = Map::new();
        let mut vars = StageVars::new("count_rows", &slots, &params, &ctx, &mut binding, &mut info);

        let rows: Vec<Row> = vars.get_as("rows").unwrap();
        assert_eq!(rows, vec![Row { id: 1, name: "a".into() }]);
        vars.set_as("count", &rows.len()).unwrap();
        vars.set("log", json!(["counted"])).unwrap();

        assert!(matches!(
            vars.get("count"),
            Err(StageError::AccessViolation { operation: "read", role: SlotRole::Produce, .. })
        ));
        assert!(matches!(
            vars.set("rows", json!([])),
            Err(StageError::AccessViolation { operation: "write", .. })
        ));
        assert!(matches!(
            vars.get("missing"),
            Err(StageError::UndeclaredVariable { .. })
        ));

        assert_eq!(binding.get("count"), Some(&json!(1)));
        assert_eq!(binding.get("log"), Some(&json!(["counted"])));
    }

    #[test]
    fn test_params_config_and_record() {
        let (slots, params, ctx) = fixture();
        let mut binding = StageBinding::new();
        let mut info = Map::new();
        let mut vars = StageVars::new("s", &slots, &params, &ctx, &mut binding, &mut info);

        assert_eq!(vars.stage_name(), "s");
        assert_eq!(vars.param("limit"), Some(&json!(10)));
        assert_eq!(vars.config("verbose"), Some(&json!(true)));
        vars.record("rows_dropped", 3);

        assert_eq!(info.get("rows_dropped"), Some(&json!(3)));
    }

    #[test]
    fn test_wrong_shape_is_a_serialization_error() {
        let (slots, params, ctx) = fixture();
        let mut binding = StageBinding::new();
        binding.insert("rows", json!("not rows"));
        let mut info = Map::new();
        let vars = StageVars::new("s", &slots, &params, &ctx, &mut binding, &mut info);

        let err = vars.get_as::<Vec<Row>>("rows").unwrap_err();
        assert_eq!(err.code(), "STAGE-SERIALIZATION");
    }
}
