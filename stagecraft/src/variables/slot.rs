//! Variable slot declarations.

use super::{DataSource, SchemaContract, StageRef, Valuable};
use crate::core::VarType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How a stage uses a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotRole {
    /// The stage writes a new value.
    Produce,
    /// The stage reads an existing value.
    Consume,
    /// The stage reads an existing value and rewrites it.
    Transform,
}

impl SlotRole {
    /// Returns true if the stage reads the variable before its recipe runs.
    #[must_use]
    pub fn reads(&self) -> bool {
        matches!(self, Self::Consume | Self::Transform)
    }

    /// Returns true if the variable is written back after the recipe runs.
    #[must_use]
    pub fn writes(&self) -> bool {
        matches!(self, Self::Produce | Self::Transform)
    }
}

impl fmt::Display for SlotRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Produce => write!(f, "produce"),
            Self::Consume => write!(f, "consume"),
            Self::Transform => write!(f, "transform"),
        }
    }
}

/// A typed declaration of a value a stage produces, consumes or transforms.
///
/// Pinned values and defaults are stored unevaluated and only resolved when
/// the owning stage is bound into a context.
#[derive(Clone)]
pub struct VariableSlot {
    name: String,
    role: SlotRole,
    var_type: VarType,
    description: Option<String>,
    value: Option<Valuable>,
    default: Option<Valuable>,
    source: Option<Arc<dyn DataSource>>,
    schema: Option<Arc<dyn SchemaContract>>,
    force_overwrite: bool,
    propagate: bool,
}

impl VariableSlot {
    /// Creates a slot with the given role.
    #[must_use]
    pub fn new(name: impl Into<String>, role: SlotRole) -> Self {
        Self {
            name: name.into(),
            role,
            var_type: VarType::Any,
            description: None,
            value: None,
            default: None,
            source: None,
            schema: None,
            force_overwrite: false,
            propagate: false,
        }
    }

    /// Declares a variable the stage produces.
    #[must_use]
    pub fn produce(name: impl Into<String>) -> Self {
        Self::new(name, SlotRole::Produce)
    }

    /// Declares a variable the stage consumes.
    #[must_use]
    pub fn consume(name: impl Into<String>) -> Self {
        Self::new(name, SlotRole::Consume)
    }

    /// Declares a variable the stage transforms in place.
    #[must_use]
    pub fn transform(name: impl Into<String>) -> Self {
        Self::new(name, SlotRole::Transform)
    }

    /// Sets the declared type.
    #[must_use]
    pub fn with_type(mut self, var_type: VarType) -> Self {
        self.var_type = var_type;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Pins an explicit value that takes precedence over the context.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<Valuable>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Sets the fallback default.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Valuable>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Sets a default computed from the owning stage at bind time.
    #[must_use]
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&StageRef<'_>) -> serde_json::Value + Send + Sync + 'static,
    {
        self.default = Some(Valuable::stage_aware(factory));
        self
    }

    /// Binds the slot to an external source or sink.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Attaches a schema contract checked on load and before save.
    #[must_use]
    pub fn with_schema(mut self, schema: Arc<dyn SchemaContract>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Allows a produce slot to overwrite a value already in scope.
    #[must_use]
    pub fn force_overwrite(mut self) -> Self {
        self.force_overwrite = true;
        self
    }

    /// Marks the written value for propagation out of nested scopes.
    #[must_use]
    pub fn propagate(mut self) -> Self {
        self.propagate = true;
        self
    }

    /// Returns the variable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the role.
    #[must_use]
    pub fn role(&self) -> SlotRole {
        self.role
    }

    /// Returns the declared type.
    #[must_use]
    pub fn var_type(&self) -> VarType {
        self.var_type
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the pinned value.
    #[must_use]
    pub fn value(&self) -> Option<&Valuable> {
        self.value.as_ref()
    }

    /// Returns the default.
    #[must_use]
    pub fn default(&self) -> Option<&Valuable> {
        self.default.as_ref()
    }

    /// Returns the bound source.
    #[must_use]
    pub fn source(&self) -> Option<&Arc<dyn DataSource>> {
        self.source.as_ref()
    }

    /// Returns the schema contract.
    #[must_use]
    pub fn schema(&self) -> Option<&Arc<dyn SchemaContract>> {
        self.schema.as_ref()
    }

    /// Returns true if a produce slot may overwrite an in-scope value.
    #[must_use]
    pub fn is_force_overwrite(&self) -> bool {
        self.force_overwrite
    }

    /// Returns true if written values propagate out of nested scopes.
    #[must_use]
    pub fn is_propagated(&self) -> bool {
        self.propagate
    }

    /// Returns true if the slot can be resolved without any upstream producer.
    #[must_use]
    pub fn is_self_sufficient(&self) -> bool {
        self.value.is_some()
            || self.default.is_some()
            || self.source.as_ref().is_some_and(|s| s.mode().can_read())
    }
}

impl fmt::Debug for VariableSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableSlot")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("var_type", &self.var_type)
            .field("value", &self.value)
            .field("default", &self.default)
            .field("source", &self.source.as_ref().map(|s| s.describe()))
            .field("schema", &self.schema.as_ref().map(|s| s.name().to_string()))
            .field("force_overwrite", &self.force_overwrite)
            .field("propagate", &self.propagate)
            .finish()
    }
}
