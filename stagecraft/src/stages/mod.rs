//! ETL stages.
//!
//! An [`EtlStage`] is a named unit of pipeline work: a condition gating it,
//! the variable slots it reads and writes, and a [`Recipe`] holding the
//! transformation logic. Stages form a tree through the node kind: a group
//! stage owns ordered sub-stages that run as one atomic unit, and a loop
//! stage repeats a body of stages (see [`StageLoop`]).

mod loops;
mod vars;

pub use loops::{LoopPredicate, StageLoop};
pub use vars::StageVars;

use crate::conditions::StageCondition;
use crate::core::StageKind;
use crate::variables::{SlotRole, VariableResolver, VariableSlot};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Transformation logic of a stage.
///
/// The recipe reads its bound inputs and sets its outputs through
/// [`StageVars`]. Outputs are only written back to the context once `run`
/// returns `Ok`.
pub trait Recipe: Send + Sync {
    /// Runs the transformation.
    ///
    /// # Errors
    ///
    /// Any error aborts the stage; the runner wraps it with the stage name
    /// and the names of the bound slots.
    fn run(&self, vars: &mut StageVars<'_>) -> anyhow::Result<()>;
}

impl<F> Recipe for F
where
    F: Fn(&mut StageVars<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn run(&self, vars: &mut StageVars<'_>) -> anyhow::Result<()> {
        self(vars)
    }
}

/// The shape of a stage node.
#[derive(Debug, Clone, Default)]
pub enum StageNode {
    /// A plain stage.
    #[default]
    Leaf,
    /// A stage whose sub-stages run, in order, after its own recipe.
    Group(Vec<EtlStage>),
    /// A stage repeating a body of stages.
    Loop(StageLoop),
}

/// A named unit of pipeline work.
#[derive(Clone)]
pub struct EtlStage {
    name: String,
    description: Option<String>,
    condition: StageCondition,
    slots: Vec<VariableSlot>,
    params: HashMap<String, Value>,
    recipe: Option<Arc<dyn Recipe>>,
    node: StageNode,
}

impl EtlStage {
    /// Creates a leaf stage with no slots that always executes.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            condition: StageCondition::Always,
            slots: Vec::new(),
            params: HashMap::new(),
            recipe: None,
            node: StageNode::Leaf,
        }
    }

    /// Creates a loop stage.
    #[must_use]
    pub fn looping(name: impl Into<String>, stage_loop: StageLoop) -> Self {
        let mut stage = Self::new(name);
        stage.node = StageNode::Loop(stage_loop);
        stage
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the condition.
    #[must_use]
    pub fn with_condition(mut self, condition: StageCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Declares a slot. A slot with the same name replaces the earlier
    /// declaration in place.
    #[must_use]
    pub fn with_slot(mut self, slot: VariableSlot) -> Self {
        match self.slots.iter_mut().find(|s| s.name() == slot.name()) {
            Some(existing) => *existing = slot,
            None => self.slots.push(slot),
        }
        self
    }

    /// Declares a produce slot with default settings.
    #[must_use]
    pub fn produces(self, name: impl Into<String>) -> Self {
        self.with_slot(VariableSlot::produce(name))
    }

    /// Declares a consume slot with default settings.
    #[must_use]
    pub fn consumes(self, name: impl Into<String>) -> Self {
        self.with_slot(VariableSlot::consume(name))
    }

    /// Declares a transform slot with default settings.
    #[must_use]
    pub fn transforms(self, name: impl Into<String>) -> Self {
        self.with_slot(VariableSlot::transform(name))
    }

    /// Sets a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set_param(key, value);
        self
    }

    /// Sets a parameter on an existing stage. Slot factories observe the
    /// value as long as it is set before the stage is bound.
    pub fn set_param(&mut self, key: impl Into<String>, value: Value) {
        self.params.insert(key.into(), value);
    }

    /// Sets the recipe.
    #[must_use]
    pub fn with_recipe<R>(mut self, recipe: R) -> Self
    where
        R: Recipe + 'static,
    {
        self.recipe = Some(Arc::new(recipe));
        self
    }

    /// Sets a closure as the recipe.
    #[must_use]
    pub fn with_fn<F>(self, recipe: F) -> Self
    where
        F: Fn(&mut StageVars<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.with_recipe(recipe)
    }

    /// Sets the sub-stages, turning the stage into a group.
    #[must_use]
    pub fn with_sub_stages(mut self, stages: impl IntoIterator<Item = EtlStage>) -> Self {
        self.node = StageNode::Group(stages.into_iter().collect());
        self
    }

    /// Returns the name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the condition.
    #[must_use]
    pub fn condition(&self) -> &StageCondition {
        &self.condition
    }

    /// Returns the slots in declaration order.
    #[must_use]
    pub fn slots(&self) -> &[VariableSlot] {
        &self.slots
    }

    /// Returns a slot by name.
    #[must_use]
    pub fn slot(&self, name: &str) -> Option<&VariableSlot> {
        self.slots.iter().find(|s| s.name() == name)
    }

    /// Returns the parameters.
    #[must_use]
    pub fn params(&self) -> &HashMap<String, Value> {
        &self.params
    }

    /// Returns the recipe.
    #[must_use]
    pub fn recipe(&self) -> Option<&Arc<dyn Recipe>> {
        self.recipe.as_ref()
    }

    /// Returns the node.
    #[must_use]
    pub fn node(&self) -> &StageNode {
        &self.node
    }

    /// Returns the node kind.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        match self.node {
            StageNode::Leaf => StageKind::Leaf,
            StageNode::Group(_) => StageKind::Group,
            StageNode::Loop(_) => StageKind::Loop,
        }
    }

    /// Returns the direct children: sub-stages or the loop body.
    #[must_use]
    pub fn children(&self) -> &[EtlStage] {
        match &self.node {
            StageNode::Leaf => &[],
            StageNode::Group(stages) => stages,
            StageNode::Loop(stage_loop) => stage_loop.body(),
        }
    }

    /// Returns this stage and all nested stages, depth-first in declaration order.
    #[must_use]
    pub fn all_stages(&self) -> Vec<&EtlStage> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(stage) = stack.pop() {
            out.push(stage);
            stack.extend(stage.children().iter().rev());
        }
        out
    }

    /// Returns a resolver over this stage's slots.
    #[must_use]
    pub fn resolver(&self) -> VariableResolver<'_> {
        VariableResolver::new(&self.name, &self.slots, &self.params)
            .with_description(self.description.as_deref())
    }

    /// Names this stage (including nested stages) exposes to later stages.
    ///
    /// For a leaf these are its produce and transform slots. Nested stages
    /// only contribute slots marked to propagate, since everything else is
    /// dropped with their frame.
    #[must_use]
    pub fn visible_outputs(&self) -> Vec<(String, SlotRole)> {
        let mut outputs: Vec<(String, SlotRole)> = self
            .slots
            .iter()
            .filter(|s| s.role().writes())
            .map(|s| (s.name().to_string(), s.role()))
            .collect();
        for nested in self.all_stages().into_iter().skip(1) {
            for slot in nested.slots.iter().filter(|s| s.role().writes() && s.is_propagated()) {
                if !outputs.iter().any(|(name, _)| name == slot.name()) {
                    outputs.push((slot.name().to_string(), slot.role()));
                }
            }
        }
        outputs
    }

    /// Names this stage (including nested stages) reads from outside itself.
    ///
    /// A nested read is internal when an earlier stage of the same subtree
    /// writes the name, or when it is the loop's index variable.
    #[must_use]
    pub fn external_inputs(&self, loop_index_variable: &str) -> Vec<(String, SlotRole)> {
        let mut inputs: Vec<(String, SlotRole)> = self
            .slots
            .iter()
            .filter(|s| s.role().reads())
            .map(|s| (s.name().to_string(), s.role()))
            .collect();

        let mut internal: Vec<String> = self
            .slots
            .iter()
            .filter(|s| s.role() == SlotRole::Produce)
            .map(|s| s.name().to_string())
            .collect();

        for nested in self.all_stages().into_iter().skip(1) {
            if let StageNode::Loop(stage_loop) = &nested.node {
                internal.push(stage_loop.index_variable_or(loop_index_variable).to_string());
            }
            for slot in nested.slots.iter().filter(|s| s.role().reads()) {
                let name = slot.name();
                if !internal.iter().any(|n| n == name) && !inputs.iter().any(|(n, _)| n == name) {
                    inputs.push((name.to_string(), slot.role()));
                }
            }
            for slot in nested.slots.iter().filter(|s| s.role().writes()) {
                internal.push(slot.name().to_string());
            }
        }
        if let StageNode::Loop(stage_loop) = &self.node {
            let index = stage_loop.index_variable_or(loop_index_variable);
            inputs.retain(|(name, _)| name != index);
        }
        inputs
    }
}

impl fmt::Debug for EtlStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtlStage")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("condition", &self.condition)
            .field("slots", &self.slots)
            .field("params", &self.params)
            .field("has_recipe", &self.recipe.is_some())
            .field("children", &self.children())
            .finish()
    }
}
