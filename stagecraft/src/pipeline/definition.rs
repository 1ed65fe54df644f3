//! Frozen pipeline definitions.

use super::config::DEFAULT_LOOP_INDEX_VARIABLE;
use super::graph::{invert_dependency_map, DependencyGraph, DependencyMap};
use crate::context::PipelineContext;
use crate::errors::DefinitionError;
use crate::stages::{EtlStage, StageNode};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};

/// An ordered collection of stages plus their dependency map.
///
/// Construction validates names and loops and orders the dependency graph,
/// so a definition that exists is always runnable. It cannot be modified
/// afterwards.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    name: String,
    stages: Vec<EtlStage>,
    index: HashMap<String, usize>,
    explicit: DependencyMap,
    graph: DependencyGraph,
    loop_index_variable: String,
    fingerprint: String,
}

impl PipelineDefinition {
    /// Creates a definition from stages and explicit dependencies.
    ///
    /// # Errors
    ///
    /// Returns a [`DefinitionError`] if a name is empty or duplicated, a loop
    /// is malformed, a dependency is unknown, or the dependencies are cyclic.
    pub fn new(
        name: impl Into<String>,
        stages: Vec<EtlStage>,
        dependency_map: DependencyMap,
    ) -> Result<Self, DefinitionError> {
        Self::build_with(name.into(), stages, dependency_map, DEFAULT_LOOP_INDEX_VARIABLE.to_string())
    }

    /// Starts a builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PipelineDefinitionBuilder {
        PipelineDefinitionBuilder::new(name)
    }

    fn build_with(
        name: String,
        stages: Vec<EtlStage>,
        explicit: DependencyMap,
        loop_index_variable: String,
    ) -> Result<Self, DefinitionError> {
        if name.trim().is_empty() {
            return Err(DefinitionError::EmptyName {
                kind: "Pipeline".to_string(),
            });
        }
        validate_stages(&stages)?;

        let graph = DependencyGraph::build(&stages, &explicit, &loop_index_variable)?;
        let index = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name().to_string(), i))
            .collect();
        let fingerprint = fingerprint(&name, &graph);

        tracing::debug!(
            pipeline = %name,
            stages = stages.len(),
            fingerprint = %fingerprint,
            "Pipeline definition built"
        );

        Ok(Self {
            name,
            stages,
            index,
            explicit,
            graph,
            loop_index_variable,
            fingerprint,
        })
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the top-level stages in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[EtlStage] {
        &self.stages
    }

    /// Looks up a top-level stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&EtlStage> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Returns the top-level stage names in execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        self.graph.execution_order()
    }

    /// Returns the dependency map as declared.
    #[must_use]
    pub fn explicit_dependencies(&self) -> &DependencyMap {
        &self.explicit
    }

    /// Returns the merged explicit and implicit dependency map.
    #[must_use]
    pub fn dependency_map(&self) -> &DependencyMap {
        self.graph.dependencies()
    }

    /// Returns the merged dependencies of a top-level stage.
    #[must_use]
    pub fn dependencies_of(&self, stage: &str) -> Option<&BTreeSet<String>> {
        self.graph.dependencies_of(stage)
    }

    /// Returns the stages that depend on `stage` directly.
    #[must_use]
    pub fn dependents_of(&self, stage: &str) -> BTreeSet<String> {
        invert_dependency_map(self.graph.dependencies())
            .remove(stage)
            .unwrap_or_default()
    }

    /// Returns the ordered dependency graph.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Returns the loop index variable name assumed for dependency inference.
    #[must_use]
    pub fn loop_index_variable(&self) -> &str {
        &self.loop_index_variable
    }

    /// Returns a stable hash of the name, execution order and merged edges.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Lists `(stage, variable)` pairs read by some stage that nothing can
    /// satisfy: no stage writes the name, the reading slot has no pinned
    /// value, default or readable source, and `initial` does not hold it.
    ///
    /// Such inputs fail at bind time unless a stage that would have read
    /// them is skipped.
    #[must_use]
    pub fn unsatisfied_inputs(&self, initial: &PipelineContext) -> Vec<(String, String)> {
        let all: Vec<&EtlStage> = self.stages.iter().flat_map(EtlStage::all_stages).collect();

        let mut available: HashSet<&str> = HashSet::new();
        for stage in &all {
            available.extend(
                stage
                    .slots()
                    .iter()
                    .filter(|s| s.role().writes())
                    .map(|s| s.name()),
            );
            if let StageNode::Loop(stage_loop) = stage.node() {
                available.insert(stage_loop.index_variable_or(&self.loop_index_variable));
            }
        }

        let mut missing = Vec::new();
        for stage in &all {
            for slot in stage.slots().iter().filter(|s| s.role().reads()) {
                if available.contains(slot.name())
                    || slot.is_self_sufficient()
                    || initial.contains(slot.name())
                {
                    continue;
                }
                missing.push((stage.name().to_string(), slot.name().to_string()));
            }
        }
        missing
    }
}

/// Builder for [`PipelineDefinition`].
#[derive(Debug, Clone)]
pub struct PipelineDefinitionBuilder {
    name: String,
    stages: Vec<EtlStage>,
    dependencies: DependencyMap,
    loop_index_variable: String,
}

impl PipelineDefinitionBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            dependencies: DependencyMap::new(),
            loop_index_variable: DEFAULT_LOOP_INDEX_VARIABLE.to_string(),
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: EtlStage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends several stages.
    #[must_use]
    pub fn with_stages(mut self, stages: impl IntoIterator<Item = EtlStage>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Declares that `stage` runs after `dependency`.
    #[must_use]
    pub fn with_dependency(
        mut self,
        stage: impl Into<String>,
        dependency: impl Into<String>,
    ) -> Self {
        self.dependencies
            .entry(stage.into())
            .or_default()
            .insert(dependency.into());
        self
    }

    /// Merges a whole dependency map, keeping keys whose set is empty so
    /// they are validated like any other entry.
    #[must_use]
    pub fn with_dependency_map(mut self, dependencies: DependencyMap) -> Self {
        for (stage, deps) in dependencies {
            self.dependencies.entry(stage).or_default().extend(deps);
        }
        self
    }

    /// Sets the loop index variable name assumed for dependency inference.
    ///
    /// Should match [`RunnerConfig::loop_index_variable`](super::RunnerConfig)
    /// when loops do not name their own.
    #[must_use]
    pub fn with_loop_index_variable(mut self, name: impl Into<String>) -> Self {
        self.loop_index_variable = name.into();
        self
    }

    /// Validates and freezes the definition.
    ///
    /// # Errors
    ///
    /// See [`PipelineDefinition::new`].
    pub fn build(self) -> Result<PipelineDefinition, DefinitionError> {
        PipelineDefinition::build_with(
            self.name,
            self.stages,
            self.dependencies,
            self.loop_index_variable,
        )
    }
}

fn validate_stages(stages: &[EtlStage]) -> Result<(), DefinitionError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for stage in stages.iter().flat_map(EtlStage::all_stages) {
        if stage.name().trim().is_empty() {
            return Err(DefinitionError::EmptyName {
                kind: "Stage".to_string(),
            });
        }
        if !seen.insert(stage.name()) {
            return Err(DefinitionError::DuplicateStage {
                name: stage.name().to_string(),
            });
        }
        if let StageNode::Loop(stage_loop) = stage.node() {
            let invalid = |reason: &str| DefinitionError::InvalidLoop {
                stage: stage.name().to_string(),
                reason: reason.to_string(),
            };
            if stage_loop.body().is_empty() {
                return Err(invalid("body is empty"));
            }
            if stage_loop.max_iterations() == Some(0) {
                return Err(invalid("max_iterations must be positive"));
            }
            if !stage.slots().is_empty() {
                return Err(invalid("loop stages cannot declare variable slots"));
            }
            if stage.recipe().is_some() {
                return Err(invalid("loop stages cannot have a recipe"));
            }
        }
    }
    Ok(())
}

fn fingerprint(name: &str, graph: &DependencyGraph) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    for stage in graph.execution_order() {
        hasher.update(b"\n");
        hasher.update(stage.as_bytes());
        for dep in graph.dependencies_of(stage).into_iter().flatten() {
            hasher.update(b"<");
            hasher.update(dep.as_bytes());
        }
    }
    hex::encode(&hasher.finalize()[..16])
}
