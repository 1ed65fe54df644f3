//! Error types for the stagecraft engine.
//!
//! Errors come in two families. [`DefinitionError`] is raised while a
//! pipeline definition is constructed and aborts a run before any stage
//! executes. [`StageError`] is raised while a stage is bound or executed; the
//! runner catches it at the stage boundary and records it in the
//! [`ExecutionResult`](crate::pipeline::ExecutionResult).

use crate::variables::{Discrepancy, SlotRole};
use thiserror::Error;

/// The main error type for stagecraft operations.
#[derive(Debug, Error)]
pub enum StagecraftError {
    /// The pipeline definition is invalid.
    #[error("{0}")]
    Definition(#[from] DefinitionError),

    /// A stage failed while binding or executing.
    #[error("{0}")]
    Stage(#[from] StageError),

    /// A data source or sink failed.
    #[error("{0}")]
    Source(#[from] SourceError),

    /// A value could not be converted to or from its dictionary form.
    #[error("{0}")]
    Serialization(#[from] SerializationError),

    /// Configuration could not be parsed or applied.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error raised when the merged dependency graph contains a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleError {
    /// The stages forming the cycle; the first stage is repeated at the end.
    pub cycle_path: Vec<String>,
}

impl CycleError {
    /// Creates a new cycle error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// Error raised while constructing a pipeline definition.
///
/// Always fatal: no stage of a definition that fails construction executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// The explicit and implicit dependencies form a cycle.
    #[error("{0}")]
    Cycle(#[from] CycleError),

    /// An explicit dependency names a stage that does not exist.
    #[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency {
        /// The declaring stage.
        stage: String,
        /// The missing dependency.
        dependency: String,
    },

    /// Two stages in one definition share a name.
    #[error("Duplicate stage name '{name}'")]
    DuplicateStage {
        /// The duplicated name.
        name: String,
    },

    /// A pipeline or stage name is empty.
    #[error("{kind} name cannot be empty or whitespace-only")]
    EmptyName {
        /// What was being named ("Pipeline" or "Stage").
        kind: String,
    },

    /// An explicit dependency between stages nested under one owner
    /// contradicts their declaration order.
    #[error(
        "Stage '{stage}' depends on '{dependency}', which is declared after it inside '{owner}'"
    )]
    NestedOrderConflict {
        /// The declaring stage.
        stage: String,
        /// The dependency declared later in the same tree.
        dependency: String,
        /// The top-level stage owning both.
        owner: String,
    },

    /// A loop stage is malformed.
    #[error("Loop stage '{stage}' is invalid: {reason}")]
    InvalidLoop {
        /// The loop stage.
        stage: String,
        /// Why the loop was rejected.
        reason: String,
    },
}

impl DefinitionError {
    /// Returns a stable machine-readable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Cycle(_) => "DEFINITION-CYCLE",
            Self::UnknownDependency { .. } => "DEFINITION-UNKNOWN-DEPENDENCY",
            Self::DuplicateStage { .. } => "DEFINITION-DUPLICATE-STAGE",
            Self::EmptyName { .. } => "DEFINITION-EMPTY-NAME",
            Self::NestedOrderConflict { .. } => "DEFINITION-NESTED-ORDER-CONFLICT",
            Self::InvalidLoop { .. } => "DEFINITION-INVALID-LOOP",
        }
    }
}

/// Error raised when a value violates a schema contract or declared type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "Validation failed for variable '{variable}' of stage '{stage}': {}",
    diffs.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
)]
pub struct ValidationError {
    /// The stage that bound or produced the value.
    pub stage: String,
    /// The offending variable.
    pub variable: String,
    /// Ordered list of discrepancies.
    pub diffs: Vec<Discrepancy>,
}

/// Error raised while binding or executing a single stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// A custom condition predicate failed.
    #[error("Condition of stage '{stage}' could not be evaluated: {source}")]
    ConditionEvaluation {
        /// The gated stage.
        stage: String,
        /// The predicate failure.
        #[source]
        source: anyhow::Error,
    },

    /// A consume or transform slot has no value, producer output, source or default.
    #[error("Stage '{stage}' requires variable '{variable}' but no value is available")]
    UnresolvedVariable {
        /// The consuming stage.
        stage: String,
        /// The unresolved variable.
        variable: String,
    },

    /// A produce slot would shadow a value already present in the current scope.
    #[error("Stage '{stage}' produces '{variable}' which already exists in the current scope")]
    DuplicateProduction {
        /// The producing stage.
        stage: String,
        /// The colliding variable.
        variable: String,
    },

    /// A schema contract or declared type rejected a value.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The stage's recipe returned an error.
    #[error("Recipe of stage '{stage}' failed (bound: [{}]): {source}", bound.join(", "))]
    Recipe {
        /// The failing stage.
        stage: String,
        /// Slot names bound when the failure happened.
        bound: Vec<String>,
        /// The recipe's error.
        #[source]
        source: anyhow::Error,
    },

    /// A loop ran to its bound without the continuation predicate signalling stop.
    #[error("Loop '{stage}' reached its bound of {max_iterations} iterations without being told to stop")]
    LoopBoundExceeded {
        /// The loop stage.
        stage: String,
        /// The configured bound.
        max_iterations: usize,
    },

    /// A failure inside one loop iteration.
    #[error("Loop '{stage}' failed in iteration {iteration}: {source}")]
    LoopIteration {
        /// The loop stage.
        stage: String,
        /// Zero-based iteration index.
        iteration: usize,
        /// The failure inside the iteration.
        #[source]
        source: Box<StageError>,
    },

    /// A failure inside a sub-stage group.
    #[error("Sub-stage of '{stage}' failed: {source}")]
    SubStage {
        /// The group stage.
        stage: String,
        /// The sub-stage failure.
        #[source]
        source: Box<StageError>,
    },

    /// A recipe touched a variable its stage does not declare.
    #[error("Stage '{stage}' has no variable slot named '{variable}'")]
    UndeclaredVariable {
        /// The stage.
        stage: String,
        /// The undeclared variable.
        variable: String,
    },

    /// A recipe read a write-only slot or wrote a read-only one.
    #[error("Stage '{stage}' cannot {operation} '{variable}' declared as {role}")]
    AccessViolation {
        /// The stage.
        stage: String,
        /// The variable.
        variable: String,
        /// The slot's role.
        role: SlotRole,
        /// "read" or "write".
        operation: &'static str,
    },

    /// A slot's data source failed on load or save.
    #[error("Data source of '{variable}' in stage '{stage}' failed: {source}")]
    Source {
        /// The stage.
        stage: String,
        /// The variable bound to the source.
        variable: String,
        /// The source failure.
        #[source]
        source: SourceError,
    },

    /// A typed accessor could not convert a variable.
    #[error("Variable '{variable}' of stage '{stage}' could not be converted: {source}")]
    Serialization {
        /// The stage.
        stage: String,
        /// The variable.
        variable: String,
        /// The conversion failure.
        #[source]
        source: serde_json::Error,
    },
}

impl StageError {
    /// Returns a stable machine-readable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConditionEvaluation { .. } => "STAGE-CONDITION",
            Self::UnresolvedVariable { .. } => "STAGE-UNRESOLVED",
            Self::DuplicateProduction { .. } => "STAGE-DUPLICATE-PRODUCTION",
            Self::Validation(_) => "STAGE-VALIDATION",
            Self::Recipe { .. } => "STAGE-RECIPE",
            Self::LoopBoundExceeded { .. } => "STAGE-LOOP-BOUND",
            Self::LoopIteration { .. } => "STAGE-LOOP-ITERATION",
            Self::SubStage { .. } => "STAGE-SUB-STAGE",
            Self::UndeclaredVariable { .. } => "STAGE-UNDECLARED",
            Self::AccessViolation { .. } => "STAGE-ACCESS",
            Self::Source { .. } => "STAGE-SOURCE",
            Self::Serialization { .. } => "STAGE-SERIALIZATION",
        }
    }

    /// Returns the name of the stage the error is attributed to.
    #[must_use]
    pub fn stage(&self) -> &str {
        match self {
            Self::Validation(err) => &err.stage,
            Self::ConditionEvaluation { stage, .. }
            | Self::UnresolvedVariable { stage, .. }
            | Self::DuplicateProduction { stage, .. }
            | Self::Recipe { stage, .. }
            | Self::LoopBoundExceeded { stage, .. }
            | Self::LoopIteration { stage, .. }
            | Self::SubStage { stage, .. }
            | Self::UndeclaredVariable { stage, .. }
            | Self::AccessViolation { stage, .. }
            | Self::Source { stage, .. }
            | Self::Serialization { stage, .. } => stage,
        }
    }

    /// Follows loop-iteration and sub-stage wrappers down to the original failure.
    #[must_use]
    pub fn innermost(&self) -> &Self {
        let mut current = self;
        while let Self::LoopIteration { source, .. } | Self::SubStage { source, .. } = current {
            current = &**source;
        }
        current
    }
}

/// Error raised by a data source or sink.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Reading or writing the backing file failed.
    #[error("IO error on '{path}': {source}")]
    Io {
        /// The file path.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The backing file did not hold valid JSON, or the value could not be encoded.
    #[error("Invalid JSON for '{path}': {source}")]
    Json {
        /// The file path.
        path: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The source was opened in a mode that forbids the operation.
    #[error("Source '{name}' does not support {operation}")]
    Unsupported {
        /// Description of the source.
        name: String,
        /// "load" or "save".
        operation: &'static str,
    },

    /// The source holds no data yet.
    #[error("Source '{name}' holds no data")]
    Empty {
        /// Description of the source.
        name: String,
    },
}

/// Error raised by the dictionary conversion helpers.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// serde could not convert the value.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The value does not serialize to a mapping.
    #[error("Expected a mapping, found {found}")]
    NotAMapping {
        /// JSON type name of what was found.
        found: String,
    },
}
