//! Pipeline definition and execution.
//!
//! This module provides:
//! - The dependency graph builder (explicit and inferred edges, stable order)
//! - Frozen pipeline definitions
//! - The sequential runner and its work-stack executor
//! - Failure handling modes and runner configuration
//! - Execution results

mod config;
mod definition;
mod executor;
mod failure_tolerance;
mod graph;
mod result;
mod runner;

pub use config::{
    RunnerConfig, DEFAULT_LOOP_INDEX_VARIABLE, DEFAULT_MAX_LOOP_ITERATIONS, ENV_FAILURE_MODE,
    ENV_LOOP_INDEX_VARIABLE, ENV_MAX_LOOP_ITERATIONS,
};
pub use definition::{PipelineDefinition, PipelineDefinitionBuilder};
pub use failure_tolerance::{FailureCollector, FailureMode, FailureRecord};
pub use graph::{invert_dependency_map, DependencyGraph, DependencyMap};
pub use result::{ExecutionResult, StageExecution, StageOutcome};
pub use runner::PipelineRunner;
