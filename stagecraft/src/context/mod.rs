//! Context management for pipeline execution.
//!
//! This module provides:
//! - Scope frames holding variable values
//! - The frame-scoped pipeline context shared by all stages of a run
//! - Immutable snapshots for the execution result

mod bags;
#[cfg(test)]
mod context_tests;
mod execution;
mod snapshot;

pub use bags::ScopeFrame;
pub use execution::PipelineContext;
pub use snapshot::ContextSnapshot;
