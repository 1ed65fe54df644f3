//! # Stagecraft
//!
//! A declarative ETL pipeline engine.
//!
//! Stagecraft runs pipelines of named stages that declare what they read
//! and write, with support for:
//!
//! - **Inferred ordering**: a stage consuming a variable runs after the
//!   stages producing it; explicit dependencies merge with inferred ones
//! - **Lazy variable binding**: slot defaults and factories are evaluated
//!   only when their stage is bound, and can read the stage's parameters
//! - **Conditions**: composable predicates gating each stage
//! - **Nesting and loops**: sub-stage groups and bounded loops, each running
//!   in its own context frame
//! - **Schema contracts and data sources**: tabular variables validated on
//!   load and save, backed by files or memory
//! - **Failure policies**: fail fast, continue past independent failures, or
//!   attempt everything
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagecraft::prelude::*;
//! use serde_json::json;
//!
//! let load = EtlStage::new("load").produces("raw").with_fn(|vars| {
//!     vars.set("raw", json!([" a ", "b"]))?;
//!     Ok(())
//! });
//! let clean = EtlStage::new("clean")
//!     .consumes("raw")
//!     .produces("clean")
//!     .with_fn(|vars| {
//!         let raw: Vec<String> = vars.get_as("raw")?;
//!         vars.set_as("clean", &raw.iter().map(|s| s.trim()).collect::<Vec<_>>())?;
//!         Ok(())
//!     });
//!
//! let definition = PipelineDefinition::new("etl", vec![clean, load], DependencyMap::new())?;
//! let result = PipelineRunner::new().run(&definition);
//! assert!(result.success);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod conditions;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod serialization;
pub mod stages;
pub mod variables;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::conditions::{ConditionVerdict, StageCondition};
    pub use crate::context::{ContextSnapshot, PipelineContext};
    pub use crate::core::{StageKind, StageStatus, VarType};
    pub use crate::errors::{
        CycleError, DefinitionError, StageError, StagecraftError, ValidationError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_logging, LoggingConfig};
    pub use crate::pipeline::{
        DependencyMap, ExecutionResult, FailureMode, PipelineDefinition, PipelineRunner,
        RunnerConfig, StageOutcome,
    };
    pub use crate::serialization::{DictSerializable, KeyCase};
    pub use crate::stages::{EtlStage, LoopPredicate, Recipe, StageLoop, StageVars};
    pub use crate::variables::{
        DataSource, JsonFileSource, MemorySource, SchemaContract, SlotRole, TableSchema,
        Valuable, VariableSlot,
    };
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use serde_json::json;

    #[test]
    fn test_prelude_runs_a_pipeline() {
        let stage = EtlStage::new("hello").with_slot(VariableSlot::produce("greeting").with_default("hi"));
        let definition =
            PipelineDefinition::new("smoke", vec![stage], DependencyMap::new()).unwrap();
        let result = PipelineRunner::new().run(&definition);
        assert!(result.success);
        assert_eq!(result.context_snapshot.get("greeting"), Some(&json!("hi")));
    }
}
