//! Event sink system for observability.
//!
//! The runner reports lifecycle events to an [`EventSink`] it owns for the
//! duration of a run. Event types are the constants below; payloads are JSON
//! objects carrying at least the pipeline or stage name.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run started.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// A run finished with every stage completed or skipped.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// A run finished with at least one failed stage.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// A stage passed its condition and started.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage completed.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage was skipped.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// A stage failed.
pub const STAGE_FAILED: &str = "stage.failed";
/// A loop iteration started.
pub const LOOP_ITERATION: &str = "loop.iteration";
