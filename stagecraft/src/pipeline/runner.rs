//! The pipeline runner.

use super::config::RunnerConfig;
use super::definition::PipelineDefinition;
use super::executor::Executor;
use super::failure_tolerance::{FailureCollector, FailureRecord};
use super::graph::DependencyMap;
use super::result::{ExecutionResult, StageOutcome};
use crate::context::PipelineContext;
use crate::errors::DefinitionError;
use crate::events::{self, EventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use crate::stages::EtlStage;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Runs pipeline definitions.
///
/// A runner holds only configuration and an event sink; every run owns its
/// own [`PipelineContext`], so one runner can execute many definitions.
#[derive(Clone)]
pub struct PipelineRunner {
    config: RunnerConfig,
    events: Arc<dyn EventSink>,
}

impl Default for PipelineRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    /// Creates a runner with the default configuration and no event sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RunnerConfig::default(),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Builds a definition from stages and runs it against an empty context.
    ///
    /// # Errors
    ///
    /// Returns a [`DefinitionError`] if the definition is invalid; no stage
    /// runs in that case.
    pub fn run_stages(
        &self,
        name: impl Into<String>,
        stages: Vec<EtlStage>,
        dependency_map: DependencyMap,
    ) -> Result<ExecutionResult, DefinitionError> {
        let definition = PipelineDefinition::builder(name)
            .with_stages(stages)
            .with_dependency_map(dependency_map)
            .with_loop_index_variable(self.config.loop_index_variable.clone())
            .build()
            .map_err(|err| {
            tracing::error!(code = err.code(), error = %err, "Pipeline definition rejected");
            err
        })?;
        Ok(self.run(&definition))
    }

    /// Runs a definition against an empty context.
    #[must_use]
    pub fn run(&self, definition: &PipelineDefinition) -> ExecutionResult {
        self.run_with_context(definition, PipelineContext::new())
    }

    /// Runs a definition against a caller-seeded context.
    ///
    /// Stage failures never escape; they are recorded in the result and
    /// handled according to [`RunnerConfig::failure_mode`].
    #[must_use]
    pub fn run_with_context(
        &self,
        definition: &PipelineDefinition,
        mut context: PipelineContext,
    ) -> ExecutionResult {
        let run_id = Uuid::new_v4();
        let timer = SpanTimer::start(definition.name());
        let span = tracing::info_span!("pipeline", pipeline = definition.name(), run_id = %run_id);
        let _entered = span.enter();

        tracing::info!(
            fingerprint = definition.fingerprint(),
            stages = definition.stages().len(),
            failure_mode = %self.config.failure_mode,
            "Pipeline started"
        );
        for (stage, variable) in definition.unsatisfied_inputs(&context) {
            tracing::warn!(
                stage = %stage,
                variable = %variable,
                "Input has no producer, default, source or initial value"
            );
        }
        self.events.emit(
            events::PIPELINE_STARTED,
            Some(json!({
                "pipeline": definition.name(),
                "run_id": run_id.to_string(),
                "execution_order": definition.execution_order(),
            })),
        );

        let mut collector = FailureCollector::new(self.config.failure_mode);
        if definition.loop_index_variable() != self.config.loop_index_variable {
            tracing::warn!(
                definition = definition.loop_index_variable(),
                config = %self.config.loop_index_variable,
                "Loop index variable differs from the runner config; using the definition's"
            );
        }
        let mut executor = Executor::new(definition.name(), &self.config, self.events.as_ref())
            .with_loop_index_variable(definition.loop_index_variable());
        let mut per_stage_status = HashMap::new();

        for name in definition.execution_order() {
            let Some(stage) = definition.stage(name) else {
                continue;
            };

            let dependencies = definition.dependencies_of(name).into_iter().flatten();
            if let Some(reason) = collector.skip_reason(dependencies) {
                tracing::warn!(stage = name.as_str(), reason = %reason, "Stage not started");
                collector.record_blocked(name);
                executor.record_skip(stage, &reason);
                per_stage_status.insert(name.clone(), StageOutcome::Skipped(reason));
                continue;
            }

            let outcome = executor.execute(stage, &mut context);
            match &outcome {
                StageOutcome::Completed => {
                    tracing::info!(stage = name.as_str(), "Stage completed");
                }
                StageOutcome::Skipped(reason) => {
                    tracing::warn!(stage = name.as_str(), reason = %reason, "Stage skipped");
                }
                StageOutcome::Failed(err) => {
                    tracing::warn!(
                        stage = name.as_str(),
                        code = err.innermost().code(),
                        error = %err,
                        "Stage failed"
                    );
                    collector.record_failure(FailureRecord::new(name.as_str(), err));
                }
            }
            per_stage_status.insert(name.clone(), outcome);
        }

        let failures = collector.into_failures();
        let success = failures.is_empty();
        let duration_ms = timer.elapsed_ms();

        if success {
            tracing::info!(duration_ms, "Pipeline completed");
        } else {
            tracing::warn!(duration_ms, failures = failures.len(), "Pipeline failed");
        }
        self.events.emit(
            if success {
                events::PIPELINE_COMPLETED
            } else {
                events::PIPELINE_FAILED
            },
            Some(json!({
                "pipeline": definition.name(),
                "run_id": run_id.to_string(),
                "duration_ms": duration_ms,
                "failed_stages": failures.iter().map(|f| f.stage.as_str()).collect::<Vec<_>>(),
            })),
        );

        ExecutionResult {
            run_id,
            pipeline: definition.name().to_string(),
            fingerprint: definition.fingerprint().to_string(),
            success,
            per_stage_status,
            execution_order: definition.execution_order().to_vec(),
            context_snapshot: context.snapshot(),
            trace: executor.into_trace(),
            failures,
            started_at: timer.started_at(),
            finished_at: Utc::now(),
            duration_ms,
        }
    }
}
