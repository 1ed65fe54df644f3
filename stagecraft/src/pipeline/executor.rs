//! Execution of a single top-level stage tree.
//!
//! The tree is walked with an explicit work stack rather than recursion.
//! Group and loop stages push continuation tasks that pop their context
//! frame once the nested stages are done; on failure the stack is unwound,
//! discarding frames and wrapping the error once per enclosing loop
//! iteration or group, so the context is back at its starting depth no
//! matter where the failure happened.

use super::config::RunnerConfig;
use super::result::{StageExecution, StageOutcome};
use crate::context::PipelineContext;
use crate::core::StageStatus;
use crate::errors::StageError;
use crate::events::{self, EventSink};
use crate::observability::SpanTimer;
use crate::stages::{EtlStage, StageLoop, StageNode, StageVars};
use serde_json::{json, Map, Value};

enum Task<'s> {
    /// Evaluate a stage's condition and start it.
    Enter {
        stage: &'s EtlStage,
        path: String,
        iteration: Option<usize>,
    },
    /// Decide whether a loop runs iteration `iteration`.
    LoopStep {
        stage: &'s EtlStage,
        stage_loop: &'s StageLoop,
        path: String,
        iteration: usize,
        elapsed_ms: f64,
    },
    /// Close the frame of a finished loop iteration.
    PopIteration {
        stage: &'s EtlStage,
        path: String,
        iteration: usize,
        timer: SpanTimer,
    },
    /// Complete a group or loop stage once its nested stages are done.
    Finish {
        stage: &'s EtlStage,
        path: String,
        iteration: Option<usize>,
        timer: SpanTimer,
        info: Map<String, Value>,
        pops_frame: bool,
    },
}

/// Runs stage trees against a context and records every execution.
pub(crate) struct Executor<'r> {
    pipeline: &'r str,
    config: &'r RunnerConfig,
    events: &'r dyn EventSink,
    index_variable: &'r str,
    trace: Vec<StageExecution>,
}

impl<'r> Executor<'r> {
    pub(crate) fn new(pipeline: &'r str, config: &'r RunnerConfig, events: &'r dyn EventSink) -> Self {
        Self {
            pipeline,
            config,
            events,
            index_variable: &config.loop_index_variable,
            trace: Vec::new(),
        }
    }

    /// Seeds loops that do not name their own index under `name`.
    #[must_use]
    pub(crate) fn with_loop_index_variable(mut self, name: &'r str) -> Self {
        self.index_variable = name;
        self
    }

    pub(crate) fn into_trace(self) -> Vec<StageExecution> {
        self.trace
    }

    /// Runs one top-level stage and everything nested in it.
    pub(crate) fn execute(&mut self, root: &EtlStage, context: &mut PipelineContext) -> StageOutcome {
        let base_depth = context.depth();
        let mut stack = Vec::new();

        match self.enter(root, root.name().to_string(), None, context, &mut stack) {
            Ok(Some(reason)) => return StageOutcome::Skipped(reason),
            Ok(None) => {}
            Err(err) => return StageOutcome::Failed(self.unwind(err, &mut stack, context, base_depth)),
        }

        while let Some(task) = stack.pop() {
            let step = match task {
                Task::Enter {
                    stage,
                    path,
                    iteration,
                } => self
                    .enter(stage, path, iteration, context, &mut stack)
                    .map(|_| ()),
                Task::LoopStep {
                    stage,
                    stage_loop,
                    path,
                    iteration,
                    elapsed_ms,
                } => self.loop_step(stage, stage_loop, path, iteration, elapsed_ms, context, &mut stack),
                Task::PopIteration {
                    stage,
                    path,
                    iteration,
                    timer,
                } => {
                    context.pop_frame();
                    let elapsed = timer.elapsed_ms();
                    if let Some(Task::LoopStep { elapsed_ms, .. }) = stack.last_mut() {
                        *elapsed_ms += elapsed;
                    }
                    self.record(stage, path, Some(iteration), StageStatus::Completed, None, &timer, iteration_info());
                    Ok(())
                }
                Task::Finish {
                    stage,
                    path,
                    iteration,
                    timer,
                    info,
                    pops_frame,
                } => {
                    if pops_frame {
                        context.pop_frame();
                    }
                    self.complete(stage, path, iteration, &timer, info);
                    Ok(())
                }
            };

            if let Err(err) = step {
                return StageOutcome::Failed(self.unwind(err, &mut stack, context, base_depth));
            }
        }

        StageOutcome::Completed
    }

    /// Records a top-level stage the runner decided not to start.
    pub(crate) fn record_skip(&mut self, stage: &EtlStage, reason: &str) {
        let timer = SpanTimer::start(stage.name());
        self.emit(events::STAGE_SKIPPED, stage, stage.name(), None, json!({ "reason": reason }));
        self.record(
            stage,
            stage.name().to_string(),
            None,
            StageStatus::Skipped,
            Some(reason.to_string()),
            &timer,
            Map::new(),
        );
    }

    /// Starts a stage. Returns the skip reason if its condition is false.
    fn enter<'s>(
        &mut self,
        stage: &'s EtlStage,
        path: String,
        iteration: Option<usize>,
        context: &mut PipelineContext,
        stack: &mut Vec<Task<'s>>,
    ) -> Result<Option<String>, StageError> {
        let timer = SpanTimer::start(stage.name());

        let verdict = match stage.condition().evaluate(context, stage.name()) {
            Ok(verdict) => verdict,
            Err(err) => {
                self.fail(stage, path, iteration, &timer, Map::new(), &err);
                return Err(err);
            }
        };
        if !verdict.execute {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "Condition evaluated to false".to_string());
            tracing::debug!(stage = stage.name(), path = %path, reason = %reason, "Stage skipped");
            self.emit(events::STAGE_SKIPPED, stage, &path, iteration, json!({ "reason": reason }));
            self.record(stage, path, iteration, StageStatus::Skipped, Some(reason.clone()), &timer, Map::new());
            return Ok(Some(reason));
        }

        tracing::debug!(stage = stage.name(), path = %path, kind = %stage.kind(), "Stage started");
        self.emit(events::STAGE_STARTED, stage, &path, iteration, Value::Null);

        match stage.node() {
            StageNode::Leaf => {
                let info = match run_recipe(stage, context) {
                    Ok(info) => info,
                    Err(err) => {
                        self.fail(stage, path, iteration, &timer, Map::new(), &err);
                        return Err(err);
                    }
                };
                self.complete(stage, path, iteration, &timer, info);
            }
            StageNode::Group(children) => {
                let info = match run_recipe(stage, context) {
                    Ok(info) => info,
                    Err(err) => {
                        self.fail(stage, path, iteration, &timer, Map::new(), &err);
                        return Err(err);
                    }
                };
                context.push_frame(format!("{}:group", stage.name()));
                let child_tasks: Vec<Task<'s>> = children
                    .iter()
                    .rev()
                    .map(|child| Task::Enter {
                        stage: child,
                        path: format!("{path}/{}", child.name()),
                        iteration,
                    })
                    .collect();
                stack.push(Task::Finish {
                    stage,
                    path,
                    iteration,
                    timer,
                    info,
                    pops_frame: true,
                });
                stack.extend(child_tasks);
            }
            StageNode::Loop(stage_loop) => {
                stack.push(Task::Finish {
                    stage,
                    path: path.clone(),
                    iteration,
                    timer,
                    info: Map::new(),
                    pops_frame: false,
                });
                stack.push(Task::LoopStep {
                    stage,
                    stage_loop,
                    path,
                    iteration: 0,
                    elapsed_ms: 0.0,
                });
            }
        }
        Ok(None)
    }

    /// Checks the loop predicate and bound, then schedules one iteration.
    #[allow(clippy::too_many_arguments, clippy::cast_precision_loss)]
    fn loop_step<'s>(
        &mut self,
        stage: &'s EtlStage,
        stage_loop: &'s StageLoop,
        path: String,
        iteration: usize,
        elapsed_ms: f64,
        context: &mut PipelineContext,
        stack: &mut Vec<Task<'s>>,
    ) -> Result<(), StageError> {
        let name = stage.name();

        if !stage_loop.predicate().should_continue(context, name, iteration)? {
            let mean = if iteration == 0 {
                0.0
            } else {
                elapsed_ms / iteration as f64
            };
            tracing::debug!(stage = name, iterations = iteration, "Loop finished");
            if let Some(Task::Finish { info, .. }) = stack.last_mut() {
                info.insert("total_iterations".to_string(), json!(iteration));
                info.insert("mean_iteration_ms".to_string(), json!(mean));
            }
            return Ok(());
        }

        let max_iterations = stage_loop
            .max_iterations()
            .unwrap_or(self.config.max_loop_iterations);
        if iteration >= max_iterations {
            return Err(StageError::LoopBoundExceeded {
                stage: name.to_string(),
                max_iterations,
            });
        }

        let index_variable = stage_loop.index_variable_or(self.index_variable);
        context.push_frame(format!("{name}#{iteration}"));
        context.set(index_variable, json!(iteration));
        self.emit(
            events::LOOP_ITERATION,
            stage,
            &path,
            Some(iteration),
            json!({ "index_variable": index_variable }),
        );

        stack.push(Task::LoopStep {
            stage,
            stage_loop,
            path: path.clone(),
            iteration: iteration + 1,
            elapsed_ms,
        });
        stack.push(Task::PopIteration {
            stage,
            path: path.clone(),
            iteration,
            timer: SpanTimer::start(name),
        });
        for child in stage_loop.body().iter().rev() {
            stack.push(Task::Enter {
                stage: child,
                path: format!("{path}/{}", child.name()),
                iteration: Some(iteration),
            });
        }
        Ok(())
    }

    /// Drains the stack after a failure, closing every open frame.
    fn unwind(
        &mut self,
        mut err: StageError,
        stack: &mut Vec<Task<'_>>,
        context: &mut PipelineContext,
        base_depth: usize,
    ) -> StageError {
        while let Some(task) = stack.pop() {
            match task {
                Task::Enter { .. } | Task::LoopStep { .. } => {}
                Task::PopIteration {
                    stage,
                    path,
                    iteration,
                    timer,
                } => {
                    context.discard_frame();
                    err = StageError::LoopIteration {
                        stage: stage.name().to_string(),
                        iteration,
                        source: Box::new(err),
                    };
                    self.record(
                        stage,
                        path,
                        Some(iteration),
                        StageStatus::Failed,
                        Some(err.to_string()),
                        &timer,
                        iteration_info(),
                    );
                }
                Task::Finish {
                    stage,
                    path,
                    iteration,
                    timer,
                    info,
                    pops_frame,
                } => {
                    if pops_frame {
                        context.discard_frame();
                        err = StageError::SubStage {
                            stage: stage.name().to_string(),
                            source: Box::new(err),
                        };
                    }
                    self.fail(stage, path, iteration, &timer, info, &err);
                }
            }
        }
        context.truncate(base_depth);
        err
    }

    fn complete(
        &mut self,
        stage: &EtlStage,
        path: String,
        iteration: Option<usize>,
        timer: &SpanTimer,
        info: Map<String, Value>,
    ) {
        let duration_ms = timer.elapsed_ms();
        tracing::debug!(stage = stage.name(), path = %path, duration_ms, "Stage completed");
        self.emit(
            events::STAGE_COMPLETED,
            stage,
            &path,
            iteration,
            json!({ "duration_ms": duration_ms }),
        );
        self.record(stage, path, iteration, StageStatus::Completed, None, timer, info);
    }

    fn fail(
        &mut self,
        stage: &EtlStage,
        path: String,
        iteration: Option<usize>,
        timer: &SpanTimer,
        info: Map<String, Value>,
        err: &StageError,
    ) {
        tracing::debug!(stage = stage.name(), path = %path, code = err.code(), error = %err, "Stage failed");
        self.emit(
            events::STAGE_FAILED,
            stage,
            &path,
            iteration,
            json!({ "code": err.code(), "error": err.to_string() }),
        );
        self.record(
            stage,
            path,
            iteration,
            StageStatus::Failed,
            Some(err.to_string()),
            timer,
            info,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        stage: &EtlStage,
        path: String,
        iteration: Option<usize>,
        status: StageStatus,
        message: Option<String>,
        timer: &SpanTimer,
        info: Map<String, Value>,
    ) {
        self.trace.push(StageExecution {
            stage: stage.name().to_string(),
            path,
            iteration,
            status,
            message,
            started_at: timer.started_at(),
            duration_ms: timer.elapsed_ms(),
            info,
        });
    }

    fn emit(
        &self,
        event_type: &str,
        stage: &EtlStage,
        path: &str,
        iteration: Option<usize>,
        extra: Value,
    ) {
        let mut payload = json!({
            "pipeline": self.pipeline,
            "stage": stage.name(),
            "path": path,
            "kind": stage.kind(),
            "iteration": iteration,
        });
        if let (Some(target), Value::Object(fields)) = (payload.as_object_mut(), extra) {
            target.extend(fields);
        }
        self.events.emit(event_type, Some(payload));
    }
}

fn iteration_info() -> Map<String, Value> {
    let mut info = Map::new();
    info.insert("loop_iteration".to_string(), Value::Bool(true));
    info
}

/// Binds a stage's slots, runs its recipe and commits its outputs.
///
/// Errors a recipe raises as [`StageError`] (typically from [`StageVars`])
/// surface unchanged; anything else is wrapped with the stage name and the
/// names of the slots bound at the time.
fn run_recipe(stage: &EtlStage, context: &mut PipelineContext) -> Result<Map<String, Value>, StageError> {
    let resolver = stage.resolver();
    let mut binding = resolver.bind(context)?;
    let mut info = Map::new();

    if let Some(recipe) = stage.recipe() {
        let mut vars = StageVars::new(
            stage.name(),
            stage.slots(),
            stage.params(),
            context,
            &mut binding,
            &mut info,
        );
        let outcome = recipe.run(&mut vars);
        outcome.map_err(|err| match err.downcast::<StageError>() {
            Ok(stage_err) => stage_err,
            Err(source) => StageError::Recipe {
                stage: stage.name().to_string(),
                bound: binding.names().to_vec(),
                source,
            },
        })?;
    }

    let written = resolver.commit(&binding, context)?;
    tracing::trace!(stage = stage.name(), written = ?written, "Stage outputs committed");
    Ok(info)
}
