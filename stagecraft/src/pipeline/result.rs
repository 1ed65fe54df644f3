//! Execution results.

use super::failure_tolerance::FailureRecord;
use crate::context::ContextSnapshot;
use crate::core::StageStatus;
use crate::errors::StageError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Final outcome of one top-level stage.
#[derive(Debug)]
pub enum StageOutcome {
    /// The stage ran to completion.
    Completed,
    /// The stage never started.
    Skipped(String),
    /// The stage failed.
    Failed(StageError),
}

impl StageOutcome {
    /// Returns the matching terminal status.
    #[must_use]
    pub fn status(&self) -> StageStatus {
        match self {
            Self::Completed => StageStatus::Completed,
            Self::Skipped(_) => StageStatus::Skipped,
            Self::Failed(_) => StageStatus::Failed,
        }
    }

    /// Returns the skip reason or the error message.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Completed => None,
            Self::Skipped(reason) => Some(reason.clone()),
            Self::Failed(err) => Some(err.to_string()),
        }
    }
}

/// One entry of the execution trace.
///
/// Every stage execution is traced, including nested stages and each loop
/// iteration, in the order the executions finished.
#[derive(Debug, Clone, Serialize)]
pub struct StageExecution {
    /// Stage name.
    pub stage: String,
    /// Slash-separated names from the top-level stage down to this one.
    pub path: String,
    /// Iteration index of the innermost enclosing loop, if any.
    pub iteration: Option<usize>,
    /// Terminal status.
    pub status: StageStatus,
    /// Skip reason or error message.
    pub message: Option<String>,
    /// When the execution started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
    /// Additional information recorded by the recipe or the executor.
    pub info: serde_json::Map<String, serde_json::Value>,
}

/// The aggregated result of one pipeline run.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Unique id of the run.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// Fingerprint of the definition that ran.
    pub fingerprint: String,
    /// True if no stage failed.
    pub success: bool,
    /// Outcome of every top-level stage.
    pub per_stage_status: HashMap<String, StageOutcome>,
    /// Top-level stage names in the order they were scheduled.
    pub execution_order: Vec<String>,
    /// Variables visible in the root frame after the run.
    pub context_snapshot: ContextSnapshot,
    /// Every stage execution, in completion order.
    pub trace: Vec<StageExecution>,
    /// Failures in the order they happened.
    pub failures: Vec<FailureRecord>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

impl ExecutionResult {
    /// Returns the first stage failure, in execution order.
    #[must_use]
    pub fn error(&self) -> Option<&StageError> {
        self.execution_order
            .iter()
            .find_map(|name| match self.per_stage_status.get(name) {
                Some(StageOutcome::Failed(err)) => Some(err),
                _ => None,
            })
    }

    /// Returns the outcome of a top-level stage.
    #[must_use]
    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.per_stage_status.get(stage)
    }

    /// Returns the status of a top-level stage.
    #[must_use]
    pub fn status_of(&self, stage: &str) -> Option<StageStatus> {
        self.per_stage_status.get(stage).map(StageOutcome::status)
    }

    /// Returns true if the stage completed.
    #[must_use]
    pub fn is_completed(&self, stage: &str) -> bool {
        self.status_of(stage) == Some(StageStatus::Completed)
    }

    /// Returns true if the stage was skipped.
    #[must_use]
    pub fn is_skipped(&self, stage: &str) -> bool {
        self.status_of(stage) == Some(StageStatus::Skipped)
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failed(&self, stage: &str) -> bool {
        self.status_of(stage) == Some(StageStatus::Failed)
    }

    /// Returns the names of top-level stages with the given status, in
    /// execution order.
    #[must_use]
    pub fn stages_with_status(&self, status: StageStatus) -> Vec<&str> {
        self.execution_order
            .iter()
            .filter(|name| self.status_of(name) == Some(status))
            .map(String::as_str)
            .collect()
    }

    /// Returns trace entries for one stage, nested or not.
    #[must_use]
    pub fn executions_of(&self, stage: &str) -> Vec<&StageExecution> {
        self.trace.iter().filter(|e| e.stage == stage).collect()
    }

    /// Returns a JSON summary of the run.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let statuses: serde_json::Map<String, serde_json::Value> = self
            .execution_order
            .iter()
            .filter_map(|name| {
                let outcome = self.per_stage_status.get(name)?;
                Some((
                    name.clone(),
                    serde_json::json!({
                        "status": outcome.status(),
                        "message": outcome.message(),
                    }),
                ))
            })
            .collect();

        serde_json::json!({
            "run_id": self.run_id.to_string(),
            "pipeline": self.pipeline,
            "fingerprint": self.fingerprint,
            "success": self.success,
            "error": self.error().map(ToString::to_string),
            "per_stage_status": statuses,
            "execution_order": self.execution_order,
            "context_snapshot": self.context_snapshot.to_json(),
            "trace": self.trace,
            "failures": self.failures,
            "started_at": self.started_at.to_rfc3339(),
            "finished_at": self.finished_at.to_rfc3339(),
            "duration_ms": self.duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcomes: Vec<(&str, StageOutcome)>) -> ExecutionResult {
        let now = Utc::now();
        let execution_order = outcomes.iter().map(|(n, _)| (*n).to_string()).collect();
        let success = !outcomes
            .iter()
            .any(|(_, o)| matches!(o, StageOutcome::Failed(_)));
        ExecutionResult {
            run_id: Uuid::new_v4(),
            pipeline: "etl".to_string(),
            fingerprint: "abc".to_string(),
            success,
            per_stage_status: outcomes
                .into_iter()
                .map(|(n, o)| (n.to_string(), o))
                .collect(),
            execution_order,
            context_snapshot: ContextSnapshot::new(),
            trace: Vec::new(),
            failures: Vec::new(),
            started_at: now,
            finished_at: now,
            duration_ms: 0.0,
        }
    }

    fn unresolved(stage: &str) -> StageError {
        StageError::UnresolvedVariable {
            stage: stage.to_string(),
            variable: "clean".to_string(),
        }
    }

    #[test]
    fn test_status_helpers() {
        let result = result(vec![
            ("load", StageOutcome::Completed),
            ("clean", StageOutcome::Skipped("disabled".to_string())),
            ("save", StageOutcome::Failed(unresolved("save"))),
        ]);

        assert!(!result.success);
        assert!(result.is_completed("load"));
        assert!(result.is_skipped("clean"));
        assert!(result.is_failed("save"));
        assert_eq!(result.status_of("missing"), None);
        assert_eq!(result.stages_with_status(StageStatus::Failed), vec!["save"]);
        assert_eq!(result.error().map(StageError::code), Some("STAGE-UNRESOLVED"));
    }

    #[test]
    fn test_error_is_first_failure_in_order() {
        let result = result(vec![
            ("a", StageOutcome::Failed(unresolved("a"))),
            ("b", StageOutcome::Failed(unresolved("b"))),
        ]);
        assert_eq!(result.error().map(StageError::stage), Some("a"));
    }

    #[test]
    fn test_to_json() {
        let result = result(vec![
            ("load", StageOutcome::Completed),
            ("clean", StageOutcome::Skipped("disabled".to_string())),
        ]);
        let json = result.to_json();
        assert_eq!(json["success"], true);
        assert_eq!(json["per_stage_status"]["load"]["status"], "completed");
        assert_eq!(json["per_stage_status"]["clean"]["message"], "disabled");
        assert!(json["error"].is_null());
    }
}
