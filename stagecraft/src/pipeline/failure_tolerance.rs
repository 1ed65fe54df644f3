//! Failure handling policy for pipeline runs.
//!
//! Decides what happens to the remaining top-level stages once one of them
//! fails: abort the run, skip only what depends on the failure, or keep going.

use crate::errors::StageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// How to handle stage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Stop scheduling after the first failure (default).
    #[default]
    FailFast,
    /// Record the failure and skip stages that depend on it, directly or
    /// through other skipped stages; run unrelated stages.
    ContinueOnFailure,
    /// Attempt every stage regardless of earlier failures.
    BestEffort,
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail_fast"),
            Self::ContinueOnFailure => write!(f, "continue_on_failure"),
            Self::BestEffort => write!(f, "best_effort"),
        }
    }
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "continue_on_failure" => Ok(Self::ContinueOnFailure),
            "best_effort" => Ok(Self::BestEffort),
            other => Err(format!("unknown failure mode '{other}'")),
        }
    }
}

/// Record of a stage failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Top-level stage the failure is attributed to.
    pub stage: String,
    /// Machine-readable error code of the innermost failure.
    pub code: String,
    /// Error message.
    pub error: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a record for a stage error.
    #[must_use]
    pub fn new(stage: impl Into<String>, error: &StageError) -> Self {
        Self {
            stage: stage.into(),
            code: error.innermost().code().to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Collects failures during a run and answers scheduling questions.
#[derive(Debug, Default)]
pub struct FailureCollector {
    mode: FailureMode,
    failures: Vec<FailureRecord>,
    failed_stages: HashSet<String>,
    blocked_stages: HashSet<String>,
}

impl FailureCollector {
    /// Creates a collector for the given mode.
    #[must_use]
    pub fn new(mode: FailureMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Returns the mode.
    #[must_use]
    pub fn mode(&self) -> FailureMode {
        self.mode
    }

    /// Records a stage failure.
    pub fn record_failure(&mut self, record: FailureRecord) {
        self.failed_stages.insert(record.stage.clone());
        self.failures.push(record);
    }

    /// Records that a stage was skipped because of an upstream failure.
    pub fn record_blocked(&mut self, stage: &str) {
        self.blocked_stages.insert(stage.to_string());
    }

    /// Returns true if the stage has failed.
    #[must_use]
    pub fn has_failed(&self, stage: &str) -> bool {
        self.failed_stages.contains(stage)
    }

    /// Returns the reason a stage must not run, if any.
    ///
    /// `dependencies` are the stage's merged explicit and implicit
    /// dependencies.
    #[must_use]
    pub fn skip_reason<'a>(
        &self,
        dependencies: impl IntoIterator<Item = &'a String>,
    ) -> Option<String> {
        match self.mode {
            FailureMode::FailFast => self
                .failures
                .first()
                .map(|f| format!("Pipeline aborted after stage '{}' failed", f.stage)),
            FailureMode::ContinueOnFailure => {
                let mut upstream: Vec<&String> = dependencies
                    .into_iter()
                    .filter(|d| self.failed_stages.contains(*d) || self.blocked_stages.contains(*d))
                    .collect();
                upstream.sort();
                upstream.first().map(|d| {
                    format!("Blocked by upstream stage '{d}' which did not complete")
                })
            }
            FailureMode::BestEffort => None,
        }
    }

    /// Returns all failures, in the order they were recorded.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Consumes the collector and returns its failures.
    #[must_use]
    pub fn into_failures(self) -> Vec<FailureRecord> {
        self.failures
    }
}
