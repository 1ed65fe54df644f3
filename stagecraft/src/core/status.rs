//! Stage status and kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The structural kind of a stage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// A stage with a recipe and no nested stages.
    Leaf,
    /// A stage that runs its own recipe, then its sub-stages in order.
    Group,
    /// A stage that re-runs a body of stages under a continuation predicate.
    Loop,
}

impl Default for StageKind {
    fn default() -> Self {
        Self::Leaf
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf => write!(f, "leaf"),
            Self::Group => write!(f, "group"),
            Self::Loop => write!(f, "loop"),
        }
    }
}

/// The execution status of a stage.
///
/// A stage starts `Pending` and either becomes `Skipped` (its condition was
/// false) or passes through `Running` to `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage is waiting to be scheduled.
    Pending,
    /// Stage is currently running.
    Running,
    /// Stage completed successfully.
    Completed,
    /// Stage was skipped.
    Skipped,
    /// Stage failed.
    Failed,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }

    /// Returns true if the status does not count against the run.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::Leaf.to_string(), "leaf");
        assert_eq!(StageKind::Group.to_string(), "group");
        assert_eq!(StageKind::Loop.to_string(), "loop");
    }

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Completed.to_string(), "completed");
        assert_eq!(StageStatus::Skipped.to_string(), "skipped");
        assert_eq!(StageStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_stage_status_is_terminal() {
        assert!(StageStatus::Completed.is_terminal());
        assert!(StageStatus::Skipped.is_terminal());
        assert!(StageStatus::Failed.is_terminal());
        assert!(!StageStatus::Pending.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
    }

    #[test]
    fn test_skip_is_not_a_failure() {
        assert!(StageStatus::Skipped.is_success());
        assert!(!StageStatus::Skipped.is_failure());
        assert!(StageStatus::Failed.is_failure());
    }

    #[test]
    fn test_stage_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Completed).unwrap();
        assert_eq!(json, r#""completed""#);

        let deserialized: StageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, StageStatus::Completed);
    }
}
