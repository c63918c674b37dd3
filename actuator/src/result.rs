use serde::{Deserialize, Serialize};

/// Outcome of a single action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Failed,
    Skipped,
}

/// Per-action record, created once by the interpreter and never mutated afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_index: usize,
    pub action_kind: String,
    pub status: ActionStatus,
    /// Human-readable description of what happened
    pub details: String,
    pub duration_ms: u64,
}

impl ActionResult {
    pub fn success(index: usize, kind: &str, details: impl Into<String>, duration_ms: u64) -> Self {
        Self::new(index, kind, ActionStatus::Success, details.into(), duration_ms)
    }

    pub fn failed(index: usize, kind: &str, details: impl Into<String>, duration_ms: u64) -> Self {
        Self::new(index, kind, ActionStatus::Failed, details.into(), duration_ms)
    }

    pub fn skipped(index: usize, kind: &str, details: impl Into<String>) -> Self {
        Self::new(index, kind, ActionStatus::Skipped, details.into(), 0)
    }

    fn new(
        action_index: usize,
        kind: &str,
        status: ActionStatus,
        details: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            action_index,
            action_kind: kind.to_string(),
            status,
            details,
            duration_ms,
        }
    }
}

/// Aggregate result of one script run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// True iff no action failed
    pub success: bool,
    pub results: Vec<ActionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn from_results(results: Vec<ActionResult>, error: Option<String>) -> Self {
        let success = !results.iter().any(|r| r.status == ActionStatus::Failed);
        Self {
            success,
            results,
            error,
        }
    }

    pub fn count(&self, status: ActionStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn statuses(&self) -> Vec<ActionStatus> {
        self.results.iter().map(|r| r.status).collect()
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.results.iter().map(|r| r.duration_ms).sum()
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "{} ({} succeeded, {} failed, {} skipped, {}ms)",
            if self.success { "success" } else { "failure" },
            self.count(ActionStatus::Success),
            self.count(ActionStatus::Failed),
            self.count(ActionStatus::Skipped),
            self.total_duration_ms()
        )
    }
}
