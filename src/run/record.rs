//! Per-run outcome records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::params::Params;

/// What happened to one step during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Executed and checkpointed.
    Ran,
    /// Satisfied by an existing checkpoint.
    Skipped,
    /// Executed and failed.
    Failed,
    /// Not attempted because an upstream step failed.
    Blocked,
}

/// Overall disposition of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every planned step ran or was skipped.
    Completed,
    /// At least one failure, and no new work landed.
    Failed,
    /// At least one failure, but other steps did run to completion.
    Partial,
}

/// One step's outcome within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: String,
    pub status: StepStatus,
    /// Plan reason for ran/skipped steps, error message for failed ones,
    /// the blocking ancestor for blocked ones.
    pub detail: String,
    /// The parameters the step was invoked (or validated) with.
    #[serde(default)]
    pub params: Params,
    /// Wall time spent executing or loading the checkpoint. Absent for
    /// blocked steps.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration_ms: Option<u64>,
}

/// The durable record of one executor invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    /// Step outcomes in plan order.
    pub steps: Vec<StepOutcome>,
}

impl RunRecord {
    /// Look up the outcome for a step.
    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == step)
    }

    /// Names of steps with the given status, in plan order.
    pub fn steps_with_status(&self, status: StepStatus) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.step.as_str())
            .collect()
    }

    /// Names of failed steps, in plan order.
    pub fn failed_steps(&self) -> Vec<&str> {
        self.steps_with_status(StepStatus::Failed)
    }

    /// Human-readable log rendering, one line per step plus a trailer.
    pub fn render_text(&self) -> String {
        let mut lines = Vec::with_capacity(self.steps.len() + 2);
        lines.push(format!(
            "{}  started {}",
            self.run_id,
            self.started_at.to_rfc3339()
        ));
        for step in &self.steps {
            let status = match step.status {
                StepStatus::Ran => "ran    ",
                StepStatus::Skipped => "skipped",
                StepStatus::Failed => "FAILED ",
                StepStatus::Blocked => "blocked",
            };
            let duration = step
                .duration_ms
                .map(|ms| format!(" [{}ms]", ms))
                .unwrap_or_default();
            lines.push(format!(
                "  {}  {}{}  {}",
                status, step.step, duration, step.detail
            ));
        }
        lines.push(format!(
            "{:?} in {}ms",
            self.status,
            (self.finished_at - self.started_at).num_milliseconds()
        ));
        lines.join("\n")
    }
}

/// Accumulates step outcomes and derives the overall status.
pub struct RunRecordBuilder {
    run_id: String,
    started_at: DateTime<Utc>,
    steps: Vec<StepOutcome>,
}

impl RunRecordBuilder {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            steps: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: StepOutcome) {
        self.steps.push(outcome);
    }

    /// Seal the record. Overall status: `Completed` when nothing failed or
    /// was blocked, `Partial` when failures sit alongside steps that did
    /// execute, `Failed` otherwise.
    pub fn finish(self) -> RunRecord {
        let any_bad = self
            .steps
            .iter()
            .any(|s| matches!(s.status, StepStatus::Failed | StepStatus::Blocked));
        let any_ran = self.steps.iter().any(|s| s.status == StepStatus::Ran);

        let status = if !any_bad {
            RunStatus::Completed
        } else if any_ran {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        };

        RunRecord {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            status,
            steps: self.steps,
        }
    }
}

/// Generate a lexicographically sortable run id from the current time,
/// e.g. `run_20250101T093015_204`.
pub fn new_run_id() -> String {
    Utc::now().format("run_%Y%m%dT%H%M%S_%3f").to_string()
}
