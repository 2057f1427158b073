//! Execution progress callbacks.

use tracing::{error, info};

use crate::params::Params;
use crate::planner::PlanAction;
use crate::run::{RunRecord, StepOutcome, StepStatus};

/// Receives progress events while a plan executes.
///
/// All callbacks fire on the coordinating thread, in plan-consistent order.
/// Implementations should return quickly; the executor waits on them.
pub trait ExecutionObserver: Send + Sync {
    /// A step is about to execute or load its checkpoint, with the
    /// parameters it resolved to.
    fn step_started(&self, step: &str, action: PlanAction, params: &Params) {
        let _ = (step, action, params);
    }

    /// A step finished, one way or another.
    fn step_finished(&self, outcome: &StepOutcome) {
        let _ = outcome;
    }

    /// The whole run finished.
    fn run_finished(&self, record: &RunRecord) {
        let _ = record;
    }
}

/// Observer that emits `tracing` events. The default when no observer is
/// supplied.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn step_started(&self, step: &str, action: PlanAction, params: &Params) {
        info!(step, ?action, ?params, "step started");
    }

    fn step_finished(&self, outcome: &StepOutcome) {
        match outcome.status {
            StepStatus::Failed => {
                error!(step = %outcome.step, detail = %outcome.detail, "step failed")
            }
            _ => info!(step = %outcome.step, status = ?outcome.status, "step finished"),
        }
    }

    fn run_finished(&self, record: &RunRecord) {
        info!(run_id = %record.run_id, status = ?record.status, "run finished");
    }
}
