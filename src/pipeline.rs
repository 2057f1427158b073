//! The top-level facade tying registry, planner, executor, and run log
//! together under one directory layout.
//!
//! A pipeline owns its step registry and its on-disk state:
//!
//! ```text
//! <root>/checkpoints/   checkpoint store
//! <root>/runs/          run log
//! ```

use std::path::PathBuf;

use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::error::{CairnError, Result};
use crate::executor::{ExecOptions, ExecutionObserver, Executor, TracingObserver};
use crate::graph::ExecutionGraph;
use crate::params::Params;
use crate::planner::{ExecutionPlan, PlanAction, PlanOptions, Planner};
use crate::run::{RunLogger, RunRecord, RunStatus, StepOutcome, StepStatus};
use crate::step::{StepRegistry, StepSpec};

/// A registered workflow with checkpointing and run history.
pub struct Pipeline {
    registry: StepRegistry,
    store: CheckpointStore,
    logger: RunLogger,
}

impl Pipeline {
    /// Create a pipeline storing checkpoints and run logs under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            registry: StepRegistry::new(),
            store: CheckpointStore::new(root.join("checkpoints")),
            logger: RunLogger::new(root.join("runs")),
        }
    }

    /// Register a step. Fails on duplicate names or inputs referencing
    /// steps or outputs that are not registered yet.
    pub fn register(&mut self, spec: StepSpec) -> Result<()> {
        self.registry.register(spec)
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn logger(&self) -> &RunLogger {
        &self.logger
    }

    /// Compute an execution plan without touching any state.
    pub fn plan(&self, options: &PlanOptions) -> Result<ExecutionPlan> {
        let graph = ExecutionGraph::from_registry(&self.registry)?;
        Planner::new(&self.registry, &graph, &self.store).plan(options)
    }

    /// Execute a previously computed plan and log the run record.
    pub fn execute(&self, plan: &ExecutionPlan, options: &ExecOptions) -> Result<RunRecord> {
        self.execute_observed(plan, options, &TracingObserver)
    }

    /// Like [`execute`](Self::execute), with progress callbacks.
    ///
    /// The run record is logged from `run_finished`, so it lands even when
    /// the executor aborts the run (e.g. on an unreadable checkpoint).
    pub fn execute_observed(
        &self,
        plan: &ExecutionPlan,
        options: &ExecOptions,
        observer: &dyn ExecutionObserver,
    ) -> Result<RunRecord> {
        let graph = ExecutionGraph::from_registry(&self.registry)?;
        let logging = LoggingObserver {
            inner: observer,
            logger: &self.logger,
        };
        Executor::new(&self.registry, &graph, &self.store).execute(plan, options, &logging)
    }

    /// Plan and execute in one call, failing unless every planned step ran
    /// or was skipped.
    ///
    /// The run record is logged either way; on failure the error names the
    /// failed steps and the incomplete run's id. An unreadable checkpoint
    /// surfaces as `CheckpointCorrupt` instead, and needs an explicit
    /// [`invalidate`](Self::invalidate) before the pipeline can run again.
    pub fn run(&self, plan_options: &PlanOptions, exec_options: &ExecOptions) -> Result<RunRecord> {
        let plan = self.plan(plan_options)?;
        info!(
            to_run = plan.steps_to_run().len(),
            total = plan.entries().len(),
            "plan ready"
        );

        let record = self.execute(&plan, exec_options)?;
        if record.status != RunStatus::Completed {
            let mut failed: Vec<String> = record
                .failed_steps()
                .into_iter()
                .map(String::from)
                .collect();
            failed.extend(
                record
                    .steps_with_status(StepStatus::Blocked)
                    .into_iter()
                    .map(String::from),
            );
            return Err(CairnError::RunIncomplete {
                run_id: record.run_id,
                failed,
            });
        }
        Ok(record)
    }

    /// Drop one step's checkpoint so its next plan entry is a rerun.
    /// Returns whether a checkpoint existed.
    pub fn invalidate(&self, step: &str) -> Result<bool> {
        if !self.registry.contains(step) {
            return Err(CairnError::UnknownStep {
                name: step.to_string(),
            });
        }
        self.store.invalidate(step)
    }

    /// Drop every checkpoint. Returns how many were removed.
    pub fn invalidate_all(&self) -> Result<usize> {
        self.store.clear()
    }

    /// All logged runs, oldest first.
    pub fn runs(&self) -> Result<Vec<RunRecord>> {
        self.logger.list_runs()
    }
}

/// Forwards events to the caller's observer and persists the record when
/// the run finishes, including runs the executor then fails.
struct LoggingObserver<'a> {
    inner: &'a dyn ExecutionObserver,
    logger: &'a RunLogger,
}

impl ExecutionObserver for LoggingObserver<'_> {
    fn step_started(&self, step: &str, action: PlanAction, params: &Params) {
        self.inner.step_started(step, action, params);
    }

    fn step_finished(&self, outcome: &StepOutcome) {
        self.inner.step_finished(outcome);
    }

    fn run_finished(&self, record: &RunRecord) {
        self.logger.log(record);
        self.inner.run_finished(record);
    }
}
