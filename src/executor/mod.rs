//! Plan execution.
//!
//! The executor walks the planned subset wave by wave: every step in a wave
//! has all upstream work in earlier waves, so waves run their steps
//! concurrently (bounded by [`ExecOptions::parallelism`]) on scoped threads.
//! Skipped steps load their checkpoint eagerly, on the coordinating thread;
//! a skip whose checkpoint turns out to be unreadable aborts the whole run,
//! since the store can no longer be trusted until the damaged checkpoint is
//! invalidated.
//!
//! A failed compute never stops unrelated branches. Only the failed step's
//! transitive dependents are withheld, recorded as blocked, and everything
//! else proceeds. The run record therefore always covers every planned step.

pub mod observer;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, info};

use crate::checkpoint::{CheckpointStore, LoadedOutputs};
use crate::error::{CairnError, Result};
use crate::fingerprint::{file_fingerprint, params_fingerprint};
use crate::graph::ExecutionGraph;
use crate::planner::{ExecutionPlan, PlanAction, PlanEntry};
use crate::run::{new_run_id, RunRecord, RunRecordBuilder, StepOutcome, StepStatus};
use crate::step::{ComputeContext, InputRef, InputValue, ResolvedInput, StepRegistry, StepSpec};

pub use observer::{ExecutionObserver, TracingObserver};

/// Cooperative cancellation flag, checked between waves.
///
/// Cancelling never interrupts a step in flight; steps already running
/// finish and checkpoint normally, and everything not yet started is
/// recorded as blocked.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Options controlling one executor invocation.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Upper bound on steps executing concurrently within a wave.
    pub parallelism: usize,
    /// Run id to stamp on the record; generated when absent.
    pub run_id: Option<String>,
    pub cancel: CancelToken,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            run_id: None,
            cancel: CancelToken::new(),
        }
    }
}

impl ExecOptions {
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A runnable step, with inputs resolved before the worker starts.
struct Task<'a> {
    spec: &'a StepSpec,
    entry: &'a PlanEntry,
    inputs: Vec<ResolvedInput>,
    /// Params+inputs fingerprint recomputed from the upstream records as
    /// they exist now. The plan's own fingerprint can be provisional when
    /// an upstream step was itself replanned to run.
    params_fingerprint: String,
}

/// Executes an [`ExecutionPlan`] against the registry and store.
pub struct Executor<'a> {
    registry: &'a StepRegistry,
    graph: &'a ExecutionGraph,
    store: &'a CheckpointStore,
}

impl<'a> Executor<'a> {
    pub fn new(
        registry: &'a StepRegistry,
        graph: &'a ExecutionGraph,
        store: &'a CheckpointStore,
    ) -> Self {
        Self {
            registry,
            graph,
            store,
        }
    }

    /// Execute the plan and return the run record.
    ///
    /// Compute failures are captured in the record, not returned as `Err`;
    /// `Err` here means the run itself could not proceed, either because the
    /// engine hit an internal problem (e.g. a plan entry naming an
    /// unregistered step) or because a skipped step's checkpoint could not
    /// be read back. In the unreadable-checkpoint case the observer still
    /// receives the partial record via `run_finished` before the error is
    /// returned.
    pub fn execute(
        &self,
        plan: &ExecutionPlan,
        options: &ExecOptions,
        observer: &dyn ExecutionObserver,
    ) -> Result<RunRecord> {
        let run_id = options.run_id.clone().unwrap_or_else(new_run_id);
        let mut builder = RunRecordBuilder::new(&run_id);
        info!(run_id = %run_id, steps = plan.entries().len(), "run started");

        let planned: Vec<String> = plan.entries().iter().map(|e| e.step.clone()).collect();
        let planned_set: HashSet<&str> = planned.iter().map(String::as_str).collect();

        // Outputs of completed steps, shared with downstream consumers.
        let mut artifacts: HashMap<String, LoadedOutputs> = HashMap::new();
        let mut outcomes: HashMap<String, StepOutcome> = HashMap::new();
        // Step name -> the failed ancestor that withheld it.
        let mut blocked: HashMap<String, String> = HashMap::new();
        let mut cancelled = false;
        // Set when a skip's checkpoint cannot be read; the run aborts but
        // the partial record is still assembled and reported.
        let mut fatal: Option<(CairnError, String)> = None;

        'waves: for wave in self.graph.waves(&planned) {
            if options.cancel.is_cancelled() {
                cancelled = true;
            }

            let mut tasks: Vec<Task<'_>> = Vec::new();
            for step in &wave {
                let entry = plan
                    .entry(step)
                    .ok_or_else(|| CairnError::UnknownStep { name: step.clone() })?;
                let spec = self.registry.resolve(step)?;

                if cancelled {
                    let outcome = StepOutcome {
                        step: step.clone(),
                        status: StepStatus::Blocked,
                        detail: String::from("run cancelled"),
                        params: spec.params().clone(),
                        duration_ms: None,
                    };
                    observer.step_finished(&outcome);
                    outcomes.insert(step.clone(), outcome);
                    continue;
                }

                if let Some(cause) = blocked.get(step) {
                    let outcome = StepOutcome {
                        step: step.clone(),
                        status: StepStatus::Blocked,
                        detail: format!("upstream '{}' failed", cause),
                        params: spec.params().clone(),
                        duration_ms: None,
                    };
                    observer.step_finished(&outcome);
                    outcomes.insert(step.clone(), outcome);
                    continue;
                }

                match entry.action {
                    PlanAction::Skip => {
                        let (outcome, err) =
                            self.load_skipped(spec, entry, &mut artifacts, observer);
                        outcomes.insert(step.clone(), outcome);
                        if let Some(e) = err {
                            let detail =
                                format!("run aborted: checkpoint for '{}' unreadable", step);
                            fatal = Some((e, detail));
                            break 'waves;
                        }
                    }
                    PlanAction::Run => match self.build_task(spec, entry, &artifacts) {
                        Ok(task) => tasks.push(task),
                        Err(e) => {
                            let outcome = StepOutcome {
                                step: step.clone(),
                                status: StepStatus::Failed,
                                detail: e.to_string(),
                                params: spec.params().clone(),
                                duration_ms: None,
                            };
                            observer.step_finished(&outcome);
                            block_dependents(self.graph, &planned_set, &mut blocked, step);
                            outcomes.insert(step.clone(), outcome);
                        }
                    },
                }
            }

            for batch in tasks.chunks(options.parallelism.max(1)) {
                for task in batch {
                    observer.step_started(task.spec.name(), PlanAction::Run, task.spec.params());
                }

                let results: Vec<(String, Result<LoadedOutputs>, u64)> =
                    thread::scope(|scope| {
                        let handles: Vec<_> = batch
                            .iter()
                            .map(|task| {
                                (
                                    task.spec.name().to_string(),
                                    scope.spawn(move || {
                                        let start = Instant::now();
                                        let result = self.run_step(task);
                                        (result, start.elapsed().as_millis() as u64)
                                    }),
                                )
                            })
                            .collect();

                        handles
                            .into_iter()
                            .map(|(name, handle)| match handle.join() {
                                Ok((result, ms)) => (name, result, ms),
                                Err(_) => {
                                    let step = name.clone();
                                    (
                                        name,
                                        Err(CairnError::StepExecutionFailed {
                                            step,
                                            message: String::from("compute panicked"),
                                        }),
                                        0,
                                    )
                                }
                            })
                            .collect()
                    });

                for (step, result, ms) in results {
                    let entry = plan
                        .entry(&step)
                        .ok_or_else(|| CairnError::UnknownStep { name: step.clone() })?;
                    let params = self.registry.resolve(&step)?.params().clone();
                    let outcome = match result {
                        Ok(loaded) => {
                            artifacts.insert(step.clone(), loaded);
                            StepOutcome {
                                step: step.clone(),
                                status: StepStatus::Ran,
                                detail: entry.reason.clone(),
                                params,
                                duration_ms: Some(ms),
                            }
                        }
                        Err(e) => {
                            block_dependents(self.graph, &planned_set, &mut blocked, &step);
                            StepOutcome {
                                step: step.clone(),
                                status: StepStatus::Failed,
                                detail: e.to_string(),
                                params,
                                duration_ms: Some(ms),
                            }
                        }
                    };
                    observer.step_finished(&outcome);
                    outcomes.insert(step, outcome);
                }
            }
        }

        // On an abort every planned step the loop never reached is recorded
        // as blocked, so the partial record still covers the full plan.
        if let Some((_, detail)) = &fatal {
            for entry in plan.entries() {
                if !outcomes.contains_key(&entry.step) {
                    let params = self.registry.resolve(&entry.step)?.params().clone();
                    let outcome = StepOutcome {
                        step: entry.step.clone(),
                        status: StepStatus::Blocked,
                        detail: detail.clone(),
                        params,
                        duration_ms: None,
                    };
                    observer.step_finished(&outcome);
                    outcomes.insert(entry.step.clone(), outcome);
                }
            }
        }

        for entry in plan.entries() {
            if let Some(outcome) = outcomes.remove(&entry.step) {
                builder.record(outcome);
            }
        }

        let record = builder.finish();
        observer.run_finished(&record);
        match fatal {
            Some((e, _)) => Err(e),
            None => Ok(record),
        }
    }

    /// Load a skipped step's checkpoint. Every skip is read, even when no
    /// planned dependent consumes it, so a valid plan guarantees readable
    /// artifacts.
    ///
    /// A read failure is returned alongside the failed outcome; the caller
    /// aborts the run with it, since an unreadable checkpoint is storage
    /// damage, not a compute failure.
    fn load_skipped(
        &self,
        spec: &StepSpec,
        entry: &PlanEntry,
        artifacts: &mut HashMap<String, LoadedOutputs>,
        observer: &dyn ExecutionObserver,
    ) -> (StepOutcome, Option<CairnError>) {
        let step = spec.name();
        observer.step_started(step, PlanAction::Skip, spec.params());

        let start = Instant::now();
        let (outcome, err) = match self.store.read(spec) {
            Ok(loaded) => {
                artifacts.insert(step.to_string(), loaded);
                let outcome = StepOutcome {
                    step: step.to_string(),
                    status: StepStatus::Skipped,
                    detail: entry.reason.clone(),
                    params: spec.params().clone(),
                    duration_ms: Some(start.elapsed().as_millis() as u64),
                };
                (outcome, None)
            }
            Err(e) => {
                let outcome = StepOutcome {
                    step: step.to_string(),
                    status: StepStatus::Failed,
                    detail: e.to_string(),
                    params: spec.params().clone(),
                    duration_ms: Some(start.elapsed().as_millis() as u64),
                };
                (outcome, Some(e))
            }
        };
        observer.step_finished(&outcome);
        (outcome, err)
    }

    /// Resolve a step's inputs from in-memory upstream outputs and compute
    /// the fingerprint its checkpoint will be stamped with.
    ///
    /// The fingerprint comes from the upstream checkpoint records on disk,
    /// which at this point describe exactly the artifacts being consumed;
    /// the plan entry's fingerprint may predate an upstream rerun.
    fn build_task<'t>(
        &'t self,
        spec: &'t StepSpec,
        entry: &'t PlanEntry,
        artifacts: &HashMap<String, LoadedOutputs>,
    ) -> Result<Task<'t>> {
        let mut resolved = Vec::with_capacity(spec.inputs().len());
        let mut input_fingerprints = Vec::with_capacity(spec.inputs().len());

        for input in spec.inputs() {
            let value = match input {
                InputRef::Step { step, output } => {
                    let upstream = artifacts.get(step).and_then(|o| o.get(output)).ok_or_else(
                        || CairnError::StepExecutionFailed {
                            step: spec.name().to_string(),
                            message: format!("upstream artifact {}:{} unavailable", step, output),
                        },
                    )?;
                    input_fingerprints.push(self.recorded_fingerprint(step, output)?);
                    InputValue::Artifact(Arc::clone(upstream))
                }
                InputRef::External { path } => {
                    input_fingerprints.push(file_fingerprint(path));
                    InputValue::External(path.clone())
                }
            };
            resolved.push(ResolvedInput {
                reference: input.clone(),
                value,
            });
        }

        Ok(Task {
            spec,
            entry,
            inputs: resolved,
            params_fingerprint: params_fingerprint(spec.params(), &input_fingerprints),
        })
    }

    /// Content fingerprint of one upstream output, from its checkpoint
    /// record as currently on disk.
    fn recorded_fingerprint(&self, upstream: &str, output: &str) -> Result<String> {
        let record =
            self.store
                .record(upstream)?
                .ok_or_else(|| CairnError::CheckpointMissing {
                    step: upstream.to_string(),
                })?;
        let entry = record
            .output(output)
            .ok_or_else(|| CairnError::CheckpointCorrupt {
                step: upstream.to_string(),
                path: self.store.root().join(format!("{}.meta.json", upstream)),
                message: format!("record has no output '{}'", output),
            })?;
        Ok(entry.content_fingerprint.clone())
    }

    /// Run one step's compute and checkpoint its outputs.
    fn run_step(&self, task: &Task<'_>) -> Result<LoadedOutputs> {
        let spec = task.spec;
        let step = spec.name();
        debug!(step, "executing");

        let output_names: Vec<String> = spec.outputs().iter().map(|o| o.name.clone()).collect();
        let ctx = ComputeContext::new(step, spec.params(), &task.inputs, &output_names);

        let outputs = spec.compute().run(&ctx).map_err(|e| match e {
            failure @ CairnError::StepExecutionFailed { .. } => failure,
            other => CairnError::StepExecutionFailed {
                step: step.to_string(),
                message: other.to_string(),
            },
        })?;

        self.store.write(
            spec,
            &outputs,
            &task.params_fingerprint,
            &task.entry.code_fingerprint,
        )?;

        Ok(outputs
            .into_iter()
            .map(|(name, value)| (name, Arc::new(value)))
            .collect())
    }
}

fn block_dependents(
    graph: &ExecutionGraph,
    planned: &HashSet<&str>,
    blocked: &mut HashMap<String, String>,
    failed: &str,
) {
    for dependent in graph.transitive_dependents(failed) {
        if planned.contains(dependent.as_str()) {
            blocked.entry(dependent).or_insert_with(|| failed.to_string());
        }
    }
}
