//! Dependency-aware planning: decide, before anything executes, which steps
//! run and which are satisfied by an existing checkpoint.
//!
//! Planning walks the graph in topological order, computing each step's
//! params+inputs fingerprint from its parameters and the content
//! fingerprints of its upstream artifacts. A step reruns if any ancestor
//! reruns, so staleness propagates without inspecting the stale artifact
//! itself.

use std::collections::HashMap;

use tracing::debug;

use crate::checkpoint::CheckpointStore;
use crate::error::{CairnError, Result};
use crate::fingerprint::{file_fingerprint, params_fingerprint};
use crate::graph::ExecutionGraph;
use crate::step::{InputRef, StepRegistry};

/// What the executor should do with one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    /// Execute the compute and write a fresh checkpoint.
    Run,
    /// Reuse the existing checkpoint.
    Skip,
}

/// One step's planned disposition.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub step: String,
    pub action: PlanAction,
    /// Human-readable explanation of the decision.
    pub reason: String,
    /// Fingerprint over params and resolved input fingerprints, as of
    /// planning time. Provisional for steps downstream of a rerun; the
    /// executor recomputes the final value before checkpointing.
    pub params_fingerprint: String,
    pub code_fingerprint: String,
}

/// An ordered plan over the requested subset of the graph.
///
/// Entries are in topological order; executing them front to back never
/// reaches a step before its upstream entries.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    entries: Vec<PlanEntry>,
}

impl ExecutionPlan {
    /// All entries, in execution order.
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Look up the entry for a step.
    pub fn entry(&self, step: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.step == step)
    }

    /// Names of steps that will execute.
    pub fn steps_to_run(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.action == PlanAction::Run)
            .map(|e| e.step.as_str())
            .collect()
    }

    /// Whether nothing needs to execute.
    pub fn is_noop(&self) -> bool {
        self.entries.iter().all(|e| e.action == PlanAction::Skip)
    }

    /// One line per step, e.g. `run  filter  (no checkpoint)`.
    pub fn summary(&self) -> String {
        let mut lines = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let verb = match entry.action {
                PlanAction::Run => "run ",
                PlanAction::Skip => "skip",
            };
            lines.push(format!("{}  {}  ({})", verb, entry.step, entry.reason));
        }
        lines.join("\n")
    }
}

/// Options controlling a single planning pass.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Steps to bring up to date. Empty means every registered step. Each
    /// target's ancestors are always included.
    pub targets: Vec<String>,
    /// Rerun every planned step regardless of checkpoint validity.
    pub force: bool,
}

impl PlanOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn targets(targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            force: false,
        }
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Computes an [`ExecutionPlan`] for a registry against a checkpoint store.
pub struct Planner<'a> {
    registry: &'a StepRegistry,
    graph: &'a ExecutionGraph,
    store: &'a CheckpointStore,
}

impl<'a> Planner<'a> {
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

    /// Plan the requested subset in topological order.
    ///
    /// Fails with `UnknownStep` if a target is not registered, and with
    /// `CheckpointCorrupt` if any in-scope step has a record on disk that
    /// cannot be read; a damaged checkpoint must be invalidated before a
    /// plan can be made.
    pub fn plan(&self, options: &PlanOptions) -> Result<ExecutionPlan> {
        for target in &options.targets {
            if !self.registry.contains(target) {
                return Err(CairnError::UnknownStep {
                    name: target.clone(),
                });
            }
        }

        let in_scope = if options.targets.is_empty() {
            None
        } else {
            Some(self.graph.closure_with_ancestors(&options.targets))
        };

        // Decisions for steps already planned this pass; topological order
        // guarantees every upstream entry exists before it is consulted.
        let mut decided: HashMap<String, PlanEntry> = HashMap::new();
        let mut entries = Vec::new();

        for step in self.graph.topological_order()? {
            if let Some(scope) = &in_scope {
                if !scope.contains(&step) {
                    continue;
                }
            }

            let entry = self.decide(&step, options, &decided)?;
            debug!(step = %step, action = ?entry.action, reason = %entry.reason, "planned");
            decided.insert(step, entry.clone());
            entries.push(entry);
        }

        Ok(ExecutionPlan { entries })
    }

    fn decide(
        &self,
        step: &str,
        options: &PlanOptions,
        decided: &HashMap<String, PlanEntry>,
    ) -> Result<PlanEntry> {
        let spec = self.registry.resolve(step)?;
        let code_fingerprint = spec.code_fingerprint();

        // Any rerunning ancestor invalidates this step outright; its
        // recorded input fingerprints describe outputs that are about to
        // be replaced.
        let rerunning_upstream = spec
            .upstream_steps()
            .find(|up| decided.get(*up).map(|e| e.action) == Some(PlanAction::Run));

        let mut input_fingerprints = Vec::with_capacity(spec.inputs().len());
        for input in spec.inputs() {
            match input {
                InputRef::Step {
                    step: upstream,
                    output,
                } => {
                    if rerunning_upstream.is_some() {
                        // The recorded upstream fingerprint is about to be
                        // replaced; the executor recomputes the real value
                        // before checkpointing. Placeholder keeps the
                        // encoding positional.
                        input_fingerprints.push(String::from("pending"));
                        continue;
                    }
                    input_fingerprints.push(self.upstream_fingerprint(upstream, output)?);
                }
                InputRef::External { path } => {
                    input_fingerprints.push(file_fingerprint(path));
                }
            }
        }
        let params_fingerprint = params_fingerprint(spec.params(), &input_fingerprints);

        let (action, reason) = if options.force {
            (PlanAction::Run, String::from("forced"))
        } else if let Some(upstream) = rerunning_upstream {
            (PlanAction::Run, format!("upstream '{}' will run", upstream))
        } else if self
            .store
            .has_valid(step, &params_fingerprint, &code_fingerprint)
        {
            (PlanAction::Skip, String::from("checkpoint valid"))
        } else {
            // An unreadable record is not the same thing as an absent one:
            // it aborts planning until the step is explicitly invalidated.
            match self.store.record(step)? {
                None => (PlanAction::Run, String::from("no checkpoint")),
                Some(record) if record.code_fingerprint != code_fingerprint => {
                    (PlanAction::Run, String::from("code changed"))
                }
                Some(_) => (PlanAction::Run, String::from("params or inputs changed")),
            }
        };

        Ok(PlanEntry {
            step: step.to_string(),
            action,
            reason,
            params_fingerprint,
            code_fingerprint,
        })
    }

    /// Content fingerprint of one upstream artifact, from the upstream
    /// step's (valid) checkpoint record.
    fn upstream_fingerprint(&self, upstream: &str, output: &str) -> Result<String> {
        let record = self
            .store
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{FnCompute, Outputs, StepSpec};
    use serde_json::json;
    use tempfile::TempDir;

    fn passthrough(version: &str) -> FnCompute {
        FnCompute::new(version.to_string(), |ctx| {
            let mut out = Outputs::new();
            for name in ctx.declared_outputs() {
                out.insert(name.to_string(), json!("x"));
            }
            Ok(out)
        })
    }

    /// download -> filter -> analyze
    fn chain_registry() -> StepRegistry {
        let mut registry = StepRegistry::new();
        registry
            .register(
                StepSpec::builder("download")
                    .param("url", "https://example.com/data")
                    .output_json("raw")
                    .compute(passthrough("dl-v1")),
            )
            .unwrap();
        registry
            .register(
                StepSpec::builder("filter")
                    .input_step("download", "raw")
                    .param("low_hz", 1.0)
                    .output_json("table")
                    .compute(passthrough("filter-v1")),
            )
            .unwrap();
        registry
            .register(
                StepSpec::builder("analyze")
                    .input_step("filter", "table")
                    .output_json("report")
                    .compute(passthrough("analyze-v1")),
            )
            .unwrap();
        registry
    }

    fn write_checkpoints(registry: &StepRegistry, store: &CheckpointStore) {
        // Execute the chain for real so recorded fingerprints are the ones
        // a later planning pass recomputes.
        let graph = ExecutionGraph::from_registry(registry).unwrap();
        let planner = Planner::new(registry, &graph, store);
        let plan = planner.plan(&PlanOptions::all()).unwrap();
        for entry in plan.entries() {
            let spec = registry.resolve(&entry.step).unwrap();
            let mut out = Outputs::new();
            for o in spec.outputs() {
                out.insert(o.name.clone(), json!("x"));
            }
            // Upstream content is now on disk; recompute the entry so the
            // stored params fingerprint reflects real upstream fingerprints.
            let fresh = planner.plan(&PlanOptions::all()).unwrap();
            let fresh_entry = fresh.entry(&entry.step).unwrap();
            store
                .write(&spec, &out, &fresh_entry.params_fingerprint, &fresh_entry.code_fingerprint)
                .unwrap();
        }
    }

    #[test]
    fn empty_store_plans_everything() {
        let temp = TempDir::new().unwrap();
        let registry = chain_registry();
        let graph = ExecutionGraph::from_registry(&registry).unwrap();
        let store = CheckpointStore::new(temp.path());

        let plan = Planner::new(&registry, &graph, &store)
            .plan(&PlanOptions::all())
            .unwrap();

        assert_eq!(plan.steps_to_run(), vec!["download", "filter", "analyze"]);
        assert_eq!(plan.entry("download").unwrap().reason, "no checkpoint");
    }

    #[test]
    fn fully_checkpointed_plan_is_noop() {
        let temp = TempDir::new().unwrap();
        let registry = chain_registry();
        let graph = ExecutionGraph::from_registry(&registry).unwrap();
        let store = CheckpointStore::new(temp.path());
        write_checkpoints(&registry, &store);

        let plan = Planner::new(&registry, &graph, &store)
            .plan(&PlanOptions::all())
            .unwrap();

        assert!(plan.is_noop());
    }

    #[test]
    fn rerun_propagates_to_descendants_only() {
        let temp = TempDir::new().unwrap();
        let registry = chain_registry();
        let store = CheckpointStore::new(temp.path());
        write_checkpoints(&registry, &store);

        // Re-register with a changed filter parameter.
        let mut changed = StepRegistry::new();
        changed
            .register(
                StepSpec::builder("download")
                    .param("url", "https://example.com/data")
                    .output_json("raw")
                    .compute(passthrough("dl-v1")),
            )
            .unwrap();
        changed
            .register(
                StepSpec::builder("filter")
                    .input_step("download", "raw")
                    .param("low_hz", 2.0)
                    .output_json("table")
                    .compute(passthrough("filter-v1")),
            )
            .unwrap();
        changed
            .register(
                StepSpec::builder("analyze")
                    .input_step("filter", "table")
                    .output_json("report")
                    .compute(passthrough("analyze-v1")),
            )
            .unwrap();

        let graph = ExecutionGraph::from_registry(&changed).unwrap();
        let plan = Planner::new(&changed, &graph, &store)
            .plan(&PlanOptions::all())
            .unwrap();

        assert_eq!(plan.entry("download").unwrap().action, PlanAction::Skip);
        assert_eq!(plan.entry("filter").unwrap().action, PlanAction::Run);
        assert_eq!(
            plan.entry("filter").unwrap().reason,
            "params or inputs changed"
        );
        assert_eq!(plan.entry("analyze").unwrap().action, PlanAction::Run);
        assert_eq!(
            plan.entry("analyze").unwrap().reason,
            "upstream 'filter' will run"
        );
    }

    #[test]
    fn code_change_detected() {
        let temp = TempDir::new().unwrap();
        let registry = chain_registry();
        let store = CheckpointStore::new(temp.path());
        write_checkpoints(&registry, &store);

        let mut changed = StepRegistry::new();
        changed
            .register(
                StepSpec::builder("download")
                    .param("url", "https://example.com/data")
                    .output_json("raw")
                    .compute(passthrough("dl-v2")),
            )
            .unwrap();
        let graph = ExecutionGraph::from_registry(&changed).unwrap();

        let plan = Planner::new(&changed, &graph, &store)
            .plan(&PlanOptions::all())
            .unwrap();
        assert_eq!(plan.entry("download").unwrap().reason, "code changed");
    }

    #[test]
    fn targets_scope_to_ancestor_closure() {
        let temp = TempDir::new().unwrap();
        let registry = chain_registry();
        let graph = ExecutionGraph::from_registry(&registry).unwrap();
        let store = CheckpointStore::new(temp.path());

        let plan = Planner::new(&registry, &graph, &store)
            .plan(&PlanOptions::targets(["filter"]))
            .unwrap();

        let names: Vec<_> = plan.entries().iter().map(|e| e.step.as_str()).collect();
        assert_eq!(names, vec!["download", "filter"]);
    }

    #[test]
    fn unknown_target_rejected() {
        let temp = TempDir::new().unwrap();
        let registry = chain_registry();
        let graph = ExecutionGraph::from_registry(&registry).unwrap();
        let store = CheckpointStore::new(temp.path());

        let err = Planner::new(&registry, &graph, &store)
            .plan(&PlanOptions::targets(["nope"]))
            .unwrap_err();
        assert!(matches!(err, CairnError::UnknownStep { .. }));
    }

    #[test]
    fn corrupt_record_fails_planning_until_invalidated() {
        let temp = TempDir::new().unwrap();
        let registry = chain_registry();
        let graph = ExecutionGraph::from_registry(&registry).unwrap();
        let store = CheckpointStore::new(temp.path());
        write_checkpoints(&registry, &store);

        std::fs::write(temp.path().join("download.meta.json"), "{broken").unwrap();

        let planner = Planner::new(&registry, &graph, &store);
        let err = planner.plan(&PlanOptions::all()).unwrap_err();
        assert!(matches!(err, CairnError::CheckpointCorrupt { .. }));

        // Only explicit invalidation recovers; the damaged record is never
        // quietly re-planned as a rerun.
        store.invalidate("download").unwrap();
        let plan = planner.plan(&PlanOptions::all()).unwrap();
        assert_eq!(plan.entry("download").unwrap().reason, "no checkpoint");
        assert_eq!(plan.entry("analyze").unwrap().action, PlanAction::Run);
    }

    #[test]
    fn force_reruns_valid_checkpoints() {
        let temp = TempDir::new().unwrap();
        let registry = chain_registry();
        let graph = ExecutionGraph::from_registry(&registry).unwrap();
        let store = CheckpointStore::new(temp.path());
        write_checkpoints(&registry, &store);

        let plan = Planner::new(&registry, &graph, &store)
            .plan(&PlanOptions::all().force())
            .unwrap();

        assert_eq!(plan.steps_to_run().len(), 3);
        assert_eq!(plan.entry("download").unwrap().reason, "forced");
    }
}
