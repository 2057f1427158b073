//! Dependency graph derived from the step registry.
//!
//! The graph is never stored: it is rebuilt from the registry's declarations
//! whenever a plan is made. Registration already guarantees acyclicity (no
//! forward references), but the graph still checks defensively so that a
//! registry built through some future alternate path cannot slip a cycle
//! through to execution.

use std::collections::{HashMap, HashSet};

use crate::error::{CairnError, Result};
use crate::step::StepRegistry;

/// Directed acyclic execution graph over step names.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    /// Map of step name to its direct dependencies.
    dependencies: HashMap<String, Vec<String>>,
    /// Map of step name to steps that depend on it.
    dependents: HashMap<String, Vec<String>>,
    /// Step names in registration order.
    order: Vec<String>,
}

impl ExecutionGraph {
    /// Derive the graph from a registry.
    pub fn from_registry(registry: &StepRegistry) -> Result<Self> {
        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut order = Vec::with_capacity(registry.len());

        for spec in registry.iter() {
            let name = spec.name().to_string();
            let mut deps: Vec<String> = Vec::new();
            for upstream in spec.upstream_steps() {
                if !deps.iter().any(|d| d == upstream) {
                    deps.push(upstream.to_string());
                }
            }
            for dep in &deps {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(name.clone());
            }
            dependencies.insert(name.clone(), deps);
            dependents.entry(name.clone()).or_default();
            order.push(name);
        }

        let graph = Self {
            dependencies,
            dependents,
            order,
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(CairnError::CircularDependency {
                cycle: cycle.join(" -> "),
            });
        }

        Ok(graph)
    }

    /// Direct dependencies of a step.
    pub fn dependencies_of(&self, step: &str) -> &[String] {
        self.dependencies.get(step).map_or(&[], Vec::as_slice)
    }

    /// Steps that directly depend on the given step.
    pub fn dependents_of(&self, step: &str) -> &[String] {
        self.dependents.get(step).map_or(&[], Vec::as_slice)
    }

    /// Check if a step exists in the graph.
    pub fn contains(&self, step: &str) -> bool {
        self.dependencies.contains_key(step)
    }

    /// Number of steps in the graph.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Steps in topological order (producers before consumers).
    ///
    /// Ties among independent steps are broken by registration order, so
    /// the result is deterministic for a given registry.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for step in &self.order {
            in_degree.insert(step, self.dependencies_of(step).len());
        }

        let mut result = Vec::with_capacity(self.order.len());
        let mut done: HashSet<&str> = HashSet::new();

        // Scanning the registration-order list each round keeps ties in
        // registration order; graphs here are small enough that the
        // quadratic scan is irrelevant.
        while result.len() < self.order.len() {
            let mut progressed = false;
            for step in &self.order {
                if done.contains(step.as_str()) {
                    continue;
                }
                if in_degree[step.as_str()] == 0 {
                    done.insert(step);
                    result.push(step.clone());
                    for dependent in self.dependents_of(step) {
                        if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                            *degree -= 1;
                        }
                    }
                    progressed = true;
                }
            }
            if !progressed {
                let remaining: Vec<_> = self
                    .order
                    .iter()
                    .filter(|s| !done.contains(s.as_str()))
                    .cloned()
                    .collect();
                return Err(CairnError::CircularDependency {
                    cycle: remaining.join(" -> "),
                });
            }
        }

        Ok(result)
    }

    /// Find a cycle in the graph, returning the path if one exists.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Unvisited,
            Visiting,
            Visited,
        }

        let mut state: HashMap<&str, State> = self
            .order
            .iter()
            .map(|s| (s.as_str(), State::Unvisited))
            .collect();

        let mut path: Vec<String> = Vec::new();

        fn dfs<'a>(
            node: &'a str,
            graph: &'a ExecutionGraph,
            state: &mut HashMap<&'a str, State>,
            path: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            state.insert(node, State::Visiting);
            path.push(node.to_string());

            for dep in graph.dependencies_of(node) {
                match state.get(dep.as_str()) {
                    Some(State::Visiting) => {
                        let cycle_start = path.iter().position(|s| s == dep).unwrap();
                        let mut cycle: Vec<String> = path[cycle_start..].to_vec();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Some(State::Unvisited) | None => {
                        if let Some(cycle) = dfs(dep, graph, state, path) {
                            return Some(cycle);
                        }
                    }
                    Some(State::Visited) => {}
                }
            }

            path.pop();
            state.insert(node, State::Visited);
            None
        }

        for step in &self.order {
            if state.get(step.as_str()) == Some(&State::Unvisited) {
                if let Some(cycle) = dfs(step, self, &mut state, &mut path) {
                    return Some(cycle);
                }
            }
        }

        None
    }

    /// All transitive dependents of a step (direct and indirect consumers).
    pub fn transitive_dependents(&self, step: &str) -> HashSet<String> {
        let mut result = HashSet::new();
        let mut to_visit = vec![step.to_string()];

        while let Some(current) = to_visit.pop() {
            for dep in self.dependents_of(&current) {
                if result.insert(dep.clone()) {
                    to_visit.push(dep.clone());
                }
            }
        }

        result
    }

    /// A step plus everything it transitively depends on.
    pub fn closure_with_ancestors(&self, targets: &[String]) -> HashSet<String> {
        let mut result: HashSet<String> = HashSet::new();
        let mut to_visit: Vec<String> = targets.to_vec();

        while let Some(current) = to_visit.pop() {
            if result.insert(current.clone()) {
                for dep in self.dependencies_of(&current) {
                    to_visit.push(dep.clone());
                }
            }
        }

        result
    }

    /// Partition a subset of steps into waves of mutually independent steps.
    ///
    /// Each wave contains steps whose in-subset dependencies are all in
    /// earlier waves; steps within one wave share no ancestor/descendant
    /// relationship and may execute concurrently. Dependencies outside the
    /// subset are treated as already satisfied. Within a wave, steps keep
    /// registration order.
    pub fn waves(&self, subset: &[String]) -> Vec<Vec<String>> {
        let members: HashSet<&str> = subset.iter().map(String::as_str).collect();
        let mut completed: HashSet<String> = HashSet::new();
        let mut waves: Vec<Vec<String>> = Vec::new();

        while completed.len() < members.len() {
            let ready: Vec<String> = self
                .order
                .iter()
                .filter(|s| members.contains(s.as_str()) && !completed.contains(s.as_str()))
                .filter(|s| {
                    self.dependencies_of(s)
                        .iter()
                        .all(|d| !members.contains(d.as_str()) || completed.contains(d.as_str()))
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                break;
            }

            completed.extend(ready.iter().cloned());
            waves.push(ready);
        }

        waves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{FnCompute, Outputs, StepSpec};
    use serde_json::json;

    fn step(name: &str, deps: &[&str]) -> StepSpec {
        let mut builder = StepSpec::builder(name);
        for dep in deps {
            builder = builder.input_step(*dep, "out");
        }
        builder.output_json("out").compute(FnCompute::new("v1", |_| {
            let mut out = Outputs::new();
            out.insert("out".into(), json!(null));
            Ok(out)
        }))
    }

    fn registry(specs: Vec<StepSpec>) -> StepRegistry {
        let mut registry = StepRegistry::new();
        for spec in specs {
            registry.register(spec).unwrap();
        }
        registry
    }

    fn diamond() -> StepRegistry {
        registry(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ])
    }

    #[test]
    fn empty_graph() {
        let graph = ExecutionGraph::from_registry(&StepRegistry::new()).unwrap();
        assert!(graph.is_empty());
        assert!(graph.topological_order().unwrap().is_empty());
    }

    #[test]
    fn topo_order_linear_chain() {
        let reg = registry(vec![
            step("first", &[]),
            step("second", &["first"]),
            step("third", &["second"]),
        ]);
        let graph = ExecutionGraph::from_registry(&reg).unwrap();

        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn topo_order_diamond_respects_edges() {
        let graph = ExecutionGraph::from_registry(&diamond()).unwrap();
        let order = graph.topological_order().unwrap();

        let pos = |s: &str| order.iter().position(|x| x == s).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn topo_order_ties_broken_by_registration_order() {
        // zebra registered before alpha; both independent
        let reg = registry(vec![step("zebra", &[]), step("alpha", &[])]);
        let graph = ExecutionGraph::from_registry(&reg).unwrap();

        assert_eq!(graph.topological_order().unwrap(), vec!["zebra", "alpha"]);
    }

    #[test]
    fn no_cycle_in_valid_registry() {
        let graph = ExecutionGraph::from_registry(&diamond()).unwrap();
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn dependents_tracked() {
        let graph = ExecutionGraph::from_registry(&diamond()).unwrap();
        let deps = graph.dependents_of("a");
        assert!(deps.contains(&"b".to_string()));
        assert!(deps.contains(&"c".to_string()));
    }

    #[test]
    fn transitive_dependents_indirect() {
        let graph = ExecutionGraph::from_registry(&diamond()).unwrap();
        let deps = graph.transitive_dependents("a");
        assert_eq!(deps.len(), 3);
        assert!(deps.contains("d"));
    }

    #[test]
    fn transitive_dependents_of_leaf_is_empty() {
        let graph = ExecutionGraph::from_registry(&diamond()).unwrap();
        assert!(graph.transitive_dependents("d").is_empty());
    }

    #[test]
    fn closure_with_ancestors_walks_up() {
        let graph = ExecutionGraph::from_registry(&diamond()).unwrap();
        let closure = graph.closure_with_ancestors(&["b".to_string()]);
        assert_eq!(closure.len(), 2);
        assert!(closure.contains("a"));
        assert!(closure.contains("b"));
    }

    #[test]
    fn waves_diamond() {
        let graph = ExecutionGraph::from_registry(&diamond()).unwrap();
        let all: Vec<String> = graph.topological_order().unwrap();
        let waves = graph.waves(&all);

        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0], vec!["a"]);
        assert_eq!(waves[1], vec!["b", "c"]);
        assert_eq!(waves[2], vec!["d"]);
    }

    #[test]
    fn waves_subset_treats_outside_deps_as_satisfied() {
        let graph = ExecutionGraph::from_registry(&diamond()).unwrap();
        // Only b and d in the subset: b first, then d (c is outside)
        let subset = vec!["b".to_string(), "d".to_string()];
        let waves = graph.waves(&subset);

        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0], vec!["b"]);
        assert_eq!(waves[1], vec!["d"]);
    }

    #[test]
    fn waves_independent_steps_share_one_wave() {
        let reg = registry(vec![step("a", &[]), step("b", &[]), step("c", &[])]);
        let graph = ExecutionGraph::from_registry(&reg).unwrap();
        let all = graph.topological_order().unwrap();

        let waves = graph.waves(&all);
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].len(), 3);
    }
}
