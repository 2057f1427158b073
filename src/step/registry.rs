//! The step registry: the single source of truth for the workflow graph.

use indexmap::IndexMap;

use crate::error::{CairnError, Result};

use super::spec::StepSpec;

/// An ordered collection of step declarations.
///
/// Steps are kept in registration order, which is also the deterministic
/// tie-break order for planning. Registration validates the invariants that
/// make the graph acyclic by construction: names are unique, and inputs may
/// only reference steps registered earlier (no forward references).
/// The registry performs no I/O.
#[derive(Default)]
pub struct StepRegistry {
    steps: IndexMap<String, StepSpec>,
}

impl StepRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step declaration.
    ///
    /// Fails with `DuplicateStep` if the name is already taken, or
    /// `UnknownInput` if an input references a step that is not yet
    /// registered or an output name that step does not declare. On failure
    /// the registry is left unchanged.
    pub fn register(&mut self, spec: StepSpec) -> Result<()> {
        if self.steps.contains_key(spec.name()) {
            return Err(CairnError::DuplicateStep {
                name: spec.name().to_string(),
            });
        }

        for input in spec.inputs() {
            if let Some(upstream) = input.step_name() {
                let Some(upstream_spec) = self.steps.get(upstream) else {
                    return Err(CairnError::UnknownInput {
                        step: spec.name().to_string(),
                        input: upstream.to_string(),
                    });
                };
                if let super::spec::InputRef::Step { output, .. } = input {
                    if upstream_spec.output(output).is_none() {
                        return Err(CairnError::UnknownInput {
                            step: spec.name().to_string(),
                            input: format!("{}:{}", upstream, output),
                        });
                    }
                }
            }
        }

        self.steps.insert(spec.name().to_string(), spec);
        Ok(())
    }

    /// Look up a step by name.
    pub fn resolve(&self, name: &str) -> Result<&StepSpec> {
        self.steps.get(name).ok_or_else(|| CairnError::UnknownStep {
            name: name.to_string(),
        })
    }

    /// Check whether a step is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Registration index of a step, used for deterministic ordering.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.steps.get_index_of(name)
    }

    /// Iterate steps in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &StepSpec> {
        self.steps.values()
    }

    /// Step names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    /// Number of registered steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{FnCompute, Outputs, StepSpec};
    use serde_json::json;

    fn noop_step(name: &str) -> StepSpec {
        StepSpec::builder(name)
            .output_json("out")
            .compute(FnCompute::new("v1", |_| {
                let mut out = Outputs::new();
                out.insert("out".into(), json!(null));
                Ok(out)
            }))
    }

    fn dependent_step(name: &str, upstream: &str) -> StepSpec {
        StepSpec::builder(name)
            .input_step(upstream, "out")
            .output_json("out")
            .compute(FnCompute::new("v1", |_| {
                let mut out = Outputs::new();
                out.insert("out".into(), json!(null));
                Ok(out)
            }))
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = StepRegistry::new();
        registry.register(noop_step("download")).unwrap();

        assert!(registry.contains("download"));
        assert_eq!(registry.resolve("download").unwrap().name(), "download");
        assert!(registry.resolve("missing").is_err());
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut registry = StepRegistry::new();
        registry.register(noop_step("download")).unwrap();

        let err = registry.register(noop_step("download")).unwrap_err();
        assert!(matches!(err, CairnError::DuplicateStep { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn forward_reference_rejected() {
        let mut registry = StepRegistry::new();
        let err = registry
            .register(dependent_step("filter", "download"))
            .unwrap_err();
        assert!(matches!(err, CairnError::UnknownInput { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_output_name_rejected() {
        let mut registry = StepRegistry::new();
        registry.register(noop_step("download")).unwrap();

        let spec = StepSpec::builder("filter")
            .input_step("download", "nonexistent")
            .output_json("out")
            .compute(FnCompute::new("v1", |_| Ok(Outputs::new())));

        let err = registry.register(spec).unwrap_err();
        assert!(matches!(err, CairnError::UnknownInput { .. }));
    }

    #[test]
    fn self_reference_rejected() {
        let mut registry = StepRegistry::new();
        let err = registry
            .register(dependent_step("loop", "loop"))
            .unwrap_err();
        assert!(matches!(err, CairnError::UnknownInput { .. }));
    }

    #[test]
    fn iteration_preserves_registration_order() {
        let mut registry = StepRegistry::new();
        registry.register(noop_step("zebra")).unwrap();
        registry.register(noop_step("alpha")).unwrap();
        registry.register(dependent_step("omega", "zebra")).unwrap();

        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["zebra", "alpha", "omega"]);
        assert_eq!(registry.index_of("alpha"), Some(1));
    }
}
