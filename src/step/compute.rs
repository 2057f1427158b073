//! The compute seam between the engine and user-supplied step logic.
//!
//! A compute callable receives its inputs, params, and declared output names
//! as explicit arguments via [`ComputeContext`] — never through an ambient
//! context object — so the executor can invoke it uniformly regardless of
//! where its inputs came from. Callables must not mutate their inputs; the
//! executor relies on this to share one upstream result across several
//! downstream consumers within a run.

use indexmap::IndexMap;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{CairnError, Result};
use crate::params::Params;

use super::spec::InputRef;

/// Output values produced by one step invocation, keyed by logical output
/// name in declaration order.
pub type Outputs = IndexMap<String, Value>;

/// A resolved input value handed to a compute callable.
#[derive(Debug, Clone)]
pub enum InputValue {
    /// An upstream step's output, loaded in memory. Shared, never mutated.
    Artifact(Arc<Value>),
    /// An external file; the callable reads it itself.
    External(PathBuf),
}

/// One declared input together with its resolved value.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub reference: InputRef,
    pub value: InputValue,
}

/// Everything a compute callable may observe: the step's name, params, and
/// resolved inputs, plus the output names it is expected to produce.
pub struct ComputeContext<'a> {
    step: &'a str,
    params: &'a Params,
    inputs: &'a [ResolvedInput],
    output_names: &'a [String],
}

impl<'a> ComputeContext<'a> {
    pub(crate) fn new(
        step: &'a str,
        params: &'a Params,
        inputs: &'a [ResolvedInput],
        output_names: &'a [String],
    ) -> Self {
        Self {
            step,
            params,
            inputs,
            output_names,
        }
    }

    /// Name of the step being computed.
    pub fn step(&self) -> &str {
        self.step
    }

    /// The step's resolved parameters.
    pub fn params(&self) -> &Params {
        self.params
    }

    /// All resolved inputs, in declaration order.
    pub fn inputs(&self) -> &[ResolvedInput] {
        self.inputs
    }

    /// Look up an upstream artifact by producing step and output name.
    pub fn artifact(&self, step: &str, output: &str) -> Option<&Value> {
        self.inputs.iter().find_map(|input| match input {
            ResolvedInput {
                reference: InputRef::Step { step: s, output: o },
                value: InputValue::Artifact(value),
            } if s == step && o == output => Some(value.as_ref()),
            _ => None,
        })
    }

    /// Like [`artifact`](Self::artifact), but an error if the input is absent.
    pub fn require_artifact(&self, step: &str, output: &str) -> Result<&Value> {
        self.artifact(step, output)
            .ok_or_else(|| CairnError::StepExecutionFailed {
                step: self.step.to_string(),
                message: format!("missing declared input {}:{}", step, output),
            })
    }

    /// Paths of all declared external inputs, in declaration order.
    pub fn externals(&self) -> impl Iterator<Item = &Path> {
        self.inputs.iter().filter_map(|input| match &input.value {
            InputValue::External(path) => Some(path.as_path()),
            _ => None,
        })
    }

    /// Names of the outputs this step must produce, in declaration order.
    pub fn declared_outputs(&self) -> impl Iterator<Item = &str> {
        self.output_names.iter().map(String::as_str)
    }
}

/// A step's computation.
///
/// Implementations must be deterministic with respect to their declared
/// inputs and params, and must bump [`code_fingerprint`](Self::code_fingerprint)
/// whenever their logic changes — the fingerprint is what invalidates old
/// checkpoints after a code change.
pub trait Compute: Send + Sync {
    /// Identity of this compute logic version (e.g., `"filter-v3"`).
    fn code_fingerprint(&self) -> String;

    /// Produce all declared outputs from the given context.
    fn run(&self, ctx: &ComputeContext<'_>) -> Result<Outputs>;
}

/// Adapter turning a closure plus an explicit version tag into a [`Compute`].
pub struct FnCompute {
    version: String,
    #[allow(clippy::type_complexity)]
    f: Box<dyn Fn(&ComputeContext<'_>) -> Result<Outputs> + Send + Sync>,
}

impl FnCompute {
    /// Wrap a closure. `version` identifies the logic version and becomes
    /// the code fingerprint; change it whenever the closure's behavior
    /// changes.
    pub fn new(
        version: impl Into<String>,
        f: impl Fn(&ComputeContext<'_>) -> Result<Outputs> + Send + Sync + 'static,
    ) -> Self {
        Self {
            version: version.into(),
            f: Box::new(f),
        }
    }
}

impl Compute for FnCompute {
    fn code_fingerprint(&self) -> String {
        self.version.clone()
    }

    fn run(&self, ctx: &ComputeContext<'_>) -> Result<Outputs> {
        (self.f)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_fixture<'a>(
        params: &'a Params,
        inputs: &'a [ResolvedInput],
        output_names: &'a [String],
    ) -> ComputeContext<'a> {
        ComputeContext::new("test", params, inputs, output_names)
    }

    #[test]
    fn artifact_lookup_by_step_and_output() {
        let params = Params::new();
        let inputs = vec![ResolvedInput {
            reference: InputRef::Step {
                step: "download".into(),
                output: "raw".into(),
            },
            value: InputValue::Artifact(Arc::new(json!([1, 2, 3]))),
        }];
        let outputs = vec!["table".to_string()];
        let ctx = ctx_fixture(&params, &inputs, &outputs);

        assert_eq!(ctx.artifact("download", "raw"), Some(&json!([1, 2, 3])));
        assert!(ctx.artifact("download", "other").is_none());
        assert!(ctx.require_artifact("download", "raw").is_ok());
        assert!(ctx.require_artifact("missing", "raw").is_err());
    }

    #[test]
    fn externals_iterates_paths_in_order() {
        let params = Params::new();
        let inputs = vec![
            ResolvedInput {
                reference: InputRef::External {
                    path: PathBuf::from("/data/a.csv"),
                },
                value: InputValue::External(PathBuf::from("/data/a.csv")),
            },
            ResolvedInput {
                reference: InputRef::External {
                    path: PathBuf::from("/data/b.csv"),
                },
                value: InputValue::External(PathBuf::from("/data/b.csv")),
            },
        ];
        let outputs: Vec<String> = vec![];
        let ctx = ctx_fixture(&params, &inputs, &outputs);

        let paths: Vec<_> = ctx.externals().collect();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("a.csv"));
    }

    #[test]
    fn fn_compute_reports_version_as_code_fingerprint() {
        let compute = FnCompute::new("v7", |_| Ok(Outputs::new()));
        assert_eq!(compute.code_fingerprint(), "v7");
    }

    #[test]
    fn fn_compute_runs_closure() {
        let compute = FnCompute::new("v1", |ctx| {
            let mut out = Outputs::new();
            out.insert("doubled".into(), json!(ctx.params().get_int("n").unwrap() * 2));
            Ok(out)
        });

        let params = Params::new().with("n", 21i64);
        let inputs: Vec<ResolvedInput> = vec![];
        let outputs = vec!["doubled".to_string()];
        let ctx = ctx_fixture(&params, &inputs, &outputs);

        let result = compute.run(&ctx).unwrap();
        assert_eq!(result["doubled"], json!(42));
    }

    #[test]
    fn declared_outputs_preserves_order() {
        let params = Params::new();
        let inputs: Vec<ResolvedInput> = vec![];
        let outputs = vec!["b".to_string(), "a".to_string()];
        let ctx = ctx_fixture(&params, &inputs, &outputs);

        let names: Vec<_> = ctx.declared_outputs().collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
