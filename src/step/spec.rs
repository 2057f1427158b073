//! Immutable step declarations.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::checkpoint::{ArtifactFormat, JsonFormat};
use crate::params::{ParamValue, Params};

use super::compute::Compute;

/// A reference to one of a step's inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRef {
    /// The named output of an upstream step.
    Step { step: String, output: String },
    /// A file outside the engine's control (e.g., raw source data).
    External { path: PathBuf },
}

impl InputRef {
    /// The upstream step name, if this input references one.
    pub fn step_name(&self) -> Option<&str> {
        match self {
            InputRef::Step { step, .. } => Some(step),
            InputRef::External { .. } => None,
        }
    }
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRef::Step { step, output } => write!(f, "{}:{}", step, output),
            InputRef::External { path } => write!(f, "file:{}", path.display()),
        }
    }
}

/// Declaration of one step output artifact.
#[derive(Clone)]
pub struct OutputSpec {
    /// Logical name, unique within the step.
    pub name: String,
    /// Serialization format for the checkpointed artifact.
    pub format: Arc<dyn ArtifactFormat>,
}

impl OutputSpec {
    /// Declare a JSON-serialized output.
    pub fn json(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: Arc::new(JsonFormat),
        }
    }

    /// Declare an output with a custom format.
    pub fn with_format(name: impl Into<String>, format: Arc<dyn ArtifactFormat>) -> Self {
        Self {
            name: name.into(),
            format,
        }
    }
}

impl fmt::Debug for OutputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSpec")
            .field("name", &self.name)
            .field("format", &self.format.name())
            .finish()
    }
}

/// Immutable declaration of a workflow step.
///
/// Built via [`StepSpec::builder`]. Invariants (unique name, inputs only
/// referencing already-registered steps) are enforced by
/// [`StepRegistry::register`](crate::step::StepRegistry::register), not here.
#[derive(Clone)]
pub struct StepSpec {
    name: String,
    inputs: Vec<InputRef>,
    params: Params,
    outputs: Vec<OutputSpec>,
    compute: Arc<dyn Compute>,
}

impl StepSpec {
    /// Start building a step declaration.
    pub fn builder(name: impl Into<String>) -> StepSpecBuilder {
        StepSpecBuilder {
            name: name.into(),
            inputs: Vec::new(),
            params: Params::new(),
            outputs: Vec::new(),
        }
    }

    /// The step's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared inputs, in declaration order.
    pub fn inputs(&self) -> &[InputRef] {
        &self.inputs
    }

    /// Names of upstream steps this step depends on.
    pub fn upstream_steps(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().filter_map(|i| i.step_name())
    }

    /// The step's parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Declared outputs, in declaration order.
    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }

    /// Look up an output declaration by logical name.
    pub fn output(&self, name: &str) -> Option<&OutputSpec> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// The compute callable.
    pub fn compute(&self) -> &Arc<dyn Compute> {
        &self.compute
    }

    /// Identity of the compute logic version, used for checkpoint validity.
    pub fn code_fingerprint(&self) -> String {
        self.compute.code_fingerprint()
    }
}

impl fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepSpec")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("params", &self.params)
            .field("outputs", &self.outputs)
            .field("code_fingerprint", &self.compute.code_fingerprint())
            .finish()
    }
}

/// Builder for [`StepSpec`].
pub struct StepSpecBuilder {
    name: String,
    inputs: Vec<InputRef>,
    params: Params,
    outputs: Vec<OutputSpec>,
}

impl StepSpecBuilder {
    /// Add an input referencing an upstream step's output.
    pub fn input_step(mut self, step: impl Into<String>, output: impl Into<String>) -> Self {
        self.inputs.push(InputRef::Step {
            step: step.into(),
            output: output.into(),
        });
        self
    }

    /// Add an external file input.
    pub fn input_external(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(InputRef::External { path: path.into() });
        self
    }

    /// Set a parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.set(key, value);
        self
    }

    /// Replace the whole parameter map.
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Declare a JSON output.
    pub fn output_json(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(OutputSpec::json(name));
        self
    }

    /// Declare an output with a custom format.
    pub fn output(mut self, spec: OutputSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    /// Finish with the given compute callable.
    pub fn compute(self, compute: impl Compute + 'static) -> StepSpec {
        StepSpec {
            name: self.name,
            inputs: self.inputs,
            params: self.params,
            outputs: self.outputs,
            compute: Arc::new(compute),
        }
    }

    /// Finish with a shared compute callable.
    pub fn compute_arc(self, compute: Arc<dyn Compute>) -> StepSpec {
        StepSpec {
            name: self.name,
            inputs: self.inputs,
            params: self.params,
            outputs: self.outputs,
            compute,
        }
    }
}
