//! Step declarations and the step registry.
//!
//! A step is a named unit of computation with declared inputs, parameters,
//! and outputs. [`StepSpec`] is the immutable declaration, [`Compute`] is
//! the callable seam, and [`StepRegistry`] is the ordered collection the
//! planner derives its graph from.

pub mod compute;
pub mod registry;
pub mod spec;

pub use compute::{Compute, ComputeContext, FnCompute, InputValue, Outputs, ResolvedInput};
pub use registry::StepRegistry;
pub use spec::{InputRef, OutputSpec, StepSpec, StepSpecBuilder};
