//! Cairn - Checkpointed, resumable workflow execution.
//!
//! Cairn runs a registered graph of computation steps, checkpointing every
//! step's outputs so that a later run only recomputes what actually changed.
//! A step reruns when its parameters, its code version, its external input
//! files, or any upstream output changes; everything else is satisfied from
//! its checkpoint.
//!
//! # Modules
//!
//! - [`checkpoint`] - Checkpoint storage, artifact formats, and validity records
//! - [`error`] - Error types and result alias
//! - [`executor`] - Wave-based plan execution with failure isolation
//! - [`fingerprint`] - Content and parameter fingerprinting
//! - [`graph`] - Dependency graph, topological ordering, and waves
//! - [`params`] - Canonical step parameters
//! - [`pipeline`] - The top-level facade
//! - [`planner`] - Run/skip planning against the checkpoint store
//! - [`run`] - Run records and the run log
//! - [`step`] - Step declarations, registration, and the compute seam
//!
//! # Example
//!
//! ```no_run
//! use cairn::{ExecOptions, FnCompute, Outputs, Pipeline, PlanOptions, StepSpec};
//! use serde_json::json;
//!
//! let mut pipeline = Pipeline::new("/tmp/cairn-demo");
//! pipeline.register(
//!     StepSpec::builder("download")
//!         .param("url", "https://example.com/data.csv")
//!         .output_json("raw")
//!         .compute(FnCompute::new("download-v1", |_| {
//!             let mut out = Outputs::new();
//!             out.insert("raw".into(), json!([1, 2, 3]));
//!             Ok(out)
//!         })),
//! )?;
//!
//! let record = pipeline.run(&PlanOptions::all(), &ExecOptions::default())?;
//! println!("{}", record.render_text());
//! # Ok::<(), cairn::CairnError>(())
//! ```

pub mod checkpoint;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod graph;
pub mod params;
pub mod pipeline;
pub mod planner;
pub mod run;
pub mod step;

pub use checkpoint::{ArtifactFormat, CheckpointRecord, CheckpointStore, JsonFormat};
pub use error::{CairnError, Result};
pub use executor::{CancelToken, ExecOptions, ExecutionObserver, Executor, TracingObserver};
pub use graph::ExecutionGraph;
pub use params::{ParamValue, Params};
pub use pipeline::Pipeline;
pub use planner::{ExecutionPlan, PlanAction, PlanEntry, PlanOptions, Planner};
pub use run::{RunLogger, RunRecord, RunStatus, StepOutcome, StepStatus};
pub use step::{
    Compute, ComputeContext, FnCompute, InputRef, InputValue, OutputSpec, Outputs, StepRegistry,
    StepSpec,
};
