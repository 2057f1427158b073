//! Error types for cairn operations.
//!
//! This module defines [`CairnError`], the primary error type used throughout
//! the crate, and a [`Result`] type alias for convenience.
//!
//! # Error Handling Strategy
//!
//! - Registration errors (`DuplicateStep`, `UnknownInput`, `CircularDependency`)
//!   are fatal and local to `register`; no partial registry is left behind
//! - `CheckpointCorrupt` is never downgraded to "checkpoint absent"; an
//!   unreadable checkpoint aborts the plan or run that touched it and
//!   requires explicit invalidation to recover
//! - Compute failures are recorded per step and block only the dependent
//!   subgraph
//! - Use `anyhow::Error` (via `CairnError::Other`) for unexpected errors

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for cairn operations.
#[derive(Debug, Error)]
pub enum CairnError {
    /// A step name was registered twice.
    #[error("Duplicate step: '{name}' is already registered")]
    DuplicateStep { name: String },

    /// A step input references a step that is not (yet) registered.
    #[error("Step '{step}' references unknown input step '{input}'")]
    UnknownInput { step: String, input: String },

    /// Step dependency cycle detected.
    #[error("Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    /// A named step does not exist in the registry.
    #[error("Unknown step: {name}")]
    UnknownStep { name: String },

    /// No checkpoint exists for a step whose outputs were requested.
    #[error("No checkpoint found for step '{step}'")]
    CheckpointMissing { step: String },

    /// A checkpoint exists but cannot be read or validated.
    ///
    /// Never treated as an absent checkpoint, since silently recomputing
    /// could mask data loss. Aborts planning or execution until the step
    /// is explicitly invalidated.
    #[error("Checkpoint for step '{step}' at {path} is corrupt: {message}")]
    CheckpointCorrupt {
        step: String,
        path: PathBuf,
        message: String,
    },

    /// The step's compute callable returned an error.
    #[error("Step '{step}' failed: {message}")]
    StepExecutionFailed { step: String, message: String },

    /// Some but not all requested steps succeeded.
    #[error("Run {run_id} incomplete: failed steps: {}", failed.join(", "))]
    RunIncomplete { run_id: String, failed: Vec<String> },

    /// Serialization of a checkpoint artifact or record failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for cairn operations.
pub type Result<T> = std::result::Result<T, CairnError>;
