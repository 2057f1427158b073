//! Checkpoint persistence for step outputs.
//!
//! The store owns every [`CheckpointRecord`]: records are created when a
//! step executes successfully, replaced only by a full overwrite, and
//! removed only by explicit invalidation. Validity is decided by three
//! independent fingerprints (params+inputs, code, content) so that a change
//! in any factor that could have produced a different result triggers
//! recomputation.

pub mod format;
pub mod record;
pub mod store;

use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

pub use format::{ArtifactFormat, JsonFormat};
pub use record::{CheckpointRecord, OutputRecord};
pub use store::CheckpointStore;

/// Step outputs loaded from the store, keyed by logical output name.
/// Values are shared so several downstream consumers can read one load.
pub type LoadedOutputs = IndexMap<String, Arc<Value>>;
