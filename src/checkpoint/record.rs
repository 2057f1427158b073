//! Checkpoint metadata records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata for one checkpointed output artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Logical output name.
    pub name: String,
    /// Path of the artifact file on disk.
    pub path: PathBuf,
    /// Format the artifact was serialized with.
    pub format: String,
    /// Fingerprint of the serialized bytes.
    pub content_fingerprint: String,
}

/// Metadata for one step's checkpoint.
///
/// Owned exclusively by the [`CheckpointStore`](super::CheckpointStore);
/// mutated only by full overwrite, which is what makes repeated runs
/// idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// The producing step.
    pub step: String,

    /// One record per declared output, in declaration order.
    pub outputs: Vec<OutputRecord>,

    /// Fingerprint of the params and input fingerprints used to produce
    /// the outputs.
    pub params_fingerprint: String,

    /// Identity of the compute logic version that produced the outputs.
    pub code_fingerprint: String,

    /// When the checkpoint was written.
    pub created_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Look up an output record by logical name.
    pub fn output(&self, name: &str) -> Option<&OutputRecord> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Whether this checkpoint was produced by the given params+inputs and
    /// code fingerprints. A mismatch in either means the checkpoint is
    /// stale and must be ignored by the planner.
    pub fn matches(&self, params_fingerprint: &str, code_fingerprint: &str) -> bool {
        self.params_fingerprint == params_fingerprint && self.code_fingerprint == code_fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CheckpointRecord {
        CheckpointRecord {
            step: "filter".into(),
            outputs: vec![OutputRecord {
                name: "table".into(),
                path: PathBuf::from("/store/filter/table.json"),
                format: "json".into(),
                content_fingerprint: "abc".into(),
            }],
            params_fingerprint: "p1".into(),
            code_fingerprint: "c1".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn output_lookup() {
        let rec = record();
        assert!(rec.output("table").is_some());
        assert!(rec.output("missing").is_none());
    }

    #[test]
    fn matches_requires_both_fingerprints() {
        let rec = record();
        assert!(rec.matches("p1", "c1"));
        assert!(!rec.matches("p2", "c1"));
        assert!(!rec.matches("p1", "c2"));
    }

    #[test]
    fn record_serializes_round_trip() {
        let rec = record();
        let json = serde_json::to_string(&rec).unwrap();
        let back: CheckpointRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.step, "filter");
        assert_eq!(back.outputs[0].content_fingerprint, "abc");
    }
}
