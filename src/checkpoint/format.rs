//! Pluggable serialization formats for checkpoint artifacts.

use serde_json::Value;

use crate::error::Result;
use crate::fingerprint::fingerprint_bytes;

/// Serialization format for one output artifact.
///
/// The core only needs a serialize/deserialize pair and a content
/// fingerprint per format; what the bytes mean is the step's business.
pub trait ArtifactFormat: Send + Sync {
    /// Short format name recorded in checkpoint metadata.
    fn name(&self) -> &'static str;

    /// File extension for the checkpointed artifact.
    fn extension(&self) -> &'static str;

    /// Serialize a value to bytes.
    fn serialize(&self, value: &Value) -> Result<Vec<u8>>;

    /// Deserialize bytes back to a value.
    fn deserialize(&self, bytes: &[u8]) -> Result<Value>;

    /// Fingerprint of the serialized content.
    fn content_fingerprint(&self, bytes: &[u8]) -> String {
        fingerprint_bytes(bytes)
    }
}

/// Pretty-printed JSON, the default artifact format.
pub struct JsonFormat;

impl ArtifactFormat for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extension(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
