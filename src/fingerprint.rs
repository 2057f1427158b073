//! Fingerprint computation for checkpoint validity.
//!
//! A checkpoint is valid only if every factor that could have produced a
//! different result is unchanged. This module provides the three independent
//! fingerprints the planner compares: the combined params+inputs fingerprint,
//! the compute code fingerprint (supplied by the [`Compute`] impl), and
//! per-output content fingerprints, plus fingerprinting of external input
//! files.
//!
//! [`Compute`]: crate::step::Compute

use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use crate::params::Params;

/// Number of digest bytes kept in a hex fingerprint.
const FINGERPRINT_BYTES: usize = 16;

/// Hex-encoded sha256 digest of raw bytes, truncated to 32 hex chars.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..FINGERPRINT_BYTES])
}

/// Fingerprint of a step's params combined with the fingerprints of its
/// resolved inputs, in declaration order.
///
/// Upstream reruns produce new content fingerprints, so this value changes
/// whenever an input changes even if the step's own params did not —
/// staleness propagates through the graph via this composition.
pub fn params_fingerprint(params: &Params, input_fingerprints: &[String]) -> String {
    let mut buf = Vec::new();
    params.encode(&mut buf);
    buf.extend_from_slice(&(input_fingerprints.len() as u64).to_le_bytes());
    for fp in input_fingerprints {
        buf.extend_from_slice(&(fp.len() as u64).to_le_bytes());
        buf.extend_from_slice(fp.as_bytes());
    }
    fingerprint_bytes(&buf)
}

/// Fingerprint of an external input file.
///
/// The hash covers the relative path, modification time, size, and (for
/// files under 1MB) the content. A missing file yields a distinct marker
/// fingerprint so that its appearance later registers as a change.
pub fn file_fingerprint(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());

    match fs::metadata(path) {
        Ok(metadata) => {
            if let Ok(mtime) = metadata.modified() {
                hasher.update(format!("{:?}", mtime).as_bytes());
            }
            hasher.update(metadata.len().to_le_bytes());

            // For small files, also hash content
            if metadata.len() < 1024 * 1024 {
                if let Ok(content) = fs::read(path) {
                    hasher.update(&content);
                }
            }
        }
        Err(_) => {
            hasher.update(b"absent");
        }
    }

    let digest = hasher.finalize();
    hex::encode(&digest[..FINGERPRINT_BYTES])
}
