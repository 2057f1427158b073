//! Checkpoint storage: one content file per output plus a metadata sidecar.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<step>.meta.json      checkpoint record
//! <root>/<step>/<output>.<ext> serialized artifact, one per output
//! ```
//!
//! Writes are staged: every output goes to a temporary file, and only once
//! all temp writes succeed are the files renamed into place, with the
//! metadata record written last. Scoped guards remove the temporary files if
//! anything fails before the renames, leaving the prior checkpoint (if any)
//! untouched. Distinct steps write to distinct paths, so concurrent branches
//! need no cross-step locking.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{CairnError, Result};
use crate::step::{Outputs, StepSpec};

use super::record::{CheckpointRecord, OutputRecord};
use super::LoadedOutputs;

/// Removes a temporary file on drop unless disarmed after a successful
/// rename.
struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl TempGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Persistent storage for step checkpoints.
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        Ok(())
    }

    /// Path of the metadata sidecar for a step.
    fn meta_path(&self, step: &str) -> PathBuf {
        self.root.join(format!("{}.meta.json", step))
    }

    /// Path of one output's artifact file.
    fn content_path(&self, step: &str, output: &str, extension: &str) -> PathBuf {
        self.root
            .join(step)
            .join(format!("{}.{}", output, extension))
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        path.with_file_name(name)
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let temp = Self::temp_path(path);
        let mut guard = TempGuard::new(temp.clone());
        fs::write(&temp, bytes)?;
        fs::rename(&temp, path)?;
        guard.disarm();
        Ok(())
    }

    /// Load the checkpoint record for a step, if one exists.
    ///
    /// A record that exists but cannot be parsed is `CheckpointCorrupt`,
    /// never `None` — treating it as absent could mask data loss.
    pub fn record(&self, step: &str) -> Result<Option<CheckpointRecord>> {
        let path = self.meta_path(step);
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&path)?;
        let record: CheckpointRecord =
            serde_json::from_str(&json).map_err(|e| CairnError::CheckpointCorrupt {
                step: step.to_string(),
                path: path.clone(),
                message: e.to_string(),
            })?;
        Ok(Some(record))
    }

    /// Check whether a valid checkpoint exists for the given fingerprints.
    ///
    /// Valid means: a record exists, its params+inputs and code fingerprints
    /// match, and every recorded artifact file is still present. Content is
    /// only verified byte-for-byte on [`read`](Self::read).
    pub fn has_valid(
        &self,
        step: &str,
        params_fingerprint: &str,
        code_fingerprint: &str,
    ) -> bool {
        match self.record(step) {
            Ok(Some(record)) => {
                record.matches(params_fingerprint, code_fingerprint)
                    && record.outputs.iter().all(|o| o.path.exists())
            }
            _ => false,
        }
    }

    /// Read a step's checkpointed outputs.
    ///
    /// Fails with `CheckpointMissing` if no record exists, and with
    /// `CheckpointCorrupt` if an artifact cannot be read, its bytes no
    /// longer match the recorded content fingerprint, or deserialization
    /// fails.
    pub fn read(&self, spec: &StepSpec) -> Result<LoadedOutputs> {
        let step = spec.name();
        let record = self
            .record(step)?
            .ok_or_else(|| CairnError::CheckpointMissing {
                step: step.to_string(),
            })?;

        let mut loaded = LoadedOutputs::new();
        for output_spec in spec.outputs() {
            let output = record.output(&output_spec.name).ok_or_else(|| {
                CairnError::CheckpointCorrupt {
                    step: step.to_string(),
                    path: self.meta_path(step),
                    message: format!("record has no output '{}'", output_spec.name),
                }
            })?;

            let bytes = fs::read(&output.path).map_err(|e| CairnError::CheckpointCorrupt {
                step: step.to_string(),
                path: output.path.clone(),
                message: e.to_string(),
            })?;

            let actual = output_spec.format.content_fingerprint(&bytes);
            if actual != output.content_fingerprint {
                return Err(CairnError::CheckpointCorrupt {
                    step: step.to_string(),
                    path: output.path.clone(),
                    message: format!(
                        "content fingerprint mismatch: recorded {}, found {}",
                        output.content_fingerprint, actual
                    ),
                });
            }

            let value = output_spec.format.deserialize(&bytes).map_err(|e| {
                CairnError::CheckpointCorrupt {
                    step: step.to_string(),
                    path: output.path.clone(),
                    message: e.to_string(),
                }
            })?;

            loaded.insert(output_spec.name.clone(), Arc::new(value));
        }

        Ok(loaded)
    }

    /// Write a step's outputs as a new checkpoint, replacing any prior one.
    ///
    /// All outputs are serialized first, then staged to temporary files;
    /// nothing belonging to the prior checkpoint is replaced until every
    /// staged write has succeeded. The metadata record lands last, so a
    /// failure anywhere before the renames leaves the prior checkpoint
    /// observable and valid.
    pub fn write(
        &self,
        spec: &StepSpec,
        outputs: &Outputs,
        params_fingerprint: &str,
        code_fingerprint: &str,
    ) -> Result<CheckpointRecord> {
        let step = spec.name();

        // Phase 1: serialize everything; no disk state changes on failure.
        let mut serialized: Vec<(String, PathBuf, String, Vec<u8>, String)> = Vec::new();
        for output_spec in spec.outputs() {
            let value =
                outputs
                    .get(&output_spec.name)
                    .ok_or_else(|| CairnError::StepExecutionFailed {
                        step: step.to_string(),
                        message: format!(
                            "compute did not produce declared output '{}'",
                            output_spec.name
                        ),
                    })?;
            let bytes = output_spec.format.serialize(value)?;
            let fingerprint = output_spec.format.content_fingerprint(&bytes);
            let path = self.content_path(step, &output_spec.name, output_spec.format.extension());
            serialized.push((
                output_spec.name.clone(),
                path,
                output_spec.format.name().to_string(),
                bytes,
                fingerprint,
            ));
        }

        // Phase 2: stage every artifact to a temp path. A failure here
        // drops the guards, which remove the temps; the prior checkpoint's
        // files have not been touched.
        self.ensure_dir(&self.root.join(step))?;
        let mut staged: Vec<(String, PathBuf, String, String, PathBuf, TempGuard)> =
            Vec::with_capacity(serialized.len());
        for (name, path, format, bytes, fingerprint) in serialized {
            let temp = Self::temp_path(&path);
            let guard = TempGuard::new(temp.clone());
            fs::write(&temp, &bytes)?;
            staged.push((name, path, format, fingerprint, temp, guard));
        }

        // Phase 3: rename the staged files into place, only now replacing
        // prior artifacts.
        let mut output_records = Vec::with_capacity(staged.len());
        for (name, path, format, fingerprint, temp, mut guard) in staged {
            fs::rename(&temp, &path)?;
            guard.disarm();
            output_records.push(OutputRecord {
                name,
                path,
                format,
                content_fingerprint: fingerprint,
            });
        }

        // Phase 4: the metadata record last; until it lands, the prior
        // record (if any) stays authoritative.
        let record = CheckpointRecord {
            step: step.to_string(),
            outputs: output_records,
            params_fingerprint: params_fingerprint.to_string(),
            code_fingerprint: code_fingerprint.to_string(),
            created_at: chrono::Utc::now(),
        };
        self.ensure_dir(&self.root)?;
        self.write_atomic(&self.meta_path(step), &serde_json::to_vec_pretty(&record)?)?;

        self.remove_stale_artifacts(step, &record);

        debug!(step, "checkpoint written");
        Ok(record)
    }

    /// Remove artifact files left over from a prior record whose outputs
    /// the new record no longer declares. The new record is already
    /// authoritative at this point, so cleanup problems are logged, not
    /// fatal.
    fn remove_stale_artifacts(&self, step: &str, record: &CheckpointRecord) {
        let keep: HashSet<OsString> = record
            .outputs
            .iter()
            .filter_map(|o| o.path.file_name().map(|n| n.to_os_string()))
            .collect();

        let entries = match fs::read_dir(self.root.join(step)) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            if !keep.contains(&entry.file_name()) {
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(step, path = %entry.path().display(), error = %e,
                        "failed to remove stale artifact");
                }
            }
        }
    }

    /// Remove a step's checkpoint record and artifact files.
    ///
    /// Returns whether anything was removed. Never called implicitly.
    pub fn invalidate(&self, step: &str) -> Result<bool> {
        let mut removed = false;

        let meta = self.meta_path(step);
        if meta.exists() {
            fs::remove_file(&meta)?;
            removed = true;
        }

        let dir = self.root.join(step);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            removed = true;
        }

        if removed {
            debug!(step, "checkpoint invalidated");
        }
        Ok(removed)
    }

    /// Remove every checkpoint in the store. Returns the number of records
    /// removed.
    pub fn clear(&self) -> Result<usize> {
        let steps = self.list()?;
        for step in &steps {
            self.invalidate(step)?;
        }
        Ok(steps.len())
    }

    /// Names of steps with a checkpoint record, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut steps = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(step) = name.strip_suffix(".meta.json") {
                steps.push(step.to_string());
            }
        }
        steps.sort();
        Ok(steps)
    }
}
