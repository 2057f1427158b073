//! Persists run records to a log directory.
//!
//! Each run lands twice: `<run_id>.json` (machine-readable, the source of
//! truth for [`list_runs`](RunLogger::list_runs)) and `<run_id>.txt` (the
//! rendering of [`RunRecord::render_text`]). Logging is best effort: a full
//! disk must not turn a completed run into a failed one, so write errors are
//! reported through `tracing` and swallowed.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;

use super::record::RunRecord;

/// Writes and lists run records under a single directory.
pub struct RunLogger {
    dir: PathBuf,
}

impl RunLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The log directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist one run record, best effort.
    pub fn log(&self, record: &RunRecord) {
        if let Err(e) = self.try_log(record) {
            warn!(run_id = %record.run_id, error = %e, "failed to write run log");
        }
    }

    fn try_log(&self, record: &RunRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let json_path = self.dir.join(format!("{}.json", record.run_id));
        fs::write(&json_path, serde_json::to_vec_pretty(record)?)?;

        let text_path = self.dir.join(format!("{}.txt", record.run_id));
        fs::write(&text_path, record.render_text())?;

        debug!(run_id = %record.run_id, path = %json_path.display(), "run logged");
        Ok(())
    }

    /// Load every recorded run, oldest first. Files that fail to parse are
    /// skipped with a warning rather than failing the listing.
    pub fn list_runs(&self) -> Result<Vec<RunRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        // Run ids are timestamp-prefixed, so name order is time order.
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            match fs::read_to_string(&path) {
                Ok(json) => match serde_json::from_str(&json) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unparseable run log")
                    }
                },
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable run log"),
            }
        }
        Ok(records)
    }

    /// The most recent run, if any.
    pub fn latest(&self) -> Result<Option<RunRecord>> {
        Ok(self.list_runs()?.pop())
    }
}

/// A logger can sit directly on an executor as its observer; it persists
/// the record when the run finishes and ignores per-step events.
impl crate::executor::ExecutionObserver for RunLogger {
    fn run_finished(&self, record: &RunRecord) {
        self.log(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::record::{RunRecordBuilder, StepOutcome, StepStatus};
    use tempfile::TempDir;

    fn record(run_id: &str) -> RunRecord {
        let mut builder = RunRecordBuilder::new(run_id);
        builder.record(StepOutcome {
            step: "download".into(),
            status: StepStatus::Ran,
            detail: "no checkpoint".into(),
            params: crate::params::Params::new(),
            duration_ms: Some(3),
        });
        builder.finish()
    }

    #[test]
    fn log_writes_json_and_text() {
        let temp = TempDir::new().unwrap();
        let logger = RunLogger::new(temp.path());

        logger.log(&record("run_20250101T000000_000"));

        assert!(temp.path().join("run_20250101T000000_000.json").exists());
        assert!(temp.path().join("run_20250101T000000_000.txt").exists());
    }

    #[test]
    fn list_runs_ordered_oldest_first() {
        let temp = TempDir::new().unwrap();
        let logger = RunLogger::new(temp.path());

        logger.log(&record("run_20250102T000000_000"));
        logger.log(&record("run_20250101T000000_000"));

        let runs = logger.list_runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "run_20250101T000000_000");
        assert_eq!(
            logger.latest().unwrap().unwrap().run_id,
            "run_20250102T000000_000"
        );
    }

    #[test]
    fn empty_dir_lists_nothing() {
        let temp = TempDir::new().unwrap();
        let logger = RunLogger::new(temp.path().join("missing"));
        assert!(logger.list_runs().unwrap().is_empty());
        assert!(logger.latest().unwrap().is_none());
    }

    #[test]
    fn unparseable_log_is_skipped() {
        let temp = TempDir::new().unwrap();
        let logger = RunLogger::new(temp.path());

        logger.log(&record("run_20250101T000000_000"));
        std::fs::write(temp.path().join("run_bad.json"), "{nope").unwrap();

        let runs = logger.list_runs().unwrap();
        assert_eq!(runs.len(), 1);
    }
}
