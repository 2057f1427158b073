//! Run records and the run log.

pub mod logger;
pub mod record;

pub use logger::RunLogger;
pub use record::{new_run_id, RunRecord, RunRecordBuilder, RunStatus, StepOutcome, StepStatus};
