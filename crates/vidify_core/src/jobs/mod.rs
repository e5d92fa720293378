//! Job records, their state machine, and the job store.
//!
//! This module provides:
//! - `Job`: one submitted video with its effective config and stage results
//! - `JobStateMachine`: the only writer of a `Job`, enforcing legal transitions
//! - `JobStore`: active jobs (watched snapshots) plus the terminal-job archive

mod state_machine;
mod store;
mod types;

pub use state_machine::{FailureOutcome, JobStateMachine, TransitionError, TransitionResult};
pub use store::{ArchiveWrite, JobStore, DEFAULT_ARCHIVE_LIMIT};
pub use types::{AttemptStatus, Job, JobId, JobState, JobStatus, StageResult};
