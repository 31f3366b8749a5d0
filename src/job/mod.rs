//! Job coordination.
//!
//! A job carries one input through normalizing, segmenting, script and
//! audio synthesis and assembly. Job records are persisted as JSON so any
//! process can report status, request cancellation or resume a failure.

mod coordinator;
mod store;
mod types;

pub use coordinator::Coordinator;
pub use store::JobStore;
pub use types::{Job, JobError, JobProgress, JobRequest, JobState, StageFailure, StageResults};
