//! Replaying queued actions and submitting new ones.

mod executor;
mod submit;

pub use executor::{DrainReport, SyncExecutor};
pub use submit::{submit_or_queue, SubmitOutcome};
