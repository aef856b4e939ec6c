//! Scheduler error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("enqueue requires a non-empty key")]
    EmptyKey,
}
