pub mod coalesce;
pub mod error;

pub use coalesce::{CoalesceConfig, CoalescingScheduler, Job};
pub use error::SchedulerError;
