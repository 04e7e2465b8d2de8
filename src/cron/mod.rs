//! Cron scheduling engine: schedule evaluation, job normalization, the job
//! store, and the scheduler loop.

pub mod error;
pub mod normalize;
pub mod schedule;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;

pub use error::CronError;
pub use scheduler::{ExecutionOutcome, JobExecutor, RunMode, RunOutcome, SessionWaker};
pub use service::CronService;
pub use store::{CronStatus, JobStore, ListFilter, NextDue, PendingWake};
pub use types::{
    CronJob, CronJobCreate, CronJobPatch, Payload, RunStatus, Schedule, SessionTarget, WakeMode,
};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
