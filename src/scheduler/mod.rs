//! Scheduled maintenance jobs.
//!
//! Removes credential artifacts past their maximum age and drops login
//! flows the user walked away from.

mod runner;

pub use runner::{CleanupScheduler, IdleFlows, SchedulerMessage};
