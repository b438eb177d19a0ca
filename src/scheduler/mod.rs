//! Schedule scanner.
//!
//! This module provides the loop that claims due jobs from the store,
//! dispatches them and moves their schedules forward.

mod engine;
mod handle;
mod types;

pub use engine::Scheduler;
pub use handle::SchedulerHandle;
pub use types::{ScanReport, SchedulerError, SchedulerOptions, SchedulerState};
