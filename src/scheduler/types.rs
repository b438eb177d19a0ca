//! Scheduler type definitions.
//!
//! This module contains error types, state enums, options and command types
//! for the scheduler.

use std::time::Duration;

use crate::storage::StorageError;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
    /// Scheduler is paused.
    Paused,
}

/// Timing knobs for the scan loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Pause between scans.
    pub tick_interval: Duration,
    /// How far ahead of now a scan looks for upcoming fires.
    ///
    /// A fire more than this far in the past counts as a misfire.
    pub pre_read: Duration,
    /// Maximum jobs claimed per scan.
    pub pre_read_count: usize,
    /// How long shutdown waits for in-flight dispatches.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            pre_read: Duration::from_secs(5),
            pre_read_count: 1000,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// What one scan did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Jobs returned by the due-job query.
    pub scanned: usize,
    /// Dispatches started immediately (due and misfire-fired jobs).
    pub fired: usize,
    /// Dispatches scheduled for later in the pre-read window.
    pub scheduled: usize,
    /// Jobs whose fire time was missed by more than the pre-read window.
    pub misfired: usize,
    /// Jobs changed by someone else between the query and the update.
    pub skipped: usize,
}

/// Commands that can be sent to the scheduler.
pub(crate) enum SchedulerCommand {
    /// Pause the scheduler.
    Pause { response: oneshot::Sender<()> },
    /// Resume the scheduler.
    Resume { response: oneshot::Sender<()> },
    /// Shutdown the scheduler.
    Shutdown { response: oneshot::Sender<()> },
}
