//! Storage abstraction for job definitions.
//!
//! The job store is the single source of truth for job configuration and
//! schedule state. Read-modify-write sequences go through
//! [`JobStore::modify_job`] so that each backend can apply them atomically.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryJobStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteJobStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::job::JobDefinition;
use crate::core::types::JobId;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// A guarded modification found the row in an unexpected state.
    ///
    /// Nothing is written when a mutation returns this error.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

impl StorageError {
    /// Whether this error means the job does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// In-place edit of a stored job.
///
/// Returning an error aborts the modification and leaves the row untouched.
pub type JobMutation = Box<dyn FnOnce(&mut JobDefinition) -> Result<(), StorageError> + Send>;

/// Storage trait for persisting job definitions.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. The store assigns the id and returns the stored row.
    ///
    /// Fails with `DuplicateKey` if a job with the same name exists.
    async fn insert_job(&self, job: JobDefinition) -> Result<JobDefinition, StorageError>;

    /// Get a job by id.
    async fn get_job(&self, id: JobId) -> Result<JobDefinition, StorageError>;

    /// Find a job by its unique name.
    async fn find_job_by_name(&self, name: &str) -> Result<Option<JobDefinition>, StorageError>;

    /// List all jobs ordered by id.
    async fn list_jobs(&self) -> Result<Vec<JobDefinition>, StorageError>;

    /// List jobs bound to `handler`, ordered by id.
    async fn list_jobs_by_handler(&self, handler: &str)
    -> Result<Vec<JobDefinition>, StorageError>;

    /// Overwrite a job wholesale.
    async fn update_job(&self, job: JobDefinition) -> Result<(), StorageError>;

    /// Atomically read, edit and write back one job.
    ///
    /// Returns the job as written.
    async fn modify_job(
        &self,
        id: JobId,
        mutation: JobMutation,
    ) -> Result<JobDefinition, StorageError>;

    /// Atomically update the job named like `template`, or insert `template`.
    ///
    /// When a job with the same name exists `update` is applied to it;
    /// otherwise `template` is inserted as-is. The flag is `true` when a
    /// new job was created.
    async fn upsert_job_by_name(
        &self,
        template: JobDefinition,
        update: JobMutation,
    ) -> Result<(JobDefinition, bool), StorageError>;

    /// Running jobs whose next fire time is at or before `before_ms`.
    ///
    /// Ordered by next fire time, returning at most `limit` jobs.
    async fn list_due_jobs(
        &self,
        before_ms: i64,
        limit: usize,
    ) -> Result<Vec<JobDefinition>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_predicate() {
        assert!(StorageError::NotFound("job: 1".into()).is_not_found());
        assert!(!StorageError::Conflict("stale".into()).is_not_found());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            StorageError::DuplicateKey("job: nightly".into()).to_string(),
            "duplicate key: job: nightly"
        );
        assert_eq!(StorageError::LockPoisoned.to_string(), "storage lock poisoned");
    }
}
