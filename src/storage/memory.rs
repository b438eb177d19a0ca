//! In-memory job store.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{JobMutation, JobStore, StorageError};
use crate::core::job::{JobDefinition, JobStatus};
use crate::core::types::JobId;

#[derive(Default)]
struct Jobs {
    by_id: BTreeMap<JobId, JobDefinition>,
    by_name: HashMap<String, JobId>,
    last_id: i64,
}

impl Jobs {
    fn insert(&mut self, mut job: JobDefinition) -> Result<JobDefinition, StorageError> {
        if self.by_name.contains_key(&job.name) {
            return Err(StorageError::DuplicateKey(format!("job: {}", job.name)));
        }
        self.last_id += 1;
        job.id = JobId::new(self.last_id);
        self.by_name.insert(job.name.clone(), job.id);
        self.by_id.insert(job.id, job.clone());
        Ok(job)
    }

    /// Replace a stored row, keeping the name index in step.
    fn replace(&mut self, job: JobDefinition) -> Result<(), StorageError> {
        let previous_name = self
            .by_id
            .get(&job.id)
            .map(|existing| existing.name.clone())
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", job.id)))?;

        if previous_name != job.name {
            if self.by_name.contains_key(&job.name) {
                return Err(StorageError::DuplicateKey(format!("job: {}", job.name)));
            }
            self.by_name.remove(&previous_name);
            self.by_name.insert(job.name.clone(), job.id);
        }
        self.by_id.insert(job.id, job);
        Ok(())
    }

    fn modify(&mut self, id: JobId, mutation: JobMutation) -> Result<JobDefinition, StorageError> {
        let mut job = self
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))?;
        mutation(&mut job)?;
        job.id = id;
        self.replace(job.clone())?;
        Ok(job)
    }
}

/// In-memory job store.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<Jobs>,
}

impl InMemoryJobStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert_job(&self, job: JobDefinition) -> Result<JobDefinition, StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        jobs.insert(job)
    }

    async fn get_job(&self, id: JobId) -> Result<JobDefinition, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        jobs.by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))
    }

    async fn find_job_by_name(&self, name: &str) -> Result<Option<JobDefinition>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(jobs
            .by_name
            .get(name)
            .and_then(|id| jobs.by_id.get(id))
            .cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<JobDefinition>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(jobs.by_id.values().cloned().collect())
    }

    async fn list_jobs_by_handler(
        &self,
        handler: &str,
    ) -> Result<Vec<JobDefinition>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(jobs
            .by_id
            .values()
            .filter(|job| job.handler == handler)
            .cloned()
            .collect())
    }

    async fn update_job(&self, job: JobDefinition) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        jobs.replace(job)
    }

    async fn modify_job(
        &self,
        id: JobId,
        mutation: JobMutation,
    ) -> Result<JobDefinition, StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        jobs.modify(id, mutation)
    }

    async fn upsert_job_by_name(
        &self,
        template: JobDefinition,
        update: JobMutation,
    ) -> Result<(JobDefinition, bool), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        match jobs.by_name.get(&template.name).copied() {
            Some(id) => Ok((jobs.modify(id, update)?, false)),
            None => Ok((jobs.insert(template)?, true)),
        }
    }

    async fn list_due_jobs(
        &self,
        before_ms: i64,
        limit: usize,
    ) -> Result<Vec<JobDefinition>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut due: Vec<_> = jobs
            .by_id
            .values()
            .filter(|job| job.status == JobStatus::Running && job.next_fire_time_ms <= before_ms)
            .cloned()
            .collect();
        due.sort_by_key(|job| (job.next_fire_time_ms, job.id));
        due.truncate(limit);
        Ok(due)
    }
}
