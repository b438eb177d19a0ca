//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the scheduler core
//! and the jobs it registers at startup.

mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{
    CoreConfig, ExecutorConfig, GlueConfig, JobConfig, RoutingConfig, SchedulerConfig,
    StorageConfig,
};
pub use yaml::YamlLoader;

use crate::core::types::JobId;
use crate::manager::{JobConfigManager, ManagerError};

/// Register configured jobs with `manager`, matching existing jobs by name.
///
/// New jobs are created. Existing jobs have their configurable fields
/// overwritten; a running job whose schedule changed gets its next fire
/// time recomputed, and `auto_start` starts a job that is stopped. Ids are
/// returned in configuration order.
pub async fn register_jobs(
    jobs: &[JobConfig],
    manager: &JobConfigManager,
) -> Result<Vec<JobId>, ManagerError> {
    let mut ids = Vec::with_capacity(jobs.len());

    for config in jobs {
        let Some(existing) = manager.find_by_name(&config.name).await? else {
            let id = manager.create_job(config.to_definition()).await?;
            ids.push(id);
            continue;
        };

        let id = existing.id;
        let entry = config.clone();
        if manager
            .reconfigure(id, move |job| entry.apply_to(job), config.auto_start)
            .await?
            .is_none()
        {
            tracing::warn!(job_id = %id, job = %config.name, "Configured job vanished");
            continue;
        }

        tracing::debug!(job_id = %id, job = %config.name, "Configured job registered");
        ids.push(id);
    }

    Ok(ids)
}
