//! YAML configuration parsing.
//!
//! Parses and validates the configuration document.

use std::collections::HashSet;
use std::path::Path;

use super::{ConfigError, CoreConfig, JobConfig, StorageConfig};
use crate::core::schedule::Schedule;
use chrono_tz::Tz;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load and validate configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<CoreConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let config: CoreConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<CoreConfig, ConfigError> {
        let config: CoreConfig = serde_yaml::from_str(yaml)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate a parsed configuration.
    pub fn validate(config: &CoreConfig) -> Result<(), ConfigError> {
        let timezone = config.resolve_timezone()?;

        if let StorageConfig::Sqlite { path } = &config.storage {
            if path.trim().is_empty() {
                return Err(ConfigError::MissingField("storage.path".into()));
            }
        }

        if config.routing.state_reset_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "routing.state_reset_interval_secs cannot be zero".into(),
            ));
        }
        if config.routing.max_tracked_jobs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "routing.max_tracked_jobs cannot be zero".into(),
            ));
        }
        if config.glue.cache_capacity == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "glue.cache_capacity cannot be zero".into(),
            ));
        }

        if config.scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "scheduler.tick_interval_ms cannot be zero".into(),
            ));
        }
        if config.scheduler.pre_read_count == 0 {
            return Err(ConfigError::InvalidConfig(
                "scheduler.pre_read_count cannot be zero".into(),
            ));
        }

        let mut executors = HashSet::new();
        for executor in &config.executors {
            if executor.host.trim().is_empty() {
                return Err(ConfigError::MissingField("executors[].host".into()));
            }
            if executor.port == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "executor {} has port 0",
                    executor.host
                )));
            }
            let key = executor.to_candidate().key();
            if !executors.insert(key.clone()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate executor: {}",
                    key
                )));
            }
        }

        let mut names = HashSet::new();
        for job in &config.jobs {
            Self::validate_job(job, timezone)?;
            if !names.insert(job.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate job name: {}",
                    job.name
                )));
            }
        }

        Ok(())
    }

    fn validate_job(job: &JobConfig, timezone: Tz) -> Result<(), ConfigError> {
        if job.name.trim().is_empty() {
            return Err(ConfigError::MissingField("jobs[].name".into()));
        }

        Schedule::parse(job.schedule_type, job.schedule.as_str(), timezone).map_err(|e| {
            ConfigError::InvalidConfig(format!("job '{}': {}", job.name, e))
        })?;

        match &job.glue_source {
            Some(source) if source.trim().is_empty() => {
                return Err(ConfigError::InvalidConfig(format!(
                    "job '{}' has a blank glue_source",
                    job.name
                )));
            }
            Some(_) => {}
            None if job.handler.trim().is_empty() => {
                return Err(ConfigError::MissingField(format!(
                    "jobs[{}].handler",
                    job.name
                )));
            }
            None => {}
        }

        Ok(())
    }
}
