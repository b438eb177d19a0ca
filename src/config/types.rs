//! Configuration type definitions.
//!
//! This module contains the type definitions for the YAML configuration
//! document: storage, routing, glue and scheduler settings, the executor
//! list, injectable components and the jobs to register at startup.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::ConfigError;
use crate::core::job::{GlueType, JobDefinition, JobStatus, MisfireStrategy};
use crate::core::schedule::{ScheduleType, parse_timezone};
use crate::core::types::ExecutorCandidate;
use crate::glue::GlueOptions;
use crate::routing::{RouteStrategy, RoutingOptions};
use crate::scheduler::SchedulerOptions;

/// Top-level configuration (jobmesh.yaml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// IANA timezone for cron evaluation (default UTC).
    pub timezone: Option<String>,
    /// Job store backend.
    pub storage: StorageConfig,
    /// Routing engine settings.
    pub routing: RoutingConfig,
    /// Script handler compiler settings.
    pub glue: GlueConfig,
    /// Schedule scanner settings.
    pub scheduler: SchedulerConfig,
    /// Executors jobs are routed to. Empty means jobs run in-process only.
    pub executors: Vec<ExecutorConfig>,
    /// Named components available for injection into script handlers.
    pub components: HashMap<String, serde_json::Value>,
    /// Jobs registered at startup.
    pub jobs: Vec<JobConfig>,
}

impl CoreConfig {
    /// The configured timezone, UTC when unset.
    pub fn resolve_timezone(&self) -> Result<Tz, ConfigError> {
        match self.timezone.as_deref() {
            None => Ok(Tz::UTC),
            Some(name) => parse_timezone(name)
                .map_err(|e| ConfigError::InvalidConfig(format!("timezone: {}", e))),
        }
    }

    /// Executors as routing candidates.
    pub fn candidates(&self) -> Vec<ExecutorCandidate> {
        self.executors.iter().map(ExecutorConfig::to_candidate).collect()
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// Routing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Strategy for jobs that do not name one.
    pub default_strategy: RouteStrategy,
    /// Seconds between resets of per-job routing state.
    pub state_reset_interval_secs: u64,
    /// Cap on jobs tracked per stateful strategy.
    pub max_tracked_jobs: Option<usize>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_strategy: RouteStrategy::default(),
            state_reset_interval_secs: 24 * 60 * 60,
            max_tracked_jobs: None,
        }
    }
}

impl RoutingConfig {
    /// Convert to router options.
    pub fn to_options(&self) -> RoutingOptions {
        RoutingOptions {
            default_strategy: self.default_strategy,
            state_reset_interval: Duration::from_secs(self.state_reset_interval_secs),
            max_tracked_jobs: self.max_tracked_jobs,
        }
    }
}

/// Glue compiler configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlueConfig {
    /// Maximum cached compiled handler types.
    pub cache_capacity: Option<usize>,
    /// Heap cap per script runtime, in bytes.
    pub memory_limit_bytes: Option<usize>,
    /// Inject configured components into new handler instances.
    pub inject_dependencies: bool,
}

impl GlueConfig {
    /// Convert to compiler options.
    pub fn to_options(&self) -> GlueOptions {
        GlueOptions {
            cache_capacity: self.cache_capacity,
            memory_limit_bytes: self.memory_limit_bytes,
            inject_dependencies: self.inject_dependencies,
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Milliseconds between scans.
    pub tick_interval_ms: u64,
    /// Look-ahead window in milliseconds.
    pub pre_read_ms: u64,
    /// Maximum jobs claimed per scan.
    pub pre_read_count: usize,
    /// Seconds shutdown waits for in-flight dispatches.
    pub shutdown_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let defaults = SchedulerOptions::default();
        Self {
            tick_interval_ms: defaults.tick_interval.as_millis() as u64,
            pre_read_ms: defaults.pre_read.as_millis() as u64,
            pre_read_count: defaults.pre_read_count,
            shutdown_timeout_secs: defaults.shutdown_timeout.as_secs(),
        }
    }
}

impl SchedulerConfig {
    /// Convert to scheduler options.
    pub fn to_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            pre_read: Duration::from_millis(self.pre_read_ms),
            pre_read_count: self.pre_read_count,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

/// One executor address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Host name or IP.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Optional profile tag.
    pub profile: Option<String>,
}

impl ExecutorConfig {
    /// Convert to a routing candidate.
    pub fn to_candidate(&self) -> ExecutorCandidate {
        let candidate = ExecutorCandidate::new(self.host.clone(), self.port);
        match &self.profile {
            Some(profile) => candidate.with_profile(profile.clone()),
            None => candidate,
        }
    }
}

/// Job configuration from YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique job name.
    pub name: String,
    /// Cron expression or millisecond interval.
    pub schedule: String,
    /// How `schedule` is interpreted.
    #[serde(default)]
    pub schedule_type: ScheduleType,
    /// Handler name (bean jobs).
    #[serde(default)]
    pub handler: String,
    /// Handler source text. Makes this a script job.
    pub glue_source: Option<String>,
    /// Default execute parameter.
    pub param: Option<String>,
    /// Optional description.
    pub description: Option<String>,
    /// Start scheduling as soon as the job is registered.
    #[serde(default = "default_true")]
    pub auto_start: bool,
    /// Per-job routing strategy.
    pub route_strategy: Option<RouteStrategy>,
    /// Misfire handling.
    #[serde(default)]
    pub misfire_strategy: MisfireStrategy,
    /// Extra attempts after a failed run.
    #[serde(default)]
    pub fail_retry_count: u32,
    /// Execution timeout in seconds (0 = none).
    #[serde(default)]
    pub timeout_secs: u32,
}

fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Whether the job carries its own handler source.
    pub fn is_script(&self) -> bool {
        self.glue_source.is_some()
    }

    /// Build a new job definition from this entry.
    ///
    /// Fire times are left at 0; the manager computes them on creation.
    pub fn to_definition(&self) -> JobDefinition {
        let mut job = JobDefinition::new(&self.name, &self.schedule, &self.handler);
        self.apply_to(&mut job);
        if self.auto_start {
            job.status = JobStatus::Running;
        }
        job
    }

    /// Overwrite the configurable fields of `job` with this entry.
    ///
    /// Identity, status and fire times are kept.
    pub fn apply_to(&self, job: &mut JobDefinition) {
        job.name = self.name.clone();
        job.schedule_type = self.schedule_type;
        job.schedule_expression = self.schedule.clone();
        job.handler = self.handler.clone();
        if let Some(source) = &self.glue_source {
            job.glue_type = GlueType::Script;
            job.glue_source = Some(source.clone());
        }
        job.execute_param = self.param.clone();
        job.description = self.description.clone();
        job.route_strategy = self.route_strategy;
        job.misfire_strategy = self.misfire_strategy;
        job.fail_retry_count = self.fail_retry_count;
        job.execute_timeout_seconds = self.timeout_secs;
    }
}
