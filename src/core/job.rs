//! Job definitions and their lifecycle enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::schedule::ScheduleType;
use super::types::JobId;
use crate::routing::RouteStrategy;

/// Whether the scheduler should fire a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job is not scheduled. Fire times are always 0.
    #[default]
    Stopped,
    /// Job is scheduled.
    Running,
}

impl JobStatus {
    /// Upper-case key of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Stopped => "STOPPED",
            JobStatus::Running => "RUNNING",
        }
    }
}

/// Where a job's executable logic comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlueType {
    /// A named handler compiled into the executor.
    #[default]
    Bean,
    /// Script source text compiled on demand.
    Script,
}

impl GlueType {
    /// Upper-case key of this glue type.
    pub fn as_str(&self) -> &'static str {
        match self {
            GlueType::Bean => "BEAN",
            GlueType::Script => "SCRIPT",
        }
    }
}

/// What to do when a scheduled fire was missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MisfireStrategy {
    /// Skip the missed fire and wait for the next one.
    #[default]
    DoNothing,
    /// Fire once immediately, then resume the schedule.
    FireOnceNow,
}

impl MisfireStrategy {
    /// Upper-case key of this strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            MisfireStrategy::DoNothing => "DO_NOTHING",
            MisfireStrategy::FireOnceNow => "FIRE_ONCE_NOW",
        }
    }
}

macro_rules! impl_key_enum {
    ($ty:ty, $name:literal, [$($key:literal => $variant:expr),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($key => Ok($variant),)+
                    other => Err(format!(concat!("unknown ", $name, ": {}"), other)),
                }
            }
        }
    };
}

impl_key_enum!(JobStatus, "job status", [
    "STOPPED" => JobStatus::Stopped,
    "RUNNING" => JobStatus::Running,
]);

impl_key_enum!(GlueType, "glue type", [
    "BEAN" => GlueType::Bean,
    "SCRIPT" => GlueType::Script,
]);

impl_key_enum!(MisfireStrategy, "misfire strategy", [
    "DO_NOTHING" => MisfireStrategy::DoNothing,
    "FIRE_ONCE_NOW" => MisfireStrategy::FireOnceNow,
]);

/// A persisted job definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Store-assigned identifier. Ignored on insert.
    pub id: JobId,
    /// Unique job name.
    pub name: String,
    /// How `schedule_expression` is interpreted.
    pub schedule_type: ScheduleType,
    /// Cron expression or millisecond interval.
    pub schedule_expression: String,
    /// Where the job logic comes from.
    pub glue_type: GlueType,
    /// Target handler name for `GlueType::Bean` jobs.
    pub handler: String,
    /// Script source for `GlueType::Script` jobs.
    pub glue_source: Option<String>,
    /// Default parameter passed to the handler.
    pub execute_param: Option<String>,
    /// Scheduling status.
    pub status: JobStatus,
    /// Epoch millis of the previous fire (0 when none).
    pub last_fire_time_ms: i64,
    /// Epoch millis of the next fire (0 when none).
    pub next_fire_time_ms: i64,
    /// Number of retries after a failed attempt.
    pub fail_retry_count: u32,
    /// Execution timeout in seconds (0 disables it).
    pub execute_timeout_seconds: u32,
    /// Behaviour when a fire is missed.
    pub misfire_strategy: MisfireStrategy,
    /// Per-job routing strategy; `None` uses the configured default.
    pub route_strategy: Option<RouteStrategy>,
    /// Free-form description.
    pub description: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl JobDefinition {
    /// Create a stopped cron job bound to a named handler.
    pub fn new(
        name: impl Into<String>,
        schedule_expression: impl Into<String>,
        handler: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(0),
            name: name.into(),
            schedule_type: ScheduleType::Cron,
            schedule_expression: schedule_expression.into(),
            glue_type: GlueType::Bean,
            handler: handler.into(),
            glue_source: None,
            execute_param: None,
            status: JobStatus::Stopped,
            last_fire_time_ms: 0,
            next_fire_time_ms: 0,
            fail_retry_count: 0,
            execute_timeout_seconds: 0,
            misfire_strategy: MisfireStrategy::DoNothing,
            route_strategy: None,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the schedule type.
    pub fn with_schedule_type(mut self, schedule_type: ScheduleType) -> Self {
        self.schedule_type = schedule_type;
        self
    }

    /// Set the default execute parameter.
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.execute_param = Some(param.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Make this a script job with the given source.
    pub fn with_glue_source(mut self, source: impl Into<String>) -> Self {
        self.glue_type = GlueType::Script;
        self.glue_source = Some(source.into());
        self
    }

    /// Set the routing strategy.
    pub fn with_route_strategy(mut self, strategy: RouteStrategy) -> Self {
        self.route_strategy = Some(strategy);
        self
    }

    /// Set the misfire strategy.
    pub fn with_misfire_strategy(mut self, strategy: MisfireStrategy) -> Self {
        self.misfire_strategy = strategy;
        self
    }

    /// Set the execution timeout.
    pub fn with_timeout_seconds(mut self, seconds: u32) -> Self {
        self.execute_timeout_seconds = seconds;
        self
    }

    /// Whether the job is scheduled.
    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    /// Mark the job running with the given next fire time.
    pub fn mark_running(&mut self, next_fire_time_ms: i64) {
        self.status = JobStatus::Running;
        self.next_fire_time_ms = next_fire_time_ms;
        self.touch();
    }

    /// Mark the job stopped and clear both fire times.
    pub fn mark_stopped(&mut self) {
        self.status = JobStatus::Stopped;
        self.last_fire_time_ms = 0;
        self.next_fire_time_ms = 0;
        self.touch();
    }

    /// Move the schedule forward: the pending fire becomes the last fire.
    pub fn advance(&mut self, next_fire_time_ms: i64) {
        self.last_fire_time_ms = self.next_fire_time_ms;
        self.next_fire_time_ms = next_fire_time_ms;
        self.touch();
    }

    /// Refresh `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
