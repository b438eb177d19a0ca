//! Core identifier and routing value types.
//!
//! These types describe who a job is (`JobId`), where it may run
//! (`ExecutorCandidate`, `CandidateList`) and why it is firing
//! (`TriggerContext`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Correlation id used for firings that do not come from a scheduled log entry.
pub const UNSCHEDULED_LOG_ID: i64 = -1;

/// Unique identifier for a job, assigned by the job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(i64);

impl JobId {
    /// Create a JobId from a raw store id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the underlying integer value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live worker that can execute a job.
///
/// Candidates are supplied per call by an external registry and are never
/// owned or persisted by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutorCandidate {
    /// Host name or IP address.
    pub host: String,
    /// Port the executor listens on.
    pub port: u16,
    /// Optional deployment profile (e.g. "prod", "canary").
    #[serde(default)]
    pub profile: Option<String>,
}

impl ExecutorCandidate {
    /// Create a candidate without a profile.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            profile: None,
        }
    }

    /// Set the profile.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Identity key used by stateful routers: `host:port`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ExecutorCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A non-empty list of executor candidates.
///
/// Routers require at least one candidate; this type makes that a
/// construction-time guarantee instead of a runtime check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateList(Vec<ExecutorCandidate>);

impl CandidateList {
    /// Build a list, returning `None` when `candidates` is empty.
    pub fn new(candidates: Vec<ExecutorCandidate>) -> Option<Self> {
        if candidates.is_empty() {
            None
        } else {
            Some(Self(candidates))
        }
    }

    /// A list holding exactly one candidate.
    pub fn single(candidate: ExecutorCandidate) -> Self {
        Self(vec![candidate])
    }

    /// First candidate.
    pub fn first(&self) -> &ExecutorCandidate {
        &self.0[0]
    }

    /// Last candidate.
    pub fn last(&self) -> &ExecutorCandidate {
        &self.0[self.0.len() - 1]
    }

    /// Number of candidates (always at least one).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; present for API symmetry with slices.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Candidate at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<&ExecutorCandidate> {
        self.0.get(index)
    }

    /// Borrow the candidates as a slice.
    pub fn as_slice(&self) -> &[ExecutorCandidate] {
        &self.0
    }

    /// Iterate over the candidates.
    pub fn iter(&self) -> std::slice::Iter<'_, ExecutorCandidate> {
        self.0.iter()
    }

    /// Consume into the underlying vector.
    pub fn into_vec(self) -> Vec<ExecutorCandidate> {
        self.0
    }
}

impl<'a> IntoIterator for &'a CandidateList {
    type Item = &'a ExecutorCandidate;
    type IntoIter = std::slice::Iter<'a, ExecutorCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Why a job is firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    /// Fired by the schedule.
    Cron,
    /// Fired manually through the management API.
    Api,
    /// Re-fired after a failed attempt.
    Retry,
    /// Fired once to compensate for a missed schedule.
    Misfire,
    /// Fired by a parent job completing.
    Parent,
}

impl TriggerType {
    /// Upper-case key of this trigger type.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Cron => "CRON",
            TriggerType::Api => "API",
            TriggerType::Retry => "RETRY",
            TriggerType::Misfire => "MISFIRE",
            TriggerType::Parent => "PARENT",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRON" => Ok(TriggerType::Cron),
            "API" => Ok(TriggerType::Api),
            "RETRY" => Ok(TriggerType::Retry),
            "MISFIRE" => Ok(TriggerType::Misfire),
            "PARENT" => Ok(TriggerType::Parent),
            other => Err(format!("unknown trigger type: {}", other)),
        }
    }
}

/// Correlation and routing metadata accompanying one firing of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerContext {
    /// Job being fired.
    pub job_id: JobId,
    /// Why the job fires.
    pub trigger_type: TriggerType,
    /// Parameter handed to the executor.
    pub executor_param: Option<String>,
    /// Correlation/log id; `UNSCHEDULED_LOG_ID` for non-scheduled firings.
    pub log_id: i64,
}

impl TriggerContext {
    /// Create a context for a scheduled firing.
    pub fn new(job_id: JobId, trigger_type: TriggerType, log_id: i64) -> Self {
        Self {
            job_id,
            trigger_type,
            executor_param: None,
            log_id,
        }
    }

    /// Create a context for a firing that has no log entry.
    pub fn unscheduled(job_id: JobId, trigger_type: TriggerType) -> Self {
        Self::new(job_id, trigger_type, UNSCHEDULED_LOG_ID)
    }

    /// Set the executor parameter.
    pub fn with_param(mut self, param: Option<String>) -> Self {
        self.executor_param = param;
        self
    }

    /// Whether this firing came from outside the schedule log.
    pub fn is_unscheduled(&self) -> bool {
        self.log_id == UNSCHEDULED_LOG_ID
    }
}
