//! Schedule parsing and next fire time calculation.
//!
//! Supports Quartz-style cron expressions (6 or 7 fields, with seconds),
//! standard 5-field cron, and fixed millisecond intervals.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing or using schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid interval expression.
    #[error("invalid interval expression: {0}")]
    InvalidInterval(String),

    /// Unknown schedule type key.
    #[error("unknown schedule type: {0}")]
    UnknownType(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No more occurrences.
    #[error("no more occurrences")]
    NoMoreOccurrences,
}

/// How a job's schedule expression is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleType {
    /// Cron expression.
    #[default]
    Cron,
    /// Literal millisecond delay between fires.
    FixedInterval,
}

impl ScheduleType {
    /// Upper-case key of this schedule type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Cron => "CRON",
            ScheduleType::FixedInterval => "FIXED_INTERVAL",
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleType {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRON" => Ok(ScheduleType::Cron),
            "FIXED_INTERVAL" | "FIXED" => Ok(ScheduleType::FixedInterval),
            other => Err(ScheduleError::UnknownType(other.to_string())),
        }
    }
}

/// Parse a timezone name such as `UTC` or `Asia/Shanghai`.
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// A parsed schedule.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// The original expression string.
    expression: String,
    /// The timezone cron fields are evaluated in.
    timezone: Tz,
    kind: ScheduleKind,
}

#[derive(Debug, Clone)]
enum ScheduleKind {
    Cron(Box<CronSchedule>),
    Interval(chrono::Duration),
}

impl Schedule {
    /// Parse an expression according to its schedule type.
    pub fn parse(
        schedule_type: ScheduleType,
        expression: impl Into<String>,
        timezone: Tz,
    ) -> Result<Self, ScheduleError> {
        match schedule_type {
            ScheduleType::Cron => Self::cron(expression, timezone),
            ScheduleType::FixedInterval => Self::fixed_interval(expression),
        }
    }

    /// Create a cron schedule evaluated in `timezone`.
    ///
    /// Supports:
    /// - Quartz-style 6/7-field cron: `second minute hour day month weekday [year]`
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - `?` as "no specific value" in the day fields
    pub fn cron(expression: impl Into<String>, timezone: Tz) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let schedule = Self::parse_cron(&expression)?;
        Ok(Self {
            expression,
            timezone,
            kind: ScheduleKind::Cron(Box::new(schedule)),
        })
    }

    /// Create a fixed-interval schedule from a millisecond literal.
    pub fn fixed_interval(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let millis: i64 = expression
            .trim()
            .parse()
            .map_err(|_| ScheduleError::InvalidInterval(expression.clone()))?;
        if millis <= 0 {
            return Err(ScheduleError::InvalidInterval(expression));
        }
        let interval = chrono::Duration::try_milliseconds(millis)
            .ok_or_else(|| ScheduleError::InvalidInterval(expression.clone()))?;
        Ok(Self {
            expression,
            timezone: Tz::UTC,
            kind: ScheduleKind::Interval(interval),
        })
    }

    /// Parse a cron expression.
    fn parse_cron(expression: &str) -> Result<CronSchedule, ScheduleError> {
        // `?` means "any" for day-of-month/day-of-week in Quartz syntax
        let normalized = expression.trim().replace('?', "*");
        let fields: Vec<&str> = normalized.split_whitespace().collect();

        let cron_expr = match fields.len() {
            5 => format!("0 {}", normalized),
            6 | 7 => normalized.clone(),
            _ => {
                return Err(ScheduleError::InvalidCron(format!(
                    "expected 5, 6 or 7 fields, got {}",
                    fields.len()
                )));
            }
        };

        CronSchedule::from_str(&cron_expr).map_err(|e| ScheduleError::InvalidCron(e.to_string()))
    }

    /// Get the next occurrence strictly after the given time.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match &self.kind {
            ScheduleKind::Cron(schedule) => {
                // Convert to timezone, find next, convert back to UTC
                let local_time = after.with_timezone(&self.timezone);
                schedule
                    .after(&local_time)
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or(ScheduleError::NoMoreOccurrences)
            }
            ScheduleKind::Interval(interval) => after
                .checked_add_signed(*interval)
                .ok_or(ScheduleError::NoMoreOccurrences),
        }
    }

    /// Get the next N occurrences after the given time.
    ///
    /// Stops early when the schedule runs past the representable range.
    pub fn next_n_after(&self, after: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        match &self.kind {
            ScheduleKind::Cron(schedule) => {
                let local_time = after.with_timezone(&self.timezone);
                schedule
                    .after(&local_time)
                    .take(n)
                    .map(|dt| dt.with_timezone(&Utc))
                    .collect()
            }
            ScheduleKind::Interval(interval) => {
                let mut results = Vec::with_capacity(n);
                let mut current = after;
                for _ in 0..n {
                    match current.checked_add_signed(*interval) {
                        Some(next) => current = next,
                        None => break,
                    }
                    results.push(current);
                }
                results
            }
        }
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the timezone.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }
}

/// Next fire time in epoch milliseconds, strictly after `after`.
///
/// Returns 0 ("no next fire") when the expression cannot be parsed or the
/// schedule has no further occurrence.
pub fn next_fire_time_ms(
    schedule_type: ScheduleType,
    expression: &str,
    timezone: Tz,
    after: DateTime<Utc>,
) -> i64 {
    match Schedule::parse(schedule_type, expression, timezone)
        .and_then(|schedule| schedule.next_after(after))
    {
        Ok(next) => next.timestamp_millis(),
        Err(e) => {
            tracing::warn!(
                schedule_type = %schedule_type,
                expression,
                error = %e,
                "Failed to compute next fire time"
            );
            0
        }
    }
}

/// Convert epoch milliseconds to a UTC timestamp, clamping invalid values to the epoch.
pub fn from_epoch_ms(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}
