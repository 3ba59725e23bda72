use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Lifecycle state of a run instance.
///
/// `Pending` and `Running` are the only non-terminal states. The skip
/// variants are reached from `Pending` through a conditional transition only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting for its scheduled minute.
    Pending,
    /// Claimed by a runner and currently executing.
    Running,
    Success,
    Error,
    /// The runner process exited without reporting a result.
    Died,
    /// The scheduled window passed without anyone picking the run up.
    Missed,
    /// The running process vanished from the process table.
    Disappeared,
    /// The job ran but reported that it had nothing to do.
    DidntDoAnything,
    /// The job asked to be run again immediately.
    Repeat,
    Killed,
    /// Retired because a newer overdue run for the same job exists.
    SkipPilingUp,
    /// Retired because another job held the execution slot.
    SkipOtherJobRunning,
}

impl RunStatus {
    pub const ALL: [RunStatus; 12] = [
        RunStatus::Pending,
        RunStatus::Running,
        RunStatus::Success,
        RunStatus::Error,
        RunStatus::Died,
        RunStatus::Missed,
        RunStatus::Disappeared,
        RunStatus::DidntDoAnything,
        RunStatus::Repeat,
        RunStatus::Killed,
        RunStatus::SkipPilingUp,
        RunStatus::SkipOtherJobRunning,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Died => "died",
            RunStatus::Missed => "missed",
            RunStatus::Disappeared => "disappeared",
            RunStatus::DidntDoAnything => "didnt_do_anything",
            RunStatus::Repeat => "repeat",
            RunStatus::Killed => "killed",
            RunStatus::SkipPilingUp => "skip_piling_up",
            RunStatus::SkipOtherJobRunning => "skip_other_job_running",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }

    /// Terminal statuses that count as a good outcome for retention purposes.
    pub fn is_success_like(self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Repeat | RunStatus::Killed | RunStatus::DidntDoAnything
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RunStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| SchedulerError::UnknownStatus(s.to_string()))
    }
}

/// Why a run instance was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleReason {
    /// Produced by the schedule generator from a timing expression.
    Generated,
    /// Started on demand for an "always" job.
    #[serde(rename = "always_triggered")]
    Always,
    /// Created by an operator.
    Manual,
}

impl ScheduleReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleReason::Generated => "generated",
            ScheduleReason::Always => "always_triggered",
            ScheduleReason::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ScheduleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScheduleReason {
    type Err = SchedulerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "generated" => Ok(ScheduleReason::Generated),
            "always_triggered" => Ok(ScheduleReason::Always),
            "manual" => Ok(ScheduleReason::Manual),
            other => Err(SchedulerError::UnknownReason(other.to_string())),
        }
    }
}

/// One concrete planned execution of a job at a specific minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInstance {
    /// Store-assigned identity; increases with insertion order.
    pub id: i64,
    pub job_code: String,
    pub status: RunStatus,
    /// Always on a whole minute.
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub messages: Option<String>,
    pub reason: ScheduleReason,
}

/// A run instance that has not been written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRun {
    pub job_code: String,
    pub status: RunStatus,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub messages: Option<String>,
    pub reason: ScheduleReason,
}

impl NewRun {
    /// A pending run at `scheduled_at`, created at `now`.
    pub fn pending(
        job_code: &str,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
        reason: ScheduleReason,
    ) -> Self {
        Self {
            job_code: job_code.to_string(),
            status: RunStatus::Pending,
            scheduled_at: truncate_to_minute(scheduled_at),
            created_at: now,
            executed_at: None,
            finished_at: None,
            messages: None,
            reason,
        }
    }
}

/// The recurring task template owned by a [`crate::source::JobSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub job_code: String,
    pub expression: Option<String>,
    pub active: bool,
    pub always: bool,
}

impl JobDefinition {
    /// Whether the generator should consider this job at all. The expression
    /// itself is validated by the matcher.
    pub fn can_be_scheduled(&self) -> bool {
        self.active
            && !self.always
            && self
                .expression
                .as_deref()
                .is_some_and(|expr| !expr.trim().is_empty())
    }
}

impl From<&cronkeeper_core::JobConfig> for JobDefinition {
    fn from(cfg: &cronkeeper_core::JobConfig) -> Self {
        Self {
            job_code: cfg.code.clone(),
            expression: cfg.schedule.clone(),
            active: cfg.active,
            always: cfg.always,
        }
    }
}

/// Drop seconds and sub-second precision.
pub fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    let secs = at.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(60), 0).unwrap_or(at)
}
