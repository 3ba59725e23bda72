use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use cronkeeper_core::SchedulerConfig;
use tracing::{debug, info};

use crate::{
    error::{Result, SchedulerError},
    state::{StateStore, Throttle, LAST_CLEANUP_AT},
    store::{ScheduleFilter, ScheduleOrder, ScheduleStore},
    types::RunStatus,
};

/// How long each terminal status is kept, and how many successful runs per
/// job survive regardless of age.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    lifetimes: BTreeMap<RunStatus, i64>,
    max_successful: usize,
}

impl RetentionPolicy {
    /// Success-like statuses get `success_minutes`, every other terminal
    /// status gets `failure_minutes`.
    pub fn new(success_minutes: u64, failure_minutes: u64, max_successful: usize) -> Self {
        let lifetimes = RunStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .map(|s| {
                let minutes = if s.is_success_like() {
                    success_minutes
                } else {
                    failure_minutes
                };
                (s, clamp_minutes(minutes))
            })
            .collect();
        Self {
            lifetimes,
            max_successful,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        let mut policy = Self::new(
            config.history_success_lifetime,
            config.history_failure_lifetime,
            config.max_successful_history,
        );
        for (name, minutes) in &config.retention_overrides {
            let status: RunStatus = name.parse()?;
            policy = policy.with_lifetime(status, *minutes)?;
        }
        Ok(policy)
    }

    /// Replace the lifetime of a single terminal status.
    pub fn with_lifetime(mut self, status: RunStatus, minutes: u64) -> Result<Self> {
        if !status.is_terminal() {
            return Err(SchedulerError::Config(format!(
                "retention applies to terminal statuses only, not {status}"
            )));
        }
        self.lifetimes.insert(status, clamp_minutes(minutes));
        Ok(self)
    }

    pub fn lifetime(&self, status: RunStatus) -> Option<Duration> {
        self.lifetimes.get(&status).map(|m| Duration::minutes(*m))
    }

    pub fn max_successful(&self) -> usize {
        self.max_successful
    }
}

fn clamp_minutes(minutes: u64) -> i64 {
    // chrono::Duration tops out near i64::MAX milliseconds.
    i64::try_from(minutes).unwrap_or(i64::MAX).min(i64::MAX / 60_000)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// The pass did not run because the cleanup interval has not elapsed.
    pub skipped: bool,
    /// Rows removed by the age-based policy.
    pub expired: usize,
    /// Successful rows removed by the per-job count cap.
    pub over_cap: usize,
}

/// Deletes terminal history by age, then caps successful history per job.
pub struct HistoryRetainer {
    store: ScheduleStore,
    state: Arc<dyn StateStore>,
    policy: RetentionPolicy,
    throttle: Throttle,
}

impl HistoryRetainer {
    pub fn new(
        store: ScheduleStore,
        state: Arc<dyn StateStore>,
        policy: RetentionPolicy,
        cleanup_every_minutes: u64,
    ) -> Self {
        Self {
            store,
            state,
            policy,
            throttle: Throttle::new(LAST_CLEANUP_AT, cleanup_every_minutes),
        }
    }

    pub fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        if !self.throttle.is_due(self.state.as_ref(), now)? {
            debug!("history cleanup not due yet");
            return Ok(CleanupReport {
                skipped: true,
                ..CleanupReport::default()
            });
        }
        let started = Instant::now();

        let expired = self.expire(now)?;
        self.throttle.mark(self.state.as_ref(), now)?;
        let over_cap = self.enforce_cap()?;

        info!(
            expired,
            over_cap,
            duration_ms = started.elapsed().as_millis() as u64,
            "history cleanup"
        );
        Ok(CleanupReport {
            skipped: false,
            expired,
            over_cap,
        })
    }

    /// Age-based policy: a row goes once its finished (else executed, else
    /// created) time is older than `now - lifetime(status)`.
    fn expire(&self, now: DateTime<Utc>) -> Result<usize> {
        self.store.with_transaction(|table| {
            let mut removed = 0;
            for (status, minutes) in &self.policy.lifetimes {
                let cutoff = now - Duration::minutes(*minutes);
                removed += table.delete_finished_before(*status, cutoff)?;
            }
            Ok(removed)
        })
    }

    /// Count-based policy over SUCCESS and REPEAT rows, newest finished first.
    fn enforce_cap(&self) -> Result<usize> {
        let max = self.policy.max_successful;
        if max == 0 {
            return Ok(0);
        }
        self.store.with_transaction(|table| {
            let history = table.list(
                &ScheduleFilter::new()
                    .statuses([RunStatus::Success, RunStatus::Repeat])
                    .order(ScheduleOrder::FinishedDesc),
            )?;
            let mut per_job: HashMap<String, usize> = HashMap::new();
            let mut removed = 0;
            for run in history {
                let seen = per_job.entry(run.job_code).or_insert(0);
                *seen += 1;
                if *seen > max && table.delete(run.id)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }
}
