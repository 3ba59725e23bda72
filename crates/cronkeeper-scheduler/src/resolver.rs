use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{
    error::Result,
    registry::ProcessRegistry,
    store::{ScheduleFilter, ScheduleOrder, ScheduleStore},
    types::RunStatus,
};

pub const PILING_UP_MESSAGE: &str =
    "Multiple runs of the same job were piling up. Skipping execution of duplicates.";
pub const OTHER_JOB_RUNNING_MESSAGE: &str =
    "Another run of this job was still executing. Skipping execution.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Overdue pending rows seen by the pass.
    pub overdue: usize,
    /// Newest overdue row per job, left pending.
    pub kept: usize,
    pub skipped: usize,
    /// Rows another process had already moved out of PENDING.
    pub lost: usize,
}

/// Retires overdue pile-ups so only the newest overdue run per job remains
/// eligible for execution.
#[derive(Clone)]
pub struct RaceResolver {
    store: ScheduleStore,
}

impl RaceResolver {
    pub fn new(store: ScheduleStore) -> Self {
        Self { store }
    }

    /// Walk overdue PENDING rows newest-first. The first row per job code is
    /// kept; every older one is moved to SKIP_PILINGUP, but only if it is
    /// still PENDING at write time.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let report = self.store.with_transaction(|table| {
            let overdue = table.list(
                &ScheduleFilter::new()
                    .status(RunStatus::Pending)
                    .scheduled_before(now)
                    .order(ScheduleOrder::ScheduledDesc),
            )?;

            let mut report = SweepReport {
                overdue: overdue.len(),
                ..SweepReport::default()
            };
            let mut seen = HashSet::new();
            for run in overdue {
                if seen.insert(run.job_code.clone()) {
                    report.kept += 1;
                    continue;
                }
                if table.try_transition(
                    run.id,
                    RunStatus::Pending,
                    RunStatus::SkipPilingUp,
                    Some(PILING_UP_MESSAGE),
                )? {
                    report.skipped += 1;
                } else {
                    report.lost += 1;
                }
            }
            Ok(report)
        })?;

        if report.skipped > 0 || report.lost > 0 {
            info!(
                skipped = report.skipped,
                lost = report.lost,
                kept = report.kept,
                "retired piled-up runs"
            );
        }
        Ok(report)
    }

    /// Move overdue PENDING rows of jobs that are currently executing to
    /// SKIP_OTHERJOBRUNNING. Returns how many rows this call transitioned.
    pub fn skip_busy(&self, now: DateTime<Utc>, registry: &dyn ProcessRegistry) -> Result<usize> {
        let overdue = self.store.list(
            &ScheduleFilter::new()
                .status(RunStatus::Pending)
                .scheduled_before(now)
                .order(ScheduleOrder::ScheduledAsc),
        )?;

        let mut busy = HashSet::new();
        let mut idle = HashSet::new();
        let mut skipped = 0;
        for run in overdue {
            let is_busy = if busy.contains(&run.job_code) {
                true
            } else if idle.contains(&run.job_code) {
                false
            } else if registry.is_running(&run.job_code)? {
                busy.insert(run.job_code.clone());
                true
            } else {
                idle.insert(run.job_code.clone());
                false
            };
            if !is_busy {
                continue;
            }
            if self.store.try_transition(
                run.id,
                RunStatus::Pending,
                RunStatus::SkipOtherJobRunning,
                Some(OTHER_JOB_RUNNING_MESSAGE),
            )? {
                skipped += 1;
            } else {
                debug!(run_id = run.id, "run left PENDING before it could be skipped");
            }
        }
        Ok(skipped)
    }
}
