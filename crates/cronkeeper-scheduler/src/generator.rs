use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use cronkeeper_core::SchedulerConfig;
use tracing::{debug, info};

use crate::{
    error::Result,
    expression::ExpressionMatcher,
    purge::{DuplicatePurger, PurgeReport},
    source::JobSource,
    state::{StateStore, Throttle, LAST_GENERATE_AT},
    store::{RunTable, ScheduleFilter, ScheduleStore},
    types::{truncate_to_minute, JobDefinition, NewRun, RunStatus, ScheduleReason},
};

/// Upper bound on the lookahead window (one year of minutes).
const MAX_LOOKAHEAD_MINUTES: i64 = 366 * 24 * 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateReport {
    /// The pass did not run because the generation interval has not elapsed.
    pub skipped: bool,
    pub jobs_considered: usize,
    pub created: usize,
    pub purge: PurgeReport,
}

impl GenerateReport {
    fn throttled() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Materialises pending runs for the next `schedule_ahead_for` minutes.
pub struct ScheduleGenerator {
    store: ScheduleStore,
    state: Arc<dyn StateStore>,
    source: Arc<dyn JobSource>,
    matcher: Arc<dyn ExpressionMatcher>,
    purger: DuplicatePurger,
    throttle: Throttle,
    lookahead: Duration,
}

impl ScheduleGenerator {
    pub fn new(
        store: ScheduleStore,
        state: Arc<dyn StateStore>,
        source: Arc<dyn JobSource>,
        matcher: Arc<dyn ExpressionMatcher>,
        config: &SchedulerConfig,
    ) -> Self {
        let lookahead = i64::try_from(config.schedule_ahead_for)
            .unwrap_or(MAX_LOOKAHEAD_MINUTES)
            .min(MAX_LOOKAHEAD_MINUTES);
        Self {
            purger: DuplicatePurger::new(store.clone()),
            store,
            state,
            source,
            matcher,
            throttle: Throttle::new(LAST_GENERATE_AT, config.schedule_generate_every),
            lookahead: Duration::minutes(lookahead),
        }
    }

    /// Run one generation pass, unless the previous one was too recent.
    ///
    /// Concurrent generators can still both insert the same minute; the
    /// purge that closes every pass removes those.
    pub fn generate(&self, now: DateTime<Utc>) -> Result<GenerateReport> {
        if !self.throttle.is_due(self.state.as_ref(), now)? {
            debug!("schedule generation not due yet");
            return Ok(GenerateReport::throttled());
        }
        let started = Instant::now();

        let jobs = self.source.active_jobs()?;
        let mut existing: HashSet<(String, DateTime<Utc>)> = self
            .store
            .list(&ScheduleFilter::new().status(RunStatus::Pending))?
            .into_iter()
            .map(|run| (run.job_code, run.scheduled_at))
            .collect();

        let mut report = GenerateReport::default();
        for job in &jobs {
            if !job.can_be_scheduled() {
                continue;
            }
            report.jobs_considered += 1;
            report.created += self
                .store
                .with_transaction(|table| self.generate_for_job(table, job, now, &mut existing))?;
        }

        self.throttle.mark(self.state.as_ref(), now)?;
        report.purge = self.purger.purge()?;

        let newest = self.store.newest_scheduled_at()?;
        info!(
            jobs = report.jobs_considered,
            created = report.created,
            duplicates_removed = report.purge.removed,
            newest = ?newest,
            duration_ms = started.elapsed().as_millis() as u64,
            "generated schedule"
        );
        Ok(report)
    }

    fn generate_for_job(
        &self,
        table: &RunTable<'_>,
        job: &JobDefinition,
        now: DateTime<Utc>,
        existing: &mut HashSet<(String, DateTime<Utc>)>,
    ) -> Result<usize> {
        let Some(expression) = job.expression.as_deref() else {
            return Ok(0);
        };
        if !self.matcher.is_valid(expression) {
            debug!(job_code = %job.job_code, %expression, "job has an unusable expression, not scheduling");
            return Ok(0);
        }

        let horizon = now + self.lookahead;
        let mut created = 0;
        let mut cursor = now + Duration::minutes(1);
        while cursor < horizon {
            let minute = truncate_to_minute(cursor);
            cursor += Duration::minutes(1);

            let key = (job.job_code.clone(), minute);
            if existing.contains(&key) || !self.matcher.matches(expression, minute) {
                continue;
            }
            table.insert(&NewRun::pending(
                &job.job_code,
                minute,
                now,
                ScheduleReason::Generated,
            ))?;
            existing.insert(key);
            created += 1;
        }
        Ok(created)
    }
}
