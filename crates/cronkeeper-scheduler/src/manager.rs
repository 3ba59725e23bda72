use std::sync::Arc;

use chrono::{DateTime, Utc};
use cronkeeper_core::{CronkeeperConfig, SchedulerConfig};
use rusqlite::Connection;
use tracing::info;

use crate::{
    activator::{Activation, Activator},
    cadence::{Cadence, CadenceMonitor},
    error::Result,
    expression::{CronMatcher, ExpressionMatcher},
    generator::{GenerateReport, ScheduleGenerator},
    registry::{ProcessRegistry, StoreProcessRegistry},
    resolver::{RaceResolver, SweepReport},
    retention::{CleanupReport, HistoryRetainer, RetentionPolicy},
    source::{JobSource, StaticJobSource},
    state::{SqliteStateStore, StateStore, Throttle, LAST_GENERATE_AT},
    store::{ScheduleFilter, ScheduleStore},
    types::{RunInstance, RunStatus, ScheduleReason},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub generate: GenerateReport,
    pub sweep: SweepReport,
    pub cleanup: CleanupReport,
}

/// Collaborators a [`ScheduleManager`] is built from.
pub struct Collaborators {
    pub store: ScheduleStore,
    pub state: Arc<dyn StateStore>,
    pub source: Arc<dyn JobSource>,
    pub matcher: Arc<dyn ExpressionMatcher>,
    pub registry: Arc<dyn ProcessRegistry>,
}

/// One entry point for every scheduling operation, wired to shared state.
pub struct ScheduleManager {
    store: ScheduleStore,
    state: Arc<dyn StateStore>,
    registry: Arc<dyn ProcessRegistry>,
    generator: ScheduleGenerator,
    resolver: RaceResolver,
    retainer: HistoryRetainer,
    cadence: CadenceMonitor,
    activator: Activator,
    generate_throttle: Throttle,
}

impl ScheduleManager {
    pub fn new(parts: Collaborators, config: &SchedulerConfig) -> Result<Self> {
        let Collaborators {
            store,
            state,
            source,
            matcher,
            registry,
        } = parts;
        let policy = RetentionPolicy::from_config(config)?;
        Ok(Self {
            generator: ScheduleGenerator::new(
                store.clone(),
                Arc::clone(&state),
                source,
                matcher,
                config,
            ),
            resolver: RaceResolver::new(store.clone()),
            retainer: HistoryRetainer::new(
                store.clone(),
                Arc::clone(&state),
                policy,
                config.history_cleanup_every,
            ),
            cadence: CadenceMonitor::new(Arc::clone(&state)),
            activator: Activator::new(store.clone(), Arc::clone(&registry)),
            generate_throttle: Throttle::new(LAST_GENERATE_AT, config.schedule_generate_every),
            store,
            state,
            registry,
        })
    }

    /// Default wiring: SQLite runs and state on `conn`, jobs from the config,
    /// `cron` expressions, RUNNING rows as the process registry.
    pub fn open(conn: Connection, config: &CronkeeperConfig) -> Result<Self> {
        let store = ScheduleStore::new(conn)?;
        let parts = Collaborators {
            state: Arc::new(SqliteStateStore::from_store(&store)),
            source: Arc::new(StaticJobSource::from_config(&config.jobs)),
            matcher: Arc::new(CronMatcher::new()),
            registry: Arc::new(StoreProcessRegistry::new(store.clone())),
            store,
        };
        Self::new(parts, &config.scheduler)
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    /// generate (+purge) → overdue sweep → history cleanup → log invocation.
    /// The first failing step aborts the tick.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let generate = self.generator.generate(now)?;
        let sweep = self.resolver.sweep(now)?;
        let cleanup = self.retainer.cleanup(now)?;
        self.cadence.log_invocation(now)?;
        Ok(TickReport {
            generate,
            sweep,
            cleanup,
        })
    }

    pub fn generate(&self, now: DateTime<Utc>) -> Result<GenerateReport> {
        self.generator.generate(now)
    }

    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.resolver.sweep(now)
    }

    pub fn skip_busy(&self, now: DateTime<Utc>) -> Result<usize> {
        self.resolver.skip_busy(now, self.registry.as_ref())
    }

    pub fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        self.retainer.cleanup(now)
    }

    pub fn log_invocation(&self, now: DateTime<Utc>) -> Result<()> {
        self.cadence.log_invocation(now)
    }

    pub fn measure_interval(&self) -> Result<Cadence> {
        self.cadence.measure_interval()
    }

    pub fn activate_always(
        &self,
        job_code: &str,
        reason: Option<ScheduleReason>,
        now: DateTime<Utc>,
    ) -> Result<Activation> {
        self.activator.activate_always(job_code, reason, now)
    }

    pub fn pending_due(
        &self,
        now: DateTime<Utc>,
        only: &[String],
        except: &[String],
    ) -> Result<Vec<RunInstance>> {
        self.store.pending_due(now, only, except)
    }

    /// Delete future PENDING runs (all jobs, or only `job_code`) and force the
    /// next generation pass to run. Returns the number of rows deleted.
    pub fn flush(&self, job_code: Option<&str>, now: DateTime<Utc>) -> Result<usize> {
        let mut filter = ScheduleFilter::new()
            .status(RunStatus::Pending)
            .scheduled_after(now);
        if let Some(code) = job_code.filter(|c| !c.trim().is_empty()) {
            filter = filter.job_code(code.trim());
        }
        let removed = self.store.delete_matching(&filter)?;
        self.generate_throttle.reset(self.state.as_ref())?;
        info!(removed, job_code = job_code.unwrap_or("*"), "flushed pending runs");
        Ok(removed)
    }

    /// Delete every run regardless of status and force regeneration.
    pub fn delete_all(&self) -> Result<usize> {
        let removed = self.store.delete_matching(&ScheduleFilter::new())?;
        self.generate_throttle.reset(self.state.as_ref())?;
        info!(removed, "deleted all runs");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{at, insert, pending_for};

    fn manager(jobs: &str, scheduler: &str) -> ScheduleManager {
        let config =
            CronkeeperConfig::from_toml_str(&format!("[scheduler]\n{scheduler}\n{jobs}")).unwrap();
        ScheduleManager::open(Connection::open_in_memory().unwrap(), &config).unwrap()
    }

    const TWO_JOBS: &str = r#"
        [[jobs]]
        code = "x"
        schedule = "* * * * *"

        [[jobs]]
        code = "y"
        schedule = "* * * * *"
    "#;

    #[test]
    fn flush_one_job_and_regenerate_immediately() {
        let m = manager(TWO_JOBS, "schedule_ahead_for = 10\nschedule_generate_every = 60");
        let now = at(12, 0);
        let overdue_x = insert(m.store(), "x", RunStatus::Pending, at(11, 59), None);

        m.generate(now).unwrap();
        assert_eq!(pending_for(m.store(), "x").len(), 10);
        assert!(m.generate(now).unwrap().skipped);

        let removed = m.flush(Some("x"), now).unwrap();
        assert_eq!(removed, 9);
        let left: Vec<_> = pending_for(m.store(), "x").iter().map(|r| r.id).collect();
        assert_eq!(left, vec![overdue_x.id]);
        assert_eq!(pending_for(m.store(), "y").len(), 9);

        let report = m.generate(now).unwrap();
        assert!(!report.skipped);
        assert_eq!(report.created, 9);
    }

    #[test]
    fn flush_everything_without_code() {
        let m = manager(TWO_JOBS, "schedule_ahead_for = 5");
        m.generate(at(12, 0)).unwrap();
        assert_eq!(m.flush(None, at(12, 0)).unwrap(), 8);
        assert!(pending_for(m.store(), "x").is_empty());
        assert!(pending_for(m.store(), "y").is_empty());
    }

    #[test]
    fn delete_all_wipes_every_status() {
        let m = manager(TWO_JOBS, "schedule_ahead_for = 5");
        m.generate(at(12, 0)).unwrap();
        insert(m.store(), "x", RunStatus::Success, at(11, 0), Some(at(11, 1)));
        insert(m.store(), "x", RunStatus::Running, at(11, 0), None);

        assert_eq!(m.delete_all().unwrap(), 10);
        assert!(m.store().list(&ScheduleFilter::new()).unwrap().is_empty());
        assert!(!m.generate(at(12, 0)).unwrap().skipped);
    }

    #[test]
    fn tick_runs_every_stage_and_logs_invocation() {
        let m = manager(
            TWO_JOBS,
            "schedule_ahead_for = 3\nmax_successful_history = 1",
        );
        insert(m.store(), "x", RunStatus::Pending, at(11, 50), None);
        insert(m.store(), "x", RunStatus::Pending, at(11, 55), None);
        insert(m.store(), "y", RunStatus::Success, at(11, 0), Some(at(11, 1)));
        insert(m.store(), "y", RunStatus::Success, at(11, 0), Some(at(11, 2)));

        let report = m.tick(at(12, 0)).unwrap();
        assert_eq!(report.generate.created, 4);
        assert_eq!(report.sweep.skipped, 1);
        assert_eq!(report.cleanup.over_cap, 1);

        m.tick(at(12, 1)).unwrap();
        assert_eq!(
            m.measure_interval().unwrap(),
            Cadence::Insufficient { samples: 2 }
        );
        m.tick(at(12, 2)).unwrap();
        assert!(matches!(m.measure_interval().unwrap(), Cadence::Measured(_)));
    }

    #[test]
    fn invalid_retention_override_fails_construction() {
        let config = CronkeeperConfig::from_toml_str(
            "[scheduler.retention_overrides]\nrunning = 5",
        )
        .unwrap();
        assert!(ScheduleManager::open(Connection::open_in_memory().unwrap(), &config).is_err());
    }
}
