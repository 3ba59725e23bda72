use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{
    error::Result,
    registry::ProcessRegistry,
    store::ScheduleStore,
    types::{truncate_to_minute, NewRun, RunInstance, RunStatus, ScheduleReason},
};

/// Outcome of [`Activator::activate_always`].
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    /// A fresh RUNNING row was written.
    Created(RunInstance),
    /// The job is already executing; nothing was written.
    AlreadyRunning,
}

impl Activation {
    pub fn created(&self) -> Option<&RunInstance> {
        match self {
            Activation::Created(run) => Some(run),
            Activation::AlreadyRunning => None,
        }
    }
}

/// Starts "always" jobs on demand, one row per activation.
pub struct Activator {
    store: ScheduleStore,
    registry: Arc<dyn ProcessRegistry>,
}

impl Activator {
    pub fn new(store: ScheduleStore, registry: Arc<dyn ProcessRegistry>) -> Self {
        Self { store, registry }
    }

    /// Create a RUNNING run for `job_code` unless the registry reports it is
    /// already executing. Earlier rows for the job are never reused.
    pub fn activate_always(
        &self,
        job_code: &str,
        reason: Option<ScheduleReason>,
        now: DateTime<Utc>,
    ) -> Result<Activation> {
        if self.registry.is_running(job_code)? {
            debug!(%job_code, "always job still running, not activating");
            return Ok(Activation::AlreadyRunning);
        }

        let minute = truncate_to_minute(now);
        let run = self.store.insert(&NewRun {
            job_code: job_code.to_string(),
            status: RunStatus::Running,
            scheduled_at: minute,
            created_at: minute,
            executed_at: None,
            finished_at: None,
            messages: None,
            reason: reason.unwrap_or(ScheduleReason::Always),
        })?;
        info!(%job_code, run_id = run.id, reason = %run.reason, "always job activated");
        Ok(Activation::Created(run))
    }
}
