use crate::{
    error::Result,
    store::{ScheduleFilter, ScheduleStore},
    types::RunStatus,
};

/// Answers "is job X executing right now?".
pub trait ProcessRegistry: Send + Sync {
    fn is_running(&self, job_code: &str) -> Result<bool>;
}

/// Treats any RUNNING row for the job code as a live execution.
///
/// Runners that crash without finishing their row keep the job "running"
/// until someone moves the row to a terminal status.
#[derive(Clone)]
pub struct StoreProcessRegistry {
    store: ScheduleStore,
}

impl StoreProcessRegistry {
    pub fn new(store: ScheduleStore) -> Self {
        Self { store }
    }
}

impl ProcessRegistry for StoreProcessRegistry {
    fn is_running(&self, job_code: &str) -> Result<bool> {
        let running = self.store.list(
            &ScheduleFilter::new()
                .status(RunStatus::Running)
                .job_code(job_code)
                .limit(1),
        )?;
        Ok(!running.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewRun, ScheduleReason};
    use chrono::Utc;
    use rusqlite::Connection;

    #[test]
    fn running_row_marks_job_busy() {
        let store = ScheduleStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let registry = StoreProcessRegistry::new(store.clone());
        let now = Utc::now();

        let run = store
            .insert(&NewRun::pending("sync", now, now, ScheduleReason::Generated))
            .unwrap();
        assert!(!registry.is_running("sync").unwrap());

        store.try_claim(run.id, now).unwrap();
        assert!(registry.is_running("sync").unwrap());
        assert!(!registry.is_running("other").unwrap());

        store
            .try_finish(run.id, RunStatus::Success, now, None)
            .unwrap();
        assert!(!registry.is_running("sync").unwrap());
    }
}
