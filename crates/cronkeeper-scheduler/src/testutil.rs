//! Fixtures shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;

use crate::{
    error::Result,
    registry::ProcessRegistry,
    store::{ScheduleFilter, ScheduleStore},
    types::{NewRun, RunInstance, RunStatus, ScheduleReason},
};

pub fn store() -> ScheduleStore {
    ScheduleStore::new(Connection::open_in_memory().unwrap()).unwrap()
}

/// 2026-10-16 at `h:m` UTC.
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, h, m, 0).unwrap()
}

pub fn insert(
    store: &ScheduleStore,
    code: &str,
    status: RunStatus,
    scheduled_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
) -> RunInstance {
    let mut run = NewRun::pending(code, scheduled_at, scheduled_at, ScheduleReason::Generated);
    run.status = status;
    run.finished_at = finished_at;
    store.insert(&run).unwrap()
}

pub fn pending_for(store: &ScheduleStore, code: &str) -> Vec<RunInstance> {
    store
        .list(
            &ScheduleFilter::new()
                .status(RunStatus::Pending)
                .job_code(code),
        )
        .unwrap()
}

/// Registry whose answer is flipped by the test.
#[derive(Default)]
pub struct SwitchRegistry {
    running: AtomicBool,
}

impl SwitchRegistry {
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

impl ProcessRegistry for SwitchRegistry {
    fn is_running(&self, _job_code: &str) -> Result<bool> {
        Ok(self.running.load(Ordering::SeqCst))
    }
}
