use std::collections::HashSet;

use tracing::debug;

use crate::{
    error::Result,
    store::{ScheduleFilter, ScheduleOrder, ScheduleStore},
    types::RunStatus,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// `(job_code, scheduled_at)` pairs that had more than one pending row.
    pub groups: usize,
    pub removed: usize,
}

/// Collapses pending runs that share a `(job_code, scheduled_at)` pair down
/// to the earliest-created one.
#[derive(Clone)]
pub struct DuplicatePurger {
    store: ScheduleStore,
}

impl DuplicatePurger {
    pub fn new(store: ScheduleStore) -> Self {
        Self { store }
    }

    pub fn purge(&self) -> Result<PurgeReport> {
        let report = self.store.with_transaction(|table| {
            let pending = table.list(
                &ScheduleFilter::new()
                    .status(RunStatus::Pending)
                    .order(ScheduleOrder::CreatedAsc),
            )?;

            let mut seen = HashSet::new();
            let mut duplicated = HashSet::new();
            let mut removed = 0;
            for run in pending {
                let key = (run.job_code, run.scheduled_at);
                if seen.contains(&key) {
                    // Someone may have claimed it since the listing.
                    if table.try_delete(run.id, RunStatus::Pending)? {
                        removed += 1;
                    }
                    duplicated.insert(key);
                } else {
                    seen.insert(key);
                }
            }
            Ok(PurgeReport {
                groups: duplicated.len(),
                removed,
            })
        })?;

        if report.removed > 0 {
            debug!(
                groups = report.groups,
                removed = report.removed,
                "purged duplicate pending runs"
            );
        }
        Ok(report)
    }
}
