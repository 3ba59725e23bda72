use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::manager::ScheduleManager;

/// Drives [`ScheduleManager::tick`] on a fixed interval, standing in for an
/// external cron invocation.
pub struct TickEngine {
    manager: Arc<ScheduleManager>,
    every: Duration,
}

impl TickEngine {
    pub fn new(manager: Arc<ScheduleManager>, every_secs: u64) -> Self {
        Self {
            manager,
            every: Duration::from_secs(every_secs.max(1)),
        }
    }

    pub fn with_interval(manager: Arc<ScheduleManager>, every: Duration) -> Self {
        Self {
            manager,
            every: every.max(Duration::from_millis(1)),
        }
    }

    /// Main loop. Ticks immediately, then every interval, until `shutdown`
    /// broadcasts `true`. Tick errors are logged and the loop keeps going.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(every_secs = self.every.as_secs_f64(), "tick engine started");

        let mut interval = tokio::time::interval(self.every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.manager.tick(Utc::now()) {
                        Ok(report) => debug!(?report, "tick complete"),
                        Err(e) => error!("scheduler tick error: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("tick engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}
