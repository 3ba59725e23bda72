use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    db::{init_db, to_db_time},
    error::{Result, SchedulerError},
    store::ScheduleStore,
};

/// Epoch seconds of the last generation pass.
pub const LAST_GENERATE_AT: &str = "last_schedule_generate_at";
/// Epoch seconds of the last history cleanup pass.
pub const LAST_CLEANUP_AT: &str = "last_history_cleanup_at";
/// JSON array of recent invocation epoch seconds.
pub const LAST_RUNS: &str = "scheduler_last_runs";

/// Scalar key/value state shared by all scheduler processes.
///
/// No TTLs and no atomicity across keys: a lost or duplicated write costs at
/// most one redundant pass.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// State kept in the `scheduler_state` table next to the runs.
#[derive(Clone)]
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Share the connection already owned by `store`.
    pub fn from_store(store: &ScheduleStore) -> Self {
        Self {
            conn: store.shared_connection(),
        }
    }
}

impl StateStore for SqliteStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SchedulerError::LockPoisoned("state store"))?;
        let value = conn
            .query_row(
                "SELECT value FROM scheduler_state WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SchedulerError::LockPoisoned("state store"))?;
        conn.execute(
            "INSERT INTO scheduler_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                            updated_at = excluded.updated_at",
            params![key, value, to_db_time(Utc::now())],
        )?;
        Ok(())
    }
}

/// In-process state, for tests and embedders without a database.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SchedulerError::LockPoisoned("memory state"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SchedulerError::LockPoisoned("memory state"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// "Run at most every N minutes" guard backed by a persisted marker.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    key: &'static str,
    every_secs: i64,
}

impl Throttle {
    pub fn new(key: &'static str, every_minutes: u64) -> Self {
        Self {
            key,
            every_secs: i64::try_from(every_minutes.saturating_mul(60)).unwrap_or(i64::MAX),
        }
    }

    /// Due once at least `every` has elapsed since the marker. A missing or
    /// unreadable marker counts as epoch 0.
    pub fn is_due(&self, state: &dyn StateStore, now: DateTime<Utc>) -> Result<bool> {
        let last = state
            .get(self.key)?
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(0);
        Ok(now.timestamp().saturating_sub(last) >= self.every_secs)
    }

    pub fn mark(&self, state: &dyn StateStore, now: DateTime<Utc>) -> Result<()> {
        state.set(self.key, &now.timestamp().to_string())
    }

    /// Reset the marker to the epoch sentinel so the next pass runs immediately.
    pub fn reset(&self, state: &dyn StateStore) -> Result<()> {
        state.set(self.key, "0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    #[test]
    fn sqlite_state_upserts() {
        let state = SqliteStateStore::new(Connection::open_in_memory().unwrap()).unwrap();
        assert_eq!(state.get("k").unwrap(), None);
        state.set("k", "1").unwrap();
        state.set("k", "2").unwrap();
        assert_eq!(state.get("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn throttle_is_due_without_marker() {
        let state = MemoryStateStore::new();
        let throttle = Throttle::new(LAST_GENERATE_AT, 15);
        assert!(throttle.is_due(&state, now()).unwrap());
    }

    #[test]
    fn throttle_waits_out_the_interval() {
        let state = MemoryStateStore::new();
        let throttle = Throttle::new(LAST_GENERATE_AT, 15);
        throttle.mark(&state, now()).unwrap();
        assert!(!throttle.is_due(&state, now()).unwrap());
        assert!(!throttle
            .is_due(&state, now() + Duration::minutes(14))
            .unwrap());
        assert!(throttle
            .is_due(&state, now() + Duration::minutes(15))
            .unwrap());
    }

    #[test]
    fn throttle_reset_forces_next_pass() {
        let state = MemoryStateStore::new();
        let throttle = Throttle::new(LAST_CLEANUP_AT, 60);
        throttle.mark(&state, now()).unwrap();
        throttle.reset(&state).unwrap();
        assert!(throttle.is_due(&state, now()).unwrap());
    }

    #[test]
    fn unreadable_marker_counts_as_never() {
        let state = MemoryStateStore::new();
        state.set(LAST_GENERATE_AT, "not-a-number").unwrap();
        let throttle = Throttle::new(LAST_GENERATE_AT, 15);
        assert!(throttle.is_due(&state, now()).unwrap());
    }
}
