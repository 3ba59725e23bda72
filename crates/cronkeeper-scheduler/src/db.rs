use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::{Result, SchedulerError};

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `cron_schedule` run table and the `scheduler_state` key/value
/// table (both idempotent). Timestamps are stored as fixed-width UTC RFC 3339
/// text so string comparison in SQL matches chronological order.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cron_schedule (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            job_code      TEXT    NOT NULL,
            status        TEXT    NOT NULL DEFAULT 'pending',
            messages      TEXT,
            reason        TEXT    NOT NULL,
            scheduled_at  TEXT    NOT NULL,
            created_at    TEXT    NOT NULL,
            executed_at   TEXT,
            finished_at   TEXT
        );

        -- Overdue sweep and generation both filter on status + scheduled_at.
        CREATE INDEX IF NOT EXISTS idx_cron_schedule_status_scheduled
            ON cron_schedule (status, scheduled_at);
        CREATE INDEX IF NOT EXISTS idx_cron_schedule_job_code
            ON cron_schedule (job_code, status);

        CREATE TABLE IF NOT EXISTS scheduler_state (
            key         TEXT NOT NULL PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// Format a timestamp the way every column in this schema stores it.
pub(crate) fn to_db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Exclusive upper bound for `column < ?` comparisons against `at`.
///
/// Stored values have whole-second precision, so a fractional `at` is rounded
/// up to the next second; truncating it would drop rows from `[floor(at), at)`.
pub(crate) fn to_db_upper_bound(at: DateTime<Utc>) -> String {
    if at.timestamp_subsec_nanos() == 0 {
        return to_db_time(at);
    }
    let ceil = DateTime::from_timestamp(at.timestamp().saturating_add(1), 0).unwrap_or(at);
    to_db_time(ceil)
}

pub(crate) fn from_db_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SchedulerError::InvalidTimestamp(format!("{raw}: {e}")))
}
