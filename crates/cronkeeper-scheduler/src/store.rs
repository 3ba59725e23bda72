use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, types::Value, Connection, OptionalExtension};
use tracing::debug;

use crate::{
    db::{from_db_time, init_db, to_db_time, to_db_upper_bound},
    error::{Result, SchedulerError},
    types::{NewRun, RunInstance, RunStatus},
};

const SELECT_COLUMNS: &str = "SELECT id, job_code, status, messages, reason, scheduled_at,
        created_at, executed_at, finished_at
     FROM cron_schedule";

/// Sort order for [`ScheduleFilter`] listings. Ties are always broken by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleOrder {
    #[default]
    Id,
    ScheduledAsc,
    ScheduledDesc,
    CreatedAsc,
    FinishedDesc,
}

impl ScheduleOrder {
    fn sql(self) -> &'static str {
        match self {
            ScheduleOrder::Id => "id ASC",
            ScheduleOrder::ScheduledAsc => "scheduled_at ASC, id ASC",
            ScheduleOrder::ScheduledDesc => "scheduled_at DESC, id DESC",
            ScheduleOrder::CreatedAsc => "created_at ASC, id ASC",
            ScheduleOrder::FinishedDesc => "finished_at DESC, id DESC",
        }
    }
}

/// Filter for listing and bulk-deleting run instances.
///
/// Empty lists mean "no constraint". Time bounds are strict.
#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    pub statuses: Vec<RunStatus>,
    pub exclude_statuses: Vec<RunStatus>,
    pub scheduled_before: Option<DateTime<Utc>>,
    pub scheduled_after: Option<DateTime<Utc>>,
    pub job_codes: Vec<String>,
    pub exclude_job_codes: Vec<String>,
    pub order: ScheduleOrder,
    pub limit: Option<usize>,
}

impl ScheduleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn statuses(mut self, statuses: impl IntoIterator<Item = RunStatus>) -> Self {
        self.statuses.extend(statuses);
        self
    }

    pub fn exclude_statuses(mut self, statuses: impl IntoIterator<Item = RunStatus>) -> Self {
        self.exclude_statuses.extend(statuses);
        self
    }

    pub fn scheduled_before(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_before = Some(at);
        self
    }

    pub fn scheduled_after(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_after = Some(at);
        self
    }

    pub fn job_code(mut self, code: impl Into<String>) -> Self {
        self.job_codes.push(code.into());
        self
    }

    pub fn job_codes<S: Into<String>>(mut self, codes: impl IntoIterator<Item = S>) -> Self {
        self.job_codes.extend(codes.into_iter().map(Into::into));
        self
    }

    pub fn exclude_job_codes<S: Into<String>>(mut self, codes: impl IntoIterator<Item = S>) -> Self {
        self.exclude_job_codes
            .extend(codes.into_iter().map(Into::into));
        self
    }

    pub fn order(mut self, order: ScheduleOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Render the WHERE clause (possibly empty) and its positional values.
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        let mut push_in = |column: &str, negate: bool, items: Vec<String>| {
            if items.is_empty() {
                return;
            }
            let marks = vec!["?"; items.len()].join(", ");
            let op = if negate { "NOT IN" } else { "IN" };
            clauses.push(format!("{column} {op} ({marks})"));
            values.extend(items.into_iter().map(Value::Text));
        };

        let names = |s: &[RunStatus]| -> Vec<String> {
            s.iter().map(|st| st.as_str().to_string()).collect()
        };
        push_in("status", false, names(&self.statuses));
        push_in("status", true, names(&self.exclude_statuses));
        push_in("job_code", false, self.job_codes.clone());
        push_in("job_code", true, self.exclude_job_codes.clone());

        if let Some(before) = self.scheduled_before {
            clauses.push("scheduled_at < ?".to_string());
            values.push(Value::Text(to_db_upper_bound(before)));
        }
        if let Some(after) = self.scheduled_after {
            clauses.push("scheduled_at > ?".to_string());
            values.push(Value::Text(to_db_time(after)));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

/// Run-instance operations bound to one connection or open transaction.
pub struct RunTable<'c> {
    conn: &'c Connection,
}

impl<'c> RunTable<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn list(&self, filter: &ScheduleFilter) -> Result<Vec<RunInstance>> {
        let (where_sql, values) = filter.where_clause();
        let mut sql = format!("{SELECT_COLUMNS}{where_sql} ORDER BY {}", filter.order.sql());
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let raw: Vec<RawRun> = stmt
            .query_map(rusqlite::params_from_iter(values), RawRun::from_row)?
            .collect::<rusqlite::Result<_>>()?;
        raw.into_iter().map(RawRun::into_run).collect()
    }

    pub fn get(&self, id: i64) -> Result<Option<RunInstance>> {
        let raw = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                [id],
                RawRun::from_row,
            )
            .optional()?;
        raw.map(RawRun::into_run).transpose()
    }

    pub fn insert(&self, run: &NewRun) -> Result<RunInstance> {
        self.conn.execute(
            "INSERT INTO cron_schedule
             (job_code, status, messages, reason, scheduled_at, created_at,
              executed_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.job_code,
                run.status.as_str(),
                run.messages,
                run.reason.as_str(),
                to_db_time(run.scheduled_at),
                to_db_time(run.created_at),
                run.executed_at.map(to_db_time),
                run.finished_at.map(to_db_time),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get(id)?
            .ok_or(SchedulerError::Database(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Compare-and-swap on `status`: the row moves to `to` only if its stored
    /// status is still `from`. Returns `false` when another writer got there
    /// first (or the row is gone).
    pub fn try_transition(
        &self,
        id: i64,
        from: RunStatus,
        to: RunStatus,
        messages: Option<&str>,
    ) -> Result<bool> {
        self.conditional_update(id, from, to, messages, None, None)
    }

    /// PENDING → RUNNING, stamping `executed_at`.
    pub fn try_claim(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        self.conditional_update(id, RunStatus::Pending, RunStatus::Running, None, Some(now), None)
    }

    /// RUNNING → a terminal status, stamping `finished_at`.
    pub fn try_finish(
        &self,
        id: i64,
        to: RunStatus,
        now: DateTime<Utc>,
        messages: Option<&str>,
    ) -> Result<bool> {
        self.conditional_update(id, RunStatus::Running, to, messages, None, Some(now))
    }

    fn conditional_update(
        &self,
        id: i64,
        from: RunStatus,
        to: RunStatus,
        messages: Option<&str>,
        executed_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        // Single statement: the WHERE on status is the whole concurrency guard.
        let n = self.conn.execute(
            "UPDATE cron_schedule
             SET status = ?1,
                 messages = COALESCE(?2, messages),
                 executed_at = COALESCE(?3, executed_at),
                 finished_at = COALESCE(?4, finished_at)
             WHERE id = ?5 AND status = ?6",
            params![
                to.as_str(),
                messages,
                executed_at.map(to_db_time),
                finished_at.map(to_db_time),
                id,
                from.as_str(),
            ],
        )?;
        if n == 0 {
            debug!(run_id = id, %from, %to, "conditional transition lost");
        }
        Ok(n == 1)
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM cron_schedule WHERE id = ?1", [id])?;
        Ok(n == 1)
    }

    /// Delete the row only if its stored status is still `expected`.
    pub fn try_delete(&self, id: i64, expected: RunStatus) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM cron_schedule WHERE id = ?1 AND status = ?2",
            params![id, expected.as_str()],
        )?;
        Ok(n == 1)
    }

    /// Delete every row matching `filter`. Ordering and limit are ignored.
    pub fn delete_matching(&self, filter: &ScheduleFilter) -> Result<usize> {
        let (where_sql, values) = filter.where_clause();
        let n = self.conn.execute(
            &format!("DELETE FROM cron_schedule{where_sql}"),
            rusqlite::params_from_iter(values),
        )?;
        Ok(n)
    }

    /// Delete terminal rows of `status` whose reference time (finished, else
    /// executed, else created) is strictly before `cutoff`.
    pub fn delete_finished_before(&self, status: RunStatus, cutoff: DateTime<Utc>) -> Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM cron_schedule
             WHERE status = ?1
               AND COALESCE(finished_at, executed_at, created_at) < ?2",
            params![status.as_str(), to_db_upper_bound(cutoff)],
        )?;
        Ok(n)
    }

    /// Latest scheduled time across all rows, if any.
    pub fn newest_scheduled_at(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> =
            self.conn
                .query_row("SELECT MAX(scheduled_at) FROM cron_schedule", [], |row| {
                    row.get(0)
                })?;
        raw.as_deref().map(from_db_time).transpose()
    }
}

/// Shared, thread-safe handle to the run-instance table.
///
/// Cloning is cheap; clones share one connection. Separate processes (or
/// separately opened connections) coordinate only through conditional
/// transitions.
#[derive(Clone)]
pub struct ScheduleStore {
    conn: Arc<Mutex<Connection>>,
}

impl ScheduleStore {
    /// Wrap `conn`, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn shared_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Run `f` against the table without a transaction.
    pub fn with_table<T>(&self, f: impl FnOnce(&RunTable<'_>) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SchedulerError::LockPoisoned("schedule store"))?;
        f(&RunTable::new(&conn))
    }

    /// Run `f` inside `BEGIN IMMEDIATE … COMMIT`. Any error rolls back.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&RunTable<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| SchedulerError::LockPoisoned("schedule store"))?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let out = f(&RunTable::new(&tx))?;
        tx.commit()?;
        Ok(out)
    }

    pub fn list(&self, filter: &ScheduleFilter) -> Result<Vec<RunInstance>> {
        self.with_table(|t| t.list(filter))
    }

    pub fn get(&self, id: i64) -> Result<Option<RunInstance>> {
        self.with_table(|t| t.get(id))
    }

    pub fn insert(&self, run: &NewRun) -> Result<RunInstance> {
        self.with_table(|t| t.insert(run))
    }

    pub fn try_transition(
        &self,
        id: i64,
        from: RunStatus,
        to: RunStatus,
        messages: Option<&str>,
    ) -> Result<bool> {
        self.with_table(|t| t.try_transition(id, from, to, messages))
    }

    pub fn try_claim(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        self.with_table(|t| t.try_claim(id, now))
    }

    pub fn try_finish(
        &self,
        id: i64,
        to: RunStatus,
        now: DateTime<Utc>,
        messages: Option<&str>,
    ) -> Result<bool> {
        self.with_table(|t| t.try_finish(id, to, now, messages))
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        self.with_table(|t| t.delete(id))
    }

    pub fn delete_matching(&self, filter: &ScheduleFilter) -> Result<usize> {
        self.with_table(|t| t.delete_matching(filter))
    }

    pub fn newest_scheduled_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.with_table(|t| t.newest_scheduled_at())
    }

    /// Overdue PENDING runs in due order (oldest first), optionally limited to
    /// `only` job codes and never including `except` ones. Entries are trimmed
    /// and blanks ignored.
    pub fn pending_due(
        &self,
        now: DateTime<Utc>,
        only: &[String],
        except: &[String],
    ) -> Result<Vec<RunInstance>> {
        let clean = |codes: &[String]| -> Vec<String> {
            codes
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect()
        };
        let filter = ScheduleFilter::new()
            .status(RunStatus::Pending)
            .scheduled_before(now)
            .job_codes(clean(only))
            .exclude_job_codes(clean(except))
            .order(ScheduleOrder::ScheduledAsc);
        self.list(&filter)
    }
}

/// Column tuple as read from SQLite, before parsing.
struct RawRun {
    id: i64,
    job_code: String,
    status: String,
    messages: Option<String>,
    reason: String,
    scheduled_at: String,
    created_at: String,
    executed_at: Option<String>,
    finished_at: Option<String>,
}

impl RawRun {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_code: row.get(1)?,
            status: row.get(2)?,
            messages: row.get(3)?,
            reason: row.get(4)?,
            scheduled_at: row.get(5)?,
            created_at: row.get(6)?,
            executed_at: row.get(7)?,
            finished_at: row.get(8)?,
        })
    }

    fn into_run(self) -> Result<RunInstance> {
        Ok(RunInstance {
            id: self.id,
            job_code: self.job_code,
            status: self.status.parse()?,
            scheduled_at: from_db_time(&self.scheduled_at)?,
            created_at: from_db_time(&self.created_at)?,
            executed_at: self.executed_at.as_deref().map(from_db_time).transpose()?,
            finished_at: self.finished_at.as_deref().map(from_db_time).transpose()?,
            messages: self.messages,
            reason: self.reason.parse()?,
        })
    }
}
