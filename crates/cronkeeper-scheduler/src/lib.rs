//! `cronkeeper-scheduler`: recurring-job schedule maintenance on SQLite.
//!
//! # Overview
//!
//! Every planned execution of a job is a row in the `cron_schedule` table.
//! A [`ScheduleManager::tick`] keeps that table healthy: it materialises
//! pending runs for the lookahead window, retires overdue pile-ups and
//! prunes old history. Status changes are conditional updates, so several
//! schedulers and workers can share one database file.
//!
//! # Components
//!
//! | Component              | Responsibility                                           |
//! |------------------------|----------------------------------------------------------|
//! | [`ScheduleGenerator`]  | Pending rows for each matching minute ahead, throttled   |
//! | [`DuplicatePurger`]    | One pending row per (job, minute), earliest created wins |
//! | [`RaceResolver`]       | Newest overdue run per job stays, older ones are skipped |
//! | [`HistoryRetainer`]    | Age-based deletion per status, count cap on successes    |
//! | [`CadenceMonitor`]     | Ring of invocation times and the gaps between them       |
//! | [`Activator`]          | RUNNING rows for "always" jobs that are idle             |
//! | [`TickEngine`]         | Tokio loop calling `tick` until shutdown                 |

pub mod activator;
pub mod cadence;
pub mod db;
pub mod engine;
pub mod error;
pub mod expression;
pub mod generator;
pub mod manager;
pub mod purge;
pub mod registry;
pub mod resolver;
pub mod retention;
pub mod source;
pub mod state;
pub mod store;
pub mod types;

#[cfg(test)]
mod testutil;

pub use activator::{Activation, Activator};
pub use cadence::{Cadence, CadenceMonitor, CadenceStats};
pub use engine::TickEngine;
pub use error::{Result, SchedulerError};
pub use expression::{CronMatcher, ExpressionMatcher};
pub use generator::{GenerateReport, ScheduleGenerator};
pub use manager::{Collaborators, ScheduleManager, TickReport};
pub use purge::{DuplicatePurger, PurgeReport};
pub use registry::{ProcessRegistry, StoreProcessRegistry};
pub use resolver::{RaceResolver, SweepReport};
pub use retention::{CleanupReport, HistoryRetainer, RetentionPolicy};
pub use source::{JobSource, StaticJobSource};
pub use state::{MemoryStateStore, SqliteStateStore, StateStore};
pub use store::{ScheduleFilter, ScheduleOrder, ScheduleStore};
pub use types::{JobDefinition, NewRun, RunInstance, RunStatus, ScheduleReason};
