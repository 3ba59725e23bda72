use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCHEDULE_AHEAD_FOR: u64 = 20; // minutes of lookahead
pub const DEFAULT_SCHEDULE_GENERATE_EVERY: u64 = 15;
pub const DEFAULT_HISTORY_CLEANUP_EVERY: u64 = 10;
pub const DEFAULT_HISTORY_SUCCESS_LIFETIME: u64 = 60;
pub const DEFAULT_HISTORY_FAILURE_LIFETIME: u64 = 600;
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;

/// Top-level config (cronkeeper.toml + CRONKEEPER_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronkeeperConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Job definitions served to the generator and activator.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduling and history knobs. All durations are in minutes unless the
/// field name says otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How far ahead pending runs are generated.
    #[serde(default = "default_schedule_ahead_for")]
    pub schedule_ahead_for: u64,
    /// Minimum gap between two generation passes.
    #[serde(default = "default_schedule_generate_every")]
    pub schedule_generate_every: u64,
    /// Minimum gap between two history cleanup passes.
    #[serde(default = "default_history_cleanup_every")]
    pub history_cleanup_every: u64,
    /// Retention for success-like terminal statuses.
    #[serde(default = "default_history_success_lifetime")]
    pub history_success_lifetime: u64,
    /// Retention for failure-like terminal statuses.
    #[serde(default = "default_history_failure_lifetime")]
    pub history_failure_lifetime: u64,
    /// Keep at most this many SUCCESS/REPEAT rows per job code. 0 disables the cap.
    #[serde(default)]
    pub max_successful_history: usize,
    /// Per-status retention in minutes, keyed by status name (e.g. `error = 1440`).
    /// Replaces the success/failure default for that status only.
    #[serde(default)]
    pub retention_overrides: BTreeMap<String, u64>,
    /// Optional file that log output is appended to, in addition to stderr.
    pub log_file: Option<String>,
    /// Seconds between ticks when running as a daemon.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_ahead_for: DEFAULT_SCHEDULE_AHEAD_FOR,
            schedule_generate_every: DEFAULT_SCHEDULE_GENERATE_EVERY,
            history_cleanup_every: DEFAULT_HISTORY_CLEANUP_EVERY,
            history_success_lifetime: DEFAULT_HISTORY_SUCCESS_LIFETIME,
            history_failure_lifetime: DEFAULT_HISTORY_FAILURE_LIFETIME,
            max_successful_history: 0,
            retention_overrides: BTreeMap::new(),
            log_file: None,
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
        }
    }
}

/// A recurring job as declared in `[[jobs]]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobConfig {
    pub code: String,
    /// Cron expression. Jobs without one are never generated.
    pub schedule: Option<String>,
    #[serde(default = "bool_true")]
    pub active: bool,
    /// "Always" jobs skip expression matching and are only started on demand.
    #[serde(default)]
    pub always: bool,
}

fn bool_true() -> bool {
    true
}
fn default_schedule_ahead_for() -> u64 {
    DEFAULT_SCHEDULE_AHEAD_FOR
}
fn default_schedule_generate_every() -> u64 {
    DEFAULT_SCHEDULE_GENERATE_EVERY
}
fn default_history_cleanup_every() -> u64 {
    DEFAULT_HISTORY_CLEANUP_EVERY
}
fn default_history_success_lifetime() -> u64 {
    DEFAULT_HISTORY_SUCCESS_LIFETIME
}
fn default_history_failure_lifetime() -> u64 {
    DEFAULT_HISTORY_FAILURE_LIFETIME
}
fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronkeeper/cronkeeper.db", home)
}

impl CronkeeperConfig {
    /// Load config from a TOML file with CRONKEEPER_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CRONKEEPER_SCHEDULER__SCHEDULE_AHEAD_FOR=30`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CRONKEEPER_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }

    /// Parse config from an in-memory TOML document (no env overrides).
    pub fn from_toml_str(toml: &str) -> crate::error::Result<Self> {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronkeeper/cronkeeper.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = CronkeeperConfig::from_toml_str("").unwrap();
        assert_eq!(config.scheduler.schedule_ahead_for, 20);
        assert_eq!(config.scheduler.schedule_generate_every, 15);
        assert_eq!(config.scheduler.history_cleanup_every, 10);
        assert_eq!(config.scheduler.max_successful_history, 0);
        assert!(config.scheduler.log_file.is_none());
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn jobs_and_overrides_parse() {
        let config = CronkeeperConfig::from_toml_str(
            r#"
            [scheduler]
            schedule_ahead_for = 60
            max_successful_history = 3
            log_file = "/tmp/cron.log"

            [scheduler.retention_overrides]
            error = 1440

            [[jobs]]
            code = "reindex"
            schedule = "*/5 * * * *"

            [[jobs]]
            code = "queue_consumer"
            always = true
            active = false
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.schedule_ahead_for, 60);
        assert_eq!(config.scheduler.max_successful_history, 3);
        assert_eq!(config.scheduler.retention_overrides.get("error"), Some(&1440));
        assert_eq!(config.jobs.len(), 2);
        assert!(config.jobs[0].active);
        assert!(!config.jobs[0].always);
        assert_eq!(config.jobs[0].schedule.as_deref(), Some("*/5 * * * *"));
        assert!(config.jobs[1].always);
        assert!(!config.jobs[1].active);
        assert!(config.jobs[1].schedule.is_none());
    }

    #[test]
    fn malformed_document_is_config_error() {
        let err = CronkeeperConfig::from_toml_str("[scheduler]\nschedule_ahead_for = \"soon\"")
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
