//! `cronkeeper-core`: configuration and shared error types.

pub mod config;
pub mod error;

pub use config::{CronkeeperConfig, DatabaseConfig, JobConfig, SchedulerConfig};
pub use error::{CoreError, Result};
