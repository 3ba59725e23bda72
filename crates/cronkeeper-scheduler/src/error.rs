use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
///
/// A lost conditional transition is not an error; see
/// [`crate::store::ScheduleStore::try_transition`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Persisted state could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored timestamp is not in the expected format.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A status name that is not part of the run state machine.
    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    /// A reason tag that is not recognised.
    #[error("Unknown schedule reason: {0}")]
    UnknownReason(String),

    /// Scheduler settings that cannot be applied.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another thread panicked while holding a store lock.
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    /// The job source could not produce its definitions.
    #[error("Job source error: {0}")]
    JobSource(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
