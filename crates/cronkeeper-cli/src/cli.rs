//! Command-line definitions for the `cronkeeper` binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cronkeeper")]
#[command(about = "Keeps a recurring-job schedule table generated, deduplicated and pruned")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file (defaults to CRONKEEPER_CONFIG, then ~/.cronkeeper/cronkeeper.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run one full maintenance tick: generate, sweep, cleanup
    Tick,

    /// Tick on a fixed interval until Ctrl-C
    Daemon {
        /// Seconds between ticks (overrides scheduler.tick_interval_secs)
        #[arg(long)]
        every: Option<u64>,
    },

    /// Generate pending runs for the lookahead window (throttled)
    Generate,

    /// Retire overdue piled-up runs
    Sweep {
        /// Also skip overdue runs of jobs that are currently running
        #[arg(long)]
        busy: bool,
    },

    /// Delete expired history (throttled)
    Cleanup,

    /// Delete future pending runs and force regeneration
    Flush {
        /// Only flush this job code
        #[arg(long)]
        job: Option<String>,
    },

    /// Delete every run of every job
    DeleteAll {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Start an "always" job unless it is already running
    Activate {
        /// Job code
        code: String,

        /// Recorded schedule reason (generated, always_triggered, manual)
        #[arg(long)]
        reason: Option<String>,
    },

    /// Show how regularly the scheduler has been invoked
    Cadence,

    /// List runs
    List {
        /// Filter by status (e.g. pending, error, skip_piling_up)
        #[arg(long)]
        status: Option<String>,

        /// Filter by job code
        #[arg(long)]
        job: Option<String>,

        /// Maximum number of rows
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// List overdue pending runs in execution order
    Pending {
        /// Only these job codes (comma separated)
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Never these job codes (comma separated)
        #[arg(long, value_delimiter = ',')]
        except: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_pending_lists() {
        let cli = Cli::parse_from([
            "cronkeeper",
            "pending",
            "--only",
            "a,b",
            "--except",
            "c",
        ]);
        match cli.command {
            Commands::Pending { only, except } => {
                assert_eq!(only, vec!["a", "b"]);
                assert_eq!(except, vec!["c"]);
            }
            _ => panic!("expected pending"),
        }
    }

    #[test]
    fn global_config_after_subcommand() {
        let cli = Cli::parse_from(["cronkeeper", "flush", "--job", "x", "-c", "/tmp/c.toml"]);
        assert_eq!(cli.config.as_deref(), Some("/tmp/c.toml"));
        assert!(matches!(cli.command, Commands::Flush { job: Some(ref j) } if j == "x"));
    }
}
