//! Configuration for the achievement ledger
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::LedgerError;

/// Achievement ledger - consistency tooling for student achievements
#[derive(Parser, Debug, Clone)]
#[command(name = "achievement-ledger")]
#[command(about = "Audit and repair achievement/reference consistency")]
pub struct Args {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "achievements")]
    pub mongodb_db: String,

    /// SQLite database holding users, students and lecturers
    #[arg(long, env = "IDENTITY_DB", default_value = "identity.db")]
    pub identity_db: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Deadline for each individual store call in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "5000")]
    pub store_timeout_ms: u64,

    /// Creation-time window used by repair to match dangling references
    #[arg(long, env = "REPAIR_WINDOW_SECS", default_value = "10")]
    pub repair_window_secs: u64,

    /// Creation-time window used when resolving a reference by achievement
    #[arg(long, env = "RESOLVE_WINDOW_SECS", default_value = "5")]
    pub resolve_window_secs: u64,

    /// Where lifecycle notifications are delivered
    #[arg(long, env = "NOTIFIER", value_enum, default_value = "mongo")]
    pub notifier: NotifierKind,

    #[command(subcommand)]
    pub command: Command,
}

/// Notification sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NotifierKind {
    /// Persist to the notifications collection
    Mongo,
    /// Log only, no collection is opened
    Log,
}

/// Operator commands
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List inconsistencies for a student without changing anything
    Audit {
        /// Student user ID
        #[arg(short, long)]
        student: String,
    },

    /// Repair achievement/reference links for a student
    Repair {
        /// Student user ID
        #[arg(short, long)]
        student: String,
    },

    /// Resolve the reference that tracks an achievement
    Resolve {
        /// Achievement ID (hex)
        #[arg(short, long)]
        achievement: String,
    },

    /// List submitted references waiting for a lecturer
    Pending {
        /// Lecturer user ID
        #[arg(short, long)]
        lecturer: String,
    },

    /// Create the identity tables if they are missing
    InitIdentity,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.store_timeout_ms == 0 {
            return Err(LedgerError::Config(
                "STORE_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        if self.repair_window_secs == 0 || self.resolve_window_secs == 0 {
            return Err(LedgerError::Config(
                "matching windows must be greater than zero".to_string(),
            ));
        }

        if self.resolve_window_secs > self.repair_window_secs {
            return Err(LedgerError::Config(
                "RESOLVE_WINDOW_SECS must not exceed REPAIR_WINDOW_SECS".to_string(),
            ));
        }

        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            match_window: Duration::from_secs(self.repair_window_secs),
            resolve_window: Duration::from_secs(self.resolve_window_secs),
        }
    }
}

/// Tunables shared by the lifecycle and repair engines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deadline for each store call
    pub store_timeout: Duration,
    /// Window for matching a dangling reference to an achievement during repair
    pub match_window: Duration,
    /// Window for the fallback match in reference resolution
    pub resolve_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            match_window: Duration::from_secs(10),
            resolve_window: Duration::from_secs(5),
        }
    }
}
