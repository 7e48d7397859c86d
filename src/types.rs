//! Shared error type for the achievement ledger
//!
//! Every engine operation returns a classified failure so callers (HTTP
//! handlers, the CLI) can map it onto their own status codes.

use thiserror::Error;

/// Failure taxonomy for lifecycle, repair and adapter calls
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Identity, achievement or reference absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Illegal state transition attempted
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Ownership or advisor-relationship check failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed input
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Underlying adapter call failed or timed out
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A dangling pointer could not be resolved unambiguously
    #[error("Inconsistent: {0}")]
    Inconsistent(String),

    /// Startup configuration problem
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Short machine-readable name, used in logs and CLI output
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "not_found",
            LedgerError::InvalidState(_) => "invalid_state",
            LedgerError::Unauthorized(_) => "unauthorized",
            LedgerError::ValidationFailed(_) => "validation_failed",
            LedgerError::StoreUnavailable(_) => "store_unavailable",
            LedgerError::Inconsistent(_) => "inconsistent",
            LedgerError::Config(_) => "config",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound(_))
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::StoreUnavailable(format!("SQLite: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
