//! Reference status state machine
//!
//! ```text
//! draft ──> submitted ──> verified
//!   │                └──> rejected
//!   └──> deleted
//! ```
//!
//! `verified`, `rejected` and `deleted` are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::LedgerError;

/// Workflow status carried by an achievement reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AchievementStatus {
    /// Created by the student, still editable
    #[default]
    Draft,
    /// Waiting for the advisor's decision
    Submitted,
    /// Accepted by the advisor
    Verified,
    /// Turned down by the advisor with a note
    Rejected,
    /// Withdrawn by the student while in draft
    Deleted,
}

impl AchievementStatus {
    pub const ALL: [AchievementStatus; 5] = [
        AchievementStatus::Draft,
        AchievementStatus::Submitted,
        AchievementStatus::Verified,
        AchievementStatus::Rejected,
        AchievementStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementStatus::Draft => "draft",
            AchievementStatus::Submitted => "submitted",
            AchievementStatus::Verified => "verified",
            AchievementStatus::Rejected => "rejected",
            AchievementStatus::Deleted => "deleted",
        }
    }

    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(&self, next: AchievementStatus) -> bool {
        use AchievementStatus::*;
        matches!(
            (self, next),
            (Draft, Submitted) | (Draft, Deleted) | (Submitted, Verified) | (Submitted, Rejected)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AchievementStatus::Verified | AchievementStatus::Rejected | AchievementStatus::Deleted
        )
    }

    /// Check a transition, producing an `InvalidState` error for illegal edges
    pub fn transition_to(&self, next: AchievementStatus) -> Result<AchievementStatus, LedgerError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LedgerError::InvalidState(format!(
                "cannot move from '{}' to '{}'",
                self, next
            )))
        }
    }
}

impl fmt::Display for AchievementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AchievementStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(AchievementStatus::Draft),
            "submitted" => Ok(AchievementStatus::Submitted),
            "verified" => Ok(AchievementStatus::Verified),
            "rejected" => Ok(AchievementStatus::Rejected),
            "deleted" => Ok(AchievementStatus::Deleted),
            other => Err(LedgerError::ValidationFailed(format!(
                "unknown status '{}'",
                other
            ))),
        }
    }
}

/// String-level transition check used at the system boundary.
/// Unknown status names are never valid.
pub fn validate_transition(from: &str, to: &str) -> bool {
    match (from.parse::<AchievementStatus>(), to.parse::<AchievementStatus>()) {
        (Ok(from), Ok(to)) => from.can_transition_to(to),
        _ => false,
    }
}
