//! Achievement Ledger - student achievement workflow
//!
//! Achievement content lives in MongoDB, the workflow ledger (status plus a
//! pointer to the achievement) in a separate references collection, and
//! identity with advisor relationships in SQLite. Nothing spans the stores
//! transactionally, so this crate keeps them consistent itself.
//!
//! ## Components
//!
//! - **Lifecycle**: create, edit, submit, verify/reject and soft-delete
//!   achievements, gated by ownership and the advisor relationship
//! - **Repair**: audit and reconcile achievement/reference pointers
//! - **Store**: MongoDB and in-memory adapters behind async traits
//! - **Identity**: SQLite and in-memory user/student/lecturer lookups
//! - **Notify**: best-effort notifications to advisors and students

pub mod config;
pub mod db;
pub mod identity;
pub mod lifecycle;
pub mod notify;
pub mod repair;
pub mod status;
pub mod store;
pub mod types;

pub use config::{Args, EngineConfig};
pub use lifecycle::{AdviseeAchievement, LifecycleEngine, VerificationDetail};
pub use repair::{FixKind, Inconsistency, RepairEngine, RepairFailure, RepairFix, RepairReport};
pub use status::{validate_transition, AchievementStatus};
pub use types::{LedgerError, Result};
