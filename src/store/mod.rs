//! Achievement and reference store adapters
//!
//! The two stores share no transaction boundary. Engines hold them as
//! `Arc<dyn AchievementStore>` / `Arc<dyn ReferenceStore>` and bound every
//! call with [`bounded`].

mod memory;
mod mongo;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::db::schemas::{AchievementDoc, ReferenceDoc};
use crate::status::AchievementStatus;
use crate::types::{LedgerError, Result};

pub use memory::{FailurePoint, MemoryStore};
pub use mongo::MongoStore;

/// Achievement document store
#[async_trait]
pub trait AchievementStore: Send + Sync {
    /// Insert a new achievement and return it with its store-assigned ID
    async fn create_achievement(&self, doc: AchievementDoc) -> Result<AchievementDoc>;

    /// Fetch by hex ID, soft-deleted documents included
    async fn get_achievement_by_id(&self, id: &str) -> Result<AchievementDoc>;

    async fn update_achievement(&self, doc: &AchievementDoc) -> Result<()>;

    /// Physical removal, reserved for compensating a failed create
    async fn delete_achievement(&self, id: &str) -> Result<()>;

    /// A student's achievements, oldest first
    async fn list_achievements_by_student(
        &self,
        student_id: &str,
        include_deleted: bool,
    ) -> Result<Vec<AchievementDoc>>;
}

/// Reference (workflow ledger) store
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn create_reference(&self, doc: ReferenceDoc) -> Result<ReferenceDoc>;

    async fn get_reference_by_id(&self, id: &str) -> Result<ReferenceDoc>;

    async fn update_reference(&self, doc: &ReferenceDoc) -> Result<()>;

    /// A student's references, oldest first
    async fn list_references_by_student(&self, student_id: &str) -> Result<Vec<ReferenceDoc>>;

    async fn list_references_by_status(
        &self,
        status: AchievementStatus,
    ) -> Result<Vec<ReferenceDoc>>;
}

/// Run one store call under a deadline. An elapsed call is `StoreUnavailable`;
/// the underlying future is dropped, which cancels it.
pub async fn bounded<T, F>(timeout: Duration, op: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::StoreUnavailable(format!(
            "{} timed out after {}ms",
            op,
            timeout.as_millis()
        ))),
    }
}
