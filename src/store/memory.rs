//! In-memory store implementing both store traits
//!
//! Behaves like the MongoDB adapter (store-assigned ObjectIds, creation
//! time kept when supplied) and can be told to fail individual operations
//! so partial-failure paths can be exercised.

use async_trait::async_trait;
use bson::{oid::ObjectId, DateTime};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use super::{AchievementStore, ReferenceStore};
use crate::db::schemas::{AchievementDoc, ReferenceDoc};
use crate::status::AchievementStatus;
use crate::types::{LedgerError, Result};

/// Store operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    CreateAchievement,
    UpdateAchievement,
    DeleteAchievement,
    CreateReference,
    UpdateReference,
}

#[derive(Default)]
pub struct MemoryStore {
    achievements: RwLock<HashMap<ObjectId, AchievementDoc>>,
    references: RwLock<HashMap<ObjectId, ReferenceDoc>>,
    failures: Mutex<HashSet<FailurePoint>>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call at `point` fail until cleared
    pub fn fail_on(&self, point: FailurePoint) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(point);
    }

    pub fn clear_failures(&self) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Delay every call, for exercising caller deadlines
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Store an achievement exactly as given (metadata untouched), returning its ID
    pub fn insert_achievement_raw(&self, mut doc: AchievementDoc) -> String {
        let id = *doc._id.get_or_insert_with(ObjectId::new);
        self.achievements
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, doc);
        id.to_hex()
    }

    /// Store a reference exactly as given (metadata untouched), returning its ID
    pub fn insert_reference_raw(&self, mut doc: ReferenceDoc) -> String {
        let id = *doc._id.get_or_insert_with(ObjectId::new);
        self.references
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, doc);
        id.to_hex()
    }

    /// Snapshot of every stored reference, oldest first
    pub fn all_references(&self) -> Vec<ReferenceDoc> {
        let mut refs: Vec<ReferenceDoc> = self
            .references
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        refs.sort_by_key(|r| (r.created_millis(), r._id));
        refs
    }

    pub fn achievement_count(&self) -> usize {
        self.achievements
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    async fn enter(&self, point: Option<FailurePoint>, op: &str) -> Result<()> {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(point) = point {
            let armed = self
                .failures
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&point);
            if armed {
                return Err(LedgerError::StoreUnavailable(format!(
                    "{} failed (injected)",
                    op
                )));
            }
        }
        Ok(())
    }
}

fn parse_id(id: &str, what: &str) -> Result<ObjectId> {
    ObjectId::parse_str(id).map_err(|_| LedgerError::NotFound(format!("{} {}", what, id)))
}

fn stamp_new(created_at: &mut Option<DateTime>, updated_at: &mut Option<DateTime>) {
    let now = DateTime::now();
    if created_at.is_none() {
        *created_at = Some(now);
    }
    *updated_at = Some(now);
}

#[async_trait]
impl AchievementStore for MemoryStore {
    async fn create_achievement(&self, mut doc: AchievementDoc) -> Result<AchievementDoc> {
        self.enter(Some(FailurePoint::CreateAchievement), "create_achievement")
            .await?;
        let id = ObjectId::new();
        doc._id = Some(id);
        doc.metadata.is_deleted = false;
        doc.metadata.deleted_at = None;
        stamp_new(&mut doc.metadata.created_at, &mut doc.metadata.updated_at);
        self.achievements
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, doc.clone());
        Ok(doc)
    }

    async fn get_achievement_by_id(&self, id: &str) -> Result<AchievementDoc> {
        self.enter(None, "get_achievement_by_id").await?;
        let oid = parse_id(id, "achievement")?;
        self.achievements
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&oid)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("achievement {}", id)))
    }

    async fn update_achievement(&self, doc: &AchievementDoc) -> Result<()> {
        self.enter(Some(FailurePoint::UpdateAchievement), "update_achievement")
            .await?;
        let oid = doc
            ._id
            .ok_or_else(|| LedgerError::ValidationFailed("achievement has no ID".into()))?;
        let mut achievements = self.achievements.write().unwrap_or_else(|e| e.into_inner());
        let slot = achievements
            .get_mut(&oid)
            .ok_or_else(|| LedgerError::NotFound(format!("achievement {}", oid.to_hex())))?;
        let mut updated = doc.clone();
        updated.metadata.updated_at = Some(DateTime::now());
        *slot = updated;
        Ok(())
    }

    async fn delete_achievement(&self, id: &str) -> Result<()> {
        self.enter(Some(FailurePoint::DeleteAchievement), "delete_achievement")
            .await?;
        let oid = parse_id(id, "achievement")?;
        self.achievements
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&oid)
            .map(|_| ())
            .ok_or_else(|| LedgerError::NotFound(format!("achievement {}", id)))
    }

    async fn list_achievements_by_student(
        &self,
        student_id: &str,
        include_deleted: bool,
    ) -> Result<Vec<AchievementDoc>> {
        self.enter(None, "list_achievements_by_student").await?;
        let mut docs: Vec<AchievementDoc> = self
            .achievements
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|a| a.student_id == student_id)
            .filter(|a| include_deleted || !a.is_soft_deleted())
            .cloned()
            .collect();
        docs.sort_by_key(|a| (a.created_millis(), a._id));
        Ok(docs)
    }
}

#[async_trait]
impl ReferenceStore for MemoryStore {
    async fn create_reference(&self, mut doc: ReferenceDoc) -> Result<ReferenceDoc> {
        self.enter(Some(FailurePoint::CreateReference), "create_reference")
            .await?;
        let id = ObjectId::new();
        doc._id = Some(id);
        stamp_new(&mut doc.metadata.created_at, &mut doc.metadata.updated_at);
        self.references
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, doc.clone());
        Ok(doc)
    }

    async fn get_reference_by_id(&self, id: &str) -> Result<ReferenceDoc> {
        self.enter(None, "get_reference_by_id").await?;
        let oid = parse_id(id, "reference")?;
        self.references
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&oid)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("reference {}", id)))
    }

    async fn update_reference(&self, doc: &ReferenceDoc) -> Result<()> {
        self.enter(Some(FailurePoint::UpdateReference), "update_reference")
            .await?;
        let oid = doc
            ._id
            .ok_or_else(|| LedgerError::ValidationFailed("reference has no ID".into()))?;
        let mut references = self.references.write().unwrap_or_else(|e| e.into_inner());
        let slot = references
            .get_mut(&oid)
            .ok_or_else(|| LedgerError::NotFound(format!("reference {}", oid.to_hex())))?;
        let mut updated = doc.clone();
        updated.metadata.updated_at = Some(DateTime::now());
        *slot = updated;
        Ok(())
    }

    async fn list_references_by_student(&self, student_id: &str) -> Result<Vec<ReferenceDoc>> {
        self.enter(None, "list_references_by_student").await?;
        let mut refs: Vec<ReferenceDoc> = self
            .references
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| r.student_id == student_id)
            .cloned()
            .collect();
        refs.sort_by_key(|r| (r.created_millis(), r._id));
        Ok(refs)
    }

    async fn list_references_by_status(
        &self,
        status: AchievementStatus,
    ) -> Result<Vec<ReferenceDoc>> {
        self.enter(None, "list_references_by_status").await?;
        let mut refs: Vec<ReferenceDoc> = self
            .references
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        refs.sort_by_key(|r| (r.created_millis(), r._id));
        Ok(refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{NewAchievement, Metadata};

    fn achievement(student: &str) -> AchievementDoc {
        let content = NewAchievement {
            category: "academic".into(),
            title: "Dean's list".into(),
            description: "Semester 3".into(),
            ..Default::default()
        }
        .validate()
        .unwrap();
        AchievementDoc::new(student.to_string(), content)
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_keeps_created_at() {
        let store = MemoryStore::new();
        let mut doc = achievement("s1");
        let at = DateTime::from_millis(1_000);
        doc.metadata = Metadata::created_at(at);

        let stored = store.create_achievement(doc).await.unwrap();
        let id = stored.id_hex().unwrap();
        assert_eq!(stored.metadata.created_at, Some(at));

        let fetched = store.get_achievement_by_id(&id).await.unwrap();
        assert_eq!(fetched.title, "Dean's list");
    }

    #[tokio::test]
    async fn test_list_excludes_soft_deleted_by_default() {
        let store = MemoryStore::new();
        let live = store.create_achievement(achievement("s1")).await.unwrap();
        let mut gone = store.create_achievement(achievement("s1")).await.unwrap();
        gone.metadata.mark_deleted(DateTime::now());
        store.update_achievement(&gone).await.unwrap();
        store.create_achievement(achievement("s2")).await.unwrap();

        let visible = store.list_achievements_by_student("s1", false).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0]._id, live._id);

        let all = store.list_achievements_by_student("s1", true).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids_not_found() {
        let store = MemoryStore::new();
        assert!(store
            .get_achievement_by_id("not-an-object-id")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(store
            .get_reference_by_id(&ObjectId::new().to_hex())
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.fail_on(FailurePoint::CreateReference);
        let err = store
            .create_reference(ReferenceDoc::draft("s1".into(), "x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));

        store.clear_failures();
        assert!(store
            .create_reference(ReferenceDoc::draft("s1".into(), "x".into()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_references_by_status() {
        let store = MemoryStore::new();
        let mut submitted = ReferenceDoc::draft("s1".into(), "a".into());
        submitted.status = AchievementStatus::Submitted;
        store.create_reference(submitted).await.unwrap();
        store
            .create_reference(ReferenceDoc::draft("s1".into(), "b".into()))
            .await
            .unwrap();

        let pending = store
            .list_references_by_status(AchievementStatus::Submitted)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].achievement_id, "a");
    }
}
