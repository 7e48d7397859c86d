//! MongoDB-backed achievement and reference stores

use async_trait::async_trait;
use bson::{doc, oid::ObjectId};
use tracing::debug;

use super::{AchievementStore, ReferenceStore};
use crate::db::schemas::{AchievementDoc, ReferenceDoc, ACHIEVEMENT_COLLECTION, REFERENCE_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::status::AchievementStatus;
use crate::types::{LedgerError, Result};

/// Both ledger collections behind one handle
#[derive(Clone)]
pub struct MongoStore {
    achievements: MongoCollection<AchievementDoc>,
    references: MongoCollection<ReferenceDoc>,
}

impl MongoStore {
    /// Open the collections (applying indexes) on an injected client
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            achievements: client.collection(ACHIEVEMENT_COLLECTION).await?,
            references: client.collection(REFERENCE_COLLECTION).await?,
        })
    }
}

fn parse_id(id: &str, what: &str) -> Result<ObjectId> {
    ObjectId::parse_str(id).map_err(|_| LedgerError::NotFound(format!("{} {}", what, id)))
}

#[async_trait]
impl AchievementStore for MongoStore {
    async fn create_achievement(&self, mut doc: AchievementDoc) -> Result<AchievementDoc> {
        doc._id = None;
        let stored = self.achievements.insert_one(doc).await?;
        debug!(achievement_id = %stored.id_hex().unwrap_or_default(), "Inserted achievement");
        Ok(stored)
    }

    async fn get_achievement_by_id(&self, id: &str) -> Result<AchievementDoc> {
        let oid = parse_id(id, "achievement")?;
        self.achievements
            .find_one(doc! { "_id": oid })
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("achievement {}", id)))
    }

    async fn update_achievement(&self, doc: &AchievementDoc) -> Result<()> {
        let oid = doc
            ._id
            .ok_or_else(|| LedgerError::ValidationFailed("achievement has no ID".into()))?;
        if self.achievements.replace_by_id(oid, doc.clone()).await? {
            Ok(())
        } else {
            Err(LedgerError::NotFound(format!("achievement {}", oid.to_hex())))
        }
    }

    async fn delete_achievement(&self, id: &str) -> Result<()> {
        let oid = parse_id(id, "achievement")?;
        if self.achievements.delete_by_id(oid).await? {
            Ok(())
        } else {
            Err(LedgerError::NotFound(format!("achievement {}", id)))
        }
    }

    async fn list_achievements_by_student(
        &self,
        student_id: &str,
        include_deleted: bool,
    ) -> Result<Vec<AchievementDoc>> {
        self.achievements
            .find_many(doc! { "student_id": student_id }, include_deleted)
            .await
    }
}

#[async_trait]
impl ReferenceStore for MongoStore {
    async fn create_reference(&self, mut doc: ReferenceDoc) -> Result<ReferenceDoc> {
        doc._id = None;
        let stored = self.references.insert_one(doc).await?;
        debug!(
            reference_id = %stored.id_hex().unwrap_or_default(),
            achievement_id = %stored.achievement_id,
            "Inserted reference"
        );
        Ok(stored)
    }

    async fn get_reference_by_id(&self, id: &str) -> Result<ReferenceDoc> {
        let oid = parse_id(id, "reference")?;
        self.references
            .find_one(doc! { "_id": oid })
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("reference {}", id)))
    }

    async fn update_reference(&self, doc: &ReferenceDoc) -> Result<()> {
        let oid = doc
            ._id
            .ok_or_else(|| LedgerError::ValidationFailed("reference has no ID".into()))?;
        if self.references.replace_by_id(oid, doc.clone()).await? {
            Ok(())
        } else {
            Err(LedgerError::NotFound(format!("reference {}", oid.to_hex())))
        }
    }

    async fn list_references_by_student(&self, student_id: &str) -> Result<Vec<ReferenceDoc>> {
        // References are never soft-deleted through metadata; status carries deletion
        self.references
            .find_many(doc! { "student_id": student_id }, true)
            .await
    }

    async fn list_references_by_status(
        &self,
        status: AchievementStatus,
    ) -> Result<Vec<ReferenceDoc>> {
        self.references
            .find_many(doc! { "status": status.as_str() }, true)
            .await
    }
}
