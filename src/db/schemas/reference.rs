//! Achievement reference schema
//!
//! A reference is the workflow ledger entry for one achievement: it carries
//! the status and a pointer (`achievement_id`, the hex `_id` of the
//! achievement document). The pointer is not a foreign key; consistency is
//! maintained by the lifecycle and repair engines.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutId, MutMetadata};
use crate::db::schemas::Metadata;
use crate::status::AchievementStatus;

/// Collection name for achievement references
pub const REFERENCE_COLLECTION: &str = "achievement_references";

/// Reference document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ReferenceDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at)
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning student's user ID
    pub student_id: String,

    /// Pointer to the achievement document
    pub achievement_id: String,

    #[serde(default)]
    pub status: AchievementStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime>,

    /// User ID of the deciding lecturer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_note: Option<String>,
}

impl ReferenceDoc {
    /// A fresh draft reference pointing at `achievement_id`
    pub fn draft(student_id: String, achievement_id: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            student_id,
            achievement_id,
            status: AchievementStatus::Draft,
            submitted_at: None,
            verified_at: None,
            verified_by: None,
            rejection_note: None,
        }
    }

    pub fn id_hex(&self) -> Option<String> {
        self._id.map(|id| id.to_hex())
    }

    /// Whether the reference still takes part in the one-reference-per-achievement invariant
    pub fn is_active(&self) -> bool {
        self.status != AchievementStatus::Deleted
    }

    pub fn created_millis(&self) -> i64 {
        self.metadata.created_millis()
    }
}

impl IntoIndexes for ReferenceDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "student_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("student_id_index".to_string())
                        .build(),
                ),
            ),
            // Not unique: duplicate pointers are a repairable state, not a write error
            (
                doc! { "achievement_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("achievement_id_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ReferenceDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl MutId for ReferenceDoc {
    fn set_id(&mut self, id: ObjectId) {
        self._id = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_defaults() {
        let reference = ReferenceDoc::draft("student-1".into(), "abc".into());
        assert_eq!(reference.status, AchievementStatus::Draft);
        assert!(reference.is_active());
        assert!(reference.submitted_at.is_none());
        assert!(reference.id_hex().is_none());
    }

    #[test]
    fn test_deleted_is_inactive() {
        let mut reference = ReferenceDoc::draft("student-1".into(), "abc".into());
        reference.status = AchievementStatus::Deleted;
        assert!(!reference.is_active());
    }

    #[test]
    fn test_bson_roundtrip_keeps_status() {
        let mut reference = ReferenceDoc::draft("student-1".into(), "abc".into());
        reference.status = AchievementStatus::Rejected;
        reference.rejection_note = Some("Missing proof".into());

        let doc = bson::to_document(&reference).unwrap();
        assert_eq!(doc.get_str("status").unwrap(), "rejected");
        assert!(doc.get("verified_by").is_none());

        let back: ReferenceDoc = bson::from_document(doc).unwrap();
        assert_eq!(back.rejection_note.as_deref(), Some("Missing proof"));
    }
}
