//! Notification document schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutId, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for notifications
pub const NOTIFICATION_COLLECTION: &str = "notifications";

/// Notification document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct NotificationDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Recipient user ID
    pub user_id: String,

    /// e.g. achievement_submitted, achievement_rejected
    #[serde(rename = "type")]
    pub kind: String,

    pub title: String,
    pub message: String,

    #[serde(default)]
    pub data: Document,

    #[serde(default)]
    pub is_read: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime>,
}

impl IntoIndexes for NotificationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "user_id": 1, "is_read": 1 },
            Some(
                IndexOptions::builder()
                    .name("user_unread_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for NotificationDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl MutId for NotificationDoc {
    fn set_id(&mut self, id: ObjectId) {
        self._id = Some(id);
    }
}
