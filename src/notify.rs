//! Notification dispatch
//!
//! Notifications are fire-and-forget from the engine's point of view: a
//! failed dispatch is logged by the caller and never fails the operation
//! that triggered it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::db::schemas::{Metadata, NotificationDoc, NOTIFICATION_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{LedgerError, Result};

/// Notification kinds emitted by the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AchievementSubmitted,
    AchievementRejected,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::AchievementSubmitted => "achievement_submitted",
            NotificationKind::AchievementRejected => "achievement_rejected",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Persists notifications to the `notifications` collection
pub struct MongoNotifier {
    collection: MongoCollection<NotificationDoc>,
}

impl MongoNotifier {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: client.collection(NOTIFICATION_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl Notifier for MongoNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let data = match bson::to_bson(&notification.data) {
            Ok(bson::Bson::Document(d)) => d,
            Ok(bson::Bson::Null) => bson::Document::new(),
            Ok(other) => {
                let mut wrapped = bson::Document::new();
                wrapped.insert("value", other);
                wrapped
            }
            Err(e) => {
                return Err(LedgerError::ValidationFailed(format!(
                    "notification data is not representable: {}",
                    e
                )))
            }
        };

        let doc = NotificationDoc {
            _id: None,
            metadata: Metadata::new(),
            user_id: notification.user_id,
            kind: notification.kind.as_str().to_string(),
            title: notification.title,
            message: notification.message,
            data,
            is_read: false,
            read_at: None,
        };
        self.collection.insert_one(doc).await?;
        Ok(())
    }
}

/// Writes notifications to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        info!(
            user_id = %notification.user_id,
            kind = %notification.kind,
            title = %notification.title,
            "{}",
            notification.message
        );
        Ok(())
    }
}
