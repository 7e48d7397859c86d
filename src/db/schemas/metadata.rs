//! Common metadata for all documents
//!
//! Tracks creation, update, and soft deletion timestamps.

use bson::DateTime;
use serde::{Deserialize, Serialize};

/// Common metadata for all documents
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    /// Whether this document has been soft-deleted
    #[serde(default)]
    pub is_deleted: bool,

    /// When the document was soft-deleted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,

    /// When the document was last updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    /// When the document was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl Metadata {
    /// Create new metadata with current timestamp
    pub fn new() -> Self {
        Self::created_at(DateTime::now())
    }

    /// Metadata for a document whose creation time is carried over from elsewhere
    pub fn created_at(at: DateTime) -> Self {
        Self {
            is_deleted: false,
            deleted_at: None,
            updated_at: Some(DateTime::now()),
            created_at: Some(at),
        }
    }

    /// Set the soft-delete marker
    pub fn mark_deleted(&mut self, at: DateTime) {
        self.is_deleted = true;
        self.deleted_at = Some(at);
        self.updated_at = Some(at);
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(DateTime::now());
    }

    /// Soft-deleted documents carry either the flag or the timestamp
    pub fn is_soft_deleted(&self) -> bool {
        self.is_deleted || self.deleted_at.is_some()
    }

    /// Creation time in epoch milliseconds, 0 when unknown
    pub fn created_millis(&self) -> i64 {
        self.created_at.map(|t| t.timestamp_millis()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_deleted() {
        let mut meta = Metadata::new();
        assert!(!meta.is_soft_deleted());

        let at = DateTime::from_millis(1_700_000_000_000);
        meta.mark_deleted(at);
        assert!(meta.is_soft_deleted());
        assert_eq!(meta.deleted_at, Some(at));
        assert_eq!(meta.updated_at, Some(at));
    }

    #[test]
    fn test_created_at_carried_over() {
        let at = DateTime::from_millis(42_000);
        let meta = Metadata::created_at(at);
        assert_eq!(meta.created_millis(), 42_000);
        assert_eq!(Metadata::default().created_millis(), 0);
    }
}
