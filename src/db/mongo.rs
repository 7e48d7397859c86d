//! MongoDB client and collection wrapper
//!
//! Handles are constructed explicitly and passed to the store adapters;
//! nothing here is process-global.

use bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use futures_util::{Stream, TryStreamExt};
use mongodb::{
    options::IndexOptions,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use tracing::info;

use crate::db::schemas::Metadata;
use crate::types::LedgerError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// Trait for schemas whose `_id` is assigned by the server
pub trait MutId {
    fn set_id(&mut self, id: ObjectId);
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str, timeout_ms: u64) -> Result<Self, LedgerError> {
        info!("Connecting to MongoDB at {}", uri);

        let timeout_uri = with_timeouts(uri, timeout_ms);

        let client = Client::with_uri_str(&timeout_uri).await.map_err(|e| {
            LedgerError::StoreUnavailable(format!("Failed to connect to MongoDB: {}", e))
        })?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| LedgerError::StoreUnavailable(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, LedgerError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata + MutId,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata + MutId,
{
    /// Create a new collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, LedgerError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), LedgerError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner.create_indexes(indices).await.map_err(|e| {
            LedgerError::StoreUnavailable(format!("Failed to create indexes: {}", e))
        })?;

        Ok(())
    }

    /// Insert a document, stamping metadata, and return it as stored.
    ///
    /// A creation time already present on the document is kept so that
    /// synthesized records can inherit the timestamp of their source.
    pub async fn insert_one(&self, mut item: T) -> Result<T, LedgerError> {
        let now = DateTime::now();
        let metadata = item.mut_metadata();
        metadata.is_deleted = false;
        metadata.deleted_at = None;
        if metadata.created_at.is_none() {
            metadata.created_at = Some(now);
        }
        metadata.updated_at = Some(now);

        let result = self
            .inner
            .insert_one(&item)
            .await
            .map_err(|e| LedgerError::StoreUnavailable(format!("Insert failed: {}", e)))?;

        with_inserted_id(item, &result.inserted_id)
    }

    /// Find one document by filter, soft-deleted documents included
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, LedgerError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| LedgerError::StoreUnavailable(format!("Find failed: {}", e)))
    }

    /// Find many documents by filter, oldest first.
    /// A document that fails to decode fails the whole read.
    pub async fn find_many(
        &self,
        filter: Document,
        include_deleted: bool,
    ) -> Result<Vec<T>, LedgerError> {
        let mut full_filter = filter;
        if !include_deleted {
            full_filter.insert("metadata.is_deleted", doc! { "$ne": true });
        }

        let cursor = self
            .inner
            .find(full_filter)
            .sort(doc! { "metadata.created_at": 1 })
            .await
            .map_err(|e| LedgerError::StoreUnavailable(format!("Find failed: {}", e)))?;

        drain(cursor).await
    }

    /// Replace a whole document by id, refreshing `updated_at`.
    /// Returns false when no document matched.
    pub async fn replace_by_id(&self, id: ObjectId, mut item: T) -> Result<bool, LedgerError> {
        item.mut_metadata().updated_at = Some(DateTime::now());

        let result = self
            .inner
            .replace_one(doc! { "_id": id }, item)
            .await
            .map_err(|e| LedgerError::StoreUnavailable(format!("Replace failed: {}", e)))?;

        Ok(result.matched_count > 0)
    }

    /// Physically remove a document. Only used for compensation.
    pub async fn delete_by_id(&self, id: ObjectId) -> Result<bool, LedgerError> {
        let result = self
            .inner
            .delete_one(doc! { "_id": id })
            .await
            .map_err(|e| LedgerError::StoreUnavailable(format!("Delete failed: {}", e)))?;

        Ok(result.deleted_count > 0)
    }
}

/// Attach the server-assigned ID to a freshly inserted document
fn with_inserted_id<T: MutId>(mut item: T, inserted: &Bson) -> Result<T, LedgerError> {
    let id = inserted
        .as_object_id()
        .ok_or_else(|| LedgerError::StoreUnavailable("Failed to get inserted ID".into()))?;
    item.set_id(id);
    Ok(item)
}

/// Collect a cursor, stopping at the first error
async fn drain<S, T, E>(cursor: S) -> Result<Vec<T>, LedgerError>
where
    S: Stream<Item = Result<T, E>>,
    E: Display,
{
    cursor
        .map_err(|e| LedgerError::StoreUnavailable(format!("Failed to read document: {}", e)))
        .try_collect()
        .await
}

/// Append server-selection and connect timeouts to a connection string.
/// Options must follow the path delimiter.
fn with_timeouts(uri: &str, timeout_ms: u64) -> String {
    let has_path = uri
        .split_once("://")
        .map(|(_, rest)| rest.contains('/'))
        .unwrap_or(false);
    let separator = if uri.contains('?') {
        "&"
    } else if has_path {
        "?"
    } else {
        "/?"
    };
    format!(
        "{}{}serverSelectionTimeoutMS={}&connectTimeoutMS={}",
        uri, separator, timeout_ms, timeout_ms
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::ReferenceDoc;
    use futures_util::stream;

    #[tokio::test]
    async fn test_drain_collects_in_order() {
        let items: Vec<Result<u32, String>> = vec![Ok(1), Ok(2), Ok(3)];
        assert_eq!(drain(stream::iter(items)).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_drain_fails_on_undecodable_document() {
        let items: Vec<Result<u32, String>> =
            vec![Ok(1), Err("missing field `status`".to_string()), Ok(3)];
        let err = drain(stream::iter(items)).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::StoreUnavailable(ref msg) if msg.contains("missing field `status`")
        ));
    }

    #[test]
    fn test_with_inserted_id() {
        let reference = ReferenceDoc::draft("student-1".into(), "65f000000000000000000000".into());
        assert!(reference._id.is_none());

        let id = ObjectId::new();
        let stored = with_inserted_id(reference, &Bson::ObjectId(id)).unwrap();
        assert_eq!(stored._id, Some(id));

        let other = ReferenceDoc::draft("student-1".into(), "x".into());
        assert!(with_inserted_id(other, &Bson::Int32(7)).is_err());
    }

    #[test]
    fn test_with_timeouts() {
        assert_eq!(
            with_timeouts("mongodb://localhost:27017", 5000),
            "mongodb://localhost:27017/?serverSelectionTimeoutMS=5000&connectTimeoutMS=5000"
        );
        assert_eq!(
            with_timeouts("mongodb://db:27017/ledger", 10),
            "mongodb://db:27017/ledger?serverSelectionTimeoutMS=10&connectTimeoutMS=10"
        );
        assert_eq!(
            with_timeouts("mongodb://db/?replicaSet=rs0", 10),
            "mongodb://db/?replicaSet=rs0&serverSelectionTimeoutMS=10&connectTimeoutMS=10"
        );
    }
}
