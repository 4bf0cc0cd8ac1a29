//! The driver seam: typed options, results, and the store traits.
//!
//! [`DocumentStore`] is everything the dispatcher and change feed need from an
//! open connection; [`Connector`] opens one. The production implementations
//! live in [`crate::mongo`].

use crate::config::DriverOptions;
use crate::error::Result;
use crate::event::ChangeEvent;
use crate::namespace::Namespace;
use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of an insert_one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    /// The ID of the inserted document.
    pub inserted_id: Bson,
}

/// Result of an insert_many operation.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    /// Map of index to inserted ID.
    pub inserted_ids: HashMap<usize, Bson>,
}

/// Result of an update operation.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    /// Number of documents matched.
    pub matched_count: u64,
    /// Number of documents modified.
    pub modified_count: u64,
    /// The ID of the upserted document, if any.
    pub upserted_id: Option<Bson>,
}

/// Result of a delete operation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResult {
    /// Number of documents deleted.
    pub deleted_count: u64,
}

/// Options for find operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Maximum number of documents to return.
    pub limit: Option<i64>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
    /// Sort order.
    pub sort: Option<Document>,
    /// Projection (fields to include/exclude).
    pub projection: Option<Document>,
    /// Batch size for cursor.
    pub batch_size: Option<u32>,
}

impl FindOptions {
    /// Create new find options.
    pub fn builder() -> FindOptionsBuilder {
        FindOptionsBuilder::default()
    }
}

/// Builder for FindOptions.
#[derive(Debug, Clone, Default)]
pub struct FindOptionsBuilder {
    options: FindOptions,
}

impl FindOptionsBuilder {
    /// Set the limit.
    pub fn limit(mut self, limit: i64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    /// Set the skip.
    pub fn skip(mut self, skip: u64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    /// Set the sort order.
    pub fn sort(mut self, sort: Document) -> Self {
        self.options.sort = Some(sort);
        self
    }

    /// Set the projection.
    pub fn projection(mut self, projection: Document) -> Self {
        self.options.projection = Some(projection);
        self
    }

    /// Set the batch size.
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.options.batch_size = Some(batch_size);
        self
    }

    /// Build the options.
    pub fn build(self) -> FindOptions {
        self.options
    }
}

/// Options for update operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    /// Whether to insert if no documents match.
    pub upsert: Option<bool>,
    /// Array filters for updating nested arrays.
    pub array_filters: Option<Vec<Document>>,
}

impl UpdateOptions {
    /// Create a builder.
    pub fn builder() -> UpdateOptionsBuilder {
        UpdateOptionsBuilder::default()
    }
}

/// Builder for UpdateOptions.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptionsBuilder {
    options: UpdateOptions,
}

impl UpdateOptionsBuilder {
    /// Set upsert option.
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.options.upsert = Some(upsert);
        self
    }

    /// Set array filters.
    pub fn array_filters(mut self, filters: Vec<Document>) -> Self {
        self.options.array_filters = Some(filters);
        self
    }

    /// Build the options.
    pub fn build(self) -> UpdateOptions {
        self.options
    }
}

/// Options for insert_many.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyOptions {
    /// Stop at the first failed insert.
    pub ordered: Option<bool>,
}

/// Options for aggregate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    pub allow_disk_use: Option<bool>,
    pub batch_size: Option<u32>,
}

/// Options for count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountOptions {
    pub limit: Option<u64>,
    pub skip: Option<u64>,
}

/// One index to create.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSpec {
    /// Key pattern, e.g. `{ "email": 1 }`.
    pub keys: Document,
    pub name: Option<String>,
    pub unique: Option<bool>,
    pub sparse: Option<bool>,
    /// TTL in seconds.
    pub expire_after_seconds: Option<u64>,
}

/// Stream of change notifications for one namespace.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent>>;

/// An open connection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Round-trip to the server.
    async fn ping(&self) -> Result<()>;

    async fn insert_one(&self, ns: &Namespace, doc: Document) -> Result<InsertOneResult>;

    async fn insert_many(
        &self,
        ns: &Namespace,
        docs: Vec<Document>,
        options: InsertManyOptions,
    ) -> Result<InsertManyResult>;

    /// Run a query and materialize the cursor.
    async fn find(
        &self,
        ns: &Namespace,
        filter: Document,
        options: FindOptions,
    ) -> Result<Vec<Document>>;

    async fn find_one(
        &self,
        ns: &Namespace,
        filter: Document,
        options: FindOptions,
    ) -> Result<Option<Document>>;

    async fn update_one(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult>;

    async fn update_many(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult>;

    async fn delete_one(&self, ns: &Namespace, filter: Document) -> Result<DeleteResult>;

    async fn delete_many(&self, ns: &Namespace, filter: Document) -> Result<DeleteResult>;

    async fn aggregate(
        &self,
        ns: &Namespace,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> Result<Vec<Document>>;

    async fn distinct(&self, ns: &Namespace, field: &str, filter: Document) -> Result<Vec<Bson>>;

    async fn count(&self, ns: &Namespace, filter: Document, options: CountOptions) -> Result<u64>;

    /// Create indexes and return their names.
    async fn create_indexes(&self, ns: &Namespace, indexes: Vec<IndexSpec>) -> Result<Vec<String>>;

    /// Open a change stream with full-document lookup on update.
    async fn watch(&self, ns: &Namespace) -> Result<ChangeStream>;

    /// Store a file in the GridFS bucket named by `bucket.coll`; returns its id.
    async fn upload_file(&self, bucket: &Namespace, filename: &str, data: Vec<u8>) -> Result<Bson>;

    async fn download_file(&self, bucket: &Namespace, id: Bson) -> Result<Vec<u8>>;

    async fn delete_file(&self, bucket: &Namespace, id: Bson) -> Result<()>;

    /// Release the underlying client.
    async fn close(&self);
}

/// Opens a [`DocumentStore`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str, options: &DriverOptions) -> Result<Arc<dyn DocumentStore>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[test]
    fn test_insert_one_result() {
        let result = InsertOneResult {
            inserted_id: Bson::ObjectId(ObjectId::new()),
        };
        assert!(result.inserted_id.as_object_id().is_some());
    }

    #[test]
    fn test_find_options_builder() {
        let options = FindOptions::builder()
            .limit(10)
            .skip(5)
            .sort(doc! { "created": -1 })
            .projection(doc! { "name": 1, "email": 1 })
            .batch_size(100)
            .build();

        assert_eq!(options.limit, Some(10));
        assert_eq!(options.skip, Some(5));
        assert!(options.sort.is_some());
        assert!(options.projection.is_some());
        assert_eq!(options.batch_size, Some(100));
    }

    #[test]
    fn test_update_options_builder() {
        let options = UpdateOptions::builder()
            .upsert(true)
            .array_filters(vec![doc! { "elem.status": "active" }])
            .build();

        assert_eq!(options.upsert, Some(true));
        assert!(options.array_filters.is_some());
    }

    #[test]
    fn test_find_options_default() {
        let options = FindOptions::default();
        assert!(options.limit.is_none());
        assert!(options.skip.is_none());
        assert!(options.sort.is_none());
        assert!(options.projection.is_none());
        assert!(options.batch_size.is_none());
    }
}
