//! [`DocumentStore`] backed by the official `mongodb` driver.

use crate::config::DriverOptions;
use crate::error::{MongoError, Result};
use crate::event::{ChangeEvent, ChangeKind};
use crate::namespace::Namespace;
use crate::store::{
    AggregateOptions, ChangeStream, Connector, CountOptions, DeleteResult, DocumentStore,
    FindOptions, IndexSpec, InsertManyOptions, InsertManyResult, InsertOneResult, UpdateOptions,
    UpdateResult,
};
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::io::{AsyncReadExt, AsyncWriteExt};
use futures::{StreamExt, TryStreamExt};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType};
use mongodb::gridfs::GridFsBucket;
use mongodb::options::{
    ChangeStreamOptions, ClientOptions, FullDocumentType, GridFsBucketOptions, IndexOptions, Tls,
    TlsOptions,
};
use mongodb::{Client, Collection, IndexModel};
use std::sync::Arc;
use std::time::Duration;

/// Opens [`MongoStore`]s.
#[derive(Debug, Clone, Default)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(&self, url: &str, options: &DriverOptions) -> Result<Arc<dyn DocumentStore>> {
        let store = MongoStore::connect(url, options).await?;
        Ok(Arc::new(store))
    }
}

/// A connected driver client.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    /// Open a client and verify it with a ping.
    ///
    /// The driver connects lazily, so without the ping a refused connection
    /// would only surface on the first operation.
    pub async fn connect(url: &str, options: &DriverOptions) -> Result<Self> {
        let mut client_options = ClientOptions::parse(url).await?;
        apply_driver_options(&mut client_options, options);

        let client = Client::with_options(client_options)?;
        let store = Self { client };
        store.ping().await?;
        Ok(store)
    }

    /// Wrap an already configured driver client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn collection(&self, ns: &Namespace) -> Collection<Document> {
        self.client.database(&ns.db).collection(&ns.coll)
    }

    fn bucket(&self, ns: &Namespace) -> GridFsBucket {
        let mut options = GridFsBucketOptions::default();
        options.bucket_name = Some(ns.coll.clone());
        self.client.database(&ns.db).gridfs_bucket(options)
    }
}

fn apply_driver_options(client_options: &mut ClientOptions, options: &DriverOptions) {
    if let Some(ms) = options.connect_timeout_ms {
        client_options.connect_timeout = Some(Duration::from_millis(ms));
    }
    if let Some(ms) = options.server_selection_timeout_ms {
        client_options.server_selection_timeout = Some(Duration::from_millis(ms));
    }
    if let Some(size) = options.max_pool_size {
        client_options.max_pool_size = Some(size);
    }
    if let Some(size) = options.min_pool_size {
        client_options.min_pool_size = Some(size);
    }
    if let Some(ref name) = options.app_name {
        client_options.app_name = Some(name.clone());
    }
    if let Some(tls) = options.tls {
        client_options.tls = Some(if tls {
            Tls::Enabled(TlsOptions::default())
        } else {
            Tls::Disabled
        });
    }
    if let Some(direct) = options.direct_connection {
        client_options.direct_connection = Some(direct);
    }
}

fn to_driver_find(options: FindOptions) -> mongodb::options::FindOptions {
    let mut driver = mongodb::options::FindOptions::default();
    driver.limit = options.limit;
    driver.skip = options.skip;
    driver.sort = options.sort;
    driver.projection = options.projection;
    driver.batch_size = options.batch_size;
    driver
}

fn to_driver_find_one(options: FindOptions) -> mongodb::options::FindOneOptions {
    let mut driver = mongodb::options::FindOneOptions::default();
    driver.skip = options.skip;
    driver.sort = options.sort;
    driver.projection = options.projection;
    driver
}

fn to_driver_update(options: UpdateOptions) -> mongodb::options::UpdateOptions {
    let mut driver = mongodb::options::UpdateOptions::default();
    driver.upsert = options.upsert;
    driver.array_filters = options.array_filters;
    driver
}

fn to_index_model(spec: IndexSpec) -> IndexModel {
    let mut options = IndexOptions::default();
    options.name = spec.name;
    options.unique = spec.unique;
    options.sparse = spec.sparse;
    options.expire_after = spec.expire_after_seconds.map(Duration::from_secs);

    let mut model = IndexModel::default();
    model.keys = spec.keys;
    model.options = Some(options);
    model
}

fn to_update_result(result: mongodb::results::UpdateResult) -> UpdateResult {
    UpdateResult {
        matched_count: result.matched_count,
        modified_count: result.modified_count,
        upserted_id: result.upserted_id,
    }
}

fn to_change_event(ns: &Namespace, event: ChangeStreamEvent<Document>) -> ChangeEvent {
    let kind = match event.operation_type {
        OperationType::Insert => ChangeKind::Insert,
        OperationType::Update => ChangeKind::Update,
        OperationType::Replace => ChangeKind::Replace,
        OperationType::Delete => ChangeKind::Delete,
        OperationType::Invalidate => ChangeKind::Invalidate,
        other => ChangeKind::Other(format!("{other:?}").to_lowercase()),
    };
    let (updated_fields, removed_fields) = match event.update_description {
        Some(desc) => (Some(desc.updated_fields), desc.removed_fields),
        None => (None, Vec::new()),
    };

    ChangeEvent {
        ns: ns.to_string(),
        coll: ns.coll.clone(),
        kind,
        id: event.document_key.and_then(|key| key.get("_id").cloned()),
        document: event.full_document,
        updated_fields,
        removed_fields,
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ping(&self) -> Result<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }

    async fn insert_one(&self, ns: &Namespace, doc: Document) -> Result<InsertOneResult> {
        let result = self.collection(ns).insert_one(doc).await?;
        Ok(InsertOneResult {
            inserted_id: result.inserted_id,
        })
    }

    async fn insert_many(
        &self,
        ns: &Namespace,
        docs: Vec<Document>,
        options: InsertManyOptions,
    ) -> Result<InsertManyResult> {
        let mut driver = mongodb::options::InsertManyOptions::default();
        driver.ordered = options.ordered;

        let result = self
            .collection(ns)
            .insert_many(docs)
            .with_options(driver)
            .await?;
        Ok(InsertManyResult {
            inserted_ids: result.inserted_ids.into_iter().collect(),
        })
    }

    async fn find(
        &self,
        ns: &Namespace,
        filter: Document,
        options: FindOptions,
    ) -> Result<Vec<Document>> {
        let cursor = self
            .collection(ns)
            .find(filter)
            .with_options(to_driver_find(options))
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_one(
        &self,
        ns: &Namespace,
        filter: Document,
        options: FindOptions,
    ) -> Result<Option<Document>> {
        Ok(self
            .collection(ns)
            .find_one(filter)
            .with_options(to_driver_find_one(options))
            .await?)
    }

    async fn update_one(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        let result = self
            .collection(ns)
            .update_one(filter, update)
            .with_options(to_driver_update(options))
            .await?;
        Ok(to_update_result(result))
    }

    async fn update_many(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        let result = self
            .collection(ns)
            .update_many(filter, update)
            .with_options(to_driver_update(options))
            .await?;
        Ok(to_update_result(result))
    }

    async fn delete_one(&self, ns: &Namespace, filter: Document) -> Result<DeleteResult> {
        let result = self.collection(ns).delete_one(filter).await?;
        Ok(DeleteResult {
            deleted_count: result.deleted_count,
        })
    }

    async fn delete_many(&self, ns: &Namespace, filter: Document) -> Result<DeleteResult> {
        let result = self.collection(ns).delete_many(filter).await?;
        Ok(DeleteResult {
            deleted_count: result.deleted_count,
        })
    }

    async fn aggregate(
        &self,
        ns: &Namespace,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> Result<Vec<Document>> {
        let mut driver = mongodb::options::AggregateOptions::default();
        driver.allow_disk_use = options.allow_disk_use;
        driver.batch_size = options.batch_size;

        let cursor = self
            .collection(ns)
            .aggregate(pipeline)
            .with_options(driver)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn distinct(&self, ns: &Namespace, field: &str, filter: Document) -> Result<Vec<Bson>> {
        Ok(self.collection(ns).distinct(field, filter).await?)
    }

    async fn count(&self, ns: &Namespace, filter: Document, options: CountOptions) -> Result<u64> {
        let mut driver = mongodb::options::CountOptions::default();
        driver.limit = options.limit;
        driver.skip = options.skip;

        Ok(self
            .collection(ns)
            .count_documents(filter)
            .with_options(driver)
            .await?)
    }

    async fn create_indexes(&self, ns: &Namespace, indexes: Vec<IndexSpec>) -> Result<Vec<String>> {
        let models: Vec<IndexModel> = indexes.into_iter().map(to_index_model).collect();
        let result = self.collection(ns).create_indexes(models).await?;
        Ok(result.index_names)
    }

    async fn watch(&self, ns: &Namespace) -> Result<ChangeStream> {
        let mut options = ChangeStreamOptions::default();
        options.full_document = Some(FullDocumentType::UpdateLookup);

        let stream = self.collection(ns).watch().with_options(options).await?;
        tracing::debug!(namespace = %ns, "change stream opened");

        let ns = ns.clone();
        Ok(stream
            .map(move |item| {
                item.map(|event| to_change_event(&ns, event))
                    .map_err(MongoError::from)
            })
            .boxed())
    }

    async fn upload_file(&self, bucket: &Namespace, filename: &str, data: Vec<u8>) -> Result<Bson> {
        let mut upload = self.bucket(bucket).open_upload_stream(filename).await?;
        upload.write_all(&data).await?;
        upload.close().await?;
        Ok(upload.id().clone())
    }

    async fn download_file(&self, bucket: &Namespace, id: Bson) -> Result<Vec<u8>> {
        let mut download = self.bucket(bucket).open_download_stream(id).await?;
        let mut data = Vec::new();
        download.read_to_end(&mut data).await?;
        Ok(data)
    }

    async fn delete_file(&self, bucket: &Namespace, id: Bson) -> Result<()> {
        self.bucket(bucket).delete(id).await?;
        Ok(())
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}
