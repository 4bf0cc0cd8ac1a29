//! Operation dispatcher: typed requests onto the connected store.

use crate::client::ConnectionManager;
use crate::config::Config;
use crate::document::{promote_id, promote_ids, strip_set_id};
use crate::error::{MongoError, Result};
use crate::namespace::Namespace;
use crate::request::{Reply, Request};
use crate::sanitize::check_operators;
use crate::store::{DocumentStore, FindOptions};
use bson::{doc, Bson, Document};
use futures::future::try_join_all;
use std::sync::Arc;

/// Runs bus requests against the connection held by a [`ConnectionManager`].
#[derive(Clone)]
pub struct Dispatcher {
    manager: ConnectionManager,
}

impl Dispatcher {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Execute one request. Failures are logged and returned.
    pub async fn dispatch(&self, request: Request) -> Result<Reply> {
        let method = request.method();
        let namespace = request.namespace().map(str::to_string);

        let result = self.execute(request).await;
        if let Err(ref err) = result {
            match err {
                MongoError::NotReady => {
                    tracing::warn!(method, error = %err, "operation before connect")
                }
                _ => tracing::error!(
                    method,
                    namespace = namespace.as_deref().unwrap_or(""),
                    error = %err,
                    "operation failed"
                ),
            }
        }
        result
    }

    async fn execute(&self, request: Request) -> Result<Reply> {
        match request {
            Request::Connect(overrides) => {
                // completion is announced through the connected event
                drop(self.manager.connect_with(&overrides));
                return Ok(Reply::Ack);
            }
            Request::Watch { namespace } => {
                self.manager.watch(&namespace)?;
                return Ok(Reply::Ack);
            }
            _ => {}
        }

        let store = self.manager.store().ok_or(MongoError::NotReady)?;
        let config = self.manager.config();
        let prep = Prepare { config: &config };
        let resolve = |namespace: &str| Namespace::resolve(namespace, &config.namespaces);

        let reply = match request {
            Request::Connect(_) | Request::Watch { .. } => Reply::Ack,

            Request::InsertOne {
                namespace,
                document,
            } => Reply::Inserted(
                store
                    .insert_one(&resolve(&namespace)?, prep.document(document))
                    .await?,
            ),
            Request::InsertMany {
                namespace,
                documents,
                options,
            } => {
                let documents = documents.into_iter().map(|d| prep.document(d)).collect();
                Reply::InsertedMany(
                    store
                        .insert_many(&resolve(&namespace)?, documents, options)
                        .await?,
                )
            }

            Request::Find {
                namespace,
                filter,
                options,
            } => Reply::Documents(
                store
                    .find(&resolve(&namespace)?, prep.document(filter), options)
                    .await?,
            ),
            Request::FindOne {
                namespace,
                filter,
                options,
            } => Reply::Document(
                store
                    .find_one(&resolve(&namespace)?, prep.document(filter), options)
                    .await?,
            ),
            Request::FindById {
                namespace,
                id,
                options,
            } => Reply::Document(
                store
                    .find_one(&resolve(&namespace)?, prep.by_id(id), options)
                    .await?,
            ),

            Request::UpdateOne {
                namespace,
                filter,
                update,
                options,
            } => {
                let ns = resolve(&namespace)?;
                let update = prep.update(update)?;
                Reply::Updated(
                    store
                        .update_one(&ns, prep.document(filter), update, options)
                        .await?,
                )
            }
            Request::UpdateMany {
                namespace,
                filter,
                update,
                options,
            } => {
                let ns = resolve(&namespace)?;
                let update = prep.update(update)?;
                Reply::Updated(
                    store
                        .update_many(&ns, prep.document(filter), update, options)
                        .await?,
                )
            }
            Request::UpdateById {
                namespace,
                id,
                update,
                options,
            } => {
                let ns = resolve(&namespace)?;
                let update = prep.update(update)?;
                Reply::Updated(
                    store
                        .update_one(&ns, prep.by_id(id), update, options)
                        .await?,
                )
            }

            Request::DeleteOne { namespace, filter } => Reply::Deleted(
                store
                    .delete_one(&resolve(&namespace)?, prep.document(filter))
                    .await?,
            ),
            Request::DeleteMany { namespace, filter } => Reply::Deleted(
                store
                    .delete_many(&resolve(&namespace)?, prep.document(filter))
                    .await?,
            ),
            Request::DeleteById { namespace, id } => Reply::Deleted(
                store
                    .delete_one(&resolve(&namespace)?, prep.by_id(id))
                    .await?,
            ),

            Request::Aggregate {
                namespace,
                pipeline,
                options,
            } => {
                let pipeline = pipeline.into_iter().map(|s| prep.document(s)).collect();
                Reply::Documents(
                    store
                        .aggregate(&resolve(&namespace)?, pipeline, options)
                        .await?,
                )
            }
            Request::Distinct {
                namespace,
                field,
                filter,
            } => Reply::Values(
                store
                    .distinct(&resolve(&namespace)?, &field, prep.document(filter))
                    .await?,
            ),
            Request::Count {
                namespace,
                filter,
                options,
            } => Reply::Count(
                store
                    .count(&resolve(&namespace)?, prep.document(filter), options)
                    .await?,
            ),

            Request::JoinById {
                namespace,
                filter,
                field,
                foreign,
                options,
            } => {
                let ns = resolve(&namespace)?;
                let foreign = resolve(&foreign)?;
                let docs = store.find(&ns, prep.document(filter), options).await?;
                let joined = try_join_all(
                    docs.into_iter()
                        .map(|doc| prep.join(&store, &foreign, &field, doc)),
                )
                .await?;
                Reply::Documents(joined)
            }

            Request::CreateIndexes { namespace, indexes } => Reply::IndexNames(
                store
                    .create_indexes(&resolve(&namespace)?, indexes)
                    .await?,
            ),

            Request::OpenUploadStream {
                namespace,
                filename,
                data,
            } => Reply::FileId(
                store
                    .upload_file(&resolve(&namespace)?, &filename, data)
                    .await?,
            ),
            Request::OpenDownloadStream { namespace, id } => Reply::File(
                store
                    .download_file(&resolve(&namespace)?, prep.id(id))
                    .await?,
            ),
            Request::DeleteFile { namespace, id } => {
                store
                    .delete_file(&resolve(&namespace)?, prep.id(id))
                    .await?;
                Reply::Ack
            }
        };

        Ok(reply)
    }
}

/// Per-request document preparation, driven by the config snapshot.
struct Prepare<'a> {
    config: &'a Config,
}

impl Prepare<'_> {
    fn document(&self, mut doc: Document) -> Document {
        if self.config.promote_ids {
            promote_ids(&mut doc);
        }
        doc
    }

    fn id(&self, id: Bson) -> Bson {
        if self.config.promote_ids {
            promote_id(id)
        } else {
            id
        }
    }

    fn by_id(&self, id: Bson) -> Document {
        doc! { "_id": self.id(id) }
    }

    fn update(&self, mut update: Document) -> Result<Document> {
        strip_set_id(&mut update);
        if self.config.sanitize_updates {
            check_operators(&update, &self.config.allowed_update_operators)?;
        }
        Ok(self.document(update))
    }

    /// Replace the id (or ids) in `field` with the referenced documents.
    async fn join(
        &self,
        store: &Arc<dyn DocumentStore>,
        foreign: &Namespace,
        field: &str,
        mut doc: Document,
    ) -> Result<Document> {
        match doc.get(field).cloned() {
            None | Some(Bson::Null) => {}
            Some(Bson::Array(ids)) => {
                let ids: Vec<Bson> = ids.into_iter().map(|id| self.id(id)).collect();
                let found = store
                    .find(
                        foreign,
                        doc! { "_id": { "$in": ids.clone() } },
                        FindOptions::default(),
                    )
                    .await?;
                let ordered: Vec<Bson> = ids
                    .iter()
                    .filter_map(|id| found.iter().find(|d| d.get("_id") == Some(id)))
                    .cloned()
                    .map(Bson::Document)
                    .collect();
                doc.insert(field, ordered);
            }
            Some(id) => {
                let found = store
                    .find_one(foreign, self.by_id(id), FindOptions::default())
                    .await?;
                doc.insert(field, found.map(Bson::Document).unwrap_or(Bson::Null));
            }
        }
        Ok(doc)
    }
}
