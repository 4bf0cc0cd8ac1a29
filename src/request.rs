//! Bus requests and replies, and their positional-JSON wire form.
//!
//! A raw call is a method name plus positional arguments, e.g.
//! `("mongo.find", ["app.users", {"age": {"$gt": 21}}, {"limit": 10}])`.
//! Trailing options may be omitted or `null`; documents use extended JSON
//! (`$oid`, `$date`, `$binary`).

use crate::config::ConnectOverrides;
use crate::document::{bson_doc_to_json, bson_to_json, json_to_bson, json_to_bson_doc, json_to_bytes};
use crate::error::{MongoError, Result};
use crate::store::{
    AggregateOptions, CountOptions, DeleteResult, FindOptions, IndexSpec, InsertManyOptions,
    InsertManyResult, InsertOneResult, UpdateOptions, UpdateResult,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bson::{Bson, Document};
use serde_json::{Map, Value as JsonValue};

/// A typed bus request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Connect(ConnectOverrides),
    Watch {
        namespace: String,
    },
    InsertOne {
        namespace: String,
        document: Document,
    },
    InsertMany {
        namespace: String,
        documents: Vec<Document>,
        options: InsertManyOptions,
    },
    Find {
        namespace: String,
        filter: Document,
        options: FindOptions,
    },
    FindOne {
        namespace: String,
        filter: Document,
        options: FindOptions,
    },
    FindById {
        namespace: String,
        id: Bson,
        options: FindOptions,
    },
    UpdateOne {
        namespace: String,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    },
    UpdateMany {
        namespace: String,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    },
    UpdateById {
        namespace: String,
        id: Bson,
        update: Document,
        options: UpdateOptions,
    },
    DeleteOne {
        namespace: String,
        filter: Document,
    },
    DeleteMany {
        namespace: String,
        filter: Document,
    },
    DeleteById {
        namespace: String,
        id: Bson,
    },
    Aggregate {
        namespace: String,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    },
    Distinct {
        namespace: String,
        field: String,
        filter: Document,
    },
    Count {
        namespace: String,
        filter: Document,
        options: CountOptions,
    },
    /// Find in `namespace`, then replace the ids stored in `field` with the
    /// matching documents from `foreign`.
    JoinById {
        namespace: String,
        filter: Document,
        field: String,
        foreign: String,
        options: FindOptions,
    },
    CreateIndexes {
        namespace: String,
        indexes: Vec<IndexSpec>,
    },
    OpenUploadStream {
        namespace: String,
        filename: String,
        data: Vec<u8>,
    },
    OpenDownloadStream {
        namespace: String,
        id: Bson,
    },
    DeleteFile {
        namespace: String,
        id: Bson,
    },
}

impl Request {
    /// Bus method name.
    pub fn method(&self) -> &'static str {
        match self {
            Request::Connect(_) => "mongo.connect",
            Request::Watch { .. } => "mongo.watch",
            Request::InsertOne { .. } => "mongo.insertOne",
            Request::InsertMany { .. } => "mongo.insertMany",
            Request::Find { .. } => "mongo.find",
            Request::FindOne { .. } => "mongo.findOne",
            Request::FindById { .. } => "mongo.findById",
            Request::UpdateOne { .. } => "mongo.updateOne",
            Request::UpdateMany { .. } => "mongo.updateMany",
            Request::UpdateById { .. } => "mongo.updateById",
            Request::DeleteOne { .. } => "mongo.deleteOne",
            Request::DeleteMany { .. } => "mongo.deleteMany",
            Request::DeleteById { .. } => "mongo.deleteById",
            Request::Aggregate { .. } => "mongo.aggregate",
            Request::Distinct { .. } => "mongo.distinct",
            Request::Count { .. } => "mongo.count",
            Request::JoinById { .. } => "mongo.joinById",
            Request::CreateIndexes { .. } => "mongo.createIndexes",
            Request::OpenUploadStream { .. } => "mongo.openUploadStream",
            Request::OpenDownloadStream { .. } => "mongo.openDownloadStream",
            Request::DeleteFile { .. } => "mongo.deleteFile",
        }
    }

    /// Target namespace, if the request has one.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Request::Connect(_) => None,
            Request::Watch { namespace }
            | Request::InsertOne { namespace, .. }
            | Request::InsertMany { namespace, .. }
            | Request::Find { namespace, .. }
            | Request::FindOne { namespace, .. }
            | Request::FindById { namespace, .. }
            | Request::UpdateOne { namespace, .. }
            | Request::UpdateMany { namespace, .. }
            | Request::UpdateById { namespace, .. }
            | Request::DeleteOne { namespace, .. }
            | Request::DeleteMany { namespace, .. }
            | Request::DeleteById { namespace, .. }
            | Request::Aggregate { namespace, .. }
            | Request::Distinct { namespace, .. }
            | Request::Count { namespace, .. }
            | Request::JoinById { namespace, .. }
            | Request::CreateIndexes { namespace, .. }
            | Request::OpenUploadStream { namespace, .. }
            | Request::OpenDownloadStream { namespace, .. }
            | Request::DeleteFile { namespace, .. } => Some(namespace),
        }
    }

    /// Decode a raw call. The `mongo.` prefix on the method is optional.
    pub fn from_call(method: &str, args: Vec<JsonValue>) -> Result<Self> {
        let name = method.strip_prefix("mongo.").unwrap_or(method);
        let mut args = Args::new(name, args);

        let request = match name {
            "connect" => Request::Connect(match args.optional() {
                Some(value) => serde_json::from_value(value)?,
                None => ConnectOverrides::default(),
            }),
            "watch" => Request::Watch {
                namespace: args.string("namespace")?,
            },
            "insertOne" => Request::InsertOne {
                namespace: args.string("namespace")?,
                document: args.document("document")?,
            },
            "insertMany" => Request::InsertMany {
                namespace: args.string("namespace")?,
                documents: args.documents("documents")?,
                options: insert_many_options(&args.options()?),
            },
            "find" => Request::Find {
                namespace: args.string("namespace")?,
                filter: args.filter()?,
                options: find_options(&args.options()?)?,
            },
            "findOne" => Request::FindOne {
                namespace: args.string("namespace")?,
                filter: args.filter()?,
                options: find_options(&args.options()?)?,
            },
            "findById" => Request::FindById {
                namespace: args.string("namespace")?,
                id: args.bson("id")?,
                options: find_options(&args.options()?)?,
            },
            "updateOne" | "updateMany" => {
                let namespace = args.string("namespace")?;
                let filter = args.document("filter")?;
                let update = args.document("update")?;
                let options = update_options(&args.options()?)?;
                if name == "updateOne" {
                    Request::UpdateOne {
                        namespace,
                        filter,
                        update,
                        options,
                    }
                } else {
                    Request::UpdateMany {
                        namespace,
                        filter,
                        update,
                        options,
                    }
                }
            }
            "updateById" => Request::UpdateById {
                namespace: args.string("namespace")?,
                id: args.bson("id")?,
                update: args.document("update")?,
                options: update_options(&args.options()?)?,
            },
            "deleteOne" => Request::DeleteOne {
                namespace: args.string("namespace")?,
                filter: args.document("filter")?,
            },
            "deleteMany" => Request::DeleteMany {
                namespace: args.string("namespace")?,
                filter: args.document("filter")?,
            },
            "deleteById" => Request::DeleteById {
                namespace: args.string("namespace")?,
                id: args.bson("id")?,
            },
            "aggregate" => Request::Aggregate {
                namespace: args.string("namespace")?,
                pipeline: args.documents("pipeline")?,
                options: aggregate_options(&args.options()?)?,
            },
            "distinct" => Request::Distinct {
                namespace: args.string("namespace")?,
                field: args.string("field")?,
                filter: args.filter()?,
            },
            "count" => Request::Count {
                namespace: args.string("namespace")?,
                filter: args.filter()?,
                options: count_options(&args.options()?),
            },
            "joinById" => Request::JoinById {
                namespace: args.string("namespace")?,
                filter: args.document("filter")?,
                field: args.string("field")?,
                foreign: args.string("foreign namespace")?,
                options: find_options(&args.options()?)?,
            },
            "createIndexes" => Request::CreateIndexes {
                namespace: args.string("namespace")?,
                indexes: args
                    .documents("indexes")?
                    .into_iter()
                    .map(index_spec)
                    .collect::<Result<_>>()?,
            },
            "openUploadStream" => Request::OpenUploadStream {
                namespace: args.string("namespace")?,
                filename: args.string("filename")?,
                data: json_to_bytes(&args.required("data")?)?,
            },
            "openDownloadStream" => Request::OpenDownloadStream {
                namespace: args.string("namespace")?,
                id: args.bson("id")?,
            },
            "deleteFile" => Request::DeleteFile {
                namespace: args.string("namespace")?,
                id: args.bson("id")?,
            },
            _ => return Err(MongoError::UnknownMethod(method.to_string())),
        };

        Ok(request)
    }
}

/// Positional argument reader.
struct Args {
    method: String,
    items: std::vec::IntoIter<JsonValue>,
}

impl Args {
    fn new(method: &str, args: Vec<JsonValue>) -> Self {
        Self {
            method: method.to_string(),
            items: args.into_iter(),
        }
    }

    /// Next argument, treating `null` as absent.
    fn optional(&mut self) -> Option<JsonValue> {
        self.items.next().filter(|v| !v.is_null())
    }

    fn required(&mut self, what: &str) -> Result<JsonValue> {
        self.optional().ok_or_else(|| {
            MongoError::invalid_argument(format!("{}: missing {}", self.method, what))
        })
    }

    fn string(&mut self, what: &str) -> Result<String> {
        match self.required(what)? {
            JsonValue::String(s) => Ok(s),
            other => Err(MongoError::invalid_argument(format!(
                "{}: {} must be a string, got {}",
                self.method, what, other
            ))),
        }
    }

    fn bson(&mut self, what: &str) -> Result<Bson> {
        Ok(json_to_bson(&self.required(what)?))
    }

    fn document(&mut self, what: &str) -> Result<Document> {
        json_to_bson_doc(&self.required(what)?)
    }

    /// A filter that defaults to `{}` when absent.
    fn filter(&mut self) -> Result<Document> {
        match self.optional() {
            Some(value) => json_to_bson_doc(&value),
            None => Ok(Document::new()),
        }
    }

    fn documents(&mut self, what: &str) -> Result<Vec<Document>> {
        match self.required(what)? {
            JsonValue::Array(items) => items.iter().map(json_to_bson_doc).collect(),
            _ => Err(MongoError::invalid_argument(format!(
                "{}: {} must be an array",
                self.method, what
            ))),
        }
    }

    /// Trailing options object, empty when absent.
    fn options(&mut self) -> Result<Map<String, JsonValue>> {
        match self.optional() {
            None => Ok(Map::new()),
            Some(JsonValue::Object(map)) => Ok(map),
            Some(_) => Err(MongoError::invalid_argument(format!(
                "{}: options must be an object",
                self.method
            ))),
        }
    }
}

fn opt_doc(opts: &Map<String, JsonValue>, key: &str) -> Result<Option<Document>> {
    opts.get(key).map(json_to_bson_doc).transpose()
}

fn opt_u64(opts: &Map<String, JsonValue>, key: &str) -> Option<u64> {
    opts.get(key).and_then(|v| v.as_u64())
}

/// A batch size: absent, or a non-negative integer that fits in `u32`.
fn opt_u32(opts: &Map<String, JsonValue>, key: &str) -> Result<Option<u32>> {
    match opts.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| {
                MongoError::invalid_argument(format!("{key} must be an integer between 0 and {}", u32::MAX))
            }),
    }
}

fn opt_bool(opts: &Map<String, JsonValue>, key: &str) -> Option<bool> {
    opts.get(key).and_then(|v| v.as_bool())
}

fn find_options(opts: &Map<String, JsonValue>) -> Result<FindOptions> {
    Ok(FindOptions {
        limit: opts.get("limit").and_then(|v| v.as_i64()),
        skip: opt_u64(opts, "skip"),
        sort: opt_doc(opts, "sort")?,
        projection: opt_doc(opts, "projection")?,
        batch_size: opt_u32(opts, "batchSize")?,
    })
}

fn update_options(opts: &Map<String, JsonValue>) -> Result<UpdateOptions> {
    let array_filters = match opts.get("arrayFilters") {
        Some(JsonValue::Array(items)) => {
            Some(items.iter().map(json_to_bson_doc).collect::<Result<Vec<_>>>()?)
        }
        _ => None,
    };
    Ok(UpdateOptions {
        upsert: opt_bool(opts, "upsert"),
        array_filters,
    })
}

fn insert_many_options(opts: &Map<String, JsonValue>) -> InsertManyOptions {
    InsertManyOptions {
        ordered: opt_bool(opts, "ordered"),
    }
}

fn aggregate_options(opts: &Map<String, JsonValue>) -> Result<AggregateOptions> {
    Ok(AggregateOptions {
        allow_disk_use: opt_bool(opts, "allowDiskUse"),
        batch_size: opt_u32(opts, "batchSize")?,
    })
}

fn count_options(opts: &Map<String, JsonValue>) -> CountOptions {
    CountOptions {
        limit: opt_u64(opts, "limit"),
        skip: opt_u64(opts, "skip"),
    }
}

fn index_spec(mut doc: Document) -> Result<IndexSpec> {
    let keys = match doc.remove("keys").or_else(|| doc.remove("key")) {
        Some(Bson::Document(keys)) => keys,
        _ => {
            return Err(MongoError::invalid_argument(
                "createIndexes: each index needs a keys document",
            ))
        }
    };
    let expire_after_seconds = match doc.get("expireAfterSeconds") {
        None | Some(Bson::Null) => None,
        Some(Bson::Int32(i)) if *i >= 0 => Some(*i as u64),
        Some(Bson::Int64(i)) if *i >= 0 => Some(*i as u64),
        Some(Bson::Double(f)) if *f >= 0.0 && f.is_finite() => Some(*f as u64),
        Some(other) => {
            return Err(MongoError::invalid_argument(format!(
                "createIndexes: expireAfterSeconds must be a non-negative number, got {other}"
            )))
        }
    };

    Ok(IndexSpec {
        keys,
        name: doc.get_str("name").ok().map(str::to_string),
        unique: doc.get_bool("unique").ok(),
        sparse: doc.get_bool("sparse").ok(),
        expire_after_seconds,
    })
}

/// A successful reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Accepted; nothing to return.
    Ack,
    Inserted(InsertOneResult),
    InsertedMany(InsertManyResult),
    Document(Option<Document>),
    Documents(Vec<Document>),
    Updated(UpdateResult),
    Deleted(DeleteResult),
    Values(Vec<Bson>),
    Count(u64),
    IndexNames(Vec<String>),
    FileId(Bson),
    File(Vec<u8>),
}

impl Reply {
    /// Encode as extended JSON.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Reply::Ack => serde_json::json!({ "ok": 1 }),
            Reply::Inserted(result) => {
                serde_json::json!({ "insertedId": bson_to_json(&result.inserted_id) })
            }
            Reply::InsertedMany(result) => {
                let ids: Map<String, JsonValue> = result
                    .inserted_ids
                    .iter()
                    .map(|(idx, id)| (idx.to_string(), bson_to_json(id)))
                    .collect();
                serde_json::json!({ "insertedIds": ids })
            }
            Reply::Document(doc) => doc.as_ref().map(bson_doc_to_json).unwrap_or(JsonValue::Null),
            Reply::Documents(docs) => JsonValue::Array(docs.iter().map(bson_doc_to_json).collect()),
            Reply::Updated(result) => serde_json::json!({
                "matchedCount": result.matched_count,
                "modifiedCount": result.modified_count,
                "upsertedId": result.upserted_id.as_ref().map(bson_to_json),
            }),
            Reply::Deleted(result) => serde_json::json!({ "deletedCount": result.deleted_count }),
            Reply::Values(values) => JsonValue::Array(values.iter().map(bson_to_json).collect()),
            Reply::Count(count) => serde_json::json!(count),
            Reply::IndexNames(names) => serde_json::json!(names),
            Reply::FileId(id) => serde_json::json!({ "id": bson_to_json(id) }),
            Reply::File(data) => serde_json::json!({
                "$binary": { "base64": STANDARD.encode(data), "subType": "00" }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde_json::json;

    #[test]
    fn test_decode_find_with_options() {
        let request = Request::from_call(
            "mongo.find",
            vec![
                json!("app.users"),
                json!({ "age": { "$gt": 21 } }),
                json!({ "limit": 10, "sort": { "name": 1 }, "batchSize": 50 }),
            ],
        )
        .unwrap();

        assert_eq!(
            request,
            Request::Find {
                namespace: "app.users".to_string(),
                filter: doc! { "age": { "$gt": 21_i64 } },
                options: FindOptions::builder()
                    .limit(10)
                    .sort(doc! { "name": 1_i64 })
                    .batch_size(50)
                    .build(),
            }
        );
    }

    #[test]
    fn test_decode_find_without_filter() {
        let request = Request::from_call("find", vec![json!("users")]).unwrap();
        assert!(matches!(
            request,
            Request::Find { ref filter, ref options, .. }
                if filter.is_empty() && *options == FindOptions::default()
        ));
    }

    #[test]
    fn test_decode_null_options() {
        let request = Request::from_call(
            "mongo.updateOne",
            vec![json!("app.users"), json!({ "a": 1 }), json!({ "$set": { "b": 2 } }), JsonValue::Null],
        )
        .unwrap();
        assert!(matches!(request, Request::UpdateOne { ref options, .. } if *options == UpdateOptions::default()));
    }

    #[test]
    fn test_decode_update_options() {
        let request = Request::from_call(
            "mongo.updateMany",
            vec![
                json!("app.users"),
                json!({}),
                json!({ "$set": { "x.$[e].ok": true } }),
                json!({ "upsert": true, "arrayFilters": [ { "e.id": 1 } ] }),
            ],
        )
        .unwrap();
        match request {
            Request::UpdateMany { options, .. } => {
                assert_eq!(options.upsert, Some(true));
                assert_eq!(options.array_filters.unwrap().len(), 1);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_decode_connect() {
        let request = Request::from_call("mongo.connect", vec![json!({ "host": "10.0.0.1", "port": 27018 })]).unwrap();
        assert_eq!(
            request,
            Request::Connect(ConnectOverrides {
                host: Some("10.0.0.1".to_string()),
                port: Some(27018),
                ..Default::default()
            })
        );
        assert_eq!(
            Request::from_call("mongo.connect", vec![]).unwrap(),
            Request::Connect(ConnectOverrides::default())
        );
    }

    #[test]
    fn test_decode_missing_argument() {
        let result = Request::from_call("mongo.insertOne", vec![json!("app.users")]);
        assert!(matches!(result, Err(MongoError::InvalidArgument(ref m)) if m.contains("document")));
    }

    #[test]
    fn test_decode_wrong_namespace_type() {
        let result = Request::from_call("mongo.deleteOne", vec![json!(42), json!({})]);
        assert!(matches!(result, Err(MongoError::InvalidArgument(_))));
    }

    #[test]
    fn test_decode_unknown_method() {
        let result = Request::from_call("mongo.dropDatabase", vec![]);
        assert!(matches!(result, Err(MongoError::UnknownMethod(_))));
    }

    #[test]
    fn test_decode_create_indexes() {
        let request = Request::from_call(
            "mongo.createIndexes",
            vec![
                json!("app.sessions"),
                json!([ { "keys": { "createdAt": 1 }, "expireAfterSeconds": 3600 }, { "key": { "email": 1 }, "unique": true } ]),
            ],
        )
        .unwrap();
        match request {
            Request::CreateIndexes { indexes, .. } => {
                assert_eq!(indexes.len(), 2);
                assert_eq!(indexes[0].expire_after_seconds, Some(3600));
                assert_eq!(indexes[1].unique, Some(true));
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_decode_create_indexes_without_keys() {
        let result = Request::from_call("mongo.createIndexes", vec![json!("a.b"), json!([{ "name": "x" }])]);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_negative_ttl_rejected() {
        let err = Request::from_call(
            "mongo.createIndexes",
            vec![json!("app.sessions"), json!([{ "keys": { "createdAt": 1 }, "expireAfterSeconds": -1 }])],
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Rejected);
        assert!(err.to_string().contains("expireAfterSeconds"));
    }

    #[test]
    fn test_decode_oversized_batch_size_rejected() {
        let find = Request::from_call(
            "mongo.find",
            vec![json!("app.users"), json!({}), json!({ "batchSize": 4_294_967_296u64 })],
        );
        assert!(matches!(find, Err(MongoError::InvalidArgument(_))));

        let aggregate = Request::from_call(
            "mongo.aggregate",
            vec![json!("app.users"), json!([]), json!({ "batchSize": -5 })],
        );
        assert!(matches!(aggregate, Err(MongoError::InvalidArgument(_))));

        let request = Request::from_call(
            "mongo.aggregate",
            vec![json!("app.users"), json!([]), json!({ "batchSize": 100 })],
        )
        .unwrap();
        match request {
            Request::Aggregate { options, .. } => assert_eq!(options.batch_size, Some(100)),
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_decode_upload() {
        let request = Request::from_call(
            "mongo.openUploadStream",
            vec![json!("app.fs"), json!("hello.txt"), json!("aGVsbG8=")],
        )
        .unwrap();
        assert!(matches!(request, Request::OpenUploadStream { ref data, .. } if data == b"hello"));
    }

    #[test]
    fn test_method_names_round_trip() {
        let request = Request::DeleteById {
            namespace: "a.b".to_string(),
            id: Bson::Int32(1),
        };
        assert_eq!(request.method(), "mongo.deleteById");
        assert_eq!(request.namespace(), Some("a.b"));
        assert_eq!(Request::Connect(ConnectOverrides::default()).namespace(), None);
    }

    #[test]
    fn test_reply_to_json() {
        assert_eq!(
            Reply::Inserted(InsertOneResult {
                inserted_id: Bson::Int32(7)
            })
            .to_json(),
            json!({ "insertedId": 7 })
        );
        assert_eq!(
            Reply::Updated(UpdateResult {
                matched_count: 1,
                modified_count: 1,
                upserted_id: None
            })
            .to_json(),
            json!({ "matchedCount": 1, "modifiedCount": 1, "upsertedId": null })
        );
        assert_eq!(Reply::Document(None).to_json(), JsonValue::Null);
        assert_eq!(Reply::Count(3).to_json(), json!(3));
        assert_eq!(Reply::File(b"hello".to_vec()).to_json()["$binary"]["base64"], "aGVsbG8=");
    }
}
