//! Events published on the bus.

use crate::document::{bson_doc_to_json, bson_to_json};
use bson::{Bson, Document};
use serde_json::Value as JsonValue;

/// Kind of database mutation carried by a change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Replace,
    Delete,
    /// The stream was invalidated (collection dropped or renamed).
    Invalidate,
    /// Any other operation type reported by the server.
    Other(String),
}

impl ChangeKind {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Replace => "replace",
            ChangeKind::Delete => "delete",
            ChangeKind::Invalidate => "invalidate",
            ChangeKind::Other(name) => name,
        }
    }
}

/// A normalized change-stream notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Full namespace, `database.collection`.
    pub ns: String,
    /// Collection name.
    pub coll: String,
    pub kind: ChangeKind,
    /// `_id` of the changed document.
    pub id: Option<Bson>,
    /// Full document (inserts, replaces, and updates via lookup).
    pub document: Option<Document>,
    /// Fields set by an update.
    pub updated_fields: Option<Document>,
    /// Fields removed by an update.
    pub removed_fields: Vec<String>,
}

impl ChangeEvent {
    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "ns": self.ns,
            "coll": self.coll,
            "kind": self.kind.as_str(),
            "_id": self.id.as_ref().map(bson_to_json).unwrap_or(JsonValue::Null),
            "document": self.document.as_ref().map(bson_doc_to_json).unwrap_or(JsonValue::Null),
            "updatedFields": self
                .updated_fields
                .as_ref()
                .map(bson_doc_to_json)
                .unwrap_or(JsonValue::Null),
            "removedFields": self.removed_fields,
        })
    }
}

/// Lifecycle and change notifications broadcast to bus subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    Disconnected,
    Change(ChangeEvent),
}

impl Event {
    /// Bus event name.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connected => "mongo.connected",
            Event::Disconnected => "mongo.disconnected",
            Event::Change(change) => match change.kind {
                ChangeKind::Insert => "mongo.insert",
                ChangeKind::Update => "mongo.update",
                ChangeKind::Replace => "mongo.replace",
                ChangeKind::Delete => "mongo.delete",
                ChangeKind::Invalidate | ChangeKind::Other(_) => "mongo.change",
            },
        }
    }

    /// Event payload as JSON.
    pub fn payload(&self) -> JsonValue {
        match self {
            Event::Connected | Event::Disconnected => JsonValue::Null,
            Event::Change(change) => change.to_json(),
        }
    }
}
