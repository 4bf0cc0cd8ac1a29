//! # mongo-bus
//!
//! Message-bus adapter for MongoDB.
//!
//! This crate exposes a MongoDB connection as bus RPCs: CRUD, aggregation,
//! index creation and GridFS calls in, replies out, plus a change feed that
//! republishes database mutations as bus events.
//!
//! ## Features
//!
//! - Connect with fixed-interval retry and heartbeat liveness monitoring
//! - Typed requests with explicit options structs
//! - Positional-JSON raw calls (`"mongo.find", [ns, filter, options]`)
//! - Namespace aliases, `_id` promotion and update operator checks
//! - Change streams re-attached on every reconnect
//!
//! ## Quick Start
//!
//! ```ignore
//! use mongo_bus::{Bus, Config, ConnectionManager, Dispatcher, MongoConnector};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> mongo_bus::Result<()> {
//!     let config = Config::default().with_alias("users", "app.users");
//!     let manager = ConnectionManager::new(config, Arc::new(MongoConnector));
//!     manager.connect();
//!
//!     let (bus, _serve) = Bus::start(Dispatcher::new(manager.clone()));
//!     let mut events = bus.subscribe();
//!     events.recv().await.expect("connected");
//!
//!     let reply = bus
//!         .call_raw("mongo.insertOne", vec![json!("users"), json!({ "name": "John" })])
//!         .await?;
//!     println!("inserted {}", reply["insertedId"]);
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod event;
pub mod feed;
pub mod mongo;
pub mod namespace;
pub mod request;
pub mod sanitize;
pub mod store;

// Re-export main types
pub use bus::{error_to_json, Bus, Envelope};
pub use client::{ConnectionManager, ConnectionState};
pub use config::{Config, ConnectOverrides, DriverOptions, DriverOptionsBuilder};
pub use dispatch::Dispatcher;
pub use error::{Disposition, ErrorKind, MongoError, Result};
pub use event::{ChangeEvent, ChangeKind, Event};
pub use feed::ChangeFeed;
pub use mongo::{MongoConnector, MongoStore};
pub use namespace::Namespace;
pub use request::{Reply, Request};
pub use sanitize::{check_json, check_operators, MAX_SANITIZE_DEPTH};
pub use store::{
    AggregateOptions, ChangeStream, Connector, CountOptions, DeleteResult, DocumentStore,
    FindOptions, FindOptionsBuilder, IndexSpec, InsertManyOptions, InsertManyResult,
    InsertOneResult, UpdateOptions, UpdateOptionsBuilder, UpdateResult,
};

// Re-export bson for convenience
pub use bson;
pub use bson::doc;

/// Prelude module for common imports.
pub mod prelude {
    pub use super::bus::Bus;
    pub use super::client::{ConnectionManager, ConnectionState};
    pub use super::config::Config;
    pub use super::dispatch::Dispatcher;
    pub use super::error::{ErrorKind, MongoError, Result};
    pub use super::event::Event;
    pub use super::mongo::MongoConnector;
    pub use super::request::{Reply, Request};
    pub use super::store::{FindOptions, UpdateOptions};
    pub use bson::{doc, Document};
}

/// Get the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(version(), "0.1.0");
    }

    #[test]
    fn test_doc_macro() {
        let document = doc! {
            "name": "John",
            "age": 30,
            "active": true,
        };
        assert_eq!(document.get_str("name").unwrap(), "John");
        assert_eq!(document.get_i32("age").unwrap(), 30);
        assert!(document.get_bool("active").unwrap());
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let _: Result<()> = Ok(());
        let _doc = doc! { "test": 1 };
        let _ = Config::default();
    }

    #[test]
    fn test_error_kind_variants() {
        let _ = ErrorKind::NotReady;
        let _ = ErrorKind::Rejected;
        let _ = ErrorKind::Connection;
        let _ = ErrorKind::Authentication;
        let _ = ErrorKind::Write;
        let _ = ErrorKind::Command;
        let _ = ErrorKind::Serialization;
        let _ = ErrorKind::Internal;
        let _ = ErrorKind::Network;
    }
}
