//! Operator sanitizer for inbound write payloads.
//!
//! Walks a document tree and rejects any `$`-prefixed key that is not in the
//! allowed list. Untrusted payloads can nest arbitrarily, so the walk stops at
//! [`MAX_SANITIZE_DEPTH`] and rejects anything deeper.

use crate::document::json_to_bson;
use crate::error::{MongoError, Result};
use bson::{Bson, Document};
use serde_json::Value as JsonValue;

/// Maximum nesting depth accepted by the sanitizer.
pub const MAX_SANITIZE_DEPTH: usize = 32;

/// Check a document against the allowed operator list.
pub fn check_operators(doc: &Document, allowed: &[String]) -> Result<()> {
    walk_document(doc, allowed, 0)
}

/// Check a raw JSON body, as received from a client, against the allowed list.
pub fn check_json(body: &JsonValue, allowed: &[String]) -> Result<()> {
    walk(&json_to_bson(body), allowed, 0)
}

fn walk_document(doc: &Document, allowed: &[String], depth: usize) -> Result<()> {
    if depth >= MAX_SANITIZE_DEPTH {
        return Err(MongoError::invalid_argument(format!(
            "document nested deeper than {MAX_SANITIZE_DEPTH} levels"
        )));
    }
    for (key, value) in doc {
        if key.starts_with('$') && !allowed.iter().any(|op| op == key) {
            tracing::warn!(operator = %key, "rejected operator");
            return Err(MongoError::OperatorNotAllowed(key.clone()));
        }
        walk(value, allowed, depth + 1)?;
    }
    Ok(())
}

fn walk(value: &Bson, allowed: &[String], depth: usize) -> Result<()> {
    match value {
        Bson::Document(doc) => walk_document(doc, allowed, depth),
        Bson::Array(items) => {
            if depth >= MAX_SANITIZE_DEPTH {
                return Err(MongoError::invalid_argument(format!(
                    "document nested deeper than {MAX_SANITIZE_DEPTH} levels"
                )));
            }
            items
                .iter()
                .try_for_each(|item| walk(item, allowed, depth + 1))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ALLOWED_UPDATE_OPERATORS;
    use bson::doc;

    fn allowed() -> Vec<String> {
        DEFAULT_ALLOWED_UPDATE_OPERATORS
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_allows_listed_operators() {
        let update = doc! { "$set": { "name": "y" }, "$push": { "tags": { "$each": ["a"] } } };
        assert!(check_operators(&update, &allowed()).is_ok());
    }

    #[test]
    fn test_rejects_where() {
        let body = serde_json::json!({ "$where": "sleep(1000)" });
        let result = check_json(&body, &allowed());
        assert!(matches!(result, Err(MongoError::OperatorNotAllowed(ref op)) if op == "$where"));
    }

    #[test]
    fn test_rejects_nested_operator() {
        let update = doc! { "$set": { "profile": { "$function": "x" } } };
        let result = check_operators(&update, &allowed());
        assert!(matches!(result, Err(MongoError::OperatorNotAllowed(_))));
    }

    #[test]
    fn test_rejects_operator_inside_array() {
        let body = serde_json::json!({ "items": [ { "ok": 1 }, { "$expr": 1 } ] });
        assert!(check_json(&body, &allowed()).is_err());
    }

    #[test]
    fn test_plain_payload_passes() {
        let body = serde_json::json!({ "name": "a", "nested": { "list": [1, 2, { "x": 3 }] } });
        assert!(check_json(&body, &[]).is_ok());
    }

    #[test]
    fn test_depth_bound() {
        let mut doc = doc! { "leaf": 1 };
        for _ in 0..MAX_SANITIZE_DEPTH + 1 {
            doc = doc! { "n": doc };
        }
        let result = check_operators(&doc, &allowed());
        assert!(matches!(result, Err(MongoError::InvalidArgument(_))));
    }
}
