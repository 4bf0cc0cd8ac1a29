//! Document helpers: extended-JSON conversion, id promotion and update hygiene.

use crate::error::{MongoError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bson::{oid::ObjectId, spec::BinarySubtype, Bson, Document};
use serde_json::Value as JsonValue;

/// Length of the hex form of an ObjectId.
const OBJECT_ID_HEX_LEN: usize = 24;

/// Convert a BSON document to JSON.
pub fn bson_doc_to_json(doc: &Document) -> JsonValue {
    let mut map = serde_json::Map::new();
    for (k, v) in doc {
        map.insert(k.clone(), bson_to_json(v));
    }
    JsonValue::Object(map)
}

/// Convert a BSON value to extended JSON.
pub fn bson_to_json(bson: &Bson) -> JsonValue {
    match bson {
        Bson::Double(v) => serde_json::json!(*v),
        Bson::String(v) => serde_json::json!(v),
        Bson::Array(arr) => JsonValue::Array(arr.iter().map(bson_to_json).collect()),
        Bson::Document(doc) => bson_doc_to_json(doc),
        Bson::Boolean(v) => serde_json::json!(*v),
        Bson::Null | Bson::Undefined => JsonValue::Null,
        Bson::Int32(v) => serde_json::json!(*v),
        Bson::Int64(v) => serde_json::json!(*v),
        Bson::ObjectId(oid) => serde_json::json!({ "$oid": oid.to_hex() }),
        Bson::DateTime(dt) => serde_json::json!({ "$date": dt.timestamp_millis() }),
        Bson::Binary(bin) => serde_json::json!({
            "$binary": {
                "base64": STANDARD.encode(&bin.bytes),
                "subType": format!("{:02x}", u8::from(bin.subtype)),
            }
        }),
        Bson::RegularExpression(regex) => {
            serde_json::json!({ "$regex": regex.pattern.clone(), "$options": regex.options.clone() })
        }
        Bson::Timestamp(ts) => {
            serde_json::json!({ "$timestamp": { "t": ts.time, "i": ts.increment } })
        }
        other => serde_json::json!(other.to_string()),
    }
}

/// Convert extended JSON to BSON.
pub fn json_to_bson(json: &JsonValue) -> Bson {
    match json {
        JsonValue::Null => Bson::Null,
        JsonValue::Bool(v) => Bson::Boolean(*v),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bson::Int64(i)
            } else if let Some(f) = n.as_f64() {
                Bson::Double(f)
            } else {
                Bson::Null
            }
        }
        JsonValue::String(s) => Bson::String(s.clone()),
        JsonValue::Array(arr) => Bson::Array(arr.iter().map(json_to_bson).collect()),
        JsonValue::Object(obj) => {
            if let Some(oid) = obj.get("$oid").and_then(|v| v.as_str()) {
                if let Ok(oid) = ObjectId::parse_str(oid) {
                    return Bson::ObjectId(oid);
                }
            }
            if let Some(date) = obj.get("$date").and_then(json_to_datetime) {
                return Bson::DateTime(date);
            }
            if let Some(binary) = obj.get("$binary").and_then(json_to_binary) {
                return Bson::Binary(binary);
            }

            let mut doc = Document::new();
            for (k, v) in obj {
                doc.insert(k.clone(), json_to_bson(v));
            }
            Bson::Document(doc)
        }
    }
}

/// `$date` as integer millis, an RFC 3339 string or `{"$numberLong": "..."}`.
fn json_to_datetime(value: &JsonValue) -> Option<bson::DateTime> {
    match value {
        JsonValue::Number(n) => n.as_i64().map(bson::DateTime::from_millis),
        JsonValue::String(s) => bson::DateTime::parse_rfc3339_str(s).ok(),
        JsonValue::Object(obj) => obj
            .get("$numberLong")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<i64>().ok())
            .map(bson::DateTime::from_millis),
        _ => None,
    }
}

fn json_to_binary(json: &JsonValue) -> Option<bson::Binary> {
    let bytes = STANDARD.decode(json.get("base64")?.as_str()?).ok()?;
    let subtype = json
        .get("subType")
        .and_then(|v| v.as_str())
        .and_then(|s| u8::from_str_radix(s, 16).ok())
        .unwrap_or(0);
    Some(bson::Binary {
        subtype: BinarySubtype::from(subtype),
        bytes,
    })
}

/// Convert JSON to a BSON document.
pub fn json_to_bson_doc(json: &JsonValue) -> Result<Document> {
    match json_to_bson(json) {
        Bson::Document(doc) => Ok(doc),
        _ => Err(MongoError::Deserialization("Expected document".to_string())),
    }
}

/// Decode raw file content: a `$binary` object or a base64 string.
pub fn json_to_bytes(json: &JsonValue) -> Result<Vec<u8>> {
    match json_to_bson(json) {
        Bson::Binary(bin) => Ok(bin.bytes),
        Bson::String(s) => STANDARD
            .decode(s.as_bytes())
            .map_err(|e| MongoError::Deserialization(format!("invalid base64: {e}"))),
        _ => Err(MongoError::Deserialization(
            "Expected binary or base64 string".to_string(),
        )),
    }
}

/// Promote a single id value.
///
/// Only 24-character hex strings become ObjectIds; everything else is returned
/// unchanged.
pub fn promote_id(id: Bson) -> Bson {
    if let Bson::String(s) = &id {
        if let Some(oid) = promote_str(s) {
            return Bson::ObjectId(oid);
        }
    }
    id
}

/// Promote every `_id` string in a filter or document, at any depth.
///
/// Operator documents under `_id` (`{"$in": [...]}`) are walked so each
/// listed id is promoted as well.
pub fn promote_ids(doc: &mut Document) {
    for (key, value) in doc.iter_mut() {
        if key == "_id" {
            promote_id_value(value);
        } else {
            promote_nested(value);
        }
    }
}

fn promote_id_value(value: &mut Bson) {
    match value {
        Bson::String(s) => {
            if let Some(oid) = promote_str(s) {
                *value = Bson::ObjectId(oid);
            }
        }
        Bson::Array(items) => items.iter_mut().for_each(promote_id_value),
        Bson::Document(ops) => {
            for (op, operand) in ops.iter_mut() {
                if op.starts_with('$') {
                    promote_id_value(operand);
                }
            }
        }
        _ => {}
    }
}

fn promote_nested(value: &mut Bson) {
    match value {
        Bson::Document(doc) => promote_ids(doc),
        Bson::Array(items) => items.iter_mut().for_each(promote_nested),
        _ => {}
    }
}

fn promote_str(s: &str) -> Option<ObjectId> {
    if s.len() != OBJECT_ID_HEX_LEN {
        tracing::debug!(id = %s, "id is not 24 characters, leaving as string");
        return None;
    }
    match ObjectId::parse_str(s) {
        Ok(oid) => Some(oid),
        Err(_) => {
            tracing::debug!(id = %s, "id is not hex, leaving as string");
            None
        }
    }
}

/// Remove `_id` from a `$set` so an update cannot change a document's identity.
///
/// Returns true when a key was removed.
pub fn strip_set_id(update: &mut Document) -> bool {
    match update.get_mut("$set") {
        Some(Bson::Document(set)) => {
            let removed = set.remove("_id").is_some();
            if removed {
                tracing::debug!("dropped _id from $set");
            }
            removed
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    const HEX: &str = "507f1f77bcf86cd799439011";

    #[test]
    fn test_bson_doc_to_json() {
        let doc = doc! {
            "name": "John",
            "age": 30,
            "active": true,
            "tags": ["a", "b"],
        };
        let json = bson_doc_to_json(&doc);
        assert_eq!(json.get("name").unwrap().as_str().unwrap(), "John");
        assert_eq!(json.get("age").unwrap().as_i64().unwrap(), 30);
        assert!(json.get("active").unwrap().as_bool().unwrap());
        assert_eq!(json.get("tags").unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_json_to_bson_with_oid() {
        let json = serde_json::json!({ "$oid": HEX });
        assert_eq!(
            json_to_bson(&json),
            Bson::ObjectId(ObjectId::parse_str(HEX).unwrap())
        );
    }

    #[test]
    fn test_json_to_bson_with_date() {
        let json = serde_json::json!({ "$date": 1704067200000_i64 });
        assert!(matches!(json_to_bson(&json), Bson::DateTime(_)));
    }

    #[test]
    fn test_json_to_bson_with_iso_date() {
        let json = serde_json::json!({ "$date": "2024-01-01T00:00:00Z" });
        assert_eq!(
            json_to_bson(&json),
            Bson::DateTime(bson::DateTime::from_millis(1704067200000))
        );

        let json = serde_json::json!({ "$date": { "$numberLong": "1704067200000" } });
        assert_eq!(
            json_to_bson(&json),
            Bson::DateTime(bson::DateTime::from_millis(1704067200000))
        );
    }

    #[test]
    fn test_json_to_bson_with_bad_date_string() {
        let json = serde_json::json!({ "$date": "yesterday" });
        assert!(matches!(json_to_bson(&json), Bson::Document(_)));
    }

    #[test]
    fn test_binary_round_trip() {
        let bin = Bson::Binary(bson::Binary {
            subtype: BinarySubtype::Generic,
            bytes: b"hello".to_vec(),
        });
        let json = bson_to_json(&bin);
        assert_eq!(json["$binary"]["base64"], "aGVsbG8=");
        assert_eq!(json_to_bson(&json), bin);
    }

    #[test]
    fn test_json_to_bytes() {
        assert_eq!(json_to_bytes(&serde_json::json!("aGVsbG8=")).unwrap(), b"hello");
        assert!(json_to_bytes(&serde_json::json!(42)).is_err());
    }

    #[test]
    fn test_json_to_bson_doc_error() {
        let json = serde_json::json!("not a document");
        let result = json_to_bson_doc(&json);
        assert!(matches!(result, Err(MongoError::Deserialization(_))));
    }

    #[test]
    fn test_promote_24_char_id() {
        let mut filter = doc! { "_id": HEX };
        promote_ids(&mut filter);
        assert_eq!(
            filter.get("_id"),
            Some(&Bson::ObjectId(ObjectId::parse_str(HEX).unwrap()))
        );
    }

    #[test]
    fn test_promote_leaves_short_ids() {
        let mut filter = doc! { "_id": "abc123" };
        promote_ids(&mut filter);
        assert_eq!(filter.get_str("_id").unwrap(), "abc123");
    }

    #[test]
    fn test_promote_leaves_24_char_non_hex() {
        let mut filter = doc! { "_id": "zzzzzzzzzzzzzzzzzzzzzzzz" };
        promote_ids(&mut filter);
        assert_eq!(filter.get_str("_id").unwrap(), "zzzzzzzzzzzzzzzzzzzzzzzz");
    }

    #[test]
    fn test_promote_is_idempotent() {
        let mut filter = doc! { "_id": HEX };
        promote_ids(&mut filter);
        let once = filter.clone();
        promote_ids(&mut filter);
        assert_eq!(filter, once);
    }

    #[test]
    fn test_promote_inside_operators() {
        let mut filter = doc! {
            "_id": { "$in": [HEX, "short"] },
            "$or": [ { "_id": HEX } ],
            "ref": HEX,
        };
        promote_ids(&mut filter);
        let oid = Bson::ObjectId(ObjectId::parse_str(HEX).unwrap());
        let ins = filter.get_document("_id").unwrap().get_array("$in").unwrap();
        assert_eq!(ins[0], oid);
        assert_eq!(ins[1], Bson::String("short".to_string()));
        let or = filter.get_array("$or").unwrap();
        assert_eq!(or[0].as_document().unwrap().get("_id"), Some(&oid));
        // only fields named _id are touched
        assert_eq!(filter.get_str("ref").unwrap(), HEX);
    }

    #[test]
    fn test_promote_id_scalar() {
        assert!(matches!(promote_id(Bson::String(HEX.to_string())), Bson::ObjectId(_)));
        assert_eq!(promote_id(Bson::Int32(7)), Bson::Int32(7));
    }

    #[test]
    fn test_strip_set_id() {
        let mut update = doc! { "$set": { "_id": "x", "name": "y" } };
        assert!(strip_set_id(&mut update));
        assert_eq!(update, doc! { "$set": { "name": "y" } });
    }

    #[test]
    fn test_strip_set_id_noop() {
        let mut update = doc! { "$inc": { "count": 1 } };
        assert!(!strip_set_id(&mut update));
        assert_eq!(update, doc! { "$inc": { "count": 1 } });
    }
}
