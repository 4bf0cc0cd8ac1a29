//! Namespace parsing and alias resolution.

use crate::error::{MongoError, Result};
use std::collections::HashMap;
use std::fmt;

/// A resolved `database.collection` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub db: String,
    pub coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// Split a dotted namespace on its first dot.
    ///
    /// Anything after the first dot belongs to the collection, so
    /// `"app.fs.files"` names the `fs.files` collection of a GridFS bucket.
    /// Returns `None` for a bare token.
    pub fn parse(s: &str) -> Option<Self> {
        let (db, coll) = s.split_once('.')?;
        if db.is_empty() || coll.is_empty() {
            return None;
        }
        Some(Self::new(db, coll))
    }

    /// Resolve a dotted namespace, or look a bare token up in the alias table.
    pub fn resolve(s: &str, aliases: &HashMap<String, String>) -> Result<Self> {
        if s.contains('.') {
            return Self::parse(s)
                .ok_or_else(|| MongoError::invalid_argument(format!("malformed namespace: {s}")));
        }

        match aliases.get(s).and_then(|target| Self::parse(target)) {
            Some(ns) => Ok(ns),
            None => {
                tracing::error!(namespace = %s, "cannot find namespace in config");
                Err(MongoError::NamespaceNotFound(s.to_string()))
            }
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("users".to_string(), "app.users".to_string());
        map.insert("broken".to_string(), "nodot".to_string());
        map
    }

    #[test]
    fn test_parse_two_segments() {
        let ns = Namespace::parse("db.coll").unwrap();
        assert_eq!(ns.db, "db");
        assert_eq!(ns.coll, "coll");
    }

    #[test]
    fn test_parse_three_segments_keeps_tail() {
        let ns = Namespace::parse("db.coll.extra").unwrap();
        assert_eq!(ns.db, "db");
        assert_eq!(ns.coll, "coll.extra");
    }

    #[test]
    fn test_parse_bare_token() {
        assert!(Namespace::parse("users").is_none());
    }

    #[test]
    fn test_resolve_alias() {
        let ns = Namespace::resolve("users", &aliases()).unwrap();
        assert_eq!(ns, Namespace::new("app", "users"));
    }

    #[test]
    fn test_resolve_missing_alias() {
        let result = Namespace::resolve("orders", &aliases());
        assert!(matches!(result, Err(MongoError::NamespaceNotFound(ref n)) if n == "orders"));
    }

    #[test]
    fn test_resolve_alias_without_dot() {
        let result = Namespace::resolve("broken", &aliases());
        assert!(matches!(result, Err(MongoError::NamespaceNotFound(_))));
    }

    #[test]
    fn test_resolve_malformed() {
        let result = Namespace::resolve(".coll", &HashMap::new());
        assert!(matches!(result, Err(MongoError::InvalidArgument(_))));
    }

    #[test]
    fn test_display() {
        assert_eq!(Namespace::new("a", "b.c").to_string(), "a.b.c");
    }
}
