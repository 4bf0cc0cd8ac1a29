//! Error types for bus operations and connection handling.

use thiserror::Error;

/// Server code for "not primary and secondaryOk=false".
pub const NOT_PRIMARY_NO_SECONDARY_OK: i32 = 13435;

/// All errors that can occur while serving bus requests.
#[derive(Debug, Clone, Error)]
pub enum MongoError {
    /// No connection has been established yet.
    #[error("client not ready")]
    NotReady,

    /// A bare namespace token has no entry in the alias table.
    #[error("cannot find namespace in config: {0}")]
    NamespaceNotFound(String),

    /// An update payload used an operator outside the allowed list.
    #[error("operator not allowed: {0}")]
    OperatorNotAllowed(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Authentication error.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Server selection error.
    #[error("server selection error: {0}")]
    ServerSelection(String),

    /// The node stepped down or is a secondary during a topology change.
    #[error("not primary and secondaryOk=false: {0}")]
    NotPrimaryNoSecondaryOk(String),

    /// Write error.
    #[error("write error: {message}")]
    Write {
        /// Error code from server.
        code: Option<i32>,
        /// Error message.
        message: String,
    },

    /// Command error.
    #[error("command error: {message}")]
    Command {
        /// Error code from server.
        code: i32,
        /// Error message.
        message: String,
    },

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown bus method.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// BSON error.
    #[error("bson error: {0}")]
    Bson(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error outside the driver (files, stdio).
    #[error("io error: {0}")]
    Io(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MongoError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        MongoError::Connection(msg.into())
    }

    /// Create a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        MongoError::Network(msg.into())
    }

    /// Create a write error.
    pub fn write(code: Option<i32>, message: impl Into<String>) -> Self {
        MongoError::Write {
            code,
            message: message.into(),
        }
    }

    /// Create a command error.
    pub fn command(code: i32, message: impl Into<String>) -> Self {
        MongoError::Command {
            code,
            message: message.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        MongoError::InvalidArgument(msg.into())
    }

    /// Get the error code if available.
    pub fn code(&self) -> Option<i32> {
        match self {
            MongoError::Write { code, .. } => *code,
            MongoError::Command { code, .. } => Some(*code),
            MongoError::NotPrimaryNoSecondaryOk(_) => Some(NOT_PRIMARY_NO_SECONDARY_OK),
            _ => None,
        }
    }

    /// Decide how the connection manager reacts to this error.
    pub fn disposition(&self) -> Disposition {
        match self {
            MongoError::NotPrimaryNoSecondaryOk(_) => Disposition::Suppress,
            MongoError::Network(_) | MongoError::ServerSelection(_) => Disposition::Retry,
            _ => Disposition::Report,
        }
    }
}

impl From<serde_json::Error> for MongoError {
    fn from(err: serde_json::Error) -> Self {
        MongoError::Serialization(err.to_string())
    }
}

impl From<bson::ser::Error> for MongoError {
    fn from(err: bson::ser::Error) -> Self {
        MongoError::Bson(err.to_string())
    }
}

impl From<bson::de::Error> for MongoError {
    fn from(err: bson::de::Error) -> Self {
        MongoError::Bson(err.to_string())
    }
}

impl From<std::io::Error> for MongoError {
    fn from(err: std::io::Error) -> Self {
        MongoError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for MongoError {
    fn from(err: toml::de::Error) -> Self {
        MongoError::Config(err.to_string())
    }
}

impl From<mongodb::error::Error> for MongoError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::{ErrorKind as DriverKind, WriteFailure};

        match err.kind.as_ref() {
            DriverKind::Io(_) | DriverKind::ConnectionPoolCleared { .. } => {
                MongoError::Network(err.to_string())
            }
            DriverKind::ServerSelection { .. } => MongoError::ServerSelection(err.to_string()),
            DriverKind::Authentication { .. } => MongoError::Authentication(err.to_string()),
            DriverKind::InvalidArgument { .. } => MongoError::InvalidArgument(err.to_string()),
            DriverKind::Command(cmd) if cmd.code == NOT_PRIMARY_NO_SECONDARY_OK => {
                MongoError::NotPrimaryNoSecondaryOk(cmd.message.clone())
            }
            DriverKind::Command(cmd) => MongoError::command(cmd.code, cmd.message.clone()),
            DriverKind::Write(WriteFailure::WriteError(w)) => {
                MongoError::write(Some(w.code), w.message.clone())
            }
            DriverKind::Write(WriteFailure::WriteConcernError(w)) => {
                MongoError::write(Some(w.code), w.message.clone())
            }
            DriverKind::InsertMany(failure) => {
                let write_errors = failure
                    .write_errors
                    .iter()
                    .flatten()
                    .map(|w| (w.code, w.message.as_str()));
                let concern = failure
                    .write_concern_error
                    .iter()
                    .map(|w| (w.code, w.message.as_str()));
                first_write_error(write_errors.chain(concern), &err.to_string())
            }
            DriverKind::BsonDeserialization(_) => MongoError::Deserialization(err.to_string()),
            DriverKind::BsonSerialization(_) => MongoError::Serialization(err.to_string()),
            _ => MongoError::Internal(err.to_string()),
        }
    }
}

/// A write error carrying the first reported server code, if there is one.
fn first_write_error<'a>(
    mut errors: impl Iterator<Item = (i32, &'a str)>,
    fallback: &str,
) -> MongoError {
    match errors.next() {
        Some((code, message)) => MongoError::write(Some(code), message),
        None => MongoError::write(None, fallback),
    }
}

/// Result type alias for bus operations.
pub type Result<T> = std::result::Result<T, MongoError>;

/// What the connection manager does with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Expected during topology transitions; logged at debug and dropped.
    Suppress,
    /// Transient network failure; try again after the retry interval.
    Retry,
    /// Logged and surfaced, never retried.
    Report,
}

/// Error kind enumeration for pattern matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No connection yet.
    NotReady,
    /// Namespace or operator rejected before reaching the driver.
    Rejected,
    /// Connection error.
    Connection,
    /// Authentication error.
    Authentication,
    /// Write error.
    Write,
    /// Command error.
    Command,
    /// Serialization error.
    Serialization,
    /// Internal error.
    Internal,
    /// Network error.
    Network,
}

impl MongoError {
    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MongoError::NotReady => ErrorKind::NotReady,
            MongoError::NamespaceNotFound(_)
            | MongoError::OperatorNotAllowed(_)
            | MongoError::InvalidArgument(_)
            | MongoError::UnknownMethod(_) => ErrorKind::Rejected,
            MongoError::Connection(_) => ErrorKind::Connection,
            MongoError::Authentication(_) => ErrorKind::Authentication,
            MongoError::Write { .. } => ErrorKind::Write,
            MongoError::Command { .. } | MongoError::NotPrimaryNoSecondaryOk(_) => {
                ErrorKind::Command
            }
            MongoError::Serialization(_) | MongoError::Deserialization(_) | MongoError::Bson(_) => {
                ErrorKind::Serialization
            }
            MongoError::Network(_) | MongoError::ServerSelection(_) => ErrorKind::Network,
            MongoError::Config(_) | MongoError::Io(_) | MongoError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_display() {
        assert_eq!(MongoError::NotReady.to_string(), "client not ready");
    }

    #[test]
    fn test_namespace_not_found_display() {
        let err = MongoError::NamespaceNotFound("users".to_string());
        assert_eq!(err.to_string(), "cannot find namespace in config: users");
    }

    #[test]
    fn test_write_error() {
        let err = MongoError::write(Some(11000), "duplicate key error");
        assert!(err.to_string().contains("duplicate key error"));
        assert_eq!(err.code(), Some(11000));
    }

    #[test]
    fn test_command_error() {
        let err = MongoError::command(59, "command not found");
        assert!(err.to_string().contains("command not found"));
        assert_eq!(err.code(), Some(59));
    }

    #[test]
    fn test_disposition() {
        assert_eq!(
            MongoError::network("connection refused").disposition(),
            Disposition::Retry
        );
        assert_eq!(
            MongoError::ServerSelection("no servers".to_string()).disposition(),
            Disposition::Retry
        );
        assert_eq!(
            MongoError::NotPrimaryNoSecondaryOk("stepdown".to_string()).disposition(),
            Disposition::Suppress
        );
        assert_eq!(
            MongoError::Authentication("bad password".to_string()).disposition(),
            Disposition::Report
        );
        assert_eq!(MongoError::NotReady.disposition(), Disposition::Report);
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(MongoError::NotReady.kind(), ErrorKind::NotReady);
        assert_eq!(
            MongoError::OperatorNotAllowed("$where".to_string()).kind(),
            ErrorKind::Rejected
        );
        assert_eq!(MongoError::network("x").kind(), ErrorKind::Network);
    }

    #[test]
    fn test_insert_many_failure_keeps_first_code() {
        let errors = vec![(11000, "E11000 duplicate key"), (121, "validation failed")];
        let err = first_write_error(errors.into_iter(), "insert many failed");
        assert_eq!(err.code(), Some(11000));
        assert!(err.to_string().contains("duplicate key"));
        assert_eq!(err.disposition(), Disposition::Report);
    }

    #[test]
    fn test_insert_many_failure_without_details() {
        let err = first_write_error(std::iter::empty(), "insert many failed");
        assert!(matches!(err, MongoError::Write { code: None, ref message } if message == "insert many failed"));
    }

    #[test]
    fn test_not_primary_code() {
        let err = MongoError::NotPrimaryNoSecondaryOk("x".to_string());
        assert_eq!(err.code(), Some(NOT_PRIMARY_NO_SECONDARY_OK));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: MongoError = json_err.into();
        assert!(matches!(err, MongoError::Serialization(_)));
    }
}
