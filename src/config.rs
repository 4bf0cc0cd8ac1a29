//! Adapter configuration.

use crate::error::{MongoError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default retry interval after a network failure (10 seconds).
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 10_000;

/// Default liveness ping interval (10 seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10_000;

/// Update operators accepted by the sanitizer unless configured otherwise.
pub const DEFAULT_ALLOWED_UPDATE_OPERATORS: &[&str] = &[
    "$set",
    "$unset",
    "$setOnInsert",
    "$inc",
    "$mul",
    "$min",
    "$max",
    "$rename",
    "$currentDate",
    "$push",
    "$pull",
    "$pullAll",
    "$pop",
    "$addToSet",
    "$each",
    "$position",
    "$slice",
    "$sort",
];

/// Options passed through to the driver when opening the client.
///
/// Unset fields leave the connection string and the driver defaults alone.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DriverOptions {
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Server selection timeout in milliseconds.
    pub server_selection_timeout_ms: Option<u64>,
    /// Maximum number of connections in the pool.
    pub max_pool_size: Option<u32>,
    /// Minimum number of connections in the pool.
    pub min_pool_size: Option<u32>,
    /// Application name for server logs.
    pub app_name: Option<String>,
    /// Whether to use TLS.
    pub tls: Option<bool>,
    /// Direct connection (bypass replica set discovery).
    pub direct_connection: Option<bool>,
}

impl DriverOptions {
    /// Create a new builder with defaults.
    pub fn builder() -> DriverOptionsBuilder {
        DriverOptionsBuilder::default()
    }
}

/// Builder for DriverOptions.
#[derive(Debug, Clone, Default)]
pub struct DriverOptionsBuilder {
    options: DriverOptions,
}

impl DriverOptionsBuilder {
    /// Set the connection timeout.
    pub fn connect_timeout_ms(mut self, timeout: u64) -> Self {
        self.options.connect_timeout_ms = Some(timeout);
        self
    }

    /// Set the server selection timeout.
    pub fn server_selection_timeout_ms(mut self, timeout: u64) -> Self {
        self.options.server_selection_timeout_ms = Some(timeout);
        self
    }

    /// Set the maximum pool size.
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.options.max_pool_size = Some(size);
        self
    }

    /// Set the minimum pool size.
    pub fn min_pool_size(mut self, size: u32) -> Self {
        self.options.min_pool_size = Some(size);
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.options.app_name = Some(name.into());
        self
    }

    /// Enable or disable TLS.
    pub fn tls(mut self, enabled: bool) -> Self {
        self.options.tls = Some(enabled);
        self
    }

    /// Enable or disable direct connection.
    pub fn direct_connection(mut self, direct: bool) -> Self {
        self.options.direct_connection = Some(direct);
        self
    }

    /// Build the options.
    pub fn build(self) -> DriverOptions {
        self.options
    }
}

/// Connection parameters carried by a `mongo.connect` request.
///
/// Each present field replaces the configured value before the URL is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub database: Option<String>,
}

/// Adapter configuration.
///
/// ```toml
/// host = "db.internal"
/// database = "app"
/// retry_interval_ms = 5000
///
/// [namespaces]
/// users = "app.users"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connect automatically at startup.
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Pre-formed connection string; wins over host/port.
    pub url: Option<String>,
    /// Default database appended to built URLs.
    pub database: String,
    pub driver: DriverOptions,
    pub retry_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Alias table: bare token -> "database.collection".
    pub namespaces: HashMap<String, String>,
    /// Promote 24-character `_id` strings to ObjectIds.
    pub promote_ids: bool,
    /// Reject update documents using operators outside `allowed_update_operators`.
    pub sanitize_updates: bool,
    pub allowed_update_operators: Vec<String>,
    /// Namespaces watched from startup.
    pub watch: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 27017,
            url: None,
            database: "test".to_string(),
            driver: DriverOptions::default(),
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            namespaces: HashMap::new(),
            promote_ids: true,
            sanitize_updates: false,
            allowed_update_operators: DEFAULT_ALLOWED_UPDATE_OPERATORS
                .iter()
                .map(|op| op.to_string())
                .collect(),
            watch: Vec::new(),
        }
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| MongoError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Set the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set a pre-formed connection URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Add a namespace alias.
    pub fn with_alias(mut self, alias: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.namespaces.insert(alias.into(), namespace.into());
        self
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Merge `mongo.connect` parameters into this configuration.
    pub fn apply(&mut self, overrides: &ConnectOverrides) {
        if let Some(ref host) = overrides.host {
            self.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(ref url) = overrides.url {
            self.url = Some(url.clone());
        }
        if let Some(ref database) = overrides.database {
            self.database = database.clone();
        }
    }

    /// Build the connection string the driver is opened with.
    pub fn connection_url(&self) -> String {
        if let Some(ref url) = self.url {
            return url.clone();
        }
        if self.host.starts_with("mongodb://") || self.host.starts_with("mongodb+srv://") {
            return self.host.clone();
        }
        if self.host.contains(':') {
            format!("mongodb://{}/{}", self.host, self.database)
        } else {
            format!("mongodb://{}:{}/{}", self.host, self.port, self.database)
        }
    }
}
