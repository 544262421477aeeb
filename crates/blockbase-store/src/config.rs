//! Store configuration.
//!
//! Loaded from a RON document or from `BLOCKBASE_*` environment variables:
//!
//! ```ron
//! (
//!     db_type: "sqlite3",
//!     db_config: "/var/lib/blockbase/blocks.db?_busy_timeout=10000",
//!     table_prefix: "focalboard_",
//!     plugin_mode: true,
//! )
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dialect::DbType;
use crate::error::{StoreError, StoreResult};

pub const ENV_DB_TYPE: &str = "BLOCKBASE_DB_TYPE";
pub const ENV_DB_CONFIG: &str = "BLOCKBASE_DB_CONFIG";
pub const ENV_TABLE_PREFIX: &str = "BLOCKBASE_TABLE_PREFIX";
pub const ENV_PLUGIN_MODE: &str = "BLOCKBASE_PLUGIN_MODE";

/// Connection string of a private in-memory SQLite database.
pub const MEMORY_DB: &str = ":memory:";

/// Connection and behaviour settings for a [`crate::SqlStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Driver identifier.
    pub db_type: DbType,
    /// Driver-specific connection string.
    pub db_config: String,
    /// Prepended to every table and index name.
    pub table_prefix: String,
    /// Running inside a host that shares the database across a cluster.
    /// Enables cluster locks and the migrations that need the host directory.
    pub plugin_mode: bool,
    /// Lifetime of a migration lease before other nodes may steal it.
    pub lock_ttl_ms: u64,
    /// How long to wait for a migration lease.
    pub lock_timeout_ms: u64,
    /// Delay between lease attempts.
    pub lock_poll_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_type: DbType::Sqlite,
            db_config: MEMORY_DB.to_string(),
            table_prefix: String::new(),
            plugin_mode: false,
            lock_ttl_ms: 300_000,
            lock_timeout_ms: 30_000,
            lock_poll_ms: 100,
        }
    }
}

impl StoreConfig {
    /// Config for a SQLite database at `path`.
    pub fn sqlite(path: impl AsRef<Path>) -> Self {
        Self {
            db_config: path.as_ref().display().to_string(),
            ..Default::default()
        }
    }

    /// Config for a private in-memory SQLite database.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn with_plugin_mode(mut self, plugin_mode: bool) -> Self {
        self.plugin_mode = plugin_mode;
        self
    }

    pub fn with_lock_timing(mut self, ttl_ms: u64, timeout_ms: u64, poll_ms: u64) -> Self {
        self.lock_ttl_ms = ttl_ms;
        self.lock_timeout_ms = timeout_ms;
        self.lock_poll_ms = poll_ms;
        self
    }

    /// Parse a RON document. Missing keys take their defaults.
    pub fn from_ron(text: &str) -> StoreResult<Self> {
        let config: StoreConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a RON file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Build from `BLOCKBASE_*` environment variables over the defaults.
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source over the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StoreResult<Self> {
        let mut config = Self::default();
        if let Some(db_type) = lookup(ENV_DB_TYPE) {
            config.db_type = DbType::from_str(&db_type)
                .ok_or_else(|| StoreError::UnsupportedDriver(db_type.clone()))?;
        }
        if let Some(db_config) = lookup(ENV_DB_CONFIG) {
            config.db_config = db_config;
        }
        if let Some(prefix) = lookup(ENV_TABLE_PREFIX) {
            config.table_prefix = prefix;
        }
        if let Some(plugin_mode) = lookup(ENV_PLUGIN_MODE) {
            config.plugin_mode = parse_bool(&plugin_mode).ok_or_else(|| {
                StoreError::config(format!("{ENV_PLUGIN_MODE} must be a boolean, got '{plugin_mode}'"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot produce a working store.
    pub fn validate(&self) -> StoreResult<()> {
        if self.db_config.trim().is_empty() {
            return Err(StoreError::config("db_config must not be empty"));
        }
        if !self
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(StoreError::config(format!(
                "table_prefix '{}' may only contain [A-Za-z0-9_]",
                self.table_prefix
            )));
        }
        if self.lock_poll_ms == 0 {
            return Err(StoreError::config("lock_poll_ms must be positive"));
        }
        Ok(())
    }
}

/// Look up `key` in the query part of a connection string
/// (`path?key=value&other=1`).
pub fn connection_param<'a>(conn_str: &'a str, key: &str) -> Option<&'a str> {
    let (_, query) = conn_str.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// The connection string without its query part.
pub fn connection_target(conn_str: &str) -> &str {
    conn_str.split_once('?').map_or(conn_str, |(target, _)| target)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
