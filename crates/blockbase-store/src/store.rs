//! The store handle: connection, dialect, tables and collaborators.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior, params_from_iter};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::{MEMORY_DB, StoreConfig, connection_param, connection_target};
use crate::dialect::{DbType, Dialect, SqlBuilder, Sqlite};
use crate::directory::TeamDirectory;
use crate::error::{StoreError, StoreResult};
use crate::migrations::{self, MigrationReport};
use crate::mutex::{ClusterMutex, DbLeaseMutex, LeaseOptions};
use crate::schema::Tables;

/// Shared SQLite connection.
pub(crate) type DbHandle = Arc<Mutex<Connection>>;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Open a SQLite connection from a connection string.
///
/// `:memory:` opens a private in-memory database. A `_busy_timeout=<ms>`
/// query parameter overrides the 5 s default. File databases use WAL.
pub(crate) fn open_sqlite(db_config: &str) -> StoreResult<Connection> {
    let target = connection_target(db_config);
    let conn = if target == MEMORY_DB {
        Connection::open_in_memory()?
    } else {
        if let Some(parent) = Path::new(target).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Connection::open(target)?
    };

    let busy_ms = match connection_param(db_config, "_busy_timeout") {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| StoreError::config(format!("invalid _busy_timeout '{raw}'")))?,
        None => DEFAULT_BUSY_TIMEOUT_MS,
    };
    conn.busy_timeout(Duration::from_millis(busy_ms))?;

    if target != MEMORY_DB {
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!("opened sqlite database {} (journal_mode={})", target, mode);
    }
    Ok(conn)
}

// ============================================================================
// Statement execution
// ============================================================================

pub(crate) fn execute<D: Dialect>(conn: &Connection, q: &SqlBuilder<'_, D>) -> StoreResult<usize> {
    Ok(conn.execute(q.sql(), params_from_iter(q.values()))?)
}

pub(crate) fn query_rows<D, T, F>(conn: &Connection, q: &SqlBuilder<'_, D>, f: F) -> StoreResult<Vec<T>>
where
    D: Dialect,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(q.sql())?;
    let rows = stmt.query_map(params_from_iter(q.values()), f)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn query_opt<D, T, F>(conn: &Connection, q: &SqlBuilder<'_, D>, f: F) -> StoreResult<Option<T>>
where
    D: Dialect,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    Ok(query_rows(conn, q, f)?.into_iter().next())
}

// ============================================================================
// Builder
// ============================================================================

/// Configures and opens a [`SqlStore`].
pub struct StoreBuilder {
    config: StoreConfig,
    directory: Option<Arc<dyn TeamDirectory>>,
    mutex: Option<Arc<dyn ClusterMutex>>,
    migrate: bool,
}

impl StoreBuilder {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            directory: None,
            mutex: None,
            migrate: true,
        }
    }

    /// Host directory used by the plugin-mode migrations.
    pub fn with_directory(mut self, directory: Arc<dyn TeamDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Cluster lock implementation. Plugin mode defaults to a lease in the
    /// store's own database.
    pub fn with_cluster_mutex(mut self, mutex: Arc<dyn ClusterMutex>) -> Self {
        self.mutex = Some(mutex);
        self
    }

    /// Open without running migrations. Tables may be missing.
    pub fn without_migrations(mut self) -> Self {
        self.migrate = false;
        self
    }

    /// Open the database and bring its schema and data up to date.
    pub fn open(self) -> StoreResult<SqlStore<Sqlite>> {
        self.config.validate()?;
        if self.config.db_type != DbType::Sqlite {
            return Err(StoreError::UnsupportedDriver(self.config.db_type.to_string()));
        }

        let conn: DbHandle = Arc::new(Mutex::new(open_sqlite(&self.config.db_config)?));
        let tables = Tables::new(self.config.table_prefix.clone());
        let mutex = match (self.mutex, self.config.plugin_mode) {
            (Some(mutex), _) => Some(mutex),
            (None, true) => Some(Arc::new(DbLeaseMutex::new(
                conn.clone(),
                Sqlite,
                tables.clone(),
                LeaseOptions::from(&self.config),
            )) as Arc<dyn ClusterMutex>),
            (None, false) => None,
        };

        let store = SqlStore {
            conn,
            dialect: Sqlite,
            tables,
            clock: Clock::new(),
            config: self.config,
            directory: self.directory,
            mutex,
        };
        info!(
            "opened {} store (plugin_mode={}, prefix='{}')",
            store.config.db_type,
            store.config.plugin_mode,
            store.tables.prefix()
        );

        if self.migrate {
            store.migrate()?;
        }
        Ok(store)
    }
}

// ============================================================================
// Store
// ============================================================================

/// Relational block store.
///
/// Generic over the SQL dialect; statements are executed through the
/// store's SQLite connection. All mutations are single transactions.
pub struct SqlStore<D: Dialect = Sqlite> {
    conn: DbHandle,
    dialect: D,
    tables: Tables,
    clock: Clock,
    config: StoreConfig,
    directory: Option<Arc<dyn TeamDirectory>>,
    mutex: Option<Arc<dyn ClusterMutex>>,
}

impl SqlStore<Sqlite> {
    /// Open and migrate a store.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        StoreBuilder::new(config).open()
    }

    /// Migrated store over a private in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        Self::open(StoreConfig::in_memory())
    }

    pub fn builder(config: StoreConfig) -> StoreBuilder {
        StoreBuilder::new(config)
    }
}

impl<D: Dialect> SqlStore<D> {
    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn is_plugin(&self) -> bool {
        self.config.plugin_mode
    }

    pub(crate) fn directory(&self) -> Option<&dyn TeamDirectory> {
        self.directory.as_deref()
    }

    pub(crate) fn cluster_mutex(&self) -> Option<&dyn ClusterMutex> {
        self.mutex.as_deref()
    }

    pub(crate) fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// New query builder for this store's dialect.
    pub(crate) fn query(&self) -> SqlBuilder<'_, D> {
        SqlBuilder::new(&self.dialect)
    }

    /// Run `f` on the connection outside a transaction.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` in an immediate write transaction. Commits on `Ok`, rolls back
    /// on `Err`.
    pub(crate) fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Apply pending schema steps and data migrations.
    ///
    /// Runs at open; safe to call again.
    pub fn migrate(&self) -> StoreResult<MigrationReport> {
        migrations::run_all(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_driver() {
        let config = StoreConfig {
            db_type: DbType::Postgres,
            db_config: "postgres://localhost/boards".into(),
            ..Default::default()
        };
        let err = SqlStore::open(config).err().unwrap();
        assert!(matches!(err, StoreError::UnsupportedDriver(ref d) if d == "postgres"));
    }

    #[test]
    fn test_busy_timeout_param() {
        let err = open_sqlite(":memory:?_busy_timeout=soon").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
        assert!(open_sqlite(":memory:?_busy_timeout=250").is_ok());
    }

    #[test]
    fn test_file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("blocks.db");
        let conn = open_sqlite(&path.display().to_string()).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_open_without_migrations() {
        let store = SqlStore::builder(StoreConfig::in_memory())
            .without_migrations()
            .open()
            .unwrap();
        let count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
