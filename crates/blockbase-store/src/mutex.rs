//! Cluster-wide mutual exclusion for migrations.
//!
//! Several nodes may open the same database at once. Each migration runs
//! under a named lock so it executes on exactly one node; the others wait,
//! then observe the completion flag and skip.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rusqlite::TransactionBehavior;
use tracing::{debug, warn};

use blockbase_types::{IdType, new_id, now_millis};

use crate::config::StoreConfig;
use crate::dialect::{DbType, Dialect, SqlBuilder, Sqlite};
use crate::error::{StoreError, StoreResult};
use crate::schema::{Tables, bootstrap_statements};
use crate::store::{DbHandle, execute, open_sqlite, query_opt};

/// A named, cluster-wide lock.
pub trait ClusterMutex: Send + Sync {
    /// Block until `name` is held by this node or the timeout elapses
    /// ([`StoreError::LockTimeout`]).
    fn acquire(&self, name: &str) -> StoreResult<()>;

    /// Extend a held lock.
    fn refresh(&self, name: &str) -> StoreResult<()>;

    fn release(&self, name: &str) -> StoreResult<()>;
}

impl dyn ClusterMutex + '_ {
    /// Acquire `name`, released when the guard drops.
    pub fn lock(&self, name: &str) -> StoreResult<LockGuard<'_>> {
        self.acquire(name)?;
        Ok(LockGuard {
            mutex: self,
            name: name.to_string(),
        })
    }
}

/// Holds a cluster lock until dropped.
pub struct LockGuard<'a> {
    mutex: &'a dyn ClusterMutex,
    name: String,
}

impl LockGuard<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn refresh(&self) -> StoreResult<()> {
        self.mutex.refresh(&self.name)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.release(&self.name) {
            warn!("failed to release cluster lock {}: {}", self.name, e);
        }
    }
}

/// Timing of lease acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaseOptions {
    pub ttl: Duration,
    pub timeout: Duration,
    pub poll: Duration,
}

impl From<&StoreConfig> for LeaseOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            ttl: Duration::from_millis(config.lock_ttl_ms),
            timeout: Duration::from_millis(config.lock_timeout_ms),
            poll: Duration::from_millis(config.lock_poll_ms),
        }
    }
}

/// [`ClusterMutex`] backed by lease rows in `cluster_locks`.
///
/// A lease is claimed when the row is absent, expired, or already ours,
/// inside an immediate transaction so two nodes cannot both claim it. A node
/// that dies holding a lease blocks others only until the lease expires.
pub struct DbLeaseMutex<D: Dialect = Sqlite> {
    conn: DbHandle,
    dialect: D,
    tables: Tables,
    holder: String,
    options: LeaseOptions,
}

impl DbLeaseMutex<Sqlite> {
    /// Lease mutex on its own connection to the database named in `config`.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        if config.db_type != DbType::Sqlite {
            return Err(StoreError::UnsupportedDriver(config.db_type.to_string()));
        }
        let conn = open_sqlite(&config.db_config)?;
        let tables = Tables::new(config.table_prefix.clone());
        for stmt in bootstrap_statements(&Sqlite, &tables) {
            conn.execute_batch(&stmt)?;
        }
        Ok(Self::new(
            Arc::new(Mutex::new(conn)),
            Sqlite,
            tables,
            LeaseOptions::from(config),
        ))
    }
}

impl<D: Dialect> DbLeaseMutex<D> {
    pub(crate) fn new(conn: DbHandle, dialect: D, tables: Tables, options: LeaseOptions) -> Self {
        Self {
            conn,
            dialect,
            tables,
            holder: new_id(IdType::None),
            options,
        }
    }

    /// Identity written into lease rows.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn expiry(&self) -> i64 {
        let ttl = i64::try_from(self.options.ttl.as_millis()).unwrap_or(i64::MAX);
        now_millis().saturating_add(ttl)
    }

    /// One claim attempt.
    pub fn try_acquire(&self, name: &str) -> StoreResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut q = SqlBuilder::new(&self.dialect);
        q.push(&format!("SELECT holder, expires_at FROM {} WHERE name = ", self.tables.locks()))
            .bind_str(name);
        let current = query_opt(&tx, &q, |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let claim = match &current {
            None => true,
            Some((holder, expires_at)) => holder == &self.holder || *expires_at <= now_millis(),
        };
        if claim {
            let mut q = SqlBuilder::new(&self.dialect);
            q.push(&format!("INSERT INTO {} (name, holder, expires_at) VALUES (", self.tables.locks()))
                .bind_str(name)
                .push(", ")
                .bind_str(&self.holder)
                .push(", ")
                .bind(self.expiry())
                .push(") ")
                .push(&self.dialect.upsert_clause(&["name"], &["holder", "expires_at"]));
            execute(&tx, &q)?;
            if let Some((previous, _)) = current.filter(|(h, _)| h != &self.holder) {
                warn!("took over expired cluster lock {} from {}", name, previous);
            }
        }
        tx.commit()?;
        Ok(claim)
    }
}

impl<D: Dialect> ClusterMutex for DbLeaseMutex<D> {
    fn acquire(&self, name: &str) -> StoreResult<()> {
        let deadline = Instant::now() + self.options.timeout;
        loop {
            if self.try_acquire(name)? {
                debug!("acquired cluster lock {} as {}", name, self.holder);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(StoreError::LockTimeout {
                    name: name.to_string(),
                });
            }
            thread::sleep(self.options.poll);
        }
    }

    fn refresh(&self, name: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        let mut q = SqlBuilder::new(&self.dialect);
        q.push(&format!("UPDATE {} SET expires_at = ", self.tables.locks()))
            .bind(self.expiry())
            .push(" WHERE name = ")
            .bind_str(name)
            .push(" AND holder = ")
            .bind_str(&self.holder);
        if execute(&conn, &q)? == 0 {
            return Err(StoreError::conflict(format!("cluster lock {name} is no longer held")));
        }
        Ok(())
    }

    fn release(&self, name: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        let mut q = SqlBuilder::new(&self.dialect);
        q.push(&format!("DELETE FROM {} WHERE name = ", self.tables.locks()))
            .bind_str(name)
            .push(" AND holder = ")
            .bind_str(&self.holder);
        execute(&conn, &q)?;
        debug!("released cluster lock {}", name);
        Ok(())
    }
}
