//! Migration runner.
//!
//! Runs at store open, before normal traffic:
//!
//! 1. bootstrap `system_settings` and `cluster_locks`
//! 2. schema steps 1-2
//! 3. [`unique_ids`]: repair duplicate block ids
//! 4. schema step 3: unique index on `blocks(id)`
//! 5. [`categories`], then the two [`ownership`] repairs
//!
//! Every step is guarded by a persisted marker (the schema version or a
//! boolean flag) and, when a cluster mutex is configured, by a cluster lock
//! named after the step. The marker is read after the lock is taken and
//! written in the same transaction as the work, so concurrent nodes run each
//! step exactly once.

pub mod categories;
pub mod ownership;
pub mod unique_ids;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dialect::{Dialect, SqlBuilder, SqlValue};
use crate::error::StoreResult;
use crate::mutex::LockGuard;
use crate::schema::{
    SCHEMA_STEPS, SCHEMA_VERSION_KEY, STEP_BOARDS, STEP_UNIQUE_BLOCK_IDS, Tables, bootstrap_statements,
    step_statements,
};
use crate::settings::{read_setting, write_setting};
use crate::store::{SqlStore, execute};

pub const UNIQUE_IDS_MIGRATION_KEY: &str = "UniqueIDsMigrationComplete";
pub const CATEGORY_MIGRATION_KEY: &str = "CategoryUuidIdMigrationComplete";
pub const TEAMLESS_BOARDS_MIGRATION_KEY: &str = "TeamLessBoardsMigrationComplete";
pub const DELETED_MEMBERSHIP_BOARDS_MIGRATION_KEY: &str = "DeletedMembershipBoardsMigrationComplete";

/// Lock guarding the schema steps.
pub const SCHEMA_LOCK_NAME: &str = "SchemaMigration";

/// Rows per multi-row INSERT.
pub const INSERT_BATCH_SIZE: usize = 1000;

/// Result of one data migration run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum MigrationOutcome {
    /// The flag was already set; nothing was done.
    AlreadyCompleted,
    /// The migration does not apply in this mode; the flag was set.
    NotApplicable,
    /// The work was done and the flag set.
    Completed { repaired: usize, skipped: usize },
    /// Every candidate failed; the flag was left unset for the next start.
    Incomplete { skipped: usize },
    /// Plugin mode without a team directory; the flag was left unset.
    Deferred,
}

impl MigrationOutcome {
    /// The flag is set after this run.
    pub fn is_done(&self) -> bool {
        !matches!(self, MigrationOutcome::Incomplete { .. } | MigrationOutcome::Deferred)
    }

    /// This run changed data.
    pub fn did_work(&self) -> bool {
        matches!(self, MigrationOutcome::Completed { repaired, .. } if *repaired > 0)
    }

    /// Outcome of a pass over `candidates` items.
    pub(crate) fn from_counts(candidates: usize, repaired: usize, skipped: usize) -> Self {
        if candidates > 0 && repaired == 0 && skipped > 0 {
            MigrationOutcome::Incomplete { skipped }
        } else {
            MigrationOutcome::Completed { repaired, skipped }
        }
    }
}

/// What [`SqlStore::migrate`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub schema_version: i64,
    /// Schema steps applied by this run.
    pub applied_steps: Vec<i64>,
    /// Data migrations by key, in execution order.
    pub migrations: Vec<(String, MigrationOutcome)>,
}

impl MigrationReport {
    pub fn outcome(&self, key: &str) -> Option<&MigrationOutcome> {
        self.migrations
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, outcome)| outcome)
    }

    fn record(&mut self, key: &str, outcome: MigrationOutcome) {
        self.migrations.push((key.to_string(), outcome));
    }
}

/// The cluster lock held by a running migration, if the store has a mutex.
pub(crate) struct MigrationLock<'a>(Option<LockGuard<'a>>);

impl MigrationLock<'_> {
    /// Extend the lease during long directory scans.
    pub(crate) fn refresh(&self) -> StoreResult<()> {
        match &self.0 {
            Some(guard) => guard.refresh(),
            None => Ok(()),
        }
    }
}

/// Run `f` under the cluster lock `name`.
pub(crate) fn locked<D: Dialect, T>(
    store: &SqlStore<D>,
    name: &str,
    f: impl FnOnce(&MigrationLock<'_>) -> StoreResult<T>,
) -> StoreResult<T> {
    let guard = match store.cluster_mutex() {
        Some(mutex) => Some(mutex.lock(name)?),
        None => None,
    };
    f(&MigrationLock(guard))
}

pub(crate) fn run_all<D: Dialect>(store: &SqlStore<D>) -> StoreResult<MigrationReport> {
    let mut report = MigrationReport::default();

    store.with_conn(|conn| {
        for stmt in bootstrap_statements(store.dialect(), store.tables()) {
            conn.execute_batch(&stmt)?;
        }
        Ok(())
    })?;

    run_schema_steps(store, STEP_BOARDS, &mut report)?;
    report.record(UNIQUE_IDS_MIGRATION_KEY, unique_ids::run(store)?);
    run_schema_steps(store, STEP_UNIQUE_BLOCK_IDS, &mut report)?;
    report.record(CATEGORY_MIGRATION_KEY, categories::run(store)?);
    report.record(TEAMLESS_BOARDS_MIGRATION_KEY, ownership::run_teamless(store)?);
    report.record(
        DELETED_MEMBERSHIP_BOARDS_MIGRATION_KEY,
        ownership::run_deleted_membership(store)?,
    );

    info!(
        "migrations finished at schema version {} ({} steps applied)",
        report.schema_version,
        report.applied_steps.len()
    );
    Ok(report)
}

fn schema_version<D: Dialect>(conn: &Connection, d: &D, t: &Tables) -> StoreResult<i64> {
    Ok(read_setting(conn, d, t, SCHEMA_VERSION_KEY)?
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0))
}

/// Apply every schema step up to and including `up_to`.
fn run_schema_steps<D: Dialect>(store: &SqlStore<D>, up_to: i64, report: &mut MigrationReport) -> StoreResult<()> {
    let (d, t) = (store.dialect(), store.tables());
    let current = store.with_conn(|conn| schema_version(conn, d, t))?;
    if current >= up_to {
        report.schema_version = report.schema_version.max(current);
        return Ok(());
    }

    locked(store, SCHEMA_LOCK_NAME, |_lock| {
        for &(step, description) in SCHEMA_STEPS.iter().filter(|(step, _)| *step <= up_to) {
            let applied = store.with_tx(|tx| {
                if schema_version(tx, d, t)? >= step {
                    return Ok(false);
                }
                for stmt in step_statements(d, t, step) {
                    tx.execute_batch(&stmt)?;
                }
                write_setting(tx, d, t, SCHEMA_VERSION_KEY, &step.to_string())?;
                Ok(true)
            })?;
            if applied {
                info!("applied schema step {} ({})", step, description);
                report.applied_steps.push(step);
            } else {
                debug!("schema step {} already applied", step);
            }
        }
        Ok(())
    })?;

    report.schema_version = store.with_conn(|conn| schema_version(conn, d, t))?;
    Ok(())
}

/// Insert rows in multi-row statements of at most [`INSERT_BATCH_SIZE`].
pub(crate) fn insert_batched<D: Dialect>(
    conn: &Connection,
    d: &D,
    table: &str,
    columns: &str,
    rows: Vec<Vec<SqlValue>>,
) -> StoreResult<usize> {
    let mut inserted = 0;
    for chunk in rows.chunks(INSERT_BATCH_SIZE) {
        let mut q = SqlBuilder::new(d);
        q.push(&format!("INSERT INTO {table} ({columns}) VALUES "));
        for (i, row) in chunk.iter().enumerate() {
            if i > 0 {
                q.push(", ");
            }
            q.bind_list(row.iter().cloned());
        }
        inserted += execute(conn, &q)?;
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    #[test]
    fn test_fresh_store_runs_everything_once() {
        let store = SqlStore::builder(StoreConfig::in_memory())
            .without_migrations()
            .open()
            .unwrap();
        let report = store.migrate().unwrap();
        assert_eq!(report.schema_version, STEP_UNIQUE_BLOCK_IDS);
        assert_eq!(report.applied_steps, vec![1, 2, 3]);
        assert_eq!(
            report.outcome(UNIQUE_IDS_MIGRATION_KEY),
            Some(&MigrationOutcome::Completed { repaired: 0, skipped: 0 })
        );
        assert_eq!(
            report.outcome(TEAMLESS_BOARDS_MIGRATION_KEY),
            Some(&MigrationOutcome::NotApplicable)
        );

        let again = store.migrate().unwrap();
        assert!(again.applied_steps.is_empty());
        assert_eq!(again.schema_version, STEP_UNIQUE_BLOCK_IDS);
        assert!(again
            .migrations
            .iter()
            .all(|(_, outcome)| *outcome == MigrationOutcome::AlreadyCompleted));
    }

    #[test]
    fn test_outcome_from_counts() {
        assert_eq!(
            MigrationOutcome::from_counts(0, 0, 0),
            MigrationOutcome::Completed { repaired: 0, skipped: 0 }
        );
        assert_eq!(
            MigrationOutcome::from_counts(2, 0, 2),
            MigrationOutcome::Incomplete { skipped: 2 }
        );
        assert_eq!(
            MigrationOutcome::from_counts(3, 1, 2),
            MigrationOutcome::Completed { repaired: 1, skipped: 2 }
        );
        assert!(!MigrationOutcome::Incomplete { skipped: 1 }.is_done());
        assert!(!MigrationOutcome::Deferred.is_done());
        assert!(MigrationOutcome::Completed { repaired: 1, skipped: 0 }.did_work());
    }

    #[test]
    fn test_insert_batched_splits_statements() {
        let store = SqlStore::in_memory().unwrap();
        let (d, t) = (store.dialect(), store.tables());
        let rows: Vec<Vec<SqlValue>> = (0..(INSERT_BATCH_SIZE + 5))
            .map(|i| vec![format!("k{i}").into(), "v".to_string().into()])
            .collect();
        let key = d.quote_ident("key");
        let inserted = store
            .with_tx(|tx| insert_batched(tx, d, &t.settings(), &format!("{key}, value"), rows))
            .unwrap();
        assert_eq!(inserted, INSERT_BATCH_SIZE + 5);
        let settings = store.get_system_settings().unwrap();
        assert_eq!(settings.keys().filter(|k| k.starts_with('k')).count(), INSERT_BATCH_SIZE + 5);
    }
}
