//! History ledger: append-only snapshots in `blocks_history`.
//!
//! Each insert, patch, delete and undelete appends exactly one row keyed by
//! `(id, insert_at)`. `insert_at` is strictly increasing per id even when
//! the wall clock stalls or two writers race, because it is derived from the
//! previous entry inside the writing transaction.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use blockbase_types::Block;

use crate::blocks::{block_from_row, block_values};
use crate::dialect::{Dialect, SqlBuilder};
use crate::error::{StoreError, StoreResult};
use crate::schema::{BLOCK_COLUMNS, Tables};
use crate::store::{SqlStore, execute, query_opt, query_rows};

/// Append a snapshot; returns its `insert_at`.
pub(crate) fn append_history<D: Dialect>(
    conn: &Connection,
    d: &D,
    t: &Tables,
    block: &Block,
    now: i64,
) -> StoreResult<i64> {
    let mut q = SqlBuilder::new(d);
    q.push(&format!("SELECT MAX(insert_at) FROM {} WHERE id = ", t.history()))
        .bind_str(&block.id);
    let last = query_opt(conn, &q, |row| row.get::<_, Option<i64>>(0))?.flatten();
    let insert_at = last.map_or(now, |last| now.max(last + 1));

    let mut values = block_values(d, block)?;
    values.push(insert_at.into());
    let mut q = SqlBuilder::new(d);
    q.push(&format!("INSERT INTO {} ({BLOCK_COLUMNS}, insert_at) VALUES ", t.history()))
        .bind_list(values);
    execute(conn, &q)?;
    Ok(insert_at)
}

/// The most recent snapshot of `id`, deleted or not.
pub(crate) fn newest_snapshot<D: Dialect>(
    conn: &Connection,
    d: &D,
    t: &Tables,
    id: &str,
) -> StoreResult<Option<Block>> {
    let mut q = SqlBuilder::new(d);
    q.push(&format!("SELECT {BLOCK_COLUMNS} FROM {} WHERE id = ", t.history()))
        .bind_str(id)
        .push(" ORDER BY insert_at DESC LIMIT 1");
    query_opt(conn, &q, block_from_row)
}

/// Window over history entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HistoryQuery {
    /// Maximum entries; 0 returns everything.
    pub limit: usize,
    /// Newest first.
    pub descending: bool,
    /// Only entries with `update_at` strictly before this; 0 disables.
    pub before_update_at: i64,
    /// Only entries with `update_at` strictly after this; 0 disables.
    pub after_update_at: i64,
}

impl HistoryQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn before(mut self, update_at: i64) -> Self {
        self.before_update_at = update_at;
        self
    }

    pub fn after(mut self, update_at: i64) -> Self {
        self.after_update_at = update_at;
        self
    }
}

/// Which column a history query keys on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HistoryKey {
    Id,
    RootId,
}

pub(crate) fn select_history<'d, D: Dialect>(
    d: &'d D,
    t: &Tables,
    key: HistoryKey,
    value: &str,
    opts: &HistoryQuery,
) -> StoreResult<SqlBuilder<'d, D>> {
    let column = match key {
        HistoryKey::Id => "id",
        HistoryKey::RootId => "root_id",
    };
    let mut q = SqlBuilder::new(d);
    q.push(&format!("SELECT {BLOCK_COLUMNS} FROM {} WHERE {column} = ", t.history()))
        .bind_str(value);
    if opts.before_update_at > 0 {
        q.push(" AND update_at < ").bind(opts.before_update_at);
    }
    if opts.after_update_at > 0 {
        q.push(" AND update_at > ").bind(opts.after_update_at);
    }
    q.push(if opts.descending {
        " ORDER BY insert_at DESC"
    } else {
        " ORDER BY insert_at ASC"
    });
    if opts.limit > 0 {
        q.push(" LIMIT ").bind(StoreError::sql_int(opts.limit, "history limit")?);
    }
    Ok(q)
}

/// Last modification (or first creation) across a tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeModifiedInfo {
    pub timestamp: i64,
    pub modified_by: String,
}

impl<D: Dialect> SqlStore<D> {
    /// Snapshots of one block, ordered by `insert_at`.
    pub fn get_block_history(&self, block_id: &str, opts: &HistoryQuery) -> StoreResult<Vec<Block>> {
        let q = select_history(self.dialect(), self.tables(), HistoryKey::Id, block_id, opts)?;
        self.with_conn(|conn| query_rows(conn, &q, block_from_row))
    }

    /// Snapshots of every block whose `root_id` is `root_id`.
    pub fn get_block_history_descendants(&self, root_id: &str, opts: &HistoryQuery) -> StoreResult<Vec<Block>> {
        let q = select_history(self.dialect(), self.tables(), HistoryKey::RootId, root_id, opts)?;
        self.with_conn(|conn| query_rows(conn, &q, block_from_row))
    }

    /// The latest snapshot of a block, including tombstones.
    pub fn get_block_history_newest(&self, block_id: &str) -> StoreResult<Option<Block>> {
        self.with_conn(|conn| newest_snapshot(conn, self.dialect(), self.tables(), block_id))
    }

    /// When and by whom a tree was last modified (`latest`) or first created.
    /// Deleted blocks count.
    pub fn get_tree_modified_info(&self, root_id: &str, latest: bool) -> StoreResult<Option<TreeModifiedInfo>> {
        let (columns, order) = if latest {
            ("update_at, modified_by", "update_at DESC")
        } else {
            ("create_at, created_by", "create_at ASC")
        };
        let mut q = self.query();
        q.push(&format!("SELECT {columns} FROM {} WHERE root_id = ", self.tables().history()))
            .bind_str(root_id)
            .push(&format!(" ORDER BY {order}, insert_at DESC LIMIT 1"));
        self.with_conn(|conn| {
            query_opt(conn, &q, |row| {
                Ok(TreeModifiedInfo {
                    timestamp: row.get(0)?,
                    modified_by: row.get(1)?,
                })
            })
        })
    }
}
