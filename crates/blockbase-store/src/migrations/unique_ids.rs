//! Repair block ids that are duplicated across boards.
//!
//! Before the unique index on `blocks(id)` existed, ids were only unique per
//! board. For every id held by more than one row, the earliest row (by
//! `create_at`, then `board_id`) keeps the id and every other row gets a
//! fresh one. References through the old compound key `(old_id, board_id)`
//! follow the rename in both `blocks` and `blocks_history`.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use blockbase_types::{IdType, new_id};

use super::{MigrationOutcome, UNIQUE_IDS_MIGRATION_KEY, locked};
use crate::dialect::{Dialect, SqlBuilder};
use crate::error::StoreResult;
use crate::schema::Tables;
use crate::settings::{read_flag, write_setting};
use crate::store::{SqlStore, execute, query_opt, query_rows};

/// One row of a duplicated id.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Holder {
    board_id: String,
    block_type: String,
}

pub(crate) fn run<D: Dialect>(store: &SqlStore<D>) -> StoreResult<MigrationOutcome> {
    let (d, t) = (store.dialect(), store.tables());
    if store.with_conn(|conn| read_flag(conn, d, t, UNIQUE_IDS_MIGRATION_KEY))? {
        return Ok(MigrationOutcome::AlreadyCompleted);
    }

    locked(store, UNIQUE_IDS_MIGRATION_KEY, |_lock| {
        store.with_tx(|tx| {
            if read_flag(tx, d, t, UNIQUE_IDS_MIGRATION_KEY)? {
                return Ok(MigrationOutcome::AlreadyCompleted);
            }
            info!("running unique ids migration");
            let repaired = deduplicate(tx, d, t)?;
            write_setting(tx, d, t, UNIQUE_IDS_MIGRATION_KEY, "true")?;
            info!("unique ids migration complete ({} rows renamed)", repaired);
            Ok(MigrationOutcome::Completed { repaired, skipped: 0 })
        })
    })
}

fn deduplicate<D: Dialect>(conn: &Connection, d: &D, t: &Tables) -> StoreResult<usize> {
    let mut q = SqlBuilder::new(d);
    q.push(&format!(
        "SELECT id FROM {} GROUP BY id HAVING COUNT(*) > 1 ORDER BY id",
        t.blocks()
    ));
    let duplicated: Vec<String> = query_rows(conn, &q, |row| row.get(0))?;

    let mut repaired = 0;
    for old_id in duplicated {
        let mut q = SqlBuilder::new(d);
        q.push(&format!("SELECT board_id, type FROM {} WHERE id = ", t.blocks()))
            .bind_str(&old_id)
            .push(" ORDER BY create_at ASC, board_id ASC");
        let holders = query_rows(conn, &q, |row| {
            Ok(Holder {
                board_id: row.get(0)?,
                block_type: row.get(1)?,
            })
        })?;
        let Some((keeper, others)) = holders.split_first() else {
            continue;
        };

        for holder in others {
            let new = new_id(IdType::from_block_type(&holder.block_type));
            for table in [t.blocks(), t.history()] {
                rename_in_board(conn, d, &table, &old_id, &new, &holder.board_id)?;
            }
            debug!(
                "renamed block {} on board {} to {}",
                old_id, holder.board_id, new
            );
            repaired += 1;
        }

        let dangling = cross_board_references(conn, d, t, &old_id, &keeper.board_id)?;
        if dangling > 0 {
            warn!(
                "{} blocks on other boards still reference {} (kept by board {})",
                dangling, old_id, keeper.board_id
            );
        }
    }
    Ok(repaired)
}

/// Rewrite `id`, `parent_id` and `root_id` equal to `old` within one board.
fn rename_in_board<D: Dialect>(
    conn: &Connection,
    d: &D,
    table: &str,
    old: &str,
    new: &str,
    board_id: &str,
) -> StoreResult<()> {
    for column in ["id", "parent_id", "root_id"] {
        let mut q = SqlBuilder::new(d);
        q.push(&format!("UPDATE {table} SET {column} = "))
            .bind_str(new)
            .push(&format!(" WHERE {column} = "))
            .bind_str(old)
            .push(" AND board_id = ")
            .bind_str(board_id);
        execute(conn, &q)?;
    }
    Ok(())
}

/// Blocks outside `keeper_board` that still point at `id` after the
/// per-board renames.
fn cross_board_references<D: Dialect>(
    conn: &Connection,
    d: &D,
    t: &Tables,
    id: &str,
    keeper_board: &str,
) -> StoreResult<i64> {
    let mut q = SqlBuilder::new(d);
    q.push(&format!("SELECT COUNT(*) FROM {} WHERE (parent_id = ", t.blocks()))
        .bind_str(id)
        .push(" OR root_id = ")
        .bind_str(id)
        .push(") AND board_id <> ")
        .bind_str(keeper_board);
    Ok(query_opt(conn, &q, |row| row.get(0))?.unwrap_or(0))
}
