//! Bounded-depth subtree retrieval.
//!
//! The anchor is joined to its own table once per level. Each level keeps
//! the previous level's rows (`id = id`) and adds their children
//! (`parent_id = id`), so the last level holds the anchor and all
//! descendants down to the requested depth. Result rows are selected with
//! `id IN (...)`, which yields each block once without a `DISTINCT` over the
//! JSON column.

use blockbase_types::{Block, SubtreeDepth};

use crate::blocks::block_from_row;
use crate::dialect::{Dialect, SqlBuilder};
use crate::error::StoreResult;
use crate::schema::{BLOCK_COLUMNS, Tables};
use crate::store::{SqlStore, query_rows};

pub(crate) fn select_subtree<'d, D: Dialect>(
    d: &'d D,
    t: &Tables,
    board_id: &str,
    block_id: &str,
    depth: SubtreeDepth,
) -> SqlBuilder<'d, D> {
    let blocks = t.blocks();
    let last = usize::from(depth.levels()) + 1;

    let mut q = SqlBuilder::new(d);
    q.push(&format!(
        "SELECT {BLOCK_COLUMNS} FROM {blocks} WHERE id IN (SELECT level{last}.id FROM {blocks} AS level1"
    ));
    for level in 2..=last {
        let prev = level - 1;
        q.push(&format!(
            " JOIN {blocks} AS level{level} ON level{level}.board_id = level{prev}.board_id \
             AND (level{level}.id = level{prev}.id OR level{level}.parent_id = level{prev}.id)"
        ));
    }
    q.push(" WHERE level1.id = ")
        .bind_str(block_id)
        .push(" AND level1.board_id = ")
        .bind_str(board_id)
        .push(") AND board_id = ")
        .bind_str(board_id);
    q
}

impl<D: Dialect> SqlStore<D> {
    /// The anchor block and its descendants down to `depth`. Empty when the
    /// anchor does not exist on that board.
    pub fn get_subtree(&self, board_id: &str, block_id: &str, depth: SubtreeDepth) -> StoreResult<Vec<Block>> {
        let q = select_subtree(self.dialect(), self.tables(), board_id, block_id, depth);
        self.with_conn(|conn| query_rows(conn, &q, block_from_row))
    }
}
