//! Block repository: the current-state table.
//!
//! Every mutation writes the `blocks` row and a `blocks_history` snapshot in
//! the same transaction. Provenance (`created_by`, `modified_by`,
//! `create_at`, `update_at`) is always set here, never taken from the caller.

use std::collections::BTreeMap;

use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use tracing::debug;

use blockbase_types::{Block, BlockPatch, BlockPatchBatch, IdType, new_id};

use crate::dialect::{Dialect, SqlBuilder, SqlValue, decode_json};
use crate::error::{StoreError, StoreResult};
use crate::history::{append_history, newest_snapshot};
use crate::schema::{BLOCK_COLUMNS, Tables};
use crate::store::{SqlStore, execute, query_opt, query_rows};

// ============================================================================
// Row codec
// ============================================================================

/// Decode a row selected with [`BLOCK_COLUMNS`].
pub(crate) fn block_from_row(row: &Row<'_>) -> rusqlite::Result<Block> {
    let raw_fields: SqlValue = row.get(6)?;
    let fields = decode_json(&raw_fields)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    Ok(Block {
        id: row.get(0)?,
        board_id: row.get(1)?,
        parent_id: row.get(2)?,
        root_id: row.get(3)?,
        block_type: row.get(4)?,
        title: row.get(5)?,
        fields,
        created_by: row.get(7)?,
        modified_by: row.get(8)?,
        create_at: row.get(9)?,
        update_at: row.get(10)?,
        delete_at: row.get(11)?,
    })
}

/// Bind values for a block in [`BLOCK_COLUMNS`] order.
pub(crate) fn block_values<D: Dialect>(d: &D, block: &Block) -> StoreResult<Vec<SqlValue>> {
    Ok(vec![
        block.id.clone().into(),
        block.board_id.clone().into(),
        block.parent_id.clone().into(),
        block.root_id.clone().into(),
        block.block_type.clone().into(),
        block.title.clone().into(),
        d.encode_json(&block.fields)?,
        block.created_by.clone().into(),
        block.modified_by.clone().into(),
        block.create_at.into(),
        block.update_at.into(),
        block.delete_at.into(),
    ])
}

fn insert_row<D: Dialect>(conn: &Connection, d: &D, t: &Tables, block: &Block) -> StoreResult<()> {
    let mut q = SqlBuilder::new(d);
    q.push(&format!("INSERT INTO {} ({BLOCK_COLUMNS}) VALUES ", t.blocks()))
        .bind_list(block_values(d, block)?);
    execute(conn, &q)?;
    Ok(())
}

fn update_row<D: Dialect>(conn: &Connection, d: &D, t: &Tables, block: &Block) -> StoreResult<()> {
    let mut q = SqlBuilder::new(d);
    q.push(&format!("UPDATE {} SET parent_id = ", t.blocks()))
        .bind_str(&block.parent_id)
        .push(", root_id = ")
        .bind_str(&block.root_id)
        .push(", type = ")
        .bind_str(&block.block_type)
        .push(", title = ")
        .bind_str(&block.title)
        .push(", fields = ")
        .bind(d.encode_json(&block.fields)?)
        .push(", created_by = ")
        .bind_str(&block.created_by)
        .push(", modified_by = ")
        .bind_str(&block.modified_by)
        .push(", create_at = ")
        .bind(block.create_at)
        .push(", update_at = ")
        .bind(block.update_at)
        .push(", delete_at = 0 WHERE board_id = ")
        .bind_str(&block.board_id)
        .push(" AND id = ")
        .bind_str(&block.id);
    execute(conn, &q)?;
    Ok(())
}

fn delete_row<D: Dialect>(conn: &Connection, d: &D, t: &Tables, block: &Block) -> StoreResult<()> {
    let mut q = SqlBuilder::new(d);
    q.push(&format!("DELETE FROM {} WHERE board_id = ", t.blocks()))
        .bind_str(&block.board_id)
        .push(" AND id = ")
        .bind_str(&block.id);
    execute(conn, &q)?;
    Ok(())
}

pub(crate) fn live_block<D: Dialect>(conn: &Connection, d: &D, t: &Tables, id: &str) -> StoreResult<Option<Block>> {
    let mut q = SqlBuilder::new(d);
    q.push(&format!("SELECT {BLOCK_COLUMNS} FROM {} WHERE id = ", t.blocks()))
        .bind_str(id)
        .push(" ORDER BY create_at ASC LIMIT 1");
    query_opt(conn, &q, block_from_row)
}

/// Assign an id when missing and validate before any transaction opens.
fn prepare_insert(block: &Block) -> StoreResult<Block> {
    let mut block = block.clone();
    if block.id.is_empty() {
        block.id = new_id(IdType::from_block_type(&block.block_type));
    }
    block.validate()?;
    Ok(block)
}

// ============================================================================
// Queries
// ============================================================================

/// Sort order for [`SqlStore::get_blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockOrder {
    CreateAtAsc,
    UpdateAtDesc,
    TitleAsc,
}

impl BlockOrder {
    fn sql(self) -> &'static str {
        match self {
            BlockOrder::CreateAtAsc => "create_at ASC, id ASC",
            BlockOrder::UpdateAtDesc => "update_at DESC, id ASC",
            BlockOrder::TitleAsc => "title ASC, id ASC",
        }
    }
}

/// Filter for live blocks of one board.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryBlocksOptions {
    pub board_id: String,
    pub parent_id: Option<String>,
    pub root_id: Option<String>,
    pub block_type: Option<String>,
    pub order: Option<BlockOrder>,
    /// Zero-based page index.
    pub page: usize,
    /// Page size; 0 returns everything.
    pub per_page: usize,
}

impl QueryBlocksOptions {
    pub fn for_board(board_id: impl Into<String>) -> Self {
        Self {
            board_id: board_id.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_root(mut self, root_id: impl Into<String>) -> Self {
        self.root_id = Some(root_id.into());
        self
    }

    pub fn with_type(mut self, block_type: impl Into<String>) -> Self {
        self.block_type = Some(block_type.into());
        self
    }

    pub fn ordered(mut self, order: BlockOrder) -> Self {
        self.order = Some(order);
        self
    }

    pub fn paged(mut self, page: usize, per_page: usize) -> Self {
        self.page = page;
        self.per_page = per_page;
        self
    }
}

pub(crate) fn select_blocks<'d, D: Dialect>(
    d: &'d D,
    t: &Tables,
    opts: &QueryBlocksOptions,
) -> StoreResult<SqlBuilder<'d, D>> {
    let mut q = SqlBuilder::new(d);
    q.push(&format!("SELECT {BLOCK_COLUMNS} FROM {} WHERE board_id = ", t.blocks()))
        .bind_str(&opts.board_id);
    if let Some(parent_id) = &opts.parent_id {
        q.push(" AND parent_id = ").bind_str(parent_id);
    }
    if let Some(root_id) = &opts.root_id {
        q.push(" AND root_id = ").bind_str(root_id);
    }
    if let Some(block_type) = &opts.block_type {
        q.push(" AND type = ").bind_str(block_type);
    }
    if let Some(order) = opts.order {
        q.push(" ORDER BY ").push(order.sql());
    }
    if opts.per_page > 0 {
        let offset = opts
            .page
            .checked_mul(opts.per_page)
            .ok_or(StoreError::OutOfRange("page offset"))?;
        q.push(" LIMIT ")
            .bind(StoreError::sql_int(opts.per_page, "per_page")?)
            .push(" OFFSET ")
            .bind(StoreError::sql_int(offset, "page offset")?);
    }
    Ok(q)
}

// ============================================================================
// Repository operations
// ============================================================================

impl<D: Dialect> SqlStore<D> {
    /// Insert or replace a block.
    ///
    /// An empty id is filled with a generated one. Re-inserting a live block
    /// keeps its creator and creation time; moving it to another board is a
    /// [`StoreError::Conflict`].
    pub fn insert_block(&self, block: &Block, modifier: &str) -> StoreResult<Block> {
        let block = prepare_insert(block)?;
        self.with_tx(|tx| self.insert_block_tx(tx, block, modifier))
    }

    /// Insert several blocks in one transaction.
    pub fn insert_blocks(&self, blocks: &[Block], modifier: &str) -> StoreResult<Vec<Block>> {
        let prepared = blocks.iter().map(prepare_insert).collect::<StoreResult<Vec<_>>>()?;
        self.with_tx(|tx| {
            prepared
                .into_iter()
                .map(|block| self.insert_block_tx(tx, block, modifier))
                .collect()
        })
    }

    pub(crate) fn insert_block_tx(&self, conn: &Connection, mut block: Block, modifier: &str) -> StoreResult<Block> {
        let (d, t) = (self.dialect(), self.tables());
        let now = self.now_millis();
        block.modified_by = modifier.to_string();
        block.update_at = now;
        block.delete_at = 0;

        match live_block(conn, d, t, &block.id)? {
            Some(existing) => {
                if existing.board_id != block.board_id {
                    return Err(StoreError::conflict(format!(
                        "block {} belongs to board {}, cannot move to {}",
                        block.id, existing.board_id, block.board_id
                    )));
                }
                block.created_by = if existing.created_by.is_empty() {
                    modifier.to_string()
                } else {
                    existing.created_by
                };
                block.create_at = existing.create_at;
                update_row(conn, d, t, &block)?;
            }
            None => {
                block.created_by = modifier.to_string();
                block.create_at = now;
                insert_row(conn, d, t, &block)?;
            }
        }
        append_history(conn, d, t, &block, now)?;
        debug!("inserted block {} on board {} by {}", block.id, block.board_id, modifier);
        Ok(block)
    }

    /// Merge a patch into a live block.
    pub fn patch_block(&self, block_id: &str, patch: &BlockPatch, modifier: &str) -> StoreResult<()> {
        patch.validate()?;
        self.with_tx(|tx| self.patch_block_tx(tx, block_id, patch, modifier))
    }

    /// Apply every patch of a batch, or none.
    pub fn patch_blocks(&self, batch: &BlockPatchBatch, modifier: &str) -> StoreResult<()> {
        batch.validate()?;
        self.with_tx(|tx| {
            batch
                .iter()
                .try_for_each(|(id, patch)| self.patch_block_tx(tx, id, patch, modifier))
        })
    }

    fn patch_block_tx(&self, conn: &Connection, block_id: &str, patch: &BlockPatch, modifier: &str) -> StoreResult<()> {
        let (d, t) = (self.dialect(), self.tables());
        let mut block =
            live_block(conn, d, t, block_id)?.ok_or_else(|| StoreError::not_found("block", block_id))?;
        patch.apply(&mut block);
        let now = self.now_millis();
        block.modified_by = modifier.to_string();
        block.update_at = now;
        update_row(conn, d, t, &block)?;
        append_history(conn, d, t, &block, now)?;
        debug!("patched block {} by {}", block_id, modifier);
        Ok(())
    }

    /// Tombstone a block. Deleting an already-deleted block appends another
    /// tombstone; deleting an unknown id does nothing.
    pub fn delete_block(&self, block_id: &str, modifier: &str) -> StoreResult<()> {
        self.with_tx(|tx| {
            let (d, t) = (self.dialect(), self.tables());
            let now = self.now_millis();
            let tombstone = match live_block(tx, d, t, block_id)? {
                Some(block) => {
                    delete_row(tx, d, t, &block)?;
                    block
                }
                None => match newest_snapshot(tx, d, t, block_id)? {
                    Some(snapshot) => snapshot,
                    None => return Ok(()),
                },
            };
            let tombstone = Block {
                modified_by: modifier.to_string(),
                update_at: now,
                delete_at: now,
                ..tombstone
            };
            append_history(tx, d, t, &tombstone, now)?;
            debug!("deleted block {} by {}", block_id, modifier);
            Ok(())
        })
    }

    /// Restore the newest snapshot of a deleted block. No-op for live or
    /// never-seen ids.
    pub fn undelete_block(&self, block_id: &str, modifier: &str) -> StoreResult<()> {
        self.with_tx(|tx| {
            let (d, t) = (self.dialect(), self.tables());
            if live_block(tx, d, t, block_id)?.is_some() {
                return Ok(());
            }
            let Some(snapshot) = newest_snapshot(tx, d, t, block_id)? else {
                return Ok(());
            };
            let now = self.now_millis();
            let restored = Block {
                modified_by: modifier.to_string(),
                update_at: now,
                delete_at: 0,
                ..snapshot
            };
            insert_row(tx, d, t, &restored)?;
            append_history(tx, d, t, &restored, now)?;
            debug!("undeleted block {} by {}", block_id, modifier);
            Ok(())
        })
    }

    /// The live block with this id.
    pub fn get_block(&self, block_id: &str) -> StoreResult<Option<Block>> {
        self.with_conn(|conn| live_block(conn, self.dialect(), self.tables(), block_id))
    }

    pub fn get_blocks(&self, opts: &QueryBlocksOptions) -> StoreResult<Vec<Block>> {
        let q = select_blocks(self.dialect(), self.tables(), opts)?;
        self.with_conn(|conn| query_rows(conn, &q, block_from_row))
    }

    /// Every live block of a board.
    pub fn get_blocks_for_board(&self, board_id: &str) -> StoreResult<Vec<Block>> {
        self.get_blocks(&QueryBlocksOptions::for_board(board_id))
    }

    pub fn get_blocks_with_parent(&self, board_id: &str, parent_id: &str) -> StoreResult<Vec<Block>> {
        self.get_blocks(&QueryBlocksOptions::for_board(board_id).with_parent(parent_id))
    }

    pub fn get_blocks_with_type(&self, board_id: &str, block_type: &str) -> StoreResult<Vec<Block>> {
        self.get_blocks(&QueryBlocksOptions::for_board(board_id).with_type(block_type))
    }

    pub fn get_blocks_with_parent_and_type(
        &self,
        board_id: &str,
        parent_id: &str,
        block_type: &str,
    ) -> StoreResult<Vec<Block>> {
        self.get_blocks(
            &QueryBlocksOptions::for_board(board_id)
                .with_parent(parent_id)
                .with_type(block_type),
        )
    }

    pub fn get_blocks_with_root_id(&self, board_id: &str, root_id: &str) -> StoreResult<Vec<Block>> {
        self.get_blocks(&QueryBlocksOptions::for_board(board_id).with_root(root_id))
    }

    /// Number of live blocks per block type.
    pub fn get_block_count_by_type(&self) -> StoreResult<BTreeMap<String, i64>> {
        let mut q = self.query();
        q.push(&format!("SELECT type, COUNT(*) FROM {} GROUP BY type", self.tables().blocks()));
        let rows = self.with_conn(|conn| {
            query_rows(conn, &q, |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        })?;
        Ok(rows.into_iter().collect())
    }
}
