//! Board containers.

use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use tracing::debug;

use blockbase_types::{Board, BoardType, IdType, new_id};

use crate::dialect::{Dialect, SqlBuilder, SqlValue};
use crate::error::StoreResult;
use crate::schema::Tables;
use crate::store::{SqlStore, execute, query_opt, query_rows};

pub(crate) const BOARD_COLUMNS: &str = "id, team_id, channel_id, created_by, modified_by, type, title, \
     is_template, create_at, update_at, delete_at";

pub(crate) fn board_from_row(row: &Row<'_>) -> rusqlite::Result<Board> {
    let raw_type: String = row.get(5)?;
    let board_type = BoardType::from_str(&raw_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            Type::Text,
            format!("unknown board type '{raw_type}'").into(),
        )
    })?;
    Ok(Board {
        id: row.get(0)?,
        team_id: row.get(1)?,
        channel_id: row.get(2)?,
        created_by: row.get(3)?,
        modified_by: row.get(4)?,
        board_type,
        title: row.get(6)?,
        is_template: row.get(7)?,
        create_at: row.get(8)?,
        update_at: row.get(9)?,
        delete_at: row.get(10)?,
    })
}

fn board_values(board: &Board) -> Vec<SqlValue> {
    vec![
        board.id.clone().into(),
        board.team_id.clone().into(),
        board.channel_id.clone().into(),
        board.created_by.clone().into(),
        board.modified_by.clone().into(),
        board.board_type.as_str().to_string().into(),
        board.title.clone().into(),
        board.is_template.into(),
        board.create_at.into(),
        board.update_at.into(),
        board.delete_at.into(),
    ]
}

pub(crate) fn find_board<D: Dialect>(conn: &Connection, d: &D, t: &Tables, id: &str) -> StoreResult<Option<Board>> {
    let mut q = SqlBuilder::new(d);
    q.push(&format!("SELECT {BOARD_COLUMNS} FROM {} WHERE id = ", t.boards()))
        .bind_str(id);
    query_opt(conn, &q, board_from_row)
}

/// Reassign a board's team (and optionally its type) during a repair.
pub(crate) fn set_board_owner<D: Dialect>(
    conn: &Connection,
    d: &D,
    t: &Tables,
    board_id: &str,
    team_id: &str,
    board_type: Option<BoardType>,
) -> StoreResult<usize> {
    let mut q = SqlBuilder::new(d);
    q.push(&format!("UPDATE {} SET team_id = ", t.boards()))
        .bind_str(team_id);
    if let Some(board_type) = board_type {
        q.push(", type = ").bind_str(board_type.as_str());
    }
    q.push(" WHERE id = ").bind_str(board_id);
    execute(conn, &q)
}

impl<D: Dialect> SqlStore<D> {
    /// Create or update a board. Creator and creation time of an existing
    /// board are kept.
    pub fn insert_board(&self, board: &Board, modifier: &str) -> StoreResult<Board> {
        let mut board = board.clone();
        if board.id.is_empty() {
            board.id = new_id(IdType::Board);
        }
        self.with_tx(|tx| {
            let (d, t) = (self.dialect(), self.tables());
            let now = self.now_millis();
            board.modified_by = modifier.to_string();
            board.update_at = now;

            let mut q = SqlBuilder::new(d);
            match find_board(tx, d, t, &board.id)? {
                Some(existing) => {
                    board.created_by = existing.created_by;
                    board.create_at = existing.create_at;
                    q.push(&format!("UPDATE {} SET team_id = ", t.boards()))
                        .bind_str(&board.team_id)
                        .push(", channel_id = ")
                        .bind_str(&board.channel_id)
                        .push(", modified_by = ")
                        .bind_str(&board.modified_by)
                        .push(", type = ")
                        .bind_str(board.board_type.as_str())
                        .push(", title = ")
                        .bind_str(&board.title)
                        .push(", is_template = ")
                        .bind(board.is_template)
                        .push(", update_at = ")
                        .bind(board.update_at)
                        .push(", delete_at = ")
                        .bind(board.delete_at)
                        .push(" WHERE id = ")
                        .bind_str(&board.id);
                }
                None => {
                    if board.created_by.is_empty() {
                        board.created_by = modifier.to_string();
                    }
                    board.create_at = now;
                    q.push(&format!("INSERT INTO {} ({BOARD_COLUMNS}) VALUES ", t.boards()))
                        .bind_list(board_values(&board));
                }
            }
            execute(tx, &q)?;
            debug!("stored board {} (team {})", board.id, board.team_id);
            Ok(board)
        })
    }

    /// Soft-delete a board. Unknown ids are ignored.
    pub fn delete_board(&self, board_id: &str, modifier: &str) -> StoreResult<()> {
        let now = self.now_millis();
        let mut q = self.query();
        q.push(&format!("UPDATE {} SET delete_at = ", self.tables().boards()))
            .bind(now)
            .push(", update_at = ")
            .bind(now)
            .push(", modified_by = ")
            .bind_str(modifier)
            .push(" WHERE id = ")
            .bind_str(board_id)
            .push(" AND delete_at = 0");
        self.with_tx(|tx| execute(tx, &q))?;
        Ok(())
    }

    /// A board by id, deleted or not.
    pub fn get_board(&self, board_id: &str) -> StoreResult<Option<Board>> {
        self.with_conn(|conn| find_board(conn, self.dialect(), self.tables(), board_id))
    }

    /// Live boards of a team.
    pub fn get_boards_for_team(&self, team_id: &str) -> StoreResult<Vec<Board>> {
        let mut q = self.query();
        q.push(&format!(
            "SELECT {BOARD_COLUMNS} FROM {} WHERE team_id = ",
            self.tables().boards()
        ))
        .bind_str(team_id)
        .push(" AND delete_at = 0 ORDER BY create_at ASC, id ASC");
        self.with_conn(|conn| query_rows(conn, &q, board_from_row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_round_trip() {
        let store = SqlStore::in_memory().unwrap();
        let board = Board::new("", "team1")
            .with_channel("chan1")
            .with_title("Roadmap");
        let stored = store.insert_board(&board, "alice").unwrap();
        assert!(stored.id.starts_with('b'));
        assert_eq!(stored.created_by, "alice");

        let updated = store
            .insert_board(&stored.clone().with_title("Roadmap 2").with_creator("mallory"), "bob")
            .unwrap();
        assert_eq!(updated.created_by, "alice");
        assert_eq!(updated.create_at, stored.create_at);
        assert_eq!(updated.modified_by, "bob");

        assert_eq!(store.get_board(&stored.id).unwrap(), Some(updated));
        assert_eq!(store.get_boards_for_team("team1").unwrap().len(), 1);

        store.delete_board(&stored.id, "bob").unwrap();
        assert!(store.get_boards_for_team("team1").unwrap().is_empty());
        assert!(store.get_board(&stored.id).unwrap().unwrap().delete_at > 0);
    }

    #[test]
    fn test_set_board_owner() {
        let store = SqlStore::in_memory().unwrap();
        let board = store.insert_board(&Board::new("b1", ""), "alice").unwrap();
        let (d, t) = (store.dialect(), store.tables());
        store
            .with_tx(|tx| set_board_owner(tx, d, t, &board.id, "team9", Some(BoardType::Private)))
            .unwrap();
        let board = store.get_board("b1").unwrap().unwrap();
        assert_eq!(board.team_id, "team9");
        assert_eq!(board.board_type, BoardType::Private);
    }
}
