//! Board activity computed from the history ledger.

use serde::{Deserialize, Serialize};

use blockbase_types::SYSTEM_USER_ID;

use crate::dialect::{Dialect, SqlBuilder};
use crate::error::{StoreError, StoreResult};
use crate::schema::Tables;
use crate::store::{SqlStore, query_rows};

const USER_DELIMITER: &str = ",";

/// Which boards and which slice of the ranking to report.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActivityQuery {
    /// Restrict to boards of this team.
    pub team_id: Option<String>,
    /// Restrict to these boards; empty means every board.
    pub board_ids: Vec<String>,
    /// Count entries inserted after this time.
    pub since: i64,
    /// Keep only boards this user created or was active on.
    pub user_id: Option<String>,
    pub offset: usize,
    /// 0 returns everything.
    pub limit: usize,
}

impl ActivityQuery {
    pub fn since(since: i64) -> Self {
        Self {
            since,
            ..Default::default()
        }
    }

    pub fn for_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    pub fn for_boards(mut self, board_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.board_ids = board_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn paged(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// Activity on one board.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardActivity {
    pub board_id: String,
    pub title: String,
    pub created_by: String,
    /// History entries in the window.
    pub activity_count: i64,
    /// Distinct users who wrote those entries, sorted.
    pub active_users: Vec<String>,
}

pub(crate) fn select_activity<'d, D: Dialect>(
    d: &'d D,
    t: &Tables,
    query: &ActivityQuery,
) -> StoreResult<SqlBuilder<'d, D>> {
    let mut q = SqlBuilder::new(d);
    q.push(&format!(
        "SELECT board_id, title, created_by, activity_count, active_users FROM (\
         SELECT b.id AS board_id, b.title AS title, b.created_by AS created_by, \
         COUNT(*) AS activity_count, {} AS active_users \
         FROM {} AS h JOIN {} AS b ON h.board_id = b.id \
         WHERE b.delete_at = 0 AND h.modified_by <> ",
        d.concatenation_selector("DISTINCT h.modified_by", USER_DELIMITER),
        t.history(),
        t.boards()
    ))
    .bind_str(SYSTEM_USER_ID)
    .push(" AND h.insert_at > ")
    .bind(query.since);
    if let Some(team_id) = &query.team_id {
        q.push(" AND b.team_id = ").bind_str(team_id);
    }
    if !query.board_ids.is_empty() {
        q.push(" AND b.id IN ").bind_list(query.board_ids.iter().cloned());
    }
    q.push(" GROUP BY b.id, b.title, b.created_by) AS activity");
    if let Some(user_id) = &query.user_id {
        q.push(" WHERE (created_by = ").bind_str(user_id).push(" OR ");
        let placeholder = q.placeholder_for(user_id.clone());
        q.push(&d.element_in_column("active_users", &placeholder)).push(")");
    }
    q.push(" ORDER BY activity_count DESC, board_id ASC");
    if query.limit > 0 || query.offset > 0 {
        let limit = if query.limit > 0 {
            StoreError::sql_int(query.limit, "activity limit")?
        } else {
            i64::MAX
        };
        q.push(" LIMIT ")
            .bind(limit)
            .push(" OFFSET ")
            .bind(StoreError::sql_int(query.offset, "activity offset")?);
    }
    Ok(q)
}

impl<D: Dialect> SqlStore<D> {
    /// Live boards ranked by history entries inserted after `since`,
    /// excluding writes by the system principal.
    ///
    /// With a user filter, a board is kept when the user created it or
    /// appears in its aggregated modifier list (a substring test).
    pub fn get_board_activity(&self, query: &ActivityQuery) -> StoreResult<Vec<BoardActivity>> {
        let q = select_activity(self.dialect(), self.tables(), query)?;
        self.with_conn(|conn| {
            query_rows(conn, &q, |row| {
                let users: Option<String> = row.get(4)?;
                let mut active_users: Vec<String> = users
                    .unwrap_or_default()
                    .split(USER_DELIMITER)
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .collect();
                active_users.sort();
                Ok(BoardActivity {
                    board_id: row.get(0)?,
                    title: row.get(1)?,
                    created_by: row.get(2)?,
                    activity_count: row.get(3)?,
                    active_users,
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Mysql, Postgres, Sqlite};
    use blockbase_types::{Block, Board};

    fn board(store: &SqlStore, id: &str, team: &str, creator: &str) {
        store
            .insert_board(&Board::new(id, team).with_title(id).with_creator(creator), creator)
            .unwrap();
    }

    #[test]
    fn test_activity_sql_per_dialect() {
        let t = Tables::default();
        let query = ActivityQuery::since(10)
            .for_team("team1")
            .for_boards(["b1", "b2"])
            .for_user("alice")
            .paged(0, 5);

        let q = select_activity(&Sqlite, &t, &query).unwrap();
        assert!(q.sql().contains("group_concat(DISTINCT h.modified_by) AS active_users"));
        assert!(q.sql().contains("FROM blocks_history AS h JOIN boards AS b ON h.board_id = b.id"));
        assert!(q.sql().contains("WHERE b.delete_at = 0 AND h.modified_by <> ?1 AND h.insert_at > ?2"));
        assert!(q.sql().contains("b.team_id = ?3 AND b.id IN (?4, ?5)"));
        assert!(q.sql().contains("WHERE (created_by = ?6 OR instr(active_users, ?7) > 0)"));
        assert_eq!(q.values().len(), 9);

        let pg = Postgres::default();
        let q = select_activity(&pg, &Tables::new("fb_"), &query).unwrap();
        assert!(q.sql().contains("string_agg(DISTINCT h.modified_by, ',')"));
        assert!(q.sql().contains("JOIN fb_boards AS b"));
        assert!(q.sql().contains("position($7 in active_users) > 0"));

        let q = select_activity(&Mysql, &t, &query).unwrap();
        assert!(q.sql().contains("GROUP_CONCAT(DISTINCT h.modified_by SEPARATOR ',')"));
        assert!(q.sql().ends_with("LIMIT ? OFFSET ?"));

        let huge = ActivityQuery::since(0).paged(usize::MAX, 0);
        assert!(matches!(
            select_activity(&Sqlite, &t, &huge),
            Err(StoreError::OutOfRange("activity offset"))
        ));
    }

    #[test]
    fn test_board_activity() {
        let store = SqlStore::in_memory().unwrap();
        board(&store, "board-a", "team1", "alice");
        board(&store, "board-b", "team1", "bob");
        board(&store, "board-c", "team2", "carol");
        let start = blockbase_types::now_millis() - 1;

        store.insert_block(&Block::new("a1", "board-a", "a1"), "alice").unwrap();
        store.insert_block(&Block::new("a2", "board-a", "a2"), "bob").unwrap();
        store.delete_block("a2", "alice").unwrap();
        store.insert_block(&Block::new("b1", "board-b", "b1"), "bob").unwrap();
        store.insert_block(&Block::new("s1", "board-b", "s1"), SYSTEM_USER_ID).unwrap();
        store.insert_block(&Block::new("c1", "board-c", "c1"), SYSTEM_USER_ID).unwrap();
        // history of a board that was never stored is not ranked
        store.insert_block(&Block::new("x1", "board-x", "x1"), "alice").unwrap();

        let all = store.get_board_activity(&ActivityQuery::since(start)).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].board_id, "board-a");
        assert_eq!(all[0].title, "board-a");
        assert_eq!(all[0].created_by, "alice");
        assert_eq!(all[0].activity_count, 3);
        assert_eq!(all[0].active_users, vec!["alice", "bob"]);
        assert_eq!(all[1].board_id, "board-b");
        assert_eq!(all[1].activity_count, 1);

        let alice_boards = store
            .get_board_activity(&ActivityQuery::since(start).for_user("alice"))
            .unwrap();
        assert_eq!(alice_boards.len(), 1);
        assert_eq!(alice_boards[0].board_id, "board-a");

        let paged = store
            .get_board_activity(&ActivityQuery::since(start).paged(1, 1))
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].board_id, "board-b");

        let filtered = store
            .get_board_activity(&ActivityQuery::since(start).for_boards(["board-b"]))
            .unwrap();
        assert_eq!(filtered.len(), 1);

        let other_team = store
            .get_board_activity(&ActivityQuery::since(start).for_team("team2"))
            .unwrap();
        assert!(other_team.is_empty());

        let later = store
            .get_board_activity(&ActivityQuery::since(blockbase_types::now_millis() + 60_000))
            .unwrap();
        assert!(later.is_empty());
    }

    #[test]
    fn test_deleted_board_is_not_ranked() {
        let store = SqlStore::in_memory().unwrap();
        board(&store, "board1", "team1", "alice");
        store.insert_block(&Block::new("b1", "board1", "b1"), "alice").unwrap();
        assert_eq!(store.get_board_activity(&ActivityQuery::since(0)).unwrap().len(), 1);

        store.delete_board("board1", "alice").unwrap();
        assert!(store.get_board_activity(&ActivityQuery::since(0)).unwrap().is_empty());
    }

    #[test]
    fn test_creator_keeps_board_edited_by_others() {
        let store = SqlStore::in_memory().unwrap();
        board(&store, "board2", "team1", "alice");
        store.insert_block(&Block::new("b2", "board2", "b2"), "bob").unwrap();

        let activity = store
            .get_board_activity(&ActivityQuery::since(0).for_user("alice"))
            .unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].board_id, "board2");
        assert_eq!(activity[0].created_by, "alice");
        assert_eq!(activity[0].active_users, vec!["bob"]);

        let carol = store
            .get_board_activity(&ActivityQuery::since(0).for_user("carol"))
            .unwrap();
        assert!(carol.is_empty());
    }
}
