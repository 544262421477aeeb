//! Per-user sidebar categories.

use std::collections::BTreeMap;

use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::StoreResult;
use crate::store::{SqlStore, query_rows};

pub(crate) const CATEGORY_COLUMNS: &str =
    "id, name, user_id, team_id, channel_id, create_at, update_at, delete_at";

pub(crate) const CATEGORY_BOARD_COLUMNS: &str =
    "id, user_id, category_id, board_id, create_at, update_at, delete_at";

/// A named group of boards in one user's sidebar.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub user_id: String,
    pub team_id: String,
    /// Channel the category was derived from, if any.
    pub channel_id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
}

/// Membership of a board in a category.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBoard {
    pub id: String,
    pub user_id: String,
    pub category_id: String,
    pub board_id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
}

/// A category with the ids of its boards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBoards {
    #[serde(flatten)]
    pub category: Category,
    pub board_ids: Vec<String>,
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        user_id: row.get(2)?,
        team_id: row.get(3)?,
        channel_id: row.get(4)?,
        create_at: row.get(5)?,
        update_at: row.get(6)?,
        delete_at: row.get(7)?,
    })
}

impl<D: Dialect> SqlStore<D> {
    /// Live categories of a user in a team, each with its live boards.
    /// Ordered by name.
    pub fn get_user_category_boards(&self, user_id: &str, team_id: &str) -> StoreResult<Vec<CategoryBoards>> {
        let t = self.tables();
        let mut categories_q = self.query();
        categories_q
            .push(&format!("SELECT {CATEGORY_COLUMNS} FROM {} WHERE user_id = ", t.categories()))
            .bind_str(user_id)
            .push(" AND team_id = ")
            .bind_str(team_id)
            .push(" AND delete_at = 0 ORDER BY name ASC, id ASC");

        let mut boards_q = self.query();
        boards_q
            .push(&format!(
                "SELECT cb.category_id, cb.board_id FROM {} AS cb JOIN {} AS c ON c.id = cb.category_id \
                 WHERE cb.user_id = ",
                t.category_boards(),
                t.categories()
            ))
            .bind_str(user_id)
            .push(" AND c.team_id = ")
            .bind_str(team_id)
            .push(" AND cb.delete_at = 0 ORDER BY cb.board_id ASC");

        let (categories, memberships) = self.with_conn(|conn| {
            let categories = query_rows(conn, &categories_q, category_from_row)?;
            let memberships = query_rows(conn, &boards_q, |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            Ok((categories, memberships))
        })?;

        let mut by_category: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (category_id, board_id) in memberships {
            by_category.entry(category_id).or_default().push(board_id);
        }
        Ok(categories
            .into_iter()
            .map(|category| CategoryBoards {
                board_ids: by_category.remove(&category.id).unwrap_or_default(),
                category,
            })
            .collect())
    }
}
