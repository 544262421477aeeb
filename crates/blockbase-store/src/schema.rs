//! Table names and versioned DDL.
//!
//! The schema is applied in numbered steps recorded under
//! [`SCHEMA_VERSION_KEY`] in `system_settings`. Step 1 creates the block
//! tables in their legacy shape (primary key `(board_id, id)`); step 3 adds
//! the unique index on `blocks(id)` and may only run once duplicate ids are
//! repaired.

use crate::dialect::{ColumnKind, Dialect};

/// Setting holding the highest applied schema step.
pub const SCHEMA_VERSION_KEY: &str = "SchemaVersion";

pub const STEP_BLOCKS: i64 = 1;
pub const STEP_BOARDS: i64 = 2;
pub const STEP_UNIQUE_BLOCK_IDS: i64 = 3;

/// All schema steps with a short description, in order.
pub const SCHEMA_STEPS: &[(i64, &str)] = &[
    (STEP_BLOCKS, "blocks and history"),
    (STEP_BOARDS, "boards and categories"),
    (STEP_UNIQUE_BLOCK_IDS, "unique block ids"),
];

/// Column list shared by `blocks` and `blocks_history`.
pub(crate) const BLOCK_COLUMNS: &str = "id, board_id, parent_id, root_id, type, title, fields, \
     created_by, modified_by, create_at, update_at, delete_at";

/// Table names with the configured prefix applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tables {
    prefix: String,
}

impl Tables {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn name(&self, base: &str) -> String {
        format!("{}{}", self.prefix, base)
    }

    pub fn blocks(&self) -> String {
        self.name("blocks")
    }

    pub fn history(&self) -> String {
        self.name("blocks_history")
    }

    pub fn settings(&self) -> String {
        self.name("system_settings")
    }

    pub fn locks(&self) -> String {
        self.name("cluster_locks")
    }

    pub fn boards(&self) -> String {
        self.name("boards")
    }

    pub fn categories(&self) -> String {
        self.name("categories")
    }

    pub fn category_boards(&self) -> String {
        self.name("category_boards")
    }
}

struct TableDef<'a, D: Dialect> {
    dialect: &'a D,
    name: String,
    columns: Vec<String>,
}

impl<'a, D: Dialect> TableDef<'a, D> {
    fn new(dialect: &'a D, name: String) -> Self {
        Self {
            dialect,
            name,
            columns: Vec::new(),
        }
    }

    fn column(mut self, name: &str, kind: ColumnKind) -> Self {
        self.columns
            .push(format!("{name} {} NOT NULL", self.dialect.column_type(kind)));
        self
    }

    fn nullable(mut self, name: &str, kind: ColumnKind) -> Self {
        self.columns
            .push(format!("{name} {}", self.dialect.column_type(kind)));
        self
    }

    fn block_columns(self) -> Self {
        self.column("id", ColumnKind::Id)
            .column("board_id", ColumnKind::Id)
            .column("parent_id", ColumnKind::Id)
            .column("root_id", ColumnKind::Id)
            .column("type", ColumnKind::Name)
            .column("title", ColumnKind::Text)
            .nullable("fields", ColumnKind::Json)
            .column("created_by", ColumnKind::Id)
            .column("modified_by", ColumnKind::Id)
            .column("create_at", ColumnKind::BigInt)
            .column("update_at", ColumnKind::BigInt)
            .column("delete_at", ColumnKind::BigInt)
    }

    fn primary_key(self, columns: &[&str]) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {},\n    PRIMARY KEY ({})\n)",
            self.name,
            self.columns.join(",\n    "),
            columns.join(", ")
        )
    }
}

/// DDL that must exist before any versioned step runs: the settings table
/// that records versions and the lock table that guards them.
pub fn bootstrap_statements<D: Dialect>(d: &D, t: &Tables) -> Vec<String> {
    let key = d.quote_ident("key");
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {key} {} NOT NULL,\n    value {} NOT NULL,\n    PRIMARY KEY ({key})\n)",
            t.settings(),
            d.column_type(ColumnKind::Name),
            d.column_type(ColumnKind::Text),
        ),
        TableDef::new(d, t.locks())
            .column("name", ColumnKind::Name)
            .column("holder", ColumnKind::Name)
            .column("expires_at", ColumnKind::BigInt)
            .primary_key(&["name"]),
    ]
}

/// DDL for one schema step. Unknown steps have no statements.
pub fn step_statements<D: Dialect>(d: &D, t: &Tables, step: i64) -> Vec<String> {
    let idx = |base: &str| t.name(&format!("idx_{base}"));
    match step {
        STEP_BLOCKS => vec![
            TableDef::new(d, t.blocks())
                .block_columns()
                .primary_key(&["board_id", "id"]),
            d.create_index(&idx("blocks_board_parent"), &t.blocks(), &["board_id", "parent_id"], false),
            d.create_index(&idx("blocks_root"), &t.blocks(), &["root_id"], false),
            TableDef::new(d, t.history())
                .block_columns()
                .column("insert_at", ColumnKind::BigInt)
                .primary_key(&["id", "insert_at"]),
            d.create_index(&idx("history_root"), &t.history(), &["root_id"], false),
            d.create_index(&idx("history_board_insert"), &t.history(), &["board_id", "insert_at"], false),
        ],
        STEP_BOARDS => vec![
            TableDef::new(d, t.boards())
                .column("id", ColumnKind::Id)
                .column("team_id", ColumnKind::Id)
                .column("channel_id", ColumnKind::Id)
                .column("created_by", ColumnKind::Id)
                .column("modified_by", ColumnKind::Id)
                .column("type", ColumnKind::Name)
                .column("title", ColumnKind::Text)
                .column("is_template", ColumnKind::Bool)
                .column("create_at", ColumnKind::BigInt)
                .column("update_at", ColumnKind::BigInt)
                .column("delete_at", ColumnKind::BigInt)
                .primary_key(&["id"]),
            d.create_index(&idx("boards_team"), &t.boards(), &["team_id"], false),
            d.create_index(&idx("boards_channel"), &t.boards(), &["channel_id"], false),
            TableDef::new(d, t.categories())
                .column("id", ColumnKind::Id)
                .column("name", ColumnKind::Text)
                .column("user_id", ColumnKind::Id)
                .column("team_id", ColumnKind::Id)
                .column("channel_id", ColumnKind::Id)
                .column("create_at", ColumnKind::BigInt)
                .column("update_at", ColumnKind::BigInt)
                .column("delete_at", ColumnKind::BigInt)
                .primary_key(&["id"]),
            d.create_index(&idx("categories_user_team"), &t.categories(), &["user_id", "team_id"], false),
            TableDef::new(d, t.category_boards())
                .column("id", ColumnKind::Id)
                .column("user_id", ColumnKind::Id)
                .column("category_id", ColumnKind::Id)
                .column("board_id", ColumnKind::Id)
                .column("create_at", ColumnKind::BigInt)
                .column("update_at", ColumnKind::BigInt)
                .column("delete_at", ColumnKind::BigInt)
                .primary_key(&["id"]),
            d.create_index(&idx("category_boards_category"), &t.category_boards(), &["category_id"], false),
        ],
        STEP_UNIQUE_BLOCK_IDS => vec![d.create_index(
            &idx("blocks_id_unique"),
            &t.blocks(),
            &["id"],
            true,
        )],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Mysql, Postgres, Sqlite};

    #[test]
    fn test_prefixed_names() {
        let t = Tables::new("fb_");
        assert_eq!(t.blocks(), "fb_blocks");
        assert_eq!(t.history(), "fb_blocks_history");
        assert_eq!(t.settings(), "fb_system_settings");
        assert_eq!(Tables::default().locks(), "cluster_locks");
    }

    #[test]
    fn test_legacy_blocks_key() {
        let stmts = step_statements(&Sqlite, &Tables::new("fb_"), STEP_BLOCKS);
        assert!(stmts[0].starts_with("CREATE TABLE IF NOT EXISTS fb_blocks ("));
        assert!(stmts[0].contains("PRIMARY KEY (board_id, id)"));
        assert!(stmts.iter().any(|s| s.contains("PRIMARY KEY (id, insert_at)")));
        assert!(stmts.iter().all(|s| !s.contains("UNIQUE")));
    }

    #[test]
    fn test_dialect_column_types() {
        let t = Tables::default();
        let pg = step_statements(&Postgres::default(), &t, STEP_BLOCKS);
        assert!(pg[0].contains("id VARCHAR(36) NOT NULL"));
        assert!(pg[0].contains("fields JSONB"));

        let my = step_statements(&Mysql, &t, STEP_UNIQUE_BLOCK_IDS);
        assert_eq!(my, vec!["CREATE UNIQUE INDEX idx_blocks_id_unique ON blocks (id)".to_string()]);

        let boot = bootstrap_statements(&Mysql, &t);
        assert!(boot[0].contains("`key` VARCHAR(100) NOT NULL"));
    }

    #[test]
    fn test_unknown_step_is_empty() {
        assert!(step_statements(&Sqlite, &Tables::default(), 99).is_empty());
        assert_eq!(SCHEMA_STEPS.last().map(|(v, _)| *v), Some(STEP_UNIQUE_BLOCK_IDS));
    }
}
