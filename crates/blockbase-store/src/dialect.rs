//! SQL dialect strategies.
//!
//! Query code never writes dialect-specific syntax directly. It builds a
//! [`SqlBuilder`] (SQL text plus ordered bind values) and asks the store's
//! [`Dialect`] for the fragments that differ between databases:
//!
//! | Concern             | SQLite                | PostgreSQL                | MySQL                              |
//! |---------------------|-----------------------|---------------------------|------------------------------------|
//! | identifier quoting  | `"key"`               | `"key"`                   | `` `key` ``                        |
//! | placeholder         | `?1`                  | `$1`                      | `?`                                |
//! | string aggregation  | `group_concat(x)`     | `string_agg(x, ',')`      | `GROUP_CONCAT(x SEPARATOR ',')`    |
//! | substring search    | `instr(col, ?1) > 0`  | `position($1 in col) > 0` | `instr(col, ?) > 0`                |
//! | JSON parameters     | text                  | text, or `0x01`-prefixed bytes in binary mode | text                |
//!
//! The dialect is a type parameter of the store, chosen once at construction.

use std::str::FromStr;

use rusqlite::types::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::config::connection_param;

/// A bind value. Shared with the SQLite executor.
pub type SqlValue = Value;

/// Marker byte PostgreSQL expects in front of binary-encoded JSONB.
pub const JSONB_BINARY_PREFIX: u8 = 0x01;

/// Database driver identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, EnumString, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DbType {
    #[default]
    #[strum(to_string = "sqlite3", serialize = "sqlite")]
    Sqlite,
    #[strum(to_string = "postgres", serialize = "postgresql")]
    Postgres,
    #[strum(to_string = "mysql")]
    Mysql,
}

impl DbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Sqlite => "sqlite3",
            DbType::Postgres => "postgres",
            DbType::Mysql => "mysql",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s.trim()).ok()
    }
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for DbType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        DbType::from_str(&s).ok_or_else(|| format!("unknown database driver '{s}'"))
    }
}

impl From<DbType> for String {
    fn from(db_type: DbType) -> Self {
        db_type.as_str().to_string()
    }
}

/// Logical column type used in DDL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    /// Entity identifier.
    Id,
    /// Short indexed string (types, setting keys, lock names).
    Name,
    /// Unbounded text.
    Text,
    /// JSON document.
    Json,
    /// 64-bit integer (timestamps).
    BigInt,
    Bool,
}

/// Dialect-specific SQL rendering.
pub trait Dialect: Clone + Send + Sync + 'static {
    fn db_type(&self) -> DbType;

    /// Quote an identifier that may collide with a keyword.
    fn quote_ident(&self, ident: &str) -> String;

    /// Placeholder for the `index`-th (1-based) bind value.
    fn placeholder(&self, index: usize) -> String;

    /// Aggregate `field` across a group into one delimited string.
    fn concatenation_selector(&self, field: &str, delimiter: &str) -> String;

    /// Condition: the string bound at `placeholder` occurs in `column`.
    fn element_in_column(&self, column: &str, placeholder: &str) -> String;

    fn column_type(&self, kind: ColumnKind) -> &'static str;

    /// Clause turning an INSERT into an upsert on `conflict` columns.
    fn upsert_clause(&self, conflict: &[&str], update: &[&str]) -> String;

    /// `CREATE INDEX` statement for `columns` of `table`.
    fn create_index(&self, name: &str, table: &str, columns: &[&str], unique: bool) -> String {
        format!(
            "CREATE {}INDEX IF NOT EXISTS {name} ON {table} ({})",
            if unique { "UNIQUE " } else { "" },
            columns.join(", ")
        )
    }

    /// JSON parameters are sent as flagged bytes instead of text.
    fn binary_params(&self) -> bool {
        false
    }

    /// Encode a value for a JSON column.
    fn encode_json<T: Serialize>(&self, value: &T) -> serde_json::Result<SqlValue> {
        if self.binary_params() {
            let mut flagged = vec![JSONB_BINARY_PREFIX];
            serde_json::to_writer(&mut flagged, value)?;
            Ok(Value::Blob(flagged))
        } else {
            Ok(Value::Text(serde_json::to_string(value)?))
        }
    }
}

/// Decode a JSON column written by [`Dialect::encode_json`] in either mode.
/// NULL and empty values decode to `T::default()`.
pub fn decode_json<T: DeserializeOwned + Default>(value: &SqlValue) -> serde_json::Result<T> {
    match value {
        Value::Null => Ok(T::default()),
        Value::Text(s) if s.is_empty() => Ok(T::default()),
        Value::Text(s) => serde_json::from_str(s),
        Value::Blob(b) => {
            let bytes = b.strip_prefix(&[JSONB_BINARY_PREFIX]).unwrap_or(b.as_slice());
            if bytes.is_empty() {
                Ok(T::default())
            } else {
                serde_json::from_slice(bytes)
            }
        }
        other => Err(<serde_json::Error as serde::de::Error>::custom(format!(
            "expected JSON text, found {:?}",
            other.data_type()
        ))),
    }
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn quote_with(ident: &str, quote: char) -> String {
    let doubled: String = [quote, quote].iter().collect();
    format!("{quote}{}{quote}", ident.replace(quote, &doubled))
}

fn excluded_updates(update: &[&str], excluded: &str) -> String {
    update
        .iter()
        .map(|col| format!("{col} = {excluded}.{col}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// SQLite
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn db_type(&self) -> DbType {
        DbType::Sqlite
    }

    fn quote_ident(&self, ident: &str) -> String {
        quote_with(ident, '"')
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{index}")
    }

    fn concatenation_selector(&self, field: &str, delimiter: &str) -> String {
        // group_concat(DISTINCT x) accepts no separator and always uses ','
        if field.trim_start().to_ascii_uppercase().starts_with("DISTINCT ") {
            format!("group_concat({field})")
        } else {
            format!("group_concat({field}, {})", quote_literal(delimiter))
        }
    }

    fn element_in_column(&self, column: &str, placeholder: &str) -> String {
        format!("instr({column}, {placeholder}) > 0")
    }

    fn column_type(&self, kind: ColumnKind) -> &'static str {
        match kind {
            ColumnKind::Id | ColumnKind::Name | ColumnKind::Text | ColumnKind::Json => "TEXT",
            ColumnKind::BigInt => "INTEGER",
            ColumnKind::Bool => "BOOLEAN",
        }
    }

    fn upsert_clause(&self, conflict: &[&str], update: &[&str]) -> String {
        format!(
            "ON CONFLICT ({}) DO UPDATE SET {}",
            conflict.join(", "),
            excluded_updates(update, "excluded")
        )
    }
}

// ============================================================================
// PostgreSQL
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Postgres {
    pub binary_parameters: bool,
}

impl Postgres {
    /// Binary mode is on when the connection string carries
    /// `binary_parameters=yes`.
    pub fn from_connection_string(conn_str: &str) -> Self {
        Self {
            binary_parameters: connection_param(conn_str, "binary_parameters") == Some("yes"),
        }
    }
}

impl Dialect for Postgres {
    fn db_type(&self) -> DbType {
        DbType::Postgres
    }

    fn quote_ident(&self, ident: &str) -> String {
        quote_with(ident, '"')
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn concatenation_selector(&self, field: &str, delimiter: &str) -> String {
        format!("string_agg({field}, {})", quote_literal(delimiter))
    }

    fn element_in_column(&self, column: &str, placeholder: &str) -> String {
        format!("position({placeholder} in {column}) > 0")
    }

    fn column_type(&self, kind: ColumnKind) -> &'static str {
        match kind {
            ColumnKind::Id => "VARCHAR(36)",
            ColumnKind::Name => "VARCHAR(100)",
            ColumnKind::Text => "TEXT",
            ColumnKind::Json => "JSONB",
            ColumnKind::BigInt => "BIGINT",
            ColumnKind::Bool => "BOOLEAN",
        }
    }

    fn upsert_clause(&self, conflict: &[&str], update: &[&str]) -> String {
        format!(
            "ON CONFLICT ({}) DO UPDATE SET {}",
            conflict.join(", "),
            excluded_updates(update, "EXCLUDED")
        )
    }

    fn binary_params(&self) -> bool {
        self.binary_parameters
    }
}

// ============================================================================
// MySQL
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mysql;

impl Dialect for Mysql {
    fn db_type(&self) -> DbType {
        DbType::Mysql
    }

    fn quote_ident(&self, ident: &str) -> String {
        quote_with(ident, '`')
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn concatenation_selector(&self, field: &str, delimiter: &str) -> String {
        format!("GROUP_CONCAT({field} SEPARATOR {})", quote_literal(delimiter))
    }

    fn element_in_column(&self, column: &str, placeholder: &str) -> String {
        format!("instr({column}, {placeholder}) > 0")
    }

    fn column_type(&self, kind: ColumnKind) -> &'static str {
        match kind {
            ColumnKind::Id => "VARCHAR(36)",
            ColumnKind::Name => "VARCHAR(100)",
            ColumnKind::Text => "TEXT",
            ColumnKind::Json => "JSON",
            ColumnKind::BigInt => "BIGINT",
            ColumnKind::Bool => "BOOLEAN",
        }
    }

    fn upsert_clause(&self, _conflict: &[&str], update: &[&str]) -> String {
        let sets = update
            .iter()
            .map(|col| format!("{col} = VALUES({col})"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("ON DUPLICATE KEY UPDATE {sets}")
    }

    // MySQL has no IF NOT EXISTS for indexes; schema steps run once.
    fn create_index(&self, name: &str, table: &str, columns: &[&str], unique: bool) -> String {
        format!(
            "CREATE {}INDEX {name} ON {table} ({})",
            if unique { "UNIQUE " } else { "" },
            columns.join(", ")
        )
    }
}

// ============================================================================
// Query builder
// ============================================================================

/// SQL text with its bind values in placeholder order.
#[derive(Debug, Clone)]
pub struct SqlBuilder<'d, D: Dialect> {
    dialect: &'d D,
    sql: String,
    values: Vec<SqlValue>,
}

impl<'d, D: Dialect> SqlBuilder<'d, D> {
    pub fn new(dialect: &'d D) -> Self {
        Self {
            dialect,
            sql: String::new(),
            values: Vec::new(),
        }
    }

    pub fn dialect(&self) -> &'d D {
        self.dialect
    }

    /// Append raw SQL.
    pub fn push(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    /// Register a bind value and return its placeholder without appending it.
    pub fn placeholder_for(&mut self, value: impl Into<SqlValue>) -> String {
        self.values.push(value.into());
        self.dialect.placeholder(self.values.len())
    }

    /// Append a placeholder bound to `value`.
    pub fn bind(&mut self, value: impl Into<SqlValue>) -> &mut Self {
        let placeholder = self.placeholder_for(value);
        self.sql.push_str(&placeholder);
        self
    }

    pub fn bind_str(&mut self, value: &str) -> &mut Self {
        self.bind(value.to_string())
    }

    /// Append `(p1, p2, ...)`. An empty list renders `(NULL)`, which matches
    /// nothing in an `IN` test.
    pub fn bind_list<I, V>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        let placeholders: Vec<String> = values
            .into_iter()
            .map(|v| self.placeholder_for(v))
            .collect();
        if placeholders.is_empty() {
            self.sql.push_str("(NULL)");
        } else {
            self.sql.push('(');
            self.sql.push_str(&placeholders.join(", "));
            self.sql.push(')');
        }
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn into_parts(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.values)
    }
}
