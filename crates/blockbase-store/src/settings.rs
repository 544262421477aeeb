//! Key/value system settings (schema version, migration flags).

use std::collections::BTreeMap;

use rusqlite::Connection;

use crate::dialect::{Dialect, SqlBuilder};
use crate::error::StoreResult;
use crate::schema::Tables;
use crate::store::{SqlStore, execute, query_opt, query_rows};

pub(crate) fn read_setting<D: Dialect>(conn: &Connection, d: &D, t: &Tables, key: &str) -> StoreResult<Option<String>> {
    let mut q = SqlBuilder::new(d);
    q.push(&format!(
        "SELECT value FROM {} WHERE {} = ",
        t.settings(),
        d.quote_ident("key")
    ))
    .bind_str(key);
    query_opt(conn, &q, |row| row.get(0))
}

pub(crate) fn write_setting<D: Dialect>(conn: &Connection, d: &D, t: &Tables, key: &str, value: &str) -> StoreResult<()> {
    let key_col = d.quote_ident("key");
    let mut q = SqlBuilder::new(d);
    q.push(&format!("INSERT INTO {} ({key_col}, value) VALUES (", t.settings()))
        .bind_str(key)
        .push(", ")
        .bind_str(value)
        .push(") ")
        .push(&d.upsert_clause(&[&key_col], &["value"]));
    execute(conn, &q)?;
    Ok(())
}

/// A boolean flag; missing or unparsable values read as `false`.
pub(crate) fn read_flag<D: Dialect>(conn: &Connection, d: &D, t: &Tables, key: &str) -> StoreResult<bool> {
    Ok(read_setting(conn, d, t, key)?.is_some_and(|v| v.trim().eq_ignore_ascii_case("true")))
}

impl<D: Dialect> SqlStore<D> {
    pub fn get_system_setting(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_conn(|conn| read_setting(conn, self.dialect(), self.tables(), key))
    }

    pub fn set_system_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_tx(|tx| write_setting(tx, self.dialect(), self.tables(), key, value))
    }

    /// Every setting, by key.
    pub fn get_system_settings(&self) -> StoreResult<BTreeMap<String, String>> {
        let mut q = self.query();
        q.push(&format!(
            "SELECT {}, value FROM {}",
            self.dialect().quote_ident("key"),
            self.tables().settings()
        ));
        let rows = self.with_conn(|conn| {
            query_rows(conn, &q, |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        })?;
        Ok(rows.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_list() {
        let store = SqlStore::in_memory().unwrap();
        assert_eq!(store.get_system_setting("Telemetry").unwrap(), None);

        store.set_system_setting("Telemetry", "on").unwrap();
        store.set_system_setting("Telemetry", "off").unwrap();
        assert_eq!(store.get_system_setting("Telemetry").unwrap().as_deref(), Some("off"));

        let all = store.get_system_settings().unwrap();
        assert_eq!(all["Telemetry"], "off");
        assert_eq!(all["SchemaVersion"], "3");
    }

    #[test]
    fn test_flag_parsing() {
        let store = SqlStore::in_memory().unwrap();
        store.set_system_setting("A", "TRUE").unwrap();
        store.set_system_setting("B", "yes").unwrap();
        let (d, t) = (store.dialect(), store.tables());
        store
            .with_conn(|conn| {
                assert!(read_flag(conn, d, t, "A")?);
                assert!(!read_flag(conn, d, t, "B")?);
                assert!(!read_flag(conn, d, t, "C")?);
                Ok(())
            })
            .unwrap();
    }
}
