//! SQLite persistence layer for the wren plugin runtime.
//!
//! Holds the plugin descriptor records, the per-guild enabled-plugin
//! lists, and the raw query-execution facade that the plugin SQL
//! capability drives (after its statements have been namespaced by
//! `wren-sqlscope`).

mod error;

pub use error::StorageError;

use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Separator for the per-guild enabled-plugin list. A unit-separator
/// byte never appears in a plugin name.
const LIST_SEP: char = '\u{1f}';

/// A plugin's required self-identification. Valid only when all three
/// fields are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl PluginDescriptor {
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.version.is_empty() && !self.description.is_empty()
    }
}

/// A single dynamically-typed SQL value crossing the plugin facade.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value};
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Owned(Value::Text(s.clone())),
            SqlValue::Blob(b) => ToSqlOutput::Owned(Value::Blob(b.clone())),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

/// One result row: column name / value pairs in select order.
pub type SqlRow = Vec<(String, SqlValue)>;

/// Handle to the shared SQLite database.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)
            .map_err(|e| StorageError::Storage(format!("failed to open database: {e}")))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Storage(format!("failed to open in-memory database: {e}")))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS plugins (
                name TEXT PRIMARY KEY,
                version TEXT NOT NULL,
                description TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS guilds (
                id TEXT PRIMARY KEY,
                enabled_plugins TEXT NOT NULL DEFAULT ''
            );
            ",
        )
        .map_err(|e| StorageError::Storage(format!("failed to init schema: {e}")))?;
        Ok(())
    }

    // ── Plugin descriptors ───────────────────────────────────────

    /// Upserts a descriptor record, replacing on name conflict.
    pub fn upsert_plugin(&self, descriptor: &PluginDescriptor) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO plugins (name, version, description) VALUES (?1, ?2, ?3)",
            params![descriptor.name, descriptor.version, descriptor.description],
        )
        .map_err(|e| StorageError::Storage(format!("failed to save plugin descriptor: {e}")))?;
        Ok(())
    }

    /// Loads a descriptor by plugin name.
    pub fn plugin(&self, name: &str) -> Result<Option<PluginDescriptor>, StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT name, version, description FROM plugins WHERE name = ?1 LIMIT 1",
            params![name],
            |row| {
                Ok(PluginDescriptor {
                    name: row.get(0)?,
                    version: row.get(1)?,
                    description: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| StorageError::Storage(format!("failed to load plugin descriptor: {e}")))
    }

    // ── Guild enablement ─────────────────────────────────────────

    /// Creates a guild record if one does not exist yet.
    pub fn create_guild(&self, guild_id: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO guilds (id) VALUES (?1)",
            params![guild_id],
        )
        .map_err(|e| StorageError::Storage(format!("failed to create guild: {e}")))?;
        Ok(())
    }

    /// Loads the enabled-plugin list for one guild.
    pub fn enabled_plugins(&self, guild_id: &str) -> Result<Vec<String>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let joined: Option<String> = conn
            .query_row(
                "SELECT enabled_plugins FROM guilds WHERE id = ?1 LIMIT 1",
                params![guild_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Storage(format!("failed to load enabled plugins: {e}")))?;
        Ok(split_list(joined.as_deref().unwrap_or("")))
    }

    /// Stores the enabled-plugin list for one guild.
    pub fn set_enabled_plugins(
        &self,
        guild_id: &str,
        plugins: &[String],
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO guilds (id, enabled_plugins) VALUES (?1, ?2)
             ON CONFLICT (id) DO UPDATE SET enabled_plugins = ?2",
            params![guild_id, join_list(plugins)],
        )
        .map_err(|e| StorageError::Storage(format!("failed to save enabled plugins: {e}")))?;
        Ok(())
    }

    /// Loads every guild's enabled-plugin list (startup path).
    pub fn all_enablements(&self) -> Result<Vec<(String, Vec<String>)>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, enabled_plugins FROM guilds")
            .map_err(|e| StorageError::Storage(format!("failed to prepare enablement query: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let joined: String = row.get(1)?;
                Ok((id, joined))
            })
            .map_err(|e| StorageError::Storage(format!("failed to query enablements: {e}")))?;

        let mut result = Vec::new();
        for row in rows {
            let (id, joined) =
                row.map_err(|e| StorageError::Storage(format!("failed to read guild row: {e}")))?;
            result.push((id, split_list(&joined)));
        }
        Ok(result)
    }

    // ── Plugin SQL facade ────────────────────────────────────────

    /// Executes a (namespaced) statement and returns the number of rows
    /// changed. With no parameters the input may contain several
    /// `;`-separated statements; that batch path always reports 0, since
    /// SQLite only counts the last statement. With parameters the input
    /// must be a single statement.
    pub fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<usize, StorageError> {
        let conn = self.conn.lock().unwrap();
        if args.is_empty() {
            match conn.execute(sql, []) {
                Ok(changed) => Ok(changed),
                Err(rusqlite::Error::MultipleStatement) => {
                    conn.execute_batch(sql)
                        .map_err(|e| StorageError::Storage(format!("failed to execute: {e}")))?;
                    Ok(0)
                }
                Err(e) => Err(StorageError::Storage(format!("failed to execute: {e}"))),
            }
        } else {
            conn.execute(sql, params_from_iter(args.iter()))
                .map_err(|e| StorageError::Storage(format!("failed to execute: {e}")))
        }
    }

    /// Runs a (namespaced) query and returns every row.
    pub fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| StorageError::Storage(format!("failed to prepare query: {e}")))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt
            .query(params_from_iter(args.iter()))
            .map_err(|e| StorageError::Storage(format!("failed to run query: {e}")))?;

        let mut result = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| StorageError::Storage(format!("failed to read row: {e}")))?
        {
            let mut out = SqlRow::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                let value = row
                    .get_ref(i)
                    .map_err(|e| StorageError::Storage(format!("failed to read column: {e}")))?;
                out.push((column.clone(), SqlValue::from(value)));
            }
            result.push(out);
        }
        Ok(result)
    }

    /// Runs a (namespaced) query and returns the first row, if any.
    pub fn query_one(&self, sql: &str, args: &[SqlValue]) -> Result<Option<SqlRow>, StorageError> {
        Ok(self.query(sql, args)?.into_iter().next())
    }
}

fn join_list(items: &[String]) -> String {
    items.join(&LIST_SEP.to_string())
}

fn split_list(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(LIST_SEP).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> PluginDescriptor {
        PluginDescriptor {
            name: name.into(),
            version: "1.0.0".into(),
            description: format!("Test plugin {name}"),
        }
    }

    #[test]
    fn descriptor_completeness() {
        assert!(descriptor("a").is_complete());
        let mut d = descriptor("a");
        d.version = String::new();
        assert!(!d.is_complete());
    }

    #[test]
    fn upsert_and_load_descriptor() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_plugin(&descriptor("greeter")).unwrap();

        let loaded = db.plugin("greeter").unwrap().unwrap();
        assert_eq!(loaded, descriptor("greeter"));
        assert!(db.plugin("missing").unwrap().is_none());
    }

    #[test]
    fn upsert_replaces_on_name_conflict() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_plugin(&descriptor("greeter")).unwrap();

        let mut updated = descriptor("greeter");
        updated.version = "2.0.0".into();
        db.upsert_plugin(&updated).unwrap();

        assert_eq!(db.plugin("greeter").unwrap().unwrap().version, "2.0.0");
    }

    #[test]
    fn enablement_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.set_enabled_plugins("g1", &["a".into(), "b".into()]).unwrap();

        assert_eq!(db.enabled_plugins("g1").unwrap(), vec!["a", "b"]);
        assert!(db.enabled_plugins("unknown").unwrap().is_empty());

        db.set_enabled_plugins("g1", &["b".into()]).unwrap();
        assert_eq!(db.enabled_plugins("g1").unwrap(), vec!["b"]);
    }

    #[test]
    fn all_enablements_includes_every_guild() {
        let db = Database::open_in_memory().unwrap();
        db.create_guild("g1").unwrap();
        db.set_enabled_plugins("g2", &["x".into()]).unwrap();

        let mut all = db.all_enablements().unwrap();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(all.len(), 2);
        assert!(all[0].1.is_empty());
        assert_eq!(all[1].1, vec!["x"]);
    }

    #[test]
    fn facade_exec_and_query() {
        let db = Database::open_in_memory().unwrap();
        db.exec("CREATE TABLE t (id INTEGER, name TEXT);", &[]).unwrap();
        db.exec(
            "INSERT INTO t VALUES (?1, ?2)",
            &[SqlValue::Integer(1), SqlValue::Text("one".into())],
        )
        .unwrap();

        let rows = db.query("SELECT id, name FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], ("id".to_string(), SqlValue::Integer(1)));
        assert_eq!(rows[0][1], ("name".to_string(), SqlValue::Text("one".into())));

        let one = db.query_one("SELECT COUNT(*) AS n FROM t", &[]).unwrap().unwrap();
        assert_eq!(one[0].1, SqlValue::Integer(1));

        assert!(db.query_one("SELECT * FROM t WHERE id = 99", &[]).unwrap().is_none());
    }

    #[test]
    fn exec_reports_rows_changed() {
        let db = Database::open_in_memory().unwrap();
        db.exec("CREATE TABLE t (id INTEGER)", &[]).unwrap();
        db.exec("INSERT INTO t VALUES (1)", &[]).unwrap();
        db.exec("INSERT INTO t VALUES (2)", &[]).unwrap();

        assert_eq!(db.exec("DELETE FROM t", &[]).unwrap(), 2);

        // Multi-statement batches run fully but cannot report a count.
        assert_eq!(
            db.exec("INSERT INTO t VALUES (3); INSERT INTO t VALUES (4)", &[])
                .unwrap(),
            0
        );
        let rows = db.query("SELECT COUNT(*) AS n FROM t", &[]).unwrap();
        assert_eq!(rows[0][0].1, SqlValue::Integer(2));
    }

    #[test]
    fn list_split_join() {
        assert_eq!(split_list(""), Vec::<String>::new());
        let items = vec!["a".to_string(), "b".to_string()];
        assert_eq!(split_list(&join_list(&items)), items);
    }
}
