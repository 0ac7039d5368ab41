//! SQLite backend for the data store and the upstream source.
//!
//! Used for local/offline deployments and throughout the test suite. Tables
//! are created on first insert with untyped columns and widened when new
//! columns show up, so the store accepts whatever row shapes the refresh jobs
//! produce. Conditions are spliced into the `WHERE` clause as-is, matching the
//! remote store's opaque-condition contract.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Number, Value};

use super::errors::StoreError;
use super::remote::DataStore;
use super::table::{Row, Table};
use crate::upstream::UpstreamSource;

/// A store-side procedure: receives the connection and the JSON arguments.
pub type Procedure = Box<dyn Fn(&Connection, &Value) -> rusqlite::Result<()> + Send + Sync>;

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    procedures: HashMap<String, Procedure>,
}

impl SqliteStore {
    /// Open (or create) a database file. Pass `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            procedures: HashMap::new(),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    /// Register a named procedure callable through `call_procedure`.
    pub fn with_procedure<F>(mut self, name: &str, procedure: F) -> Self
    where
        F: Fn(&Connection, &Value) -> rusqlite::Result<()> + Send + Sync + 'static,
    {
        self.procedures.insert(name.to_string(), Box::new(procedure));
        self
    }

    /// Run raw SQL (fixtures, migrations).
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|e| StoreError::QueryFailed {
            table: "sqlite".into(),
            reason: format!("lock poisoned: {e}"),
        })
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn existing_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Create the table or add any columns it is missing.
fn ensure_table(conn: &Connection, table: &str, columns: &[String]) -> rusqlite::Result<()> {
    if !table_exists(conn, table)? {
        let cols = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute_batch(&format!("CREATE TABLE {} ({cols})", quote_ident(table)))?;
        return Ok(());
    }
    let existing = existing_columns(conn, table)?;
    for column in columns {
        if !existing.iter().any(|c| c == column) {
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote_ident(table),
                quote_ident(column)
            ))?;
        }
    }
    Ok(())
}

fn to_sql(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

fn query_table(conn: &Connection, sql: &str) -> rusqlite::Result<Table> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Row::new();
        for (i, name) in columns.iter().enumerate() {
            map.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        out.push(map);
    }
    Ok(Table { columns, rows: out })
}

fn query_failed(table: &str, e: rusqlite::Error) -> StoreError {
    StoreError::QueryFailed {
        table: table.to_string(),
        reason: e.to_string(),
    }
}

// ─── DataStore ──────────────────────────────────────────────────────────────

impl DataStore for SqliteStore {
    fn select(
        &self,
        table: &str,
        columns: &str,
        condition: Option<&str>,
    ) -> Result<Table, StoreError> {
        let conn = self.lock()?;
        if !table_exists(&conn, table).map_err(|e| query_failed(table, e))? {
            return Ok(Table::empty());
        }
        let mut sql = format!("SELECT {columns} FROM {}", quote_ident(table));
        if let Some(cond) = condition.filter(|c| !c.trim().is_empty()) {
            sql.push_str(&format!(" WHERE {cond}"));
        }
        query_table(&conn, &sql).map_err(|e| query_failed(table, e))
    }

    fn insert(&self, table: &str, rows: &[Row]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let columns = Table::from_rows(rows.to_vec()).columns;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        ensure_table(&tx, table, &columns).map_err(|e| query_failed(table, e))?;

        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote_ident(table),
            columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
        );
        {
            let mut stmt = tx.prepare(&sql).map_err(|e| query_failed(table, e))?;
            for row in rows {
                let values = columns.iter().map(|c| to_sql(row.get(c)));
                stmt.execute(params_from_iter(values))
                    .map_err(|e| query_failed(table, e))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, table: &str, condition: Option<&str>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        if !table_exists(&conn, table).map_err(|e| query_failed(table, e))? {
            return Ok(());
        }
        let mut sql = format!("DELETE FROM {}", quote_ident(table));
        if let Some(cond) = condition.filter(|c| !c.trim().is_empty()) {
            sql.push_str(&format!(" WHERE {cond}"));
        }
        conn.execute(&sql, []).map_err(|e| query_failed(table, e))?;
        Ok(())
    }

    fn update_batch(
        &self,
        table: &str,
        set_columns: &[String],
        key_columns: &[String],
        rows: &[Row],
    ) -> Result<(), StoreError> {
        if rows.is_empty() || set_columns.is_empty() || key_columns.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        ensure_table(&tx, table, &[set_columns, key_columns].concat())
            .map_err(|e| query_failed(table, e))?;

        let set_clause = set_columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ?{}", quote_ident(c), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let where_clause = key_columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ?{}", quote_ident(c), set_columns.len() + i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("UPDATE {} SET {set_clause} WHERE {where_clause}", quote_ident(table));
        {
            let mut stmt = tx.prepare(&sql).map_err(|e| query_failed(table, e))?;
            for row in rows {
                let values = set_columns
                    .iter()
                    .chain(key_columns.iter())
                    .map(|c| to_sql(row.get(c)));
                stmt.execute(params_from_iter(values))
                    .map_err(|e| query_failed(table, e))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn call_procedure(&self, name: &str, args: &Value) -> Result<(), StoreError> {
        let procedure = self
            .procedures
            .get(name)
            .ok_or_else(|| StoreError::UnknownProcedure {
                name: name.to_string(),
            })?;
        let conn = self.lock()?;
        procedure(&*conn, args).map_err(|e| query_failed(name, e))
    }
}

// ─── UpstreamSource ─────────────────────────────────────────────────────────

impl UpstreamSource for SqliteStore {
    fn query(&self, sql: &str) -> Result<Table, StoreError> {
        let conn = self.lock()?;
        query_table(&conn, sql).map_err(|e| query_failed("upstream", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Row> {
        Table::from_json(value).rows
    }

    #[test]
    fn select_from_missing_table_is_empty() {
        let store = SqliteStore::open_in_memory().unwrap();
        let table = store.select("dm_technical", "*", None).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn insert_creates_and_widens_table() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert("fabric_trans", &rows(json!([{"SC_NO": "S24M12345", "QTY": 3}])))
            .unwrap();
        store
            .insert(
                "fabric_trans",
                &rows(json!([{"SC_NO": "S24M99999", "QTY": 1.5, "TOTAL": 2}])),
            )
            .unwrap();

        let all = store.select("fabric_trans", "*", None).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.columns.contains(&"TOTAL".to_string()));

        let one = store
            .select("fabric_trans", "*", Some(r#""SC_NO" IN ('S24M12345')"#))
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one.rows[0]["QTY"], json!(3));
        assert_eq!(one.rows[0]["TOTAL"], Value::Null);
    }

    #[test]
    fn delete_with_condition() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert(
                "process_wip",
                &rows(json!([{"JO_NO": "24M12345AB01"}, {"JO_NO": "24M99999AB01"}])),
            )
            .unwrap();
        store
            .delete("process_wip", Some(r#""JO_NO" IN ('24M12345AB01')"#))
            .unwrap();
        assert_eq!(store.select("process_wip", "*", None).unwrap().len(), 1);

        // Deleting from a table that was never created is a no-op.
        store.delete("never_created", None).unwrap();
    }

    #[test]
    fn update_batch_by_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert(
                "dm_technical",
                &rows(json!([
                    {"SC_NO": "S1", "CODE_CUSTOMS": "CA", "DEMAND": 0},
                    {"SC_NO": "S1", "CODE_CUSTOMS": "CB", "DEMAND": 0}
                ])),
            )
            .unwrap();
        store
            .update_batch(
                "dm_technical",
                &["DEMAND".to_string()],
                &["SC_NO".to_string(), "CODE_CUSTOMS".to_string()],
                &rows(json!([{"SC_NO": "S1", "CODE_CUSTOMS": "CB", "DEMAND": 4.5}])),
            )
            .unwrap();
        let updated = store
            .select("dm_technical", "*", Some(r#""CODE_CUSTOMS" = 'CB'"#))
            .unwrap();
        assert_eq!(updated.rows[0]["DEMAND"], json!(4.5));
    }

    #[test]
    fn procedures_are_dispatched_by_name() {
        let store = SqliteStore::open_in_memory()
            .unwrap()
            .with_procedure("touch", |conn, _args| {
                conn.execute_batch("CREATE TABLE touched (x); INSERT INTO touched VALUES (1);")
            });
        store.call_procedure("touch", &json!({})).unwrap();
        assert_eq!(store.select("touched", "*", None).unwrap().len(), 1);

        let missing = store.call_procedure("nope", &json!({}));
        assert!(matches!(missing, Err(StoreError::UnknownProcedure { .. })));
    }

    #[test]
    fn upstream_query_runs_raw_sql() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE V_GO ([GO No] TEXT, [Order QTY] INTEGER, [Year] TEXT);
                 INSERT INTO V_GO VALUES ('S24M12345', 100, '2025');",
            )
            .unwrap();
        let table = store.query("SELECT * FROM [V_GO] WHERE [Year] >= '2024'").unwrap();
        assert_eq!(table.columns, vec!["GO No", "Order QTY", "Year"]);
        assert_eq!(table.rows[0]["Order QTY"], json!(100));
    }
}
