//! Remote data store: the four-verb surface the assistant reads and writes.
//!
//! The production backend is a Supabase-style REST API: reads, deletes and
//! batch updates go through RPC functions (`select_data`, `delete_data`,
//! `update_dynamic_batch`), inserts through the table endpoint, and derivation
//! commits through named procedures. Conditions are opaque filter strings
//! built by the caller and passed through untouched.
//!
//! Calls are blocking. The async facade (`store::facade`) moves them off the
//! caller's task.

use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::errors::StoreError;
use super::table::{Row, Table};

// ─── Trait ──────────────────────────────────────────────────────────────────

/// Generic store interface. Implementations must be safe to share across turns.
pub trait DataStore: Send + Sync {
    /// Read `columns` (`"*"` for all) from `table`, optionally filtered.
    fn select(&self, table: &str, columns: &str, condition: Option<&str>)
        -> Result<Table, StoreError>;

    /// Append rows to `table`.
    fn insert(&self, table: &str, rows: &[Row]) -> Result<(), StoreError>;

    /// Delete rows matching `condition`; `None` deletes every row.
    fn delete(&self, table: &str, condition: Option<&str>) -> Result<(), StoreError>;

    /// Update `set_columns` on rows identified by `key_columns`, one row per entry.
    fn update_batch(
        &self,
        table: &str,
        set_columns: &[String],
        key_columns: &[String],
        rows: &[Row],
    ) -> Result<(), StoreError>;

    /// Run a store-side procedure (derivation commits).
    fn call_procedure(&self, name: &str, args: &Value) -> Result<(), StoreError>;
}

// ─── REST backend ───────────────────────────────────────────────────────────

/// Supabase-style REST store.
pub struct RestDataStore {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl RestDataStore {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, StoreError> {
        if base_url.trim().is_empty() {
            return Err(StoreError::ConfigError {
                reason: "store url is empty".into(),
            });
        }
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::ConfigError {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn rpc(&self, function: &str, body: &Value) -> Result<Value, StoreError> {
        let url = format!("{}/rest/v1/rpc/{function}", self.base_url);
        self.post(&url, body)
    }

    fn post(&self, url: &str, body: &Value) -> Result<Value, StoreError> {
        let response = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .map_err(|e| StoreError::ConnectionFailed {
                endpoint: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_else(|_| "unknown".to_string());
            return Err(StoreError::HttpError {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().map_err(|e| StoreError::ConnectionFailed {
            endpoint: url.to_string(),
            reason: e.to_string(),
        })?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

impl DataStore for RestDataStore {
    fn select(
        &self,
        table: &str,
        columns: &str,
        condition: Option<&str>,
    ) -> Result<Table, StoreError> {
        let body = json!({
            "table_name": table,
            "select_item": columns,
            "conditions": condition,
        });
        let value = self.rpc("select_data", &body)?;
        Ok(Table::from_json(value))
    }

    fn insert(&self, table: &str, rows: &[Row]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let url = format!("{}/rest/v1/{table}", self.base_url);
        self.post(&url, &Value::Array(rows.iter().cloned().map(Value::Object).collect()))?;
        Ok(())
    }

    fn delete(&self, table: &str, condition: Option<&str>) -> Result<(), StoreError> {
        let body = json!({ "table_name": table, "conditions": condition });
        self.rpc("delete_data", &body)?;
        Ok(())
    }

    fn update_batch(
        &self,
        table: &str,
        set_columns: &[String],
        key_columns: &[String],
        rows: &[Row],
    ) -> Result<(), StoreError> {
        let body = json!({
            "table_name": table,
            "set_columns": set_columns,
            "where_columns": key_columns,
            "updates": rows,
            "batch_mode": false,
        });
        self.rpc("update_dynamic_batch", &body)?;
        Ok(())
    }

    fn call_procedure(&self, name: &str, args: &Value) -> Result<(), StoreError> {
        self.rpc(name, args)?;
        Ok(())
    }
}
