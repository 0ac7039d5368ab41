//! Upstream transaction source: the slow, read-only system of record.
//!
//! Submodules:
//! - `window`: retry-window fetcher (widen a trailing date window on empty results)
//! - `refresh`: per-source refresh jobs that copy upstream rows into the store
//!
//! The source is queried with raw SQL text. In production it sits behind an
//! HTTP query gateway; tests and local setups use the SQLite backend.

pub mod errors;
pub mod refresh;
pub mod window;

use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::json;

use crate::store::{StoreError, Table};

pub use errors::RefreshError;
pub use refresh::{RefreshJob, RefreshReport, Refresher};
pub use window::{fetch_with_backoff, RetryWindow, WindowFetch};

/// Read-only raw-SQL source for time-windowed transaction views.
pub trait UpstreamSource: Send + Sync {
    fn query(&self, sql: &str) -> Result<Table, StoreError>;
}

/// HTTP query gateway: `POST {base_url}/query` with `{"sql": ...}`, answering
/// a JSON array of row objects.
pub struct HttpUpstream {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl HttpUpstream {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, StoreError> {
        if base_url.trim().is_empty() {
            return Err(StoreError::ConfigError {
                reason: "upstream url is empty".into(),
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
}

impl UpstreamSource for HttpUpstream {
    fn query(&self, sql: &str) -> Result<Table, StoreError> {
        let url = format!("{}/query", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "sql": sql }))
            .send()
            .map_err(|e| StoreError::ConnectionFailed {
                endpoint: url.clone(),
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

        let value: serde_json::Value = response.json().map_err(|e| {
            StoreError::SerializationError {
                reason: format!("failed to parse upstream response: {e}"),
            }
        })?;
        Ok(Table::from_json(value))
    }
}
