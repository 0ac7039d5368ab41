//! Async data access facade.
//!
//! Store and upstream clients are blocking. Every call made on behalf of a
//! user turn goes through [`DataAccess::offload`], which:
//! - waits for a worker permit (bounded pool, sized by `worker_threads`)
//! - runs the closure on tokio's blocking pool
//! - races it against the turn's deadline and cancellation token
//! - converts a panic inside the closure into [`AccessError::Panicked`]
//!
//! Reads come in two flavours. [`DataAccess::try_get`] retries transient
//! failures and reports the error; [`DataAccess::get`] and
//! [`DataAccess::get_many`] degrade any failure to an empty table so batch
//! reads never abort because of one bad table.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::errors::{AccessError, StoreError};
use super::remote::DataStore;
use super::table::Table;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Retries for transient read failures.
const MAX_RETRIES: u32 = 2;

/// Base delay between read retries (doubles each time).
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Surrogate key column added by the store; never shown to users.
const SURROGATE_KEY: &str = "id";

// ─── TurnBudget ─────────────────────────────────────────────────────────────

/// Deadline and cancellation shared by every suspension point of one turn.
#[derive(Debug, Clone)]
pub struct TurnBudget {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl Default for TurnBudget {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl TurnBudget {
    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            token: CancellationToken::new(),
        }
    }

    /// Set a deadline `timeout` from now unless one is already set. The
    /// cancellation token is kept.
    pub fn or_timeout(mut self, timeout: Duration) -> Self {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + timeout);
        }
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel every pending and future operation of this turn.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Await `fut` unless the turn is cancelled or its deadline passes first.
    pub async fn guard<F>(&self, op: &str, fut: F) -> Result<F::Output, AccessError>
    where
        F: Future,
    {
        if self.token.is_cancelled() {
            return Err(AccessError::Cancelled { op: op.to_string() });
        }
        let timed = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .map_err(|_| AccessError::Timeout { op: op.to_string() }),
                None => Ok(fut.await),
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(AccessError::Cancelled { op: op.to_string() }),
            result = timed => result,
        }
    }
}

// ─── DataAccess ─────────────────────────────────────────────────────────────

/// Shared, cloneable handle over the data store and the blocking worker pool.
#[derive(Clone)]
pub struct DataAccess {
    store: Arc<dyn DataStore>,
    workers: Arc<Semaphore>,
    retry_delay: Duration,
}

impl DataAccess {
    pub fn new(store: Arc<dyn DataStore>, worker_threads: usize) -> Self {
        Self {
            store,
            workers: Arc::new(Semaphore::new(worker_threads.max(1))),
            retry_delay: RETRY_BASE_DELAY,
        }
    }

    /// Override the base retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn store(&self) -> Arc<dyn DataStore> {
        Arc::clone(&self.store)
    }

    /// Run blocking work on the bounded pool under the turn budget.
    pub async fn offload<R, F>(&self, op: &str, budget: &TurnBudget, work: F) -> Result<R, AccessError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let started = std::time::Instant::now();
        let workers = Arc::clone(&self.workers);
        let permit = budget
            .guard(op, workers.acquire_owned())
            .await?
            .map_err(|_| AccessError::Cancelled { op: op.to_string() })?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        });

        let joined = budget.guard(op, handle).await?;
        let result = joined.map_err(|e| {
            if e.is_cancelled() {
                AccessError::Cancelled { op: op.to_string() }
            } else {
                AccessError::Panicked {
                    op: op.to_string(),
                    reason: panic_message(e.into_panic()),
                }
            }
        })?;
        tracing::debug!(op, elapsed_ms = started.elapsed().as_millis() as u64, "offloaded call done");
        Ok(result)
    }

    /// Run a store call off-thread.
    pub async fn run<R, F>(&self, op: &str, budget: &TurnBudget, call: F) -> Result<R, AccessError>
    where
        F: FnOnce(&dyn DataStore) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.store();
        let result = self.offload(op, budget, move || call(store.as_ref())).await?;
        Ok(result?)
    }

    /// Read a table, retrying transient failures.
    pub async fn try_get(
        &self,
        table: &str,
        condition: Option<&str>,
        budget: &TurnBudget,
    ) -> Result<Table, AccessError> {
        let op = format!("select {table}");
        let mut attempt = 0;
        loop {
            let name = table.to_string();
            let cond = condition.map(str::to_string);
            let result = self
                .run(&op, budget, move |store| store.select(&name, "*", cond.as_deref()))
                .await;
            match result {
                Ok(mut rows) => {
                    rows.drop_column(SURROGATE_KEY);
                    tracing::debug!(table, rows = rows.len(), "table read");
                    return Ok(rows);
                }
                Err(AccessError::Store(e)) if e.is_transient() && attempt < MAX_RETRIES => {
                    let delay = self.retry_delay * 2u32.pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        table,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient read failure, retrying"
                    );
                    budget.guard(&op, tokio::time::sleep(delay)).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read a table; any failure degrades to an empty table.
    pub async fn get(&self, table: &str, condition: Option<&str>, budget: &TurnBudget) -> Table {
        match self.try_get(table, condition, budget).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(table, error = %e, "read failed, using empty table");
                Table::empty()
            }
        }
    }

    /// Read several tables concurrently. Each failed read yields an empty
    /// table for that entry only.
    pub async fn get_many(
        &self,
        requests: &[(String, Option<String>)],
        budget: &TurnBudget,
    ) -> BTreeMap<String, Table> {
        let reads = requests
            .iter()
            .map(|(table, condition)| self.get(table, condition.as_deref(), budget));
        let tables = join_all(reads).await;
        requests
            .iter()
            .map(|(table, _)| table.clone())
            .zip(tables)
            .collect()
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Row, SqliteStore};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn seeded() -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE dm_technical (id INTEGER, SC_NO TEXT, DEMAND REAL);
                 INSERT INTO dm_technical VALUES (1, 'S24M12345', 2.0), (2, 'S24M99999', 1.0);
                 CREATE TABLE process_wip (id INTEGER, SC_NO TEXT);
                 INSERT INTO process_wip VALUES (1, 'S24M12345');",
            )
            .unwrap();
        Arc::new(store)
    }

    /// Fails `select` on one table; delegates everything else.
    struct FlakyStore {
        inner: Arc<SqliteStore>,
        failing_table: &'static str,
        failures_left: AtomicU32,
        transient: bool,
        calls: AtomicU32,
    }

    impl DataStore for FlakyStore {
        fn select(&self, table: &str, columns: &str, condition: Option<&str>) -> Result<Table, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if table == self.failing_table && self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(if self.transient {
                    StoreError::ConnectionFailed {
                        endpoint: "db".into(),
                        reason: "reset".into(),
                    }
                } else {
                    StoreError::QueryFailed {
                        table: table.into(),
                        reason: "bad".into(),
                    }
                });
            }
            self.inner.select(table, columns, condition)
        }
        fn insert(&self, table: &str, rows: &[Row]) -> Result<(), StoreError> {
            self.inner.insert(table, rows)
        }
        fn delete(&self, table: &str, condition: Option<&str>) -> Result<(), StoreError> {
            self.inner.delete(table, condition)
        }
        fn update_batch(
            &self,
            table: &str,
            set_columns: &[String],
            key_columns: &[String],
            rows: &[Row],
        ) -> Result<(), StoreError> {
            self.inner.update_batch(table, set_columns, key_columns, rows)
        }
        fn call_procedure(&self, name: &str, args: &Value) -> Result<(), StoreError> {
            self.inner.call_procedure(name, args)
        }
    }

    fn flaky(failing_table: &'static str, failures: u32, transient: bool) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: seeded(),
            failing_table,
            failures_left: AtomicU32::new(failures),
            transient,
            calls: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn get_filters_and_drops_surrogate_key() {
        let access = DataAccess::new(seeded(), 2);
        let table = access
            .get("dm_technical", Some(r#""SC_NO" IN ('S24M12345')"#), &TurnBudget::unbounded())
            .await;
        assert_eq!(table.len(), 1);
        assert!(!table.columns.contains(&"id".to_string()));
        assert!(table.rows[0].get("id").is_none());
    }

    #[tokio::test]
    async fn get_many_isolates_failures() {
        let store = flaky("dm_technical", u32::MAX, false);
        let access = DataAccess::new(store, 2);
        let tables = access
            .get_many(
                &[
                    ("dm_technical".to_string(), None),
                    ("process_wip".to_string(), None),
                ],
                &TurnBudget::unbounded(),
            )
            .await;
        assert_eq!(tables.len(), 2);
        assert!(tables["dm_technical"].is_empty());
        assert_eq!(tables["process_wip"].len(), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = flaky("dm_technical", 2, true);
        let access = DataAccess::new(store.clone(), 2).with_retry_delay(Duration::from_millis(1));
        let table = access
            .try_get("dm_technical", None, &TurnBudget::unbounded())
            .await
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let store = flaky("dm_technical", 5, false);
        let access = DataAccess::new(store.clone(), 2).with_retry_delay(Duration::from_millis(1));
        let result = access.try_get("dm_technical", None, &TurnBudget::unbounded()).await;
        assert!(matches!(result, Err(AccessError::Store(StoreError::QueryFailed { .. }))));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn offload_reports_panics() {
        let access = DataAccess::new(seeded(), 1);
        let result: Result<(), _> = access
            .offload("boom", &TurnBudget::unbounded(), || panic!("kaput"))
            .await;
        match result {
            Err(AccessError::Panicked { op, reason }) => {
                assert_eq!(op, "boom");
                assert!(reason.contains("kaput"));
            }
            other => panic!("expected panic error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn offload_times_out_at_deadline() {
        let access = DataAccess::new(seeded(), 1);
        let budget = TurnBudget::with_timeout(Duration::from_millis(20));
        let result = access
            .offload("slow", &budget, || std::thread::sleep(Duration::from_millis(300)))
            .await;
        assert!(matches!(result, Err(AccessError::Timeout { .. })));
    }

    #[tokio::test]
    async fn cancelled_budget_short_circuits() {
        let access = DataAccess::new(seeded(), 1);
        let budget = TurnBudget::unbounded();
        budget.cancel();
        let result = access.try_get("dm_technical", None, &budget).await;
        assert!(matches!(result, Err(AccessError::Cancelled { .. })));
        assert!(access.get("dm_technical", None, &budget).await.is_empty());
    }

    #[tokio::test]
    async fn run_propagates_store_errors() {
        let access = DataAccess::new(seeded(), 1);
        let result = access
            .run("proc", &TurnBudget::unbounded(), |store| {
                store.call_procedure("missing", &json!({}))
            })
            .await;
        assert!(matches!(
            result,
            Err(AccessError::Store(StoreError::UnknownProcedure { .. }))
        ));
    }
}
