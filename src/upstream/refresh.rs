//! Refresh jobs: copy one upstream view into its store table for a set of codes.
//!
//! Every job follows the same shape:
//! 1. Query the upstream view scoped to the requested codes (windowed views go
//!    through [`fetch_with_backoff`]).
//! 2. Rename source columns to store column names and derive the garment key
//!    for views that only carry a job number.
//! 3. Delete the scoped rows from the store table and insert the fresh rows.
//!
//! A job that finds nothing upstream reports zero rows and leaves the store
//! untouched. Whether that is fatal is the caller's decision.
//!
//! Jobs are blocking; callers run them through the data access facade.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use super::errors::RefreshError;
use super::window::{fetch_with_backoff, period_anchor, RetryWindow};
use super::UpstreamSource;
use crate::intent::codes::{self, Code};
use crate::store::{DataStore, StoreError, Table};

// ─── Job catalogue ──────────────────────────────────────────────────────────

/// One upstream-to-store copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshJob {
    FabricTrans,
    SubmatTrans,
    SubmatDemand,
    GoQuantity,
    ProcessWip,
    CuttingForecast,
}

/// How an upstream view is narrowed to the requested codes.
#[derive(Debug, Clone, Copy)]
enum Scope {
    /// `[col] IN ('S24M12345', ...)`
    GarmentIn(&'static str),
    /// `[col] LIKE '24M12345%' OR ...`
    JobPrefix(&'static str),
}

/// How the retry window is applied to a view.
#[derive(Debug, Clone, Copy)]
enum WindowFilter {
    /// `[col] >= 'YYYY-MM-DD'`
    Date(&'static str),
    /// `[col] >= 'YYYY'` using the window start year.
    Year(&'static str),
}

struct JobDefinition {
    view: &'static str,
    select: &'static str,
    filter: Option<&'static str>,
    scope: &'static [Scope],
    window: Option<(WindowFilter, RetryWindow)>,
    renames: &'static [(&'static str, &'static str)],
    /// `(job number column, garment column)` to fill in after renaming.
    derive_garment: Option<(&'static str, &'static str)>,
    target: &'static str,
    /// Garment column in the target table used to scope the delete.
    target_key: &'static str,
}

impl RefreshJob {
    pub fn name(self) -> &'static str {
        match self {
            RefreshJob::FabricTrans => "fabric_trans",
            RefreshJob::SubmatTrans => "submat_trans",
            RefreshJob::SubmatDemand => "submat_demand",
            RefreshJob::GoQuantity => "go_quantity",
            RefreshJob::ProcessWip => "process_wip",
            RefreshJob::CuttingForecast => "cutting_forecast",
        }
    }

    /// Store table this job writes.
    pub fn target_table(self) -> &'static str {
        self.definition().target
    }

    /// Default retry window, if the view is windowed.
    pub fn default_window(self) -> Option<RetryWindow> {
        self.definition().window.map(|(_, w)| w)
    }

    fn definition(self) -> JobDefinition {
        match self {
            RefreshJob::FabricTrans => JobDefinition {
                view: "V_Fabric_Trans_Summary_EHV",
                select: "*",
                filter: None,
                scope: &[Scope::GarmentIn("SC_NO"), Scope::JobPrefix("JO NO")],
                window: Some((WindowFilter::Date("TRANS_DATE"), RetryWindow::new(6, 3))),
                renames: &[("JO NO", "JO_NO"), ("TRANS TYPE", "TRANS_TYPE")],
                derive_garment: None,
                target: "fabric_trans",
                target_key: "SC_NO",
            },
            RefreshJob::SubmatTrans => JobDefinition {
                view: "V_Submat_Trans_Summary_EHV",
                select: "*",
                filter: None,
                scope: &[Scope::GarmentIn("SC_NO"), Scope::JobPrefix("JO NO")],
                window: Some((WindowFilter::Date("TRANS_DATE"), RetryWindow::new(6, 3))),
                renames: &[("JO NO", "JO_NO")],
                derive_garment: None,
                target: "submat_trans",
                target_key: "SC_NO",
            },
            RefreshJob::SubmatDemand => JobDefinition {
                view: "V_MRP_JO_Demand_EHV",
                select: "*",
                filter: Some("[Required Qty] > 0"),
                scope: &[Scope::JobPrefix("JO NO")],
                window: Some((WindowFilter::Date("Create Date"), RetryWindow::new(12, 3))),
                renames: &[
                    ("JO NO", "JO_NO"),
                    ("Required Qty", "Required_Qty"),
                    ("Allocated Qty", "Allocated_Qty"),
                    ("Issued Qty", "Issued_Qty"),
                    ("Demand Qty", "Demand_Qty"),
                    ("Create Date", "Create_Date"),
                    ("Product Code", "Product_Code"),
                ],
                derive_garment: Some(("JO_NO", "GO")),
                target: "submat_demand",
                target_key: "GO",
            },
            RefreshJob::GoQuantity => JobDefinition {
                view: "V_GO",
                select: "[GO No], [Order QTY], [Year]",
                filter: Some("[Order QTY] > 0"),
                scope: &[Scope::GarmentIn("GO No")],
                window: Some((WindowFilter::Year("Year"), RetryWindow::new(12, 2))),
                renames: &[("GO No", "GO_No"), ("Order QTY", "Order_QTY")],
                derive_garment: None,
                target: "go_quantity",
                target_key: "GO_No",
            },
            RefreshJob::ProcessWip => JobDefinition {
                view: "V_JO_Process_WIP_EHV",
                select: "*",
                filter: None,
                scope: &[Scope::JobPrefix("JO NO")],
                window: None,
                renames: &[("JO NO", "JO_NO")],
                derive_garment: Some(("JO_NO", "SC_NO")),
                target: "process_wip",
                target_key: "SC_NO",
            },
            RefreshJob::CuttingForecast => JobDefinition {
                view: "V_Cutting_Forecast_EHV",
                select: "*",
                filter: None,
                scope: &[Scope::GarmentIn("GO")],
                window: None,
                renames: &[],
                derive_garment: None,
                target: "cutting_forecast",
                target_key: "GO",
            },
        }
    }
}

// ─── SQL rendering ──────────────────────────────────────────────────────────

fn render_scope(scope: &[Scope], codes: &BTreeSet<Code>) -> String {
    let garments = codes::garment_orders(codes);
    let prefixes = codes::job_prefixes(codes);
    let parts: Vec<String> = scope
        .iter()
        .map(|s| match s {
            Scope::GarmentIn(col) => format!("[{col}] IN ({})", codes::quote_list(&garments)),
            Scope::JobPrefix(col) => prefixes
                .iter()
                .map(|p| format!("[{col}] LIKE '{}%'", p.replace('\'', "''")))
                .collect::<Vec<_>>()
                .join(" OR "),
        })
        .filter(|p| !p.is_empty())
        .collect();
    parts.join(" OR ")
}

fn render_query(def: &JobDefinition, codes: &BTreeSet<Code>, from: Option<NaiveDate>) -> String {
    let mut clauses = Vec::new();
    if let Some(filter) = def.filter {
        clauses.push(filter.to_string());
    }
    clauses.push(format!("({})", render_scope(def.scope, codes)));
    if let (Some((filter, _)), Some(from)) = (def.window, from) {
        clauses.push(match filter {
            WindowFilter::Date(col) => format!("[{col}] >= '{}'", from.format("%Y-%m-%d")),
            WindowFilter::Year(col) => format!("[{col}] >= '{}'", from.year()),
        });
    }
    format!(
        "SELECT {} FROM [{}] WHERE {}",
        def.select,
        def.view,
        clauses.join(" AND ")
    )
}

// ─── Refresher ──────────────────────────────────────────────────────────────

/// Outcome of one refresh job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshReport {
    pub job: RefreshJob,
    pub rows: usize,
    /// Upstream queries issued (window attempts).
    pub attempts: u32,
    /// Start of the last window queried.
    pub from: Option<NaiveDate>,
}

/// Runs refresh jobs against an upstream source and a store.
pub struct Refresher {
    upstream: Arc<dyn UpstreamSource>,
    store: Arc<dyn DataStore>,
    windows: HashMap<RefreshJob, RetryWindow>,
    anchor: Option<NaiveDate>,
}

impl Refresher {
    pub fn new(upstream: Arc<dyn UpstreamSource>, store: Arc<dyn DataStore>) -> Self {
        Self {
            upstream,
            store,
            windows: HashMap::new(),
            anchor: None,
        }
    }

    /// Override the default retry window for some jobs.
    pub fn with_windows(mut self, windows: HashMap<RefreshJob, RetryWindow>) -> Self {
        self.windows = windows;
        self
    }

    /// Pin "today" (tests).
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.anchor = Some(period_anchor(today));
        self
    }

    fn anchor(&self) -> NaiveDate {
        self.anchor
            .unwrap_or_else(|| period_anchor(Local::now().date_naive()))
    }

    /// Copy the scoped upstream rows of `job` into the store.
    ///
    /// An empty code set is a no-op: views are never copied unscoped.
    pub fn run(&self, job: RefreshJob, codes: &BTreeSet<Code>) -> Result<RefreshReport, RefreshError> {
        let def = job.definition();
        if codes.is_empty() {
            tracing::debug!(job = job.name(), "refresh skipped, no codes");
            return Ok(RefreshReport {
                job,
                rows: 0,
                attempts: 0,
                from: None,
            });
        }

        let upstream_err = |source: StoreError| RefreshError::Upstream {
            job: job.name(),
            source,
        };

        let (mut table, attempts, from) = match def.window {
            Some((_, default_window)) => {
                let window = self.windows.get(&job).copied().unwrap_or(default_window);
                let fetch = fetch_with_backoff(window, self.anchor(), |from| {
                    self.upstream.query(&render_query(&def, codes, Some(from)))
                })
                .map_err(upstream_err)?;
                (fetch.table, fetch.attempts, fetch.from)
            }
            None => {
                let table = self
                    .upstream
                    .query(&render_query(&def, codes, None))
                    .map_err(upstream_err)?;
                (table, 1, None)
            }
        };

        if table.is_empty() {
            tracing::info!(job = job.name(), attempts, "no upstream rows");
            return Ok(RefreshReport {
                job,
                rows: 0,
                attempts,
                from,
            });
        }

        table.rename_columns(def.renames);
        if let Some((job_col, garment_col)) = def.derive_garment {
            derive_garment_key(&mut table, job_col, garment_col);
        }

        let store_err = |source: StoreError| RefreshError::Store {
            job: job.name(),
            source,
        };
        let condition = format!(
            "\"{}\" IN ({})",
            def.target_key,
            codes::quote_list(&codes::garment_orders(codes))
        );
        self.store
            .delete(def.target, Some(&condition))
            .map_err(store_err)?;
        self.store
            .insert(def.target, &table.rows)
            .map_err(store_err)?;

        tracing::info!(
            job = job.name(),
            table = def.target,
            rows = table.len(),
            attempts,
            "refresh complete"
        );
        Ok(RefreshReport {
            job,
            rows: table.len(),
            attempts,
            from,
        })
    }
}

fn derive_garment_key(table: &mut Table, job_col: &str, garment_col: &str) {
    for row in &mut table.rows {
        if let Some(garment) = Table::text(row, job_col).and_then(|j| codes::garment_of_job(&j)) {
            row.insert(garment_col.to_string(), garment.into());
        }
    }
    if !table.columns.iter().any(|c| c == garment_col) {
        table.columns.push(garment_col.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::codes::extract;
    use crate::store::SqliteStore;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn upstream_with(sql: &str) -> Arc<SqliteStore> {
        let db = SqliteStore::open_in_memory().unwrap();
        db.execute_batch(sql).unwrap();
        Arc::new(db)
    }

    #[test]
    fn scope_renders_garment_and_prefix_filters() {
        let codes = extract("S24M12345 25M00001AB01");
        let sql = render_query(&RefreshJob::FabricTrans.definition(), &codes, NaiveDate::from_ymd_opt(2024, 9, 1));
        assert!(sql.contains("[SC_NO] IN ('S24M12345','S25M00001')"));
        assert!(sql.contains("[JO NO] LIKE '24M12345%' OR [JO NO] LIKE '25M00001%'"));
        assert!(sql.contains("[TRANS_DATE] >= '2024-09-01'"));
    }

    #[test]
    fn year_window_uses_start_year() {
        let codes = extract("S24M12345");
        let sql = render_query(&RefreshJob::GoQuantity.definition(), &codes, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert!(sql.starts_with("SELECT [GO No], [Order QTY], [Year] FROM [V_GO]"));
        assert!(sql.contains("[Year] >= '2024'"));
    }

    #[test]
    fn refresh_replaces_scoped_rows_and_derives_garment() {
        let upstream = upstream_with(
            "CREATE TABLE V_JO_Process_WIP_EHV ([JO NO] TEXT, Wip INTEGER);
             INSERT INTO V_JO_Process_WIP_EHV VALUES ('24M12345AB01', 7), ('24M99999AB01', 1);",
        );
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store
            .insert(
                "process_wip",
                &Table::from_json(serde_json::json!([
                    {"JO_NO": "24M12345AB01", "Wip": 99, "SC_NO": "S24M12345"},
                    {"JO_NO": "24M55555AB01", "Wip": 5, "SC_NO": "S24M55555"}
                ]))
                .rows,
            )
            .unwrap();

        let refresher = Refresher::new(upstream, store.clone()).with_today(today());
        let report = refresher
            .run(RefreshJob::ProcessWip, &extract("S24M12345"))
            .unwrap();
        assert_eq!(report.rows, 1);

        let stored = store.select("process_wip", "*", Some(r#""SC_NO" = 'S24M12345'"#)).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored.rows[0]["Wip"], serde_json::json!(7));
        // Other garments are untouched.
        assert_eq!(store.select("process_wip", "*", None).unwrap().len(), 2);
    }

    #[test]
    fn windowed_refresh_widens_until_rows_found() {
        let upstream = upstream_with(
            "CREATE TABLE V_Submat_Trans_Summary_EHV (SC_NO TEXT, [JO NO] TEXT, TRANS_DATE TEXT, QTY REAL);
             INSERT INTO V_Submat_Trans_Summary_EHV VALUES ('S24M12345', '24M12345AB01', '2024-05-02', 3.0);",
        );
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let refresher = Refresher::new(upstream, store.clone()).with_today(today());

        let report = refresher
            .run(RefreshJob::SubmatTrans, &extract("S24M12345"))
            .unwrap();
        // 2024-09-01 misses, 2024-03-01 hits.
        assert_eq!(report.attempts, 2);
        assert_eq!(report.from, NaiveDate::from_ymd_opt(2024, 3, 1));
        let stored = store.select("submat_trans", "*", None).unwrap();
        assert_eq!(stored.rows[0]["JO_NO"], serde_json::json!("24M12345AB01"));
    }

    #[test]
    fn empty_upstream_leaves_store_untouched() {
        let upstream = upstream_with(
            "CREATE TABLE V_Cutting_Forecast_EHV (GO TEXT, QTY REAL);",
        );
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store
            .insert(
                "cutting_forecast",
                &Table::from_json(serde_json::json!([{"GO": "S24M12345", "QTY": 1}])).rows,
            )
            .unwrap();
        let refresher = Refresher::new(upstream, store.clone()).with_today(today());
        let report = refresher
            .run(RefreshJob::CuttingForecast, &extract("S24M12345"))
            .unwrap();
        assert_eq!(report.rows, 0);
        assert_eq!(store.select("cutting_forecast", "*", None).unwrap().len(), 1);
    }

    #[test]
    fn missing_view_is_an_upstream_error() {
        let upstream = upstream_with("");
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let refresher = Refresher::new(upstream, store).with_today(today());
        let err = refresher
            .run(RefreshJob::CuttingForecast, &extract("S24M12345"))
            .unwrap_err();
        assert!(matches!(err, RefreshError::Upstream { job: "cutting_forecast", .. }));
    }

    #[test]
    fn window_override_applies() {
        let upstream = upstream_with(
            "CREATE TABLE V_Fabric_Trans_Summary_EHV (SC_NO TEXT, [JO NO] TEXT, TRANS_DATE TEXT);",
        );
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let refresher = Refresher::new(upstream, store)
            .with_today(today())
            .with_windows(HashMap::from([(RefreshJob::FabricTrans, RetryWindow::new(3, 5))]));
        let report = refresher
            .run(RefreshJob::FabricTrans, &extract("S24M12345"))
            .unwrap();
        assert_eq!(report.attempts, 5);
    }
}
