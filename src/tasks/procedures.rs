//! Per-task execution plans and the pure derivations they use.
//!
//! Every task maps to exactly one plan shape:
//! - `Leaf`: refresh one store table from upstream (when scoped and online),
//!   then read it.
//! - `Composite`: run other tasks as ordered steps, commit a derivation, then
//!   re-read a fixed set of tables.
//! - `Upload`: replace master-list rows with an uploaded file.
//!
//! The orchestrator interprets these plans; nothing here touches the store.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde_json::{json, Value};

use super::registry::TaskKind;
use crate::intent::codes::{self, Code, CodeFamily};
use crate::store::{Row, Table};
use crate::upstream::RefreshJob;

/// Shown when a composite or leaf takes the view-only path.
pub const OFFLINE_NOTICE: &str = "Đang xem dữ liệu offline. Nếu cần cập nhật online hãy đổi câu hỏi thành \"Lấy báo cáo hoặc dữ liệu ...\"";

// ─── Scoping ────────────────────────────────────────────────────────────────

/// How extracted codes narrow a store table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// `"col" IN (<garment order of every code>)`
    GarmentOrder(&'static str),
    /// `"garment" IN (<garment codes>) OR "job" IN (<job codes>)`
    GarmentOrJob {
        garment: &'static str,
        job: &'static str,
    },
}

impl Scope {
    /// Store condition for `codes`, or `None` to read unscoped.
    pub fn condition(self, codes: &BTreeSet<Code>) -> Option<String> {
        if codes.is_empty() {
            return None;
        }
        match self {
            Scope::GarmentOrder(col) => Some(format!(
                "\"{col}\" IN ({})",
                codes::quote_list(&codes::garment_orders(codes))
            )),
            Scope::GarmentOrJob { garment, job } => {
                let garments: Vec<String> = codes
                    .iter()
                    .filter(|c| c.family() == CodeFamily::Garment)
                    .map(|c| c.as_str().to_string())
                    .collect();
                let jobs = codes::job_numbers(codes);
                let mut clauses = Vec::new();
                if !garments.is_empty() {
                    clauses.push(format!("\"{garment}\" IN ({})", codes::quote_list(&garments)));
                }
                if !jobs.is_empty() {
                    clauses.push(format!("\"{job}\" IN ({})", codes::quote_list(&jobs)));
                }
                Some(clauses.join(" OR "))
            }
        }
    }
}

// ─── Plans ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct LeafPlan {
    pub table: &'static str,
    pub scope: Scope,
    /// Jobs run in order before a scoped online read. Empty for read-only
    /// tables.
    pub refresh: &'static [RefreshJob],
    pub message: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub task: TaskKind,
    pub message: &'static str,
}

/// The derivation a composite performs after its steps succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// Store-side procedure called with `{"codes": [garment orders]}`.
    Procedure(&'static str),
    /// Technical/actual comparison computed from the re-read tables.
    Compare,
}

#[derive(Debug, Clone, Copy)]
pub struct CompositePlan {
    pub steps: &'static [Step],
    pub commit: Commit,
    pub commit_message: &'static str,
    pub unscoped_message: &'static str,
    /// Tables returned to the caller, re-read after the commit.
    pub reads: &'static [(&'static str, Scope)],
}

#[derive(Debug, Clone, Copy)]
pub struct UploadPlan {
    pub table: &'static str,
    pub key: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub enum Procedure {
    Leaf(LeafPlan),
    Composite(CompositePlan),
    Upload(UploadPlan),
}

const SC_OR_JO: Scope = Scope::GarmentOrJob {
    garment: "SC_NO",
    job: "JO_NO",
};

impl TaskKind {
    /// The execution plan bound to this task.
    pub fn procedure(self) -> Procedure {
        match self {
            TaskKind::Compare => Procedure::Composite(CompositePlan {
                steps: &[
                    Step {
                        task: TaskKind::DmTechnical,
                        message: "Đang lấy dữ liệu demand technical...",
                    },
                    Step {
                        task: TaskKind::DmActual,
                        message: "Đang lấy dữ liệu demand submat...",
                    },
                ],
                commit: Commit::Compare,
                commit_message: "Đang phân tích và lấy dữ liệu report compare...",
                unscoped_message: "Không có mã cụ thể, đang so sánh toàn bộ dữ liệu định mức...",
                reads: &[
                    ("dm_technical", Scope::GarmentOrder("SC_NO")),
                    ("dm_actual", Scope::GarmentOrder("SC_NO")),
                ],
            }),
            TaskKind::DmTechnical => Procedure::Composite(CompositePlan {
                steps: &[
                    Step {
                        task: TaskKind::CuttingForecast,
                        message: "Đang lấy dữ liệu Cutting Forecast...",
                    },
                    Step {
                        task: TaskKind::SubmatDemand,
                        message: "Đang lấy dữ liệu Submat Demand...",
                    },
                ],
                commit: Commit::Procedure("refresh_dm_technical"),
                commit_message: "Đang tổng hợp DM Technical Report...",
                unscoped_message: "Không có mã cụ thể, đang lấy toàn bộ dữ liệu demand technical...",
                reads: &[
                    ("dm_technical", Scope::GarmentOrder("SC_NO")),
                    ("cutting_forecast", Scope::GarmentOrder("GO")),
                    (
                        "submat_demand",
                        Scope::GarmentOrJob {
                            garment: "GO",
                            job: "JO_NO",
                        },
                    ),
                ],
            }),
            TaskKind::DmActual => Procedure::Composite(CompositePlan {
                steps: &[
                    Step {
                        task: TaskKind::FabricTrans,
                        message: "Đang chạy Fabric Transaction Summary...",
                    },
                    Step {
                        task: TaskKind::SubmatTrans,
                        message: "Đang chạy Submat Transaction Summary...",
                    },
                    Step {
                        task: TaskKind::ProcessWip,
                        message: "Đang chạy Process WIP...",
                    },
                ],
                commit: Commit::Procedure("refresh_dm_actual"),
                commit_message: "Đang chạy tổng hợp Actual Report...",
                unscoped_message: "Không có mã cụ thể, đang lấy toàn bộ dữ liệu định mức thực tế...",
                reads: &[
                    ("dm_actual", Scope::GarmentOrder("SC_NO")),
                    ("fabric_trans", SC_OR_JO),
                    ("submat_trans", SC_OR_JO),
                    ("process_wip", SC_OR_JO),
                ],
            }),
            TaskKind::ProcessWip => Procedure::Leaf(LeafPlan {
                table: "process_wip",
                scope: SC_OR_JO,
                refresh: &[RefreshJob::ProcessWip],
                message: "Đang lấy dữ liệu process wip...",
            }),
            TaskKind::CuttingForecast => Procedure::Leaf(LeafPlan {
                table: "cutting_forecast",
                scope: Scope::GarmentOrder("GO"),
                refresh: &[RefreshJob::CuttingForecast],
                message: "Đang lấy dữ liệu Cutting Forecast...",
            }),
            TaskKind::FabricTrans => Procedure::Leaf(LeafPlan {
                table: "fabric_trans",
                scope: SC_OR_JO,
                refresh: &[RefreshJob::FabricTrans],
                message: "Đang lấy dữ liệu Fabric Transaction Summary...",
            }),
            TaskKind::SubmatTrans => Procedure::Leaf(LeafPlan {
                table: "submat_trans",
                scope: SC_OR_JO,
                refresh: &[RefreshJob::SubmatTrans],
                message: "Đang lấy dữ liệu Submat Transaction Summary...",
            }),
            TaskKind::SubmatDemand => Procedure::Leaf(LeafPlan {
                table: "submat_demand",
                scope: Scope::GarmentOrJob {
                    garment: "GO",
                    job: "JO_NO",
                },
                refresh: &[RefreshJob::SubmatDemand, RefreshJob::GoQuantity],
                message: "Đang lấy dữ liệu Submat Demand...",
            }),
            TaskKind::GoQuantity => Procedure::Leaf(LeafPlan {
                table: "go_quantity",
                scope: Scope::GarmentOrder("GO_No"),
                refresh: &[],
                message: "Đang lấy dữ liệu GO quantity...",
            }),
            TaskKind::InsertTrims => Procedure::Upload(UploadPlan {
                table: "trims_list",
                key: "THV_CODE",
                message: "Đã cập nhật dữ liệu master trims list thành công",
            }),
            TaskKind::InsertFabric => Procedure::Upload(UploadPlan {
                table: "fabric_list",
                key: "PO_NO",
                message: "Đã cập nhật dữ liệu master fabric list thành công",
            }),
            TaskKind::InsertRangeDm => Procedure::Upload(UploadPlan {
                table: "range_dm",
                key: "CODE",
                message: "Đã cập nhật dữ liệu range định mức thành công",
            }),
        }
    }

    /// The table a successful result is named after.
    pub fn primary_table(self) -> &'static str {
        match self.procedure() {
            Procedure::Leaf(plan) => plan.table,
            Procedure::Upload(plan) => plan.table,
            Procedure::Composite(_) if self == TaskKind::Compare => COMPARE_TABLE,
            Procedure::Composite(plan) => plan.reads.first().map_or(self.id(), |(t, _)| *t),
        }
    }
}

/// Arguments passed to a commit procedure.
pub fn commit_args(codes: &BTreeSet<Code>) -> Value {
    json!({ "codes": codes::garment_orders(codes) })
}

// ─── Compare derivation ─────────────────────────────────────────────────────

pub const COMPARE_TABLE: &str = "dm_compare";

const JOIN_KEYS: [&str; 2] = ["SC_NO", "CODE_CUSTOMS"];
const ACTUAL_COLUMNS: [&str; 3] = ["TOTAL_AT", "TOTAL_PCS_AT", "DEMAND_AT"];
const TECHNICAL_COLUMNS: [&str; 3] = ["TOTAL", "TOTAL_PCS", "DEMAND"];

fn join_key(row: &Row) -> (Option<String>, Option<String>) {
    (Table::text(row, JOIN_KEYS[0]), Table::text(row, JOIN_KEYS[1]))
}

/// `DEMAND_AT / DEMAND` as a percentage with one decimal.
///
/// A non-positive or missing `DEMAND` yields `"0.0%"`; a positive `DEMAND`
/// with no actual figure yields `""`.
pub fn compare_ratio(demand_at: Option<f64>, demand: Option<f64>) -> String {
    match (demand_at, demand) {
        (Some(actual), Some(d)) if d > 0.0 => format!("{:.1}%", actual / d * 100.0),
        (None, Some(d)) if d > 0.0 => String::new(),
        _ => "0.0%".to_string(),
    }
}

/// Left-join technical onto actual by `SC_NO` + `CODE_CUSTOMS` and add the
/// `COMPARE` column. Every technical row appears exactly once; the first
/// matching actual row is used.
pub fn derive_compare(technical: &Table, actual: &Table) -> Table {
    let mut by_key: BTreeMap<(Option<String>, Option<String>), &Row> = BTreeMap::new();
    for row in &actual.rows {
        by_key.entry(join_key(row)).or_insert(row);
    }

    let rows = technical
        .rows
        .iter()
        .map(|tech| {
            let matched = by_key.get(&join_key(tech)).copied();
            let mut out = Row::new();
            for key in JOIN_KEYS {
                out.insert(key.to_string(), tech.get(key).cloned().unwrap_or(Value::Null));
            }
            for col in ACTUAL_COLUMNS {
                let value = matched.and_then(|a| a.get(col)).cloned().unwrap_or(Value::Null);
                out.insert(col.to_string(), value);
            }
            for col in TECHNICAL_COLUMNS {
                out.insert(col.to_string(), tech.get(col).cloned().unwrap_or(Value::Null));
            }
            let ratio = compare_ratio(
                matched.and_then(|a| Table::number(a, "DEMAND_AT")),
                Table::number(tech, "DEMAND"),
            );
            out.insert("COMPARE".to_string(), Value::String(ratio));
            out
        })
        .collect();

    let columns = JOIN_KEYS
        .iter()
        .chain(ACTUAL_COLUMNS.iter())
        .chain(TECHNICAL_COLUMNS.iter())
        .chain(std::iter::once(&"COMPARE"))
        .map(|c| c.to_string())
        .collect();
    Table { columns, rows }
}

// ─── Master-list upsert ─────────────────────────────────────────────────────

/// Rows of `file` keyed by `key`: rows without a key are dropped and only the
/// first row per key is kept.
pub fn dedupe_by_key(file: &Table, key: &str) -> Table {
    let mut seen = HashSet::new();
    let rows: Vec<Row> = file
        .rows
        .iter()
        .filter(|row| match Table::text(row, key) {
            Some(k) => seen.insert(k),
            None => false,
        })
        .cloned()
        .collect();
    Table {
        columns: file.columns.clone(),
        rows,
    }
}

/// Distinct key values of an already-deduplicated upload.
pub fn upload_keys(rows: &Table, key: &str) -> Vec<String> {
    rows.rows.iter().filter_map(|row| Table::text(row, key)).collect()
}

/// How a deduplicated upload splits against the rows already stored under
/// its keys.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpsertPlan {
    /// Rows whose key is not stored yet.
    pub inserts: Vec<Row>,
    /// Rows whose key is stored with at least one different value.
    pub updates: Vec<Row>,
    pub unchanged: usize,
}

pub fn plan_upsert(upload: &Table, existing: &Table, key: &str) -> UpsertPlan {
    let stored: HashMap<String, &Row> = existing
        .rows
        .iter()
        .filter_map(|row| Table::text(row, key).map(|k| (k, row)))
        .collect();

    let mut plan = UpsertPlan::default();
    for row in &upload.rows {
        let Some(k) = Table::text(row, key) else {
            continue;
        };
        match stored.get(&k) {
            None => plan.inserts.push(row.clone()),
            Some(current) if differs(row, current) => plan.updates.push(row.clone()),
            Some(_) => plan.unchanged += 1,
        }
    }
    plan
}

/// Columns an update writes: every upload column except the key.
pub fn update_columns(upload: &Table, key: &str) -> Vec<String> {
    upload.columns.iter().filter(|c| c.as_str() != key).cloned().collect()
}

fn differs(incoming: &Row, current: &Row) -> bool {
    incoming.iter().any(|(column, value)| {
        let stored = current.get(column).unwrap_or(&Value::Null);
        match (value.as_f64(), stored.as_f64()) {
            (Some(a), Some(b)) => a != b,
            _ => value != stored,
        }
    })
}
