//! Task registry: the closed set of tasks and their static descriptors.
//!
//! Registration order matters. It is the classifier's tie-break and the
//! order diagnostics are reported in. `TaskKind::ALL` and `CATALOG` must stay
//! aligned index for index.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::preconditions::{resolve_codes, resolve_upload, Precondition, Resolver};

/// Every task the assistant can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Compare,
    DmTechnical,
    DmActual,
    ProcessWip,
    CuttingForecast,
    FabricTrans,
    SubmatTrans,
    SubmatDemand,
    GoQuantity,
    InsertTrims,
    InsertFabric,
    InsertRangeDm,
}

/// Static description of a task: how to recognize it and what it needs.
#[derive(Debug)]
pub struct TaskDescriptor {
    pub kind: TaskKind,
    /// Short display name, used in progress and error messages.
    pub name: &'static str,
    pub description: &'static str,
    pub primary_keywords: &'static [&'static str],
    pub secondary_keywords: &'static [&'static str],
    pub patterns: &'static [&'static str],
    /// Any match vetoes the task outright.
    pub exclusions: &'static [&'static str],
    pub priority: u32,
    pub example: &'static str,
    pub preconditions: &'static [Precondition],
}

impl TaskKind {
    /// All tasks in registration order.
    pub const ALL: [TaskKind; 12] = [
        TaskKind::Compare,
        TaskKind::DmTechnical,
        TaskKind::DmActual,
        TaskKind::ProcessWip,
        TaskKind::CuttingForecast,
        TaskKind::FabricTrans,
        TaskKind::SubmatTrans,
        TaskKind::SubmatDemand,
        TaskKind::GoQuantity,
        TaskKind::InsertTrims,
        TaskKind::InsertFabric,
        TaskKind::InsertRangeDm,
    ];

    pub fn id(self) -> &'static str {
        match self {
            TaskKind::Compare => "compare",
            TaskKind::DmTechnical => "dm_technical",
            TaskKind::DmActual => "dm_actual",
            TaskKind::ProcessWip => "process_wip",
            TaskKind::CuttingForecast => "cutting_forecast",
            TaskKind::FabricTrans => "fabric_trans",
            TaskKind::SubmatTrans => "submat_trans",
            TaskKind::SubmatDemand => "submat_demand",
            TaskKind::GoQuantity => "go_quantity",
            TaskKind::InsertTrims => "insert_trims",
            TaskKind::InsertFabric => "insert_fabric",
            TaskKind::InsertRangeDm => "insert_range_dm",
        }
    }

    /// Position in registration order.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn descriptor(self) -> &'static TaskDescriptor {
        &CATALOG[self.index()]
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|k| k.id() == s)
            .ok_or_else(|| format!("unknown task '{s}'"))
    }
}

// ─── Preconditions ──────────────────────────────────────────────────────────

const fn codes(description: &'static str) -> Precondition {
    Precondition {
        name: "codes",
        description,
        required: false,
        resolver: Resolver::Utterance(resolve_codes),
    }
}

const fn upload(description: &'static str) -> Precondition {
    Precondition {
        name: "file_data",
        description,
        required: true,
        resolver: Resolver::WithContext(resolve_upload),
    }
}

const GO_CODES: &str = "Cần có mã SC_NO (VD: S24M12345)";
const GO_OR_JO_CODES: &str = "Cần có mã SC hoặc JO (VD: S24M12345, 24M12345AB01)";

static PRE_DM: [Precondition; 1] = [codes(GO_CODES)];
static PRE_GO_OR_JO: [Precondition; 1] = [codes(GO_OR_JO_CODES)];
static PRE_TRIMS: [Precondition; 1] = [upload("Cần có file chứa dữ liệu trims")];
static PRE_FABRIC: [Precondition; 1] = [upload("Cần có file chứa dữ liệu fabric")];
static PRE_RANGE_DM: [Precondition; 1] = [upload("Cần có file chứa dữ liệu range định mức")];

// ─── Catalogue ──────────────────────────────────────────────────────────────

static CATALOG: [TaskDescriptor; 12] = [
    TaskDescriptor {
        kind: TaskKind::Compare,
        name: "Compare DM",
        description: "So sánh định mức, báo cáo so sánh GO",
        primary_keywords: &["so sánh", "compare", "comparison", "go comparison", "demand"],
        secondary_keywords: &[
            "báo cáo so sánh",
            "compare report",
            "báo cáo so sánh go",
            "go comparison",
            "báo cáo demand",
        ],
        patterns: &[
            r"so\s*sánh\s*(technical|actual|định mức|dm)",
            r"compare.*?(technical|actual|dm)",
            r"báo cáo.*?so sánh",
            r"report.*?go",
            r"go.*?comparison",
            r"báo cáo.*?demand",
        ],
        exclusions: &[],
        priority: 10,
        example: "VD: 'So sánh DM cho S24M12345'",
        preconditions: &PRE_DM,
    },
    TaskDescriptor {
        kind: TaskKind::DmTechnical,
        name: "DM Technical",
        description: "Báo cáo định mức kỹ thuật, dm technical",
        primary_keywords: &["dm technical", "định mức kỹ thuật", "technical"],
        secondary_keywords: &["báo cáo technical", "report technical"],
        patterns: &[
            r"(dm|định mức).*?technical",
            r"báo cáo.*?(technical|kỹ thuật)",
            r"report.*?technical",
        ],
        exclusions: &[r"so sánh", r"compare"],
        priority: 8,
        example: "VD: 'Xem DM Technical cho S24M12345'",
        preconditions: &PRE_DM,
    },
    TaskDescriptor {
        kind: TaskKind::DmActual,
        name: "DM Actual",
        description: "Báo cáo định mức thực tế, dm actual",
        primary_keywords: &["dm actual", "định mức thực tế", "actual"],
        secondary_keywords: &["báo cáo actual", "report actual"],
        patterns: &[
            r"(dm|định mức).*?actual",
            r"báo cáo.*?(actual|thực tế)",
            r"report.*?actual",
        ],
        exclusions: &[r"so sánh", r"compare"],
        priority: 8,
        example: "VD: 'Xem DM Actual cho S24M12345'",
        preconditions: &PRE_DM,
    },
    TaskDescriptor {
        kind: TaskKind::ProcessWip,
        name: "Process WIP",
        description: "Số lượng wip, process wip",
        primary_keywords: &["process wip", "tiến độ", "wip"],
        secondary_keywords: &["báo cáo tiến độ", "progress report"],
        patterns: &[r"process.*?wip", r"báo cáo.*?tiến độ", r"tiến độ.*?sản xuất"],
        exclusions: &[],
        priority: 6,
        example: "VD: 'Xem tiến độ cho S24M12345'",
        preconditions: &PRE_GO_OR_JO,
    },
    TaskDescriptor {
        kind: TaskKind::CuttingForecast,
        name: "Cutting Forecast",
        description: "Số lượng sản xuất, cutting forecast",
        primary_keywords: &["cutting forecast", "cutting", "forecast"],
        secondary_keywords: &["báo cáo cutting", "cutting report"],
        patterns: &[r"cutting.*?forecast", r"báo cáo.*?cutting", r"cutting.*?sản xuất"],
        exclusions: &[],
        priority: 6,
        example: "VD: 'Lấy cutting forecast cho S24M12345'",
        preconditions: &PRE_GO_OR_JO,
    },
    TaskDescriptor {
        kind: TaskKind::FabricTrans,
        name: "Fabric Transaction Summary",
        description: "Tổng hợp giao dịch fabric, fabric trans summary",
        primary_keywords: &["fabric trans summary", "fabric", "transaction"],
        secondary_keywords: &["tổng hợp giao dịch fabric", "fabric inquiry", "fabric summary"],
        patterns: &[
            r"fabric.*?trans",
            r"tổng hợp.*?giao dịch.*?fabric",
            r"fabric.*?summary",
            r"fabric.*?inquiry",
        ],
        exclusions: &[],
        priority: 6,
        example: "VD: 'Lấy fabric trans summary cho S24M12345'",
        preconditions: &PRE_GO_OR_JO,
    },
    TaskDescriptor {
        kind: TaskKind::SubmatTrans,
        name: "Submat Transaction Summary",
        description: "Tổng hợp giao dịch submat, submat trans summary",
        primary_keywords: &["submat trans summary", "submat", "trans"],
        secondary_keywords: &["tổng hợp giao dịch submat", "submat inquiry", "submat summary"],
        patterns: &[
            r"submat.*?trans",
            r"tổng hợp.*?giao dịch.*?submat",
            r"submat.*?summary",
        ],
        exclusions: &[],
        priority: 6,
        example: "VD: 'Lấy submat trans summary cho S24M12345'",
        preconditions: &PRE_GO_OR_JO,
    },
    TaskDescriptor {
        kind: TaskKind::SubmatDemand,
        name: "Submat Demand",
        description: "Yêu cầu nguyên phụ liệu, submat demand",
        primary_keywords: &["submat demand", "submat", "demand"],
        secondary_keywords: &["yêu cầu submat", "yêu cầu nguyên phụ liệu", "submat demand list"],
        patterns: &[
            r"submat.*?demand",
            r"yêu cầu.*?(submat|nguyên phụ liệu)",
            r"submat.*?demand.*?list",
        ],
        exclusions: &[],
        priority: 6,
        example: "VD: 'Lấy submat demand cho S24M12345'",
        preconditions: &PRE_GO_OR_JO,
    },
    TaskDescriptor {
        kind: TaskKind::GoQuantity,
        name: "GO Quantity",
        description: "Yêu cầu số lượng go, quantity",
        primary_keywords: &["go quantity", "quantity"],
        secondary_keywords: &["số lượng go"],
        patterns: &[r"yêu cầu.*?(số lượng|quantity).*?go", r"go.*?quantity"],
        exclusions: &[],
        priority: 5,
        example: "VD: 'Xem go quantity cho S24M12345'",
        preconditions: &PRE_DM,
    },
    TaskDescriptor {
        kind: TaskKind::InsertTrims,
        name: "Insert Trims List",
        description: "Insert trims, cập nhật trims, trims list",
        primary_keywords: &["insert trims", "cập nhật trims", "trims list"],
        secondary_keywords: &["cập nhật danh sách phụ liệu", "trims update"],
        patterns: &[r"insert.*?trims", r"cập nhật.*?trims", r"trims.*?list"],
        exclusions: &[r"báo cáo", r"report"],
        priority: 6,
        example: "VD: 'Cập nhật trims list' (cần tải file trước)",
        preconditions: &PRE_TRIMS,
    },
    TaskDescriptor {
        kind: TaskKind::InsertFabric,
        name: "Insert Fabric List",
        description: "Insert fabric, cập nhật fabric, fabric list",
        primary_keywords: &["insert fabric", "cập nhật fabric", "fabric list"],
        secondary_keywords: &["cập nhật danh sách vải", "fabric update"],
        patterns: &[r"insert.*?fabric", r"cập nhật.*?fabric", r"fabric.*?list"],
        exclusions: &[r"báo cáo", r"report"],
        priority: 6,
        example: "VD: 'Cập nhật fabric list' (cần tải file trước)",
        preconditions: &PRE_FABRIC,
    },
    TaskDescriptor {
        kind: TaskKind::InsertRangeDm,
        name: "Insert Range DM",
        description: "Insert range dm, cập nhật range dm, range dm list",
        primary_keywords: &["insert range dm", "cập nhật range dm", "range dm list"],
        secondary_keywords: &["cập nhật danh sách dm", "range dm update"],
        patterns: &[
            r"insert.*?range.*?dm",
            r"cập nhật.*?range.*?dm",
            r"range.*?dm.*?list",
        ],
        exclusions: &[r"báo cáo", r"report"],
        priority: 6,
        example: "VD: 'Cập nhật range dm list' (cần tải file trước)",
        preconditions: &PRE_RANGE_DM,
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalogue_is_aligned_with_registration_order() {
        for (i, kind) in TaskKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(kind.descriptor().kind, *kind);
        }
    }

    #[test]
    fn ids_are_unique_and_round_trip() {
        let ids: HashSet<_> = TaskKind::ALL.iter().map(|k| k.id()).collect();
        assert_eq!(ids.len(), TaskKind::ALL.len());
        for kind in TaskKind::ALL {
            assert_eq!(kind.id().parse::<TaskKind>().unwrap(), kind);
        }
        assert!("nope".parse::<TaskKind>().is_err());
    }

    #[test]
    fn every_pattern_compiles() {
        for kind in TaskKind::ALL {
            let d = kind.descriptor();
            for p in d.patterns.iter().chain(d.exclusions) {
                assert!(regex::Regex::new(p).is_ok(), "{kind}: {p}");
            }
        }
    }

    #[test]
    fn uploads_require_a_file_and_reports_do_not_require_codes() {
        for kind in TaskKind::ALL {
            let pre = kind.descriptor().preconditions;
            assert_eq!(pre.len(), 1);
            if kind.id().starts_with("insert_") {
                assert!(pre[0].required);
                assert_eq!(pre[0].name, "file_data");
            } else {
                assert!(!pre[0].required);
                assert_eq!(pre[0].name, "codes");
            }
        }
    }
}
