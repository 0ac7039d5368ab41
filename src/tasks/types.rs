//! Core task types: parameters, execution context, progress and results.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::registry::TaskKind;
use crate::intent::codes::Code;
use crate::store::{Table, TurnBudget};

// ─── Parameters ─────────────────────────────────────────────────────────────

/// A resolved precondition value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Codes(BTreeSet<Code>),
    File(Table),
}

impl ParamValue {
    /// Empty values never satisfy a precondition.
    pub fn is_empty(&self) -> bool {
        match self {
            ParamValue::Codes(codes) => codes.is_empty(),
            ParamValue::File(table) => table.is_empty(),
        }
    }
}

/// Name → value map produced by validation, consumed by one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedParameters {
    values: BTreeMap<&'static str, ParamValue>,
}

impl ResolvedParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &'static str, value: ParamValue) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolved codes, or an empty set when the task runs unscoped.
    pub fn codes(&self) -> BTreeSet<Code> {
        self.values
            .values()
            .find_map(|v| match v {
                ParamValue::Codes(codes) => Some(codes.clone()),
                ParamValue::File(_) => None,
            })
            .unwrap_or_default()
    }

    pub fn file(&self) -> Option<&Table> {
        self.values.values().find_map(|v| match v {
            ParamValue::File(table) => Some(table),
            ParamValue::Codes(_) => None,
        })
    }
}

// ─── Progress ───────────────────────────────────────────────────────────────

type ProgressFn = dyn Fn(&str) + Send + Sync;

/// Advisory status callback. Emitting never blocks and never fails the task.
#[derive(Clone, Default)]
pub struct ProgressSink {
    callback: Option<Arc<ProgressFn>>,
}

impl ProgressSink {
    /// A sink that drops every message.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(f)),
        }
    }

    /// Forward messages to an unbounded channel. A closed receiver is ignored.
    pub fn channel(tx: UnboundedSender<String>) -> Self {
        Self::from_fn(move |text| {
            let _ = tx.send(text.to_string());
        })
    }

    pub fn emit(&self, text: &str) {
        tracing::debug!(progress = text, "progress");
        let Some(callback) = &self.callback else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| callback(text))).is_err() {
            tracing::warn!("progress callback panicked; message dropped");
        }
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink")
            .field("attached", &self.callback.is_some())
            .finish()
    }
}

// ─── Execution context ──────────────────────────────────────────────────────

/// Per-turn context threaded by reference through the whole execution.
/// Procedures only read it; the progress sink is the one side channel.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    utterance: String,
    file_data: Option<Table>,
    progress: ProgressSink,
    budget: TurnBudget,
}

impl ExecutionContext {
    pub fn new(utterance: impl Into<String>) -> Self {
        Self {
            utterance: utterance.into(),
            file_data: None,
            progress: ProgressSink::none(),
            budget: TurnBudget::unbounded(),
        }
    }

    pub fn with_file(mut self, file: Table) -> Self {
        self.file_data = Some(file);
        self
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_budget(mut self, budget: TurnBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn utterance(&self) -> &str {
        &self.utterance
    }

    /// Already-parsed uploaded file.
    pub fn file_data(&self) -> Option<&Table> {
        self.file_data.as_ref()
    }

    pub fn budget(&self) -> &TurnBudget {
        &self.budget
    }

    pub fn emit(&self, text: &str) {
        self.progress.emit(text);
    }
}

// ─── Results ────────────────────────────────────────────────────────────────

/// Payload of a successful task: one table or a set of named tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskData {
    Table(Table),
    Tables(BTreeMap<String, Table>),
}

impl TaskData {
    /// Look up a table by name. A single table answers to any name.
    pub fn get(&self, name: &str) -> Option<&Table> {
        match self {
            TaskData::Table(table) => Some(table),
            TaskData::Tables(tables) => tables.get(name),
        }
    }

    pub fn table_names(&self) -> Vec<&str> {
        match self {
            TaskData::Table(_) => Vec::new(),
            TaskData::Tables(tables) => tables.keys().map(String::as_str).collect(),
        }
    }

    pub fn total_rows(&self) -> usize {
        match self {
            TaskData::Table(table) => table.len(),
            TaskData::Tables(tables) => tables.values().map(Table::len).sum(),
        }
    }
}

/// A required precondition that did not resolve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingCondition {
    pub name: String,
    pub description: String,
}

/// Terminal artifact of one turn, handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskResult {
    Success {
        task: TaskKind,
        description: String,
        data: TaskData,
    },
    MissingConditions {
        task: TaskKind,
        message: String,
        missing: Vec<MissingCondition>,
        example: String,
    },
    NoTaskMatched {
        message: String,
        suggestions: Vec<String>,
        alternatives: Vec<TaskKind>,
    },
    Error {
        message: String,
    },
}

impl TaskResult {
    pub fn error(message: impl Into<String>) -> Self {
        TaskResult::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success { .. })
    }

    pub fn data(&self) -> Option<&TaskData> {
        match self {
            TaskResult::Success { data, .. } => Some(data),
            _ => None,
        }
    }

    /// The table the task is named after (e.g. `dm_technical` for the
    /// technical report, `dm_compare` for the comparison).
    pub fn primary_table(&self) -> Option<&Table> {
        match self {
            TaskResult::Success { task, data, .. } => data.get(task.primary_table()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::codes::extract;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn progress_sink_is_resilient() {
        ProgressSink::none().emit("nobody listens");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            ProgressSink::from_fn(move |t| seen.lock().unwrap().push(t.to_string()))
        };
        sink.emit("one");
        sink.emit("two");
        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);

        let panicky = ProgressSink::from_fn(|_| panic!("sink broke"));
        panicky.emit("still fine");
    }

    #[test]
    fn channel_sink_ignores_closed_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        ProgressSink::channel(tx).emit("dropped");
    }

    #[test]
    fn resolved_parameters_accessors() {
        let mut params = ResolvedParameters::new();
        assert!(params.codes().is_empty());
        params.insert("codes", ParamValue::Codes(extract("S24M12345")));
        assert_eq!(params.codes().len(), 1);
        assert!(params.file().is_none());
    }

    #[test]
    fn result_serializes_with_type_tag() {
        let result = TaskResult::Success {
            task: TaskKind::ProcessWip,
            description: "Process WIP".into(),
            data: TaskData::Table(Table::from_json(json!([{"SC_NO": "S24M12345"}]))),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["type"], "success");
        assert_eq!(value["task"], "process_wip");
        assert_eq!(value["data"]["rows"][0]["SC_NO"], "S24M12345");
        assert!(result.primary_table().is_some());
    }

    #[test]
    fn named_tables_lookup() {
        let mut tables = BTreeMap::new();
        tables.insert("dm_technical".to_string(), Table::from_json(json!([{"a": 1}])));
        tables.insert("cutting_forecast".to_string(), Table::empty());
        let data = TaskData::Tables(tables);
        assert_eq!(data.total_rows(), 1);
        assert_eq!(data.table_names(), vec!["cutting_forecast", "dm_technical"]);
        assert!(data.get("submat_demand").is_none());
    }
}
