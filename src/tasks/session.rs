//! Per-conversation state carried between turns.
//!
//! `Conversation` is the only writer of the "last result" and "last upload"
//! fields. A turn sees the upload through the `ExecutionContext` it builds;
//! the last result stays here and is read only by [`Conversation::export`].

use std::path::Path;

use serde::Serialize;

use super::errors::ExportError;
use super::registry::TaskKind;
use super::types::{ExecutionContext, TaskData, TaskResult};
use crate::store::Table;

#[derive(Debug, Serialize)]
struct ExportDocument<'a> {
    task: TaskKind,
    data: &'a TaskData,
}

#[derive(Debug, Default)]
pub struct Conversation {
    file: Option<Table>,
    last_task: Option<TaskKind>,
    last_result: Option<TaskData>,
    turns: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an already-parsed upload for the following turns.
    pub fn attach_file(&mut self, file: Table) {
        tracing::info!(rows = file.len(), columns = file.columns.len(), "file attached");
        self.file = Some(file);
    }

    pub fn file(&self) -> Option<&Table> {
        self.file.as_ref()
    }

    pub fn last_task(&self) -> Option<TaskKind> {
        self.last_task
    }

    pub fn last_result(&self) -> Option<&TaskData> {
        self.last_result.as_ref()
    }

    pub fn turns(&self) -> u64 {
        self.turns
    }

    /// Build the context for the next turn.
    pub fn context(&self, utterance: &str) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(utterance);
        if let Some(file) = &self.file {
            ctx = ctx.with_file(file.clone());
        }
        ctx
    }

    /// Fold a turn's outcome into the conversation. Only successes replace
    /// the last result; a successful upload consumes the attached file.
    pub fn record(&mut self, result: &TaskResult) {
        self.turns += 1;
        let TaskResult::Success { task, data, .. } = result else {
            return;
        };
        if task.descriptor().preconditions.iter().any(|p| p.name == "file_data") {
            self.file = None;
        }
        self.last_task = Some(*task);
        self.last_result = Some(data.clone());
    }

    /// Write the last successful result as pretty JSON.
    pub fn export(&self, path: &Path) -> Result<(), ExportError> {
        let (Some(task), Some(data)) = (self.last_task, self.last_result.as_ref()) else {
            return Err(ExportError::NothingToExport);
        };
        let body = serde_json::to_vec_pretty(&ExportDocument { task, data })?;
        std::fs::write(path, body).map_err(|source| ExportError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), task = %task, "result exported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success(task: TaskKind, rows: serde_json::Value) -> TaskResult {
        TaskResult::Success {
            task,
            description: String::new(),
            data: TaskData::Table(Table::from_json(rows)),
        }
    }

    #[test]
    fn only_successes_replace_last_result() {
        let mut conv = Conversation::new();
        conv.record(&success(TaskKind::ProcessWip, json!([{"SC_NO": "S24M12345"}])));
        conv.record(&TaskResult::error("boom"));
        assert_eq!(conv.turns(), 2);
        assert_eq!(conv.last_task(), Some(TaskKind::ProcessWip));
        assert_eq!(conv.last_result().unwrap().total_rows(), 1);
    }

    #[test]
    fn upload_success_consumes_file() {
        let mut conv = Conversation::new();
        conv.attach_file(Table::from_json(json!([{"THV_CODE": "T1"}])));
        assert!(conv.context("x").file_data().is_some());

        conv.record(&success(TaskKind::ProcessWip, json!([])));
        assert!(conv.file().is_some());
        conv.record(&success(TaskKind::InsertTrims, json!([{"THV_CODE": "T1"}])));
        assert!(conv.file().is_none());
    }

    #[test]
    fn export_writes_last_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        let mut conv = Conversation::new();
        assert!(matches!(conv.export(&path), Err(ExportError::NothingToExport)));

        conv.record(&success(TaskKind::CuttingForecast, json!([{"GO": "S24M12345"}])));
        conv.export(&path).unwrap();
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["task"], json!("cutting_forecast"));
        assert_eq!(written["data"]["rows"][0]["GO"], json!("S24M12345"));
    }

    #[test]
    fn export_to_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut conv = Conversation::new();
        conv.record(&success(TaskKind::GoQuantity, json!([])));
        let err = conv.export(&dir.path().join("nope/result.json")).unwrap_err();
        assert!(matches!(err, ExportError::Io { .. }));
    }
}
