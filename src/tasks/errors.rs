//! Task error types.

use thiserror::Error;

use crate::store::AccessError;
use crate::upstream::RefreshError;

/// Why a task execution did not produce data.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A step found no rows, even after widening its retry windows.
    #[error("step '{step}' returned no data")]
    UpstreamEmpty { step: String },

    /// A store or upstream call failed.
    #[error("step '{step}' failed: {reason}")]
    UpstreamFailure { step: String, reason: String },

    /// The turn deadline passed while the step was running.
    #[error("step '{step}' timed out")]
    Timeout { step: String },

    /// The turn was cancelled.
    #[error("task cancelled")]
    Cancelled,

    /// The uploaded payload cannot be used.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Anything else, including panics inside a procedure.
    #[error("unexpected failure: {reason}")]
    Unexpected { reason: String },
}

impl TaskError {
    /// Map a facade error onto the task taxonomy, naming the step.
    pub fn from_access(step: &str, e: AccessError) -> Self {
        match e {
            AccessError::Store(source) => TaskError::UpstreamFailure {
                step: step.to_string(),
                reason: source.to_string(),
            },
            AccessError::Timeout { .. } => TaskError::Timeout {
                step: step.to_string(),
            },
            AccessError::Cancelled { .. } => TaskError::Cancelled,
            AccessError::Panicked { reason, .. } => TaskError::Unexpected { reason },
        }
    }

    pub fn from_refresh(step: &str, e: RefreshError) -> Self {
        TaskError::UpstreamFailure {
            step: step.to_string(),
            reason: e.to_string(),
        }
    }

    /// Text shown to the user. Never includes internal error details for
    /// failures the user cannot act on.
    pub fn user_message(&self) -> String {
        match self {
            TaskError::UpstreamEmpty { step } => {
                format!("Không có dữ liệu {step}. Vui lòng kiểm tra lại mã.")
            }
            TaskError::UpstreamFailure { step, .. } => {
                format!("Lỗi khi kết nối dữ liệu {step}. Xin lỗi, vui lòng thử lại sau.")
            }
            TaskError::Timeout { step } => {
                format!("Quá thời gian xử lý khi chạy {step}. Vui lòng thử lại sau.")
            }
            TaskError::Cancelled => "Yêu cầu đã bị huỷ.".to_string(),
            TaskError::InvalidInput { reason } => format!("Dữ liệu tải lên không hợp lệ: {reason}"),
            TaskError::Unexpected { .. } => {
                "Xin lỗi, đã có lỗi xảy ra khi thực thi tác vụ. Vui lòng thử lại.".to_string()
            }
        }
    }
}

/// A precondition resolver could not evaluate its input.
#[derive(Debug, Error)]
#[error("cannot resolve '{precondition}': {reason}")]
pub struct ResolveError {
    pub precondition: &'static str,
    pub reason: String,
}

/// Writing the last result to disk failed.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no result to export yet")]
    NothingToExport,

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
}
