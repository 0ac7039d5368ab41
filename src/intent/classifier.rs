//! Classifier seam shared by the rule and semantic strategies.

use async_trait::async_trait;
use serde::Serialize;

use crate::tasks::TaskKind;

/// A selected task with the classifier's confidence in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub task: TaskKind,
    pub confidence: f32,
}

/// Per-task diagnostic entry.
#[derive(Debug, Clone, Serialize)]
pub struct TaskConfidence {
    pub task: TaskKind,
    pub score: f32,
    pub confidence: f32,
    pub excluded: bool,
    pub details: Vec<String>,
}

/// Maps an utterance to at most one task.
///
/// Implementations never fail: an internal error is logged and reported as
/// "no match".
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, utterance: &str) -> Option<Classification>;

    /// Diagnostic scores for every task, in registration order.
    async fn task_confidence(&self, utterance: &str) -> Vec<TaskConfidence>;
}
