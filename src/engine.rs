//! Turn engine: one utterance in, exactly one [`TaskResult`] out.
//!
//! ```text
//! utterance ─► classify ─► validate ─► execute ─► TaskResult
//!                 │            │
//!                 ▼            ▼
//!          NoTaskMatched  MissingConditions
//! ```
//!
//! Classification and validation never fail. Execution folds every error,
//! including a panic inside a procedure, into `TaskResult::Error`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;
use uuid::Uuid;

use crate::intent::{IntentClassifier, TaskConfidence};
use crate::store::TurnBudget;
use crate::tasks::{
    validate, Conversation, ExecutionContext, Orchestrator, ProgressSink, TaskKind, TaskResult,
};

const NO_TASK_MESSAGE: &str = "Không thể xác định tác vụ. Vui lòng mô tả rõ hơn yêu cầu của bạn.";

const NO_TASK_SUGGESTIONS: [&str; 3] = [
    "Xem định mức kỹ thuật cho mã SC_NO",
    "So sánh định mức hoặc báo cáo demand",
    "Xem dữ liệu submat transaction summary",
];

/// Alternatives offered alongside the fixed suggestions.
const MAX_ALTERNATIVES: usize = 3;

pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(300);

/// Classifier plus orchestrator, shared across turns.
#[derive(Clone)]
pub struct Assistant {
    classifier: Arc<dyn IntentClassifier>,
    orchestrator: Orchestrator,
    turn_timeout: Duration,
}

impl Assistant {
    pub fn new(classifier: Arc<dyn IntentClassifier>, orchestrator: Orchestrator) -> Self {
        Self {
            classifier,
            orchestrator,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
        }
    }

    /// Deadline applied to turns whose context has none.
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn turn_timeout(&self) -> Duration {
        self.turn_timeout
    }

    /// Run one turn against `ctx`, which carries the utterance.
    pub async fn handle_turn(&self, ctx: ExecutionContext) -> TaskResult {
        let turn_id = Uuid::new_v4();
        let span = tracing::info_span!("turn", %turn_id);
        async move {
            let started = Instant::now();
            let budget = ctx.budget().clone().or_timeout(self.turn_timeout);
            let ctx = ctx.with_budget(budget);
            let utterance = ctx.utterance().to_string();

            let result = self.dispatch(&utterance, &ctx).await;
            tracing::info!(
                outcome = outcome_label(&result),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "turn finished"
            );
            result
        }
        .instrument(span)
        .await
    }

    /// Build the context from `conversation`, run the turn and record it.
    pub async fn respond(
        &self,
        conversation: &mut Conversation,
        utterance: &str,
        progress: ProgressSink,
        budget: TurnBudget,
    ) -> TaskResult {
        let ctx = conversation
            .context(utterance)
            .with_progress(progress)
            .with_budget(budget);
        let result = self.handle_turn(ctx).await;
        conversation.record(&result);
        result
    }

    async fn dispatch(&self, utterance: &str, ctx: &ExecutionContext) -> TaskResult {
        let Some(classification) = self.classifier.classify(utterance).await else {
            let scores = self.classifier.task_confidence(utterance).await;
            tracing::info!(utterance, "no task matched");
            return no_task_matched(&scores);
        };
        let kind = classification.task;
        tracing::info!(task = %kind, confidence = classification.confidence, "task classified");

        let validation = validate(kind, utterance, ctx);
        if !validation.valid {
            let descriptor = kind.descriptor();
            return TaskResult::MissingConditions {
                task: kind,
                message: format!("Để thực hiện '{}', bạn cần bổ sung:", descriptor.description),
                missing: validation.missing_conditions(),
                example: descriptor.example.to_string(),
            };
        }

        self.orchestrator.execute(kind, validation.satisfied, ctx).await
    }
}

fn no_task_matched(scores: &[TaskConfidence]) -> TaskResult {
    let mut ranked: Vec<&TaskConfidence> = scores
        .iter()
        .filter(|s| !s.excluded && s.score > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    TaskResult::NoTaskMatched {
        message: NO_TASK_MESSAGE.to_string(),
        suggestions: NO_TASK_SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
        alternatives: ranked
            .into_iter()
            .take(MAX_ALTERNATIVES)
            .map(|s| s.task)
            .collect::<Vec<TaskKind>>(),
    }
}

fn outcome_label(result: &TaskResult) -> &'static str {
    match result {
        TaskResult::Success { .. } => "success",
        TaskResult::MissingConditions { .. } => "missing_conditions",
        TaskResult::NoTaskMatched { .. } => "no_task",
        TaskResult::Error { .. } => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{HashEmbedder, RuleClassifier, SemanticClassifier};
    use crate::store::{DataAccess, SqliteStore, Table};
    use crate::upstream::Refresher;
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    const STORE: &str = "
        CREATE TABLE dm_technical (SC_NO TEXT, CODE_CUSTOMS TEXT, TOTAL REAL, TOTAL_PCS REAL, DEMAND REAL);
        INSERT INTO dm_technical VALUES ('S24M12345', 'CA', 5, 1, 100), ('S24M99999', 'CB', 1, 1, 10);
        CREATE TABLE cutting_forecast (GO TEXT, QTY REAL);
        INSERT INTO cutting_forecast VALUES ('S24M99999', 1);
        CREATE TABLE submat_demand (GO TEXT, JO_NO TEXT, Required_Qty REAL);
        INSERT INTO submat_demand VALUES ('S24M99999', '24M99999AB01', 1);
        CREATE TABLE trims_list (THV_CODE TEXT, NAME TEXT);
    ";

    struct Fixture {
        assistant: Assistant,
        commits: Arc<Mutex<Vec<Value>>>,
    }

    fn fixture() -> Fixture {
        let commits: Arc<Mutex<Vec<Value>>> = Arc::default();
        let log = Arc::clone(&commits);
        let store = SqliteStore::open_in_memory()
            .unwrap()
            .with_procedure("refresh_dm_technical", move |_, args| {
                log.lock().unwrap().push(args.clone());
                Ok(())
            });
        store.execute_batch(STORE).unwrap();
        let store = Arc::new(store);
        let upstream = Arc::new(SqliteStore::open_in_memory().unwrap());

        let access = DataAccess::new(store.clone(), 2);
        let refresher = Refresher::new(upstream, store)
            .with_today(NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
        let assistant = Assistant::new(
            Arc::new(RuleClassifier::new()),
            Orchestrator::new(access, refresher),
        );
        Fixture { assistant, commits }
    }

    async fn ask(f: &Fixture, utterance: &str) -> TaskResult {
        f.assistant.handle_turn(ExecutionContext::new(utterance)).await
    }

    #[tokio::test]
    async fn offline_view_returns_scoped_table() {
        let f = fixture();
        let result = ask(&f, "Xem DM Technical cho S24M12345").await;

        let TaskResult::Success { task, .. } = &result else {
            panic!("expected success, got {result:?}");
        };
        assert_eq!(*task, TaskKind::DmTechnical);
        let technical = result.primary_table().unwrap();
        assert_eq!(technical.len(), 1);
        assert_eq!(technical.rows[0]["SC_NO"], json!("S24M12345"));
        // The upstream source is empty, so any refresh would have failed the turn.
        assert!(f.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unscoped_report_runs_composite_and_returns_full_table() {
        let f = fixture();
        let result = ask(&f, "Báo cáo DM Technical").await;

        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.primary_table().map(Table::len), Some(2));
        assert_eq!(*f.commits.lock().unwrap(), vec![json!({"codes": []})]);
    }

    #[tokio::test]
    async fn unrelated_text_yields_no_task_matched() {
        let f = fixture();
        let result = ask(&f, "chào buổi sáng").await;
        let TaskResult::NoTaskMatched {
            message,
            suggestions,
            alternatives,
        } = result
        else {
            panic!("expected no task");
        };
        assert_eq!(message, NO_TASK_MESSAGE);
        assert_eq!(suggestions.len(), 3);
        assert!(alternatives.is_empty());
    }

    #[tokio::test]
    async fn upload_without_file_reports_missing_condition() {
        let f = fixture();
        let result = ask(&f, "cập nhật trims list").await;
        let TaskResult::MissingConditions {
            task,
            message,
            missing,
            example,
        } = result
        else {
            panic!("expected missing conditions");
        };
        assert_eq!(task, TaskKind::InsertTrims);
        assert!(message.starts_with("Để thực hiện"));
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "file_data");
        assert!(example.contains("trims list"));
    }

    #[tokio::test]
    async fn conversation_upload_is_consumed_once() {
        let f = fixture();
        let mut conversation = Conversation::new();
        conversation.attach_file(Table::from_json(json!([
            {"THV_CODE": "T1", "NAME": "Button"},
            {"THV_CODE": "T1", "NAME": "Button dup"},
            {"THV_CODE": "T2", "NAME": "Zip"}
        ])));

        let messages: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&messages);
        let progress = ProgressSink::from_fn(move |m| sink.lock().unwrap().push(m.to_string()));
        let first = f
            .assistant
            .respond(&mut conversation, "cập nhật trims list", progress, TurnBudget::unbounded())
            .await;
        assert!(first.is_success(), "{first:?}");
        assert_eq!(first.primary_table().map(Table::len), Some(2));
        assert_eq!(messages.lock().unwrap().len(), 1);
        assert!(conversation.file().is_none());

        let second = f
            .assistant
            .respond(&mut conversation, "cập nhật trims list", ProgressSink::none(), TurnBudget::unbounded())
            .await;
        assert!(matches!(second, TaskResult::MissingConditions { .. }));
        assert_eq!(conversation.turns(), 2);
        assert_eq!(conversation.last_task(), Some(TaskKind::InsertTrims));
    }

    #[tokio::test]
    async fn cancelled_turn_is_an_error() {
        let f = fixture();
        let budget = TurnBudget::unbounded();
        budget.cancel();
        let result = f
            .assistant
            .handle_turn(ExecutionContext::new("Báo cáo DM Technical").with_budget(budget))
            .await;
        assert_eq!(result, TaskResult::error("Yêu cầu đã bị huỷ."));
    }

    #[tokio::test]
    async fn semantic_strategy_below_floor_yields_no_task() {
        let f = fixture();
        let classifier = SemanticClassifier::with_embedder(Arc::new(HashEmbedder::default()), 0.99);
        let assistant = Assistant::new(Arc::new(classifier), f.assistant.orchestrator.clone());
        let result = assistant
            .handle_turn(ExecutionContext::new("thời tiết hôm nay"))
            .await;
        let TaskResult::NoTaskMatched { alternatives, .. } = result else {
            panic!("expected no task");
        };
        assert!(alternatives.len() <= MAX_ALTERNATIVES);
    }

    #[test]
    fn alternatives_rank_positive_scores() {
        let score = |task, score: f32, excluded| TaskConfidence {
            task,
            score,
            confidence: score,
            excluded,
            details: Vec::new(),
        };
        let result = no_task_matched(&[
            score(TaskKind::Compare, 0.2, false),
            score(TaskKind::DmTechnical, 0.6, false),
            score(TaskKind::DmActual, 0.9, true),
            score(TaskKind::ProcessWip, 0.0, false),
            score(TaskKind::GoQuantity, 0.4, false),
            score(TaskKind::FabricTrans, 0.3, false),
        ]);
        let TaskResult::NoTaskMatched { alternatives, .. } = result else {
            panic!("expected no task");
        };
        assert_eq!(
            alternatives,
            vec![TaskKind::DmTechnical, TaskKind::GoQuantity, TaskKind::FabricTrans]
        );
    }
}
