//! Task orchestrator: runs a validated task's plan and shapes the result.
//!
//! Flow for one turn:
//! 1. **Dispatch**: the task's [`Procedure`] decides leaf, composite or upload.
//! 2. **Refresh**: scoped online leaves copy upstream rows into the store;
//!    composites run their steps, each a full task execution of its own.
//! 3. **Commit**: composites run their derivation once every step is ready.
//! 4. **Read**: the store tables are (re-)read for the response.
//!
//! Every blocking call goes through the data access facade, so the turn
//! budget bounds the whole execution. The procedure itself runs in its own
//! tokio task; a panic anywhere inside becomes an `Error` result.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{try_join_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use super::errors::TaskError;
use super::procedures::{
    commit_args, dedupe_by_key, derive_compare, plan_upsert, update_columns, upload_keys, Commit,
    CompositePlan, LeafPlan, Procedure, UploadPlan, COMPARE_TABLE, OFFLINE_NOTICE,
};
use super::registry::TaskKind;
use super::types::{ExecutionContext, ResolvedParameters, TaskData, TaskResult};
use crate::intent::codes::{self, Code};
use crate::intent::text::is_offline_request;
use crate::store::facade::panic_message;
use crate::store::{AccessError, DataAccess, Table};
use crate::upstream::{RefreshJob, Refresher};

// ─── Policy ─────────────────────────────────────────────────────────────────

/// What a composite does when a step finds no rows. Failures always abort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyStepPolicy {
    #[default]
    Abort,
    Continue,
}

/// Outcome of one composite step.
#[derive(Debug)]
enum StepOutcome {
    Ready,
    Empty,
    Failed(TaskError),
}

/// How a task is being run.
#[derive(Debug, Clone, Copy)]
struct Invocation {
    /// Skip refreshes and read stored data.
    offline: bool,
    /// Running as another task's step: no progress messages, strict reads.
    as_step: bool,
}

impl Invocation {
    const STEP: Invocation = Invocation {
        offline: false,
        as_step: true,
    };
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

/// Executes tasks against the store and the upstream source.
#[derive(Clone)]
pub struct Orchestrator {
    access: DataAccess,
    refresher: Arc<Refresher>,
    empty_steps: EmptyStepPolicy,
}

impl Orchestrator {
    pub fn new(access: DataAccess, refresher: Refresher) -> Self {
        Self {
            access,
            refresher: Arc::new(refresher),
            empty_steps: EmptyStepPolicy::default(),
        }
    }

    pub fn with_empty_step_policy(mut self, policy: EmptyStepPolicy) -> Self {
        self.empty_steps = policy;
        self
    }

    /// Run `kind` with already-validated parameters. Never fails: every
    /// error, including a panic, is folded into `TaskResult::Error`.
    pub async fn execute(
        &self,
        kind: TaskKind,
        params: ResolvedParameters,
        ctx: &ExecutionContext,
    ) -> TaskResult {
        let started = Instant::now();
        let this = self.clone();
        let turn = ctx.clone();
        let handle = tokio::spawn(async move { this.run_top(kind, &params, &turn).await });

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(TaskError::Unexpected {
                reason: panic_message(e.into_panic()),
            }),
            Err(_) => Err(TaskError::Cancelled),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(data) => {
                tracing::info!(
                    task = %kind,
                    tables = data.table_names().len(),
                    rows = data.total_rows(),
                    elapsed_ms,
                    "orchestrator: task succeeded"
                );
                TaskResult::Success {
                    task: kind,
                    description: kind.descriptor().description.to_string(),
                    data,
                }
            }
            Err(e) => {
                tracing::warn!(task = %kind, error = %e, elapsed_ms, "orchestrator: task failed");
                TaskResult::error(e.user_message())
            }
        }
    }

    async fn run_top(
        &self,
        kind: TaskKind,
        params: &ResolvedParameters,
        ctx: &ExecutionContext,
    ) -> Result<TaskData, TaskError> {
        if let Procedure::Upload(plan) = kind.procedure() {
            return self.run_upload(kind, plan, params, ctx).await;
        }
        let codes = params.codes();
        let invocation = Invocation {
            offline: is_offline_request(ctx.utterance()),
            as_step: false,
        };
        tracing::info!(
            task = %kind,
            codes = codes.len(),
            offline = invocation.offline,
            "orchestrator: executing"
        );
        self.run_task(kind, &codes, ctx, invocation).await
    }

    /// Boxed so composites can run other tasks as steps.
    fn run_task<'a>(
        &'a self,
        kind: TaskKind,
        codes: &'a BTreeSet<Code>,
        ctx: &'a ExecutionContext,
        invocation: Invocation,
    ) -> BoxFuture<'a, Result<TaskData, TaskError>> {
        async move {
            match kind.procedure() {
                Procedure::Leaf(plan) => self.run_leaf(kind, plan, codes, ctx, invocation).await,
                Procedure::Composite(plan) => {
                    self.run_composite(kind, plan, codes, ctx, invocation).await
                }
                Procedure::Upload(_) => Err(TaskError::InvalidInput {
                    reason: format!("{kind} cannot run as a step"),
                }),
            }
        }
        .boxed()
    }

    // ─── Leaf ───────────────────────────────────────────────────────────────

    async fn run_leaf(
        &self,
        kind: TaskKind,
        plan: LeafPlan,
        codes: &BTreeSet<Code>,
        ctx: &ExecutionContext,
        invocation: Invocation,
    ) -> Result<TaskData, TaskError> {
        let name = kind.descriptor().name;
        let say = |text: &str| {
            if !invocation.as_step {
                ctx.emit(text);
            }
        };

        if codes.is_empty() {
            say(&format!("Không có mã cụ thể, đang lấy toàn bộ dữ liệu {name}..."));
        } else if invocation.offline {
            say(OFFLINE_NOTICE);
        } else if !plan.refresh.is_empty() {
            say(plan.message);
            for job in plan.refresh {
                self.refresh(name, *job, codes, ctx).await?;
            }
        }

        let condition = plan.scope.condition(codes);
        let table = self
            .read(name, plan.table, condition.as_deref(), ctx, invocation.as_step)
            .await?;
        Ok(TaskData::Table(table))
    }

    async fn refresh(
        &self,
        step: &str,
        job: RefreshJob,
        codes: &BTreeSet<Code>,
        ctx: &ExecutionContext,
    ) -> Result<(), TaskError> {
        let refresher = Arc::clone(&self.refresher);
        let scoped = codes.clone();
        let op = format!("refresh {}", job.name());
        let report = self
            .access
            .offload(&op, ctx.budget(), move || refresher.run(job, &scoped))
            .await
            .map_err(|e| TaskError::from_access(step, e))?
            .map_err(|e| TaskError::from_refresh(step, e))?;
        tracing::info!(
            step,
            job = job.name(),
            rows = report.rows,
            attempts = report.attempts,
            "orchestrator: refresh finished"
        );
        Ok(())
    }

    /// Read one table. Outside a step, a store error degrades to an empty
    /// table; timeouts, cancellation and panics always propagate.
    async fn read(
        &self,
        step: &str,
        table: &str,
        condition: Option<&str>,
        ctx: &ExecutionContext,
        strict: bool,
    ) -> Result<Table, TaskError> {
        match self.access.try_get(table, condition, ctx.budget()).await {
            Ok(rows) => Ok(rows),
            Err(AccessError::Store(e)) if !strict => {
                tracing::warn!(table, error = %e, "orchestrator: read failed, using empty table");
                Ok(Table::empty())
            }
            Err(e) => Err(TaskError::from_access(step, e)),
        }
    }

    // ─── Composite ──────────────────────────────────────────────────────────

    async fn run_composite(
        &self,
        kind: TaskKind,
        plan: CompositePlan,
        codes: &BTreeSet<Code>,
        ctx: &ExecutionContext,
        invocation: Invocation,
    ) -> Result<TaskData, TaskError> {
        let name = kind.descriptor().name;
        let say = |text: &str| {
            if !invocation.as_step {
                ctx.emit(text);
            }
        };

        if invocation.offline {
            say(OFFLINE_NOTICE);
        } else {
            if codes.is_empty() {
                say(plan.unscoped_message);
            }
            for (index, step) in plan.steps.iter().enumerate() {
                say(step.message);
                let step_name = step.task.descriptor().name;
                tracing::info!(task = %kind, step = %step.task, index, "orchestrator: running step");

                match self.run_step(step.task, codes, ctx).await {
                    StepOutcome::Ready => {}
                    StepOutcome::Empty => match self.empty_steps {
                        EmptyStepPolicy::Abort => {
                            tracing::warn!(task = %kind, step = %step.task, "orchestrator: step empty, aborting");
                            return Err(TaskError::UpstreamEmpty {
                                step: step_name.to_string(),
                            });
                        }
                        EmptyStepPolicy::Continue => {
                            tracing::warn!(task = %kind, step = %step.task, "orchestrator: step empty, continuing");
                        }
                    },
                    StepOutcome::Failed(e) => {
                        tracing::warn!(task = %kind, step = %step.task, error = %e, "orchestrator: step failed");
                        return Err(e);
                    }
                }
            }

            say(plan.commit_message);
            if let Commit::Procedure(procedure) = plan.commit {
                self.commit(name, procedure, codes, ctx).await?;
            }
        }

        let requests: Vec<(String, Option<String>)> = plan
            .reads
            .iter()
            .map(|(table, scope)| (table.to_string(), scope.condition(codes)))
            .collect();
        let mut tables: BTreeMap<String, Table> = if invocation.as_step {
            let reads = requests.iter().map(|(table, condition)| async move {
                let rows = self.read(name, table, condition.as_deref(), ctx, true).await?;
                Ok::<_, TaskError>((table.clone(), rows))
            });
            try_join_all(reads).await?.into_iter().collect()
        } else {
            let tables = self.access.get_many(&requests, ctx.budget()).await;
            check_budget(name, ctx)?;
            tables
        };

        if plan.commit == Commit::Compare {
            let technical = tables.get("dm_technical").cloned().unwrap_or_default();
            let actual = tables.get("dm_actual").cloned().unwrap_or_default();
            let compare = self
                .access
                .offload("compare derivation", ctx.budget(), move || {
                    derive_compare(&technical, &actual)
                })
                .await
                .map_err(|e| TaskError::from_access(name, e))?;
            tables.insert(COMPARE_TABLE.to_string(), compare);
        }
        Ok(TaskData::Tables(tables))
    }

    /// Run another task as a step and classify what it produced.
    async fn run_step(
        &self,
        task: TaskKind,
        codes: &BTreeSet<Code>,
        ctx: &ExecutionContext,
    ) -> StepOutcome {
        match self.run_task(task, codes, ctx, Invocation::STEP).await {
            Ok(data) => {
                if data.get(task.primary_table()).map_or(true, Table::is_empty) {
                    StepOutcome::Empty
                } else {
                    StepOutcome::Ready
                }
            }
            Err(TaskError::UpstreamEmpty { .. }) => StepOutcome::Empty,
            Err(e) => StepOutcome::Failed(e),
        }
    }

    async fn commit(
        &self,
        step: &str,
        procedure: &'static str,
        codes: &BTreeSet<Code>,
        ctx: &ExecutionContext,
    ) -> Result<(), TaskError> {
        let args = commit_args(codes);
        self.access
            .run(&format!("commit {procedure}"), ctx.budget(), move |store| {
                store.call_procedure(procedure, &args)
            })
            .await
            .map_err(|e| TaskError::from_access(step, e))?;
        tracing::info!(step, procedure, codes = codes.len(), "orchestrator: commit done");
        Ok(())
    }

    // ─── Upload ─────────────────────────────────────────────────────────────

    async fn run_upload(
        &self,
        kind: TaskKind,
        plan: UploadPlan,
        params: &ResolvedParameters,
        ctx: &ExecutionContext,
    ) -> Result<TaskData, TaskError> {
        let name = kind.descriptor().name;
        let file = params
            .file()
            .or(ctx.file_data())
            .ok_or_else(|| TaskError::InvalidInput {
                reason: "chưa có file tải lên".to_string(),
            })?;

        let rows = dedupe_by_key(file, plan.key);
        if rows.is_empty() {
            return Err(TaskError::InvalidInput {
                reason: format!("không có dòng nào có giá trị cột {}", plan.key),
            });
        }
        let dropped = file.len() - rows.len();
        let condition = format!(
            "\"{}\" IN ({})",
            plan.key,
            codes::quote_list(&upload_keys(&rows, plan.key))
        );
        let (table, key) = (plan.table, plan.key);
        let set_columns = update_columns(&rows, key);
        let upload = rows.clone();
        let split = self
            .access
            .run(&format!("upsert {table}"), ctx.budget(), move |store| {
                let existing = store.select(table, "*", Some(&condition))?;
                let split = plan_upsert(&upload, &existing, key);
                if !split.inserts.is_empty() {
                    store.insert(table, &split.inserts)?;
                }
                if !split.updates.is_empty() {
                    store.update_batch(table, &set_columns, &[key.to_string()], &split.updates)?;
                }
                Ok(split)
            })
            .await
            .map_err(|e| TaskError::from_access(name, e))?;

        tracing::info!(
            task = %kind,
            table,
            inserted = split.inserts.len(),
            updated = split.updates.len(),
            unchanged = split.unchanged,
            dropped,
            "orchestrator: master list updated"
        );
        ctx.emit(plan.message);
        Ok(TaskData::Table(rows))
    }
}

/// Batch reads degrade every failure to an empty table, so an expired or
/// cancelled turn has to be checked for explicitly afterwards.
fn check_budget(step: &str, ctx: &ExecutionContext) -> Result<(), TaskError> {
    let budget = ctx.budget();
    if budget.is_cancelled() {
        return Err(TaskError::Cancelled);
    }
    if budget
        .deadline()
        .is_some_and(|deadline| tokio::time::Instant::now() >= deadline)
    {
        return Err(TaskError::Timeout {
            step: step.to_string(),
        });
    }
    Ok(())
}
