//! Error recovery coordinator
//!
//! Every failure handed to [`ErrorRecoveryCoordinator::execute_recovery`] is
//! first written to the memory store as an episodic `tool_error` record, then
//! planned and dispatched. The only state the coordinator keeps is a count of
//! occurrences per (tool, category) pair, which drives escalation.

use crate::category::ErrorCategory;
use crate::plan::{
    backoff_delay, ErrorContext, FallbackTarget, RecoveryConfig, RecoveryPlan, RecoveryStrategy,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clipmind_memory::{
    Importance, MemoryContent, MemoryKind, MemoryResult, MemoryStore, QueryCriteria, StoreRequest,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Category and schema of failure records
pub const TOOL_ERROR_SCHEMA: &str = "tool_error";
/// Category and schema of successful fallbacks
pub const FALLBACK_SUCCESS_SCHEMA: &str = "fallback_success";
/// Category and schema of rollback requests
pub const ROLLBACK_SCHEMA: &str = "rollback";

/// Every category the coordinator writes; stats are counted from these
pub const RECOVERY_SCHEMAS: [&str; 3] = [TOOL_ERROR_SCHEMA, FALLBACK_SUCCESS_SCHEMA, ROLLBACK_SCHEMA];

/// A failed tool invocation
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ToolFailure {
    /// Error message
    pub message: String,
    /// Stack trace
    pub stack: Option<String>,
}

impl ToolFailure {
    /// Failure with a message only
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    /// Attach a stack trace
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Runs tools on behalf of the coordinator
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute `tool` with `args`
    async fn execute(&self, tool: &str, args: &Value) -> Result<Value, ToolFailure>;
}

/// How a recovery ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    /// A retry or fallback succeeded
    Recovered,
    /// Every attempt failed
    Failed,
    /// The step was skipped
    Skipped,
    /// A human has to look at it
    NeedsManualReview,
    /// Cancelled while waiting to retry
    Cancelled,
}

/// Result of [`ErrorRecoveryCoordinator::execute_recovery`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    /// Final status
    pub status: RecoveryStatus,
    /// Plan that was executed
    pub plan: RecoveryPlan,
    /// Category of the original failure
    pub category: ErrorCategory,
    /// Tool invocations made during recovery
    pub attempts: u32,
    /// Output of the successful invocation
    pub result: Option<Value>,
    /// Last error seen
    pub error: Option<String>,
    /// Id of the stored `tool_error` record
    pub error_record_id: String,
}

impl RecoveryOutcome {
    /// Whether the tool call was eventually satisfied
    pub fn is_success(&self) -> bool {
        self.status == RecoveryStatus::Recovered
    }

    /// Whether a human needs to act
    pub fn requires_manual_review(&self) -> bool {
        self.status == RecoveryStatus::NeedsManualReview
    }
}

/// Aggregated error history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    /// Stored failures
    pub total_errors: usize,
    /// Failures per category
    pub by_category: BTreeMap<String, usize>,
    /// Failures per tool
    pub by_tool: BTreeMap<String, usize>,
    /// Successful fallbacks
    pub fallback_successes: usize,
    /// Rollback requests
    pub rollbacks: usize,
    /// `fallback_successes / total_errors`, 0 when there are no errors
    pub recovery_success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolErrorRecord {
    tool: String,
    args: Value,
    message: String,
    stack: Option<String>,
    category: ErrorCategory,
    occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FallbackSuccessRecord {
    tool: String,
    fallback_tool: String,
    category: ErrorCategory,
    escalated: bool,
    recovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RollbackRecord {
    tool: String,
    args: Value,
    message: String,
    category: ErrorCategory,
    requested_at: DateTime<Utc>,
}

/// Classifies tool failures and runs the matching recovery
pub struct ErrorRecoveryCoordinator {
    store: Arc<MemoryStore>,
    config: RecoveryConfig,
    occurrences: Mutex<HashMap<(String, ErrorCategory), u32>>,
    cancel: Mutex<CancellationToken>,
}

impl ErrorRecoveryCoordinator {
    /// Create a coordinator writing to `store`
    pub fn new(store: Arc<MemoryStore>, config: RecoveryConfig) -> Self {
        Self {
            store,
            config,
            occurrences: Mutex::new(HashMap::new()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Describe a failure of `tool`
    pub fn error_context(&self, tool: &str, args: Value, failure: &ToolFailure) -> ErrorContext {
        ErrorContext::new(
            tool,
            args,
            failure.message.clone(),
            failure.stack.clone(),
            self.store.now(),
        )
    }

    /// Times `tool` has failed with `category` in this process
    pub fn occurrences(&self, tool: &str, category: ErrorCategory) -> u32 {
        self.occurrences
            .lock()
            .get(&(tool.to_string(), category))
            .copied()
            .unwrap_or(0)
    }

    /// Choose a plan for a failure and count the occurrence
    ///
    /// A retry plan for a pair that already failed more than
    /// `escalation_threshold` times is escalated to a fallback.
    pub fn get_recovery_plan(&self, ctx: &ErrorContext) -> RecoveryPlan {
        let prior = {
            let mut occurrences = self.occurrences.lock();
            let count = occurrences
                .entry((ctx.tool.clone(), ctx.category))
                .or_insert(0);
            let prior = *count;
            *count += 1;
            prior
        };

        let mut plan = RecoveryPlan::for_category(ctx.category);
        if plan.strategy == RecoveryStrategy::Retry && prior > self.config.escalation_threshold {
            warn!(
                tool = %ctx.tool,
                category = ctx.category.as_str(),
                occurrences = prior + 1,
                "Escalating repeated failure to fallback"
            );
            plan = plan.escalate();
        }

        if plan.strategy == RecoveryStrategy::Fallback {
            plan.fallback = self.config.fallbacks.get(&ctx.tool).cloned();
        }
        plan
    }

    /// Record the failure, then plan and run its recovery
    pub async fn execute_recovery(
        &self,
        ctx: &ErrorContext,
        executor: &dyn ToolExecutor,
    ) -> MemoryResult<RecoveryOutcome> {
        let error_record_id = self.record_error(ctx).await?;
        let plan = self.get_recovery_plan(ctx);

        debug!(
            tool = %ctx.tool,
            category = ctx.category.as_str(),
            strategy = plan.strategy.as_str(),
            "Executing recovery plan"
        );

        let mut outcome = RecoveryOutcome {
            status: RecoveryStatus::Failed,
            plan: plan.clone(),
            category: ctx.category,
            attempts: 0,
            result: None,
            error: Some(ctx.message.clone()),
            error_record_id,
        };

        match plan.strategy {
            RecoveryStrategy::Retry => self.retry(ctx, &plan, executor, &mut outcome).await,
            RecoveryStrategy::Fallback => {
                self.fallback(ctx, &plan, executor, &mut outcome).await?
            }
            RecoveryStrategy::Skip => outcome.status = RecoveryStatus::Skipped,
            RecoveryStrategy::Manual => outcome.status = RecoveryStatus::NeedsManualReview,
            RecoveryStrategy::Rollback => {
                self.record_rollback(ctx).await?;
                outcome.status = RecoveryStatus::NeedsManualReview;
            }
        }

        info!(
            tool = %ctx.tool,
            strategy = plan.strategy.as_str(),
            status = ?outcome.status,
            attempts = outcome.attempts,
            "Recovery finished"
        );
        Ok(outcome)
    }

    /// Build the context for a failure and recover from it
    pub async fn recover(
        &self,
        tool: &str,
        args: Value,
        failure: &ToolFailure,
        executor: &dyn ToolExecutor,
    ) -> MemoryResult<RecoveryOutcome> {
        let ctx = self.error_context(tool, args, failure);
        self.execute_recovery(&ctx, executor).await
    }

    /// Abort every backoff wait in flight; later recoveries are unaffected
    pub fn cancel(&self) {
        let token = std::mem::replace(&mut *self.cancel.lock(), CancellationToken::new());
        token.cancel();
    }

    /// Counts from the stored failure, fallback and rollback records
    pub fn get_error_stats(&self) -> ErrorStats {
        let mut stats = ErrorStats::default();

        for record in self.records::<ToolErrorRecord>(TOOL_ERROR_SCHEMA) {
            stats.total_errors += 1;
            *stats
                .by_category
                .entry(record.category.as_str().to_string())
                .or_insert(0) += 1;
            *stats.by_tool.entry(record.tool).or_insert(0) += 1;
        }
        stats.fallback_successes = self
            .records::<FallbackSuccessRecord>(FALLBACK_SUCCESS_SCHEMA)
            .len();
        stats.rollbacks = self.records::<RollbackRecord>(ROLLBACK_SCHEMA).len();

        if stats.total_errors > 0 {
            stats.recovery_success_rate =
                (stats.fallback_successes as f64 / stats.total_errors as f64).min(1.0);
        }
        stats
    }

    async fn retry(
        &self,
        ctx: &ErrorContext,
        plan: &RecoveryPlan,
        executor: &dyn ToolExecutor,
        outcome: &mut RecoveryOutcome,
    ) {
        let token = self.cancel.lock().clone();

        for attempt in 1..=plan.max_retries {
            let delay = backoff_delay(plan.backoff_ms, attempt);

            tokio::select! {
                _ = token.cancelled() => {
                    info!(tool = %ctx.tool, attempt, "Retry cancelled");
                    outcome.status = RecoveryStatus::Cancelled;
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            outcome.attempts += 1;
            match executor.execute(&ctx.tool, &ctx.args).await {
                Ok(result) => {
                    outcome.status = RecoveryStatus::Recovered;
                    outcome.result = Some(result);
                    outcome.error = None;
                    return;
                }
                Err(failure) => {
                    warn!(
                        tool = %ctx.tool,
                        attempt,
                        max_retries = plan.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "Retry failed"
                    );
                    outcome.error = Some(failure.message);
                }
            }
        }

        outcome.status = RecoveryStatus::Failed;
    }

    async fn fallback(
        &self,
        ctx: &ErrorContext,
        plan: &RecoveryPlan,
        executor: &dyn ToolExecutor,
        outcome: &mut RecoveryOutcome,
    ) -> MemoryResult<()> {
        let Some(FallbackTarget { tool, args }) = plan.fallback.as_ref() else {
            warn!(tool = %ctx.tool, "No fallback configured");
            outcome.status = RecoveryStatus::Failed;
            outcome.error = Some(format!("no fallback configured for {}", ctx.tool));
            return Ok(());
        };

        let args = args.as_ref().unwrap_or(&ctx.args);
        outcome.attempts += 1;

        match executor.execute(tool, args).await {
            Ok(result) => {
                self.record_fallback_success(ctx, tool, plan.escalated).await?;
                *self
                    .occurrences
                    .lock()
                    .entry((ctx.tool.clone(), ctx.category))
                    .or_insert(0) += 1;

                outcome.status = RecoveryStatus::Recovered;
                outcome.result = Some(result);
                outcome.error = None;
            }
            Err(failure) => {
                warn!(tool = %ctx.tool, fallback = %tool, error = %failure, "Fallback failed");
                outcome.status = RecoveryStatus::Failed;
                outcome.error = Some(failure.message);
            }
        }
        Ok(())
    }

    async fn record_error(&self, ctx: &ErrorContext) -> MemoryResult<String> {
        let record = ToolErrorRecord {
            tool: ctx.tool.clone(),
            args: ctx.args.clone(),
            message: ctx.message.clone(),
            stack: ctx.stack.clone(),
            category: ctx.category,
            occurred_at: ctx.timestamp,
        };
        self.persist(
            TOOL_ERROR_SCHEMA,
            &record,
            Importance::Medium,
            [ctx.tool.clone(), ctx.category.as_str().to_string()],
        )
        .await
    }

    async fn record_fallback_success(
        &self,
        ctx: &ErrorContext,
        fallback_tool: &str,
        escalated: bool,
    ) -> MemoryResult<String> {
        let record = FallbackSuccessRecord {
            tool: ctx.tool.clone(),
            fallback_tool: fallback_tool.to_string(),
            category: ctx.category,
            escalated,
            recovered_at: self.store.now(),
        };
        self.persist(
            FALLBACK_SUCCESS_SCHEMA,
            &record,
            Importance::Medium,
            [ctx.tool.clone(), fallback_tool.to_string()],
        )
        .await
    }

    async fn record_rollback(&self, ctx: &ErrorContext) -> MemoryResult<String> {
        let record = RollbackRecord {
            tool: ctx.tool.clone(),
            args: ctx.args.clone(),
            message: ctx.message.clone(),
            category: ctx.category,
            requested_at: self.store.now(),
        };
        self.persist(
            ROLLBACK_SCHEMA,
            &record,
            Importance::High,
            [ctx.tool.clone(), ctx.category.as_str().to_string()],
        )
        .await
    }

    async fn persist<T: Serialize>(
        &self,
        schema: &str,
        record: &T,
        importance: Importance,
        tags: [String; 2],
    ) -> MemoryResult<String> {
        self.store
            .store(
                MemoryKind::Episodic,
                schema,
                MemoryContent::record(schema, 1, record)?,
                StoreRequest::new(importance).with_tags(tags),
            )
            .await
    }

    fn records<T: serde::de::DeserializeOwned>(&self, schema: &str) -> Vec<T> {
        self.store
            .list(&QueryCriteria::new().with_category(schema))
            .into_iter()
            .filter_map(|entry| entry.content.as_record()?.decode::<T>(schema).ok())
            .collect()
    }
}
