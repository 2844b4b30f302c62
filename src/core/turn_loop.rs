//! 编排主循环（单次尝试）
//!
//! 每轮：检查轮数上限 → 检查时间预算（耗尽则保存检查点并以可续跑超时结束，不再发起模型调用）→
//! 带上完整历史与工具 schema 调用模型 → 最终回答则结束；工具调用则逐个交给 ToolExecutor，结果作为 Tool 轮次追加。
//! 同一时刻每个 Job 只有一个在途调用。
//!
//! 定时检查点：每追加一条轮次后检查是否到期，到期即保存，不依赖预算出口分支被执行到。
//! 在途调用不会因检查点到期被打断；它在结束后立即保存。每个在途调用都受 call deadline 硬上限约束：
//! 模型调用被截断时以调用前的状态作为可续跑超时结束，工具调用被截断时记为 Timeout 结果。
//!
//! 模型限流时在剩余预算允许的范围内按建议间隔等待后重试，最多 MAX_RATE_LIMIT_RETRIES 次。

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{timeout, Instant};

use crate::checkpoint::{Checkpoint, CheckpointStore, StoreError, ToolCallLogEntry};
use crate::core::budget::TimeBudget;
use crate::core::error::AgentError;
use crate::core::recovery::RecoveryEngine;
use crate::core::state::{AttemptOutcome, LoopState};
use crate::llm::{LlmError, ModelClient, ModelResponse, TokenCount};
use crate::memory::{History, Turn};
use crate::tools::call::preview;
use crate::tools::{ToolCallRequest, ToolCallResult, ToolContext, ToolErrorKind, ToolExecutor};

/// toolCallLog 中结果摘要的最大字符数
const RESULT_SUMMARY_CHARS: usize = 300;
const EVENT_PREVIEW_CHARS: usize = 200;
/// 单次尝试内对限流的最多重试次数
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    /// 定时检查点
    Interval,
    /// 预算出口
    BudgetExceeded,
}

/// 编排过程事件（可序列化为 JSON 供进度展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    AttemptStarted {
        job_id: String,
        attempt: u32,
        resumed_turns: usize,
    },
    ModelCall {
        model_turn: usize,
        elapsed_ms: u64,
    },
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    ToolResult {
        tool: String,
        ok: bool,
        duration_ms: u64,
        preview: String,
    },
    Checkpoint {
        turn_index: usize,
        elapsed_ms: u64,
        reason: CheckpointReason,
    },
    Finished {
        state: LoopState,
        elapsed_ms: u64,
        /// 本次尝试消耗的 token
        tokens: TokenCount,
    },
}

/// 一次尝试的依赖与上限
pub struct TurnSession<'a> {
    pub model: &'a dyn ModelClient,
    pub executor: &'a ToolExecutor,
    pub store: &'a dyn CheckpointStore,
    pub recovery: &'a RecoveryEngine,
    /// 累计模型轮次上限（跨尝试计）
    pub max_turns: usize,
    /// 可选：单次模型请求的超时（早于 call deadline 触发时视为模型不可用）
    pub model_timeout: Option<Duration>,
    pub event_tx: Option<&'a UnboundedSender<OrchestratorEvent>>,
}

impl<'a> TurnSession<'a> {
    pub fn new(
        model: &'a dyn ModelClient,
        executor: &'a ToolExecutor,
        store: &'a dyn CheckpointStore,
        recovery: &'a RecoveryEngine,
        max_turns: usize,
    ) -> Self {
        Self {
            model,
            executor,
            store,
            recovery,
            max_turns,
            model_timeout: None,
            event_tx: None,
        }
    }

    pub fn with_model_timeout(mut self, limit: Duration) -> Self {
        self.model_timeout = Some(limit);
        self
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<OrchestratorEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }
}

/// 一次尝试的起点：新 Job 为仅含用户问题的历史，续跑为检查点中的历史与日志
pub struct AttemptStart {
    pub job_id: String,
    pub attempt: u32,
    pub ctx: ToolContext,
    pub history: History,
    pub tool_call_log: Vec<ToolCallLogEntry>,
}

/// 状态转移，历史按值传递
enum Step {
    AwaitModel(History),
    ExecuteTools(History, Vec<ToolCallRequest>),
    Done(AttemptOutcome),
}

struct Attempt<'s, 'a> {
    session: &'s TurnSession<'a>,
    job_id: String,
    ctx: ToolContext,
    budget: TimeBudget,
    loaded: History,
    tool_call_log: Vec<ToolCallLogEntry>,
    last_checkpoint: Instant,
    rate_limit_retries: u32,
}

/// 执行一次尝试直到终止状态
pub async fn run_attempt(
    session: &TurnSession<'_>,
    start: AttemptStart,
    budget: TimeBudget,
) -> AttemptOutcome {
    session.emit(OrchestratorEvent::AttemptStarted {
        job_id: start.job_id.clone(),
        attempt: start.attempt,
        resumed_turns: start.history.len(),
    });
    tracing::info!(
        job_id = %start.job_id,
        attempt = start.attempt,
        turns = start.history.len(),
        budget_ms = budget.params().total_budget_ms,
        "{}",
        LoopState::Init
    );
    let usage_at_start = session.model.token_usage();

    let mut attempt = Attempt {
        session,
        job_id: start.job_id,
        ctx: start.ctx,
        budget,
        loaded: start.history.clone(),
        tool_call_log: start.tool_call_log,
        last_checkpoint: budget.start_time(),
        rate_limit_retries: 0,
    };

    let mut step = Step::AwaitModel(start.history);
    let outcome = loop {
        step = match step {
            Step::AwaitModel(history) => attempt.await_model(history).await,
            Step::ExecuteTools(history, calls) => attempt.execute_tools(history, calls).await,
            Step::Done(outcome) => break outcome,
        };
    };

    debug_assert!(
        outcome.history().extends(&attempt.loaded),
        "history must only be appended to"
    );
    let state = outcome.state();
    let elapsed_ms = attempt.budget.elapsed_ms();
    let tokens = session.model.token_usage().since(usage_at_start);
    session.emit(OrchestratorEvent::Finished {
        state,
        elapsed_ms,
        tokens,
    });
    tracing::info!(
        job_id = %attempt.job_id,
        elapsed_ms,
        prompt_tokens = tokens.prompt,
        completion_tokens = tokens.completion,
        total_tokens = tokens.total,
        "{}",
        state
    );
    outcome
}

impl Attempt<'_, '_> {
    async fn await_model(&mut self, history: History) -> Step {
        let session = self.session;
        let model_turns = history.model_turn_count();
        if model_turns >= session.max_turns {
            tracing::warn!(job_id = %self.job_id, model_turns, "turn ceiling reached");
            return Step::Done(AttemptOutcome::Failed {
                error: AgentError::MaxTurnsExceeded {
                    max_turns: session.max_turns,
                },
                history,
            });
        }

        if self.budget.is_exceeded() {
            return self.budget_exit(history).await;
        }

        session.emit(OrchestratorEvent::ModelCall {
            model_turn: model_turns + 1,
            elapsed_ms: self.budget.elapsed_ms(),
        });
        tracing::debug!(job_id = %self.job_id, model_turn = model_turns + 1, "{}", LoopState::AwaitingModel);

        let deadline_left = self.budget.call_time_left();
        let (limit, deadline_bound) = match session.model_timeout {
            Some(t) if t < deadline_left => (t, false),
            _ => (deadline_left, true),
        };
        let schemas = session.executor.schemas();
        let result = timeout(limit, session.model.generate(&history, &schemas)).await;
        let response = match result {
            Ok(r) => r,
            Err(_) if deadline_bound => {
                // 调用前的历史即为检查点内容；被截断的调用在续跑时重新发起
                tracing::warn!(job_id = %self.job_id, "model call hit the attempt deadline");
                return self.budget_exit(history).await;
            }
            Err(_) => Err(LlmError::Timeout(limit.as_millis() as u64)),
        };

        match response {
            Err(LlmError::RateLimited { retry_after_ms }) if self.can_wait_out(retry_after_ms) => {
                self.rate_limit_retries += 1;
                tracing::warn!(
                    job_id = %self.job_id,
                    retry_after_ms,
                    retry = self.rate_limit_retries,
                    "model rate limited, retrying"
                );
                tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
                Step::AwaitModel(history)
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "{}", LoopState::ModelUnavailable);
                Step::Done(AttemptOutcome::Failed {
                    error: AgentError::ModelUnavailable(e),
                    history,
                })
            }
            Ok(ModelResponse::FinalAnswer(answer)) => Step::Done(AttemptOutcome::Completed {
                history: history.append(Turn::final_answer(answer.clone())),
                answer,
            }),
            Ok(ModelResponse::ToolCalls { text, calls }) if calls.is_empty() => {
                let answer = text.unwrap_or_default();
                Step::Done(AttemptOutcome::Completed {
                    history: history.append(Turn::final_answer(answer.clone())),
                    answer,
                })
            }
            Ok(ModelResponse::ToolCalls { text, calls }) => {
                let history = history.append(Turn::tool_requests(text, calls.clone()));
                match self.maybe_checkpoint(&history).await {
                    Ok(()) => Step::ExecuteTools(history, calls),
                    Err(e) => self.persistence_failure(e, history),
                }
            }
            Ok(ModelResponse::Malformed { raw, error }) => {
                tracing::warn!(job_id = %self.job_id, %error, "unparseable model output");
                let history = history
                    .append(Turn::tool_requests(Some(raw), Vec::new()))
                    .append(Turn::user(session.recovery.corrective_prompt(&error)));
                match self.maybe_checkpoint(&history).await {
                    Ok(()) => Step::AwaitModel(history),
                    Err(e) => self.persistence_failure(e, history),
                }
            }
        }
    }

    /// 限流等待须落在剩余预算内，否则直接判为模型不可用
    fn can_wait_out(&self, retry_after_ms: u64) -> bool {
        self.rate_limit_retries < MAX_RATE_LIMIT_RETRIES
            && self.budget.remaining_ms() > retry_after_ms as i64
    }

    async fn execute_tools(&mut self, history: History, calls: Vec<ToolCallRequest>) -> Step {
        let session = self.session;
        let mut history = history;
        for (i, call) in calls.iter().enumerate() {
            if self.budget.is_exceeded() {
                for pending in &calls[i..] {
                    let deferred = ToolCallResult::error(
                        pending,
                        ToolErrorKind::Deferred,
                        "not executed: this attempt ran out of time; request it again if still needed",
                        0,
                    );
                    history = history.append(Turn::tool_result(deferred));
                }
                return self.budget_exit(history).await;
            }

            tracing::debug!(job_id = %self.job_id, tool = %call.tool_name, "{}", LoopState::ExecutingTool);
            session.emit(OrchestratorEvent::ToolCall {
                tool: call.tool_name.clone(),
                args: call.parameters.clone(),
            });
            let result = session
                .executor
                .execute(&self.ctx, call, self.budget.call_time_left())
                .await;

            let summary = result.summary(RESULT_SUMMARY_CHARS);
            session.emit(OrchestratorEvent::ToolResult {
                tool: result.tool_name.clone(),
                ok: result.is_ok(),
                duration_ms: result.duration_ms,
                preview: preview(&summary, EVENT_PREVIEW_CHARS),
            });
            self.tool_call_log.push(ToolCallLogEntry {
                tool_name: result.tool_name.clone(),
                parameters: result.parameters.clone(),
                result_summary: summary,
                duration_ms: result.duration_ms,
            });
            history = history.append(Turn::tool_result(result));

            if let Err(e) = self.maybe_checkpoint(&history).await {
                return self.persistence_failure(e, history);
            }
        }
        Step::AwaitModel(history)
    }

    async fn save(&self, history: &History, reason: CheckpointReason) -> Result<Checkpoint, StoreError> {
        let checkpoint = Checkpoint::capture(&self.job_id, history, &self.tool_call_log);
        let save_timeout = self.budget.save_timeout();
        match timeout(save_timeout, self.session.store.save(&self.job_id, &checkpoint)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(StoreError::TimedOut(save_timeout.as_millis() as u64)),
        }
        let elapsed_ms = self.budget.elapsed_ms();
        tracing::info!(
            job_id = %self.job_id,
            turn_index = checkpoint.turn_index,
            elapsed_ms,
            ?reason,
            "checkpoint saved"
        );
        self.session.emit(OrchestratorEvent::Checkpoint {
            turn_index: checkpoint.turn_index,
            elapsed_ms,
            reason,
        });
        Ok(checkpoint)
    }

    async fn maybe_checkpoint(&mut self, history: &History) -> Result<(), StoreError> {
        // 预算已耗尽时只由预算出口保存一次
        if self.budget.is_exceeded() || !self.budget.checkpoint_due(self.last_checkpoint) {
            return Ok(());
        }
        self.save(history, CheckpointReason::Interval).await?;
        self.last_checkpoint = Instant::now();
        Ok(())
    }

    async fn budget_exit(&mut self, history: History) -> Step {
        tracing::info!(
            job_id = %self.job_id,
            elapsed_ms = self.budget.elapsed_ms(),
            remaining_ms = self.budget.remaining_ms(),
            "{}",
            LoopState::BudgetExceeded
        );
        match self.save(&history, CheckpointReason::BudgetExceeded).await {
            Ok(checkpoint) => Step::Done(AttemptOutcome::TimedOut { checkpoint }),
            Err(e) => self.persistence_failure(e, history),
        }
    }

    fn persistence_failure(&self, error: StoreError, history: History) -> Step {
        tracing::error!(job_id = %self.job_id, error = %error, "checkpoint save failed");
        Step::Done(AttemptOutcome::Failed {
            error: AgentError::CheckpointPersistence(error),
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryStore;
    use crate::core::budget::BudgetParams;
    use crate::llm::{ScriptStep, ScriptedModel};
    use crate::tools::{ListMetricsTool, ToolRegistry};
    use serde_json::json;

    fn params() -> BudgetParams {
        BudgetParams {
            total_budget_ms: 18_000,
            checkpoint_interval_ms: 6_000,
            call_deadline_ms: 23_000,
            checkpoint_reserve_ms: 2_000,
            platform_hard_limit_ms: 26_000,
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(ListMetricsTool);
        ToolExecutor::new(registry, 30)
    }

    fn start(history: History) -> AttemptStart {
        AttemptStart {
            job_id: "job-1".into(),
            attempt: 1,
            ctx: ToolContext::new("sys-1", 7, "2024-06-10T00:00:00Z".parse().unwrap()),
            history,
            tool_call_log: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completes_with_gapless_history() {
        let model = ScriptedModel::new(vec![
            ScriptStep::tool("list_metrics", json!({})),
            ScriptStep::answer("SOC looked healthy."),
        ]);
        let store = InMemoryStore::default();
        let exec = executor();
        let recovery = RecoveryEngine::new();
        let session = TurnSession::new(&model, &exec, &store, &recovery, 20);

        let outcome = run_attempt(&session, start(History::starting_with("q")), TimeBudget::start(params())).await;
        let AttemptOutcome::Completed { answer, history } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(answer, "SOC looked healthy.");
        assert_eq!(history.len(), 1 + history.model_turn_count() + history.tool_turn_count());
        assert_eq!(history.model_turn_count(), 2);
        assert_eq!(history.tool_turn_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_output_gets_corrective_turn() {
        let model = ScriptedModel::new(vec![
            ScriptStep::malformed("{\"tool\": "),
            ScriptStep::answer("done"),
        ]);
        let store = InMemoryStore::default();
        let exec = executor();
        let recovery = RecoveryEngine::new();
        let session = TurnSession::new(&model, &exec, &store, &recovery, 20);

        let outcome = run_attempt(&session, start(History::starting_with("q")), TimeBudget::start(params())).await;
        let history = outcome.history();
        assert_eq!(outcome.state(), LoopState::FinalAnswer);
        assert!(matches!(&history.turns()[2], Turn::User { content } if content.contains("could not be parsed")));
    }

    #[tokio::test(start_paused = true)]
    async fn cycling_tool_calls_hit_max_turns() {
        let model = ScriptedModel::new(vec![ScriptStep::tool("list_metrics", json!({}))]);
        let store = InMemoryStore::default();
        let exec = executor();
        let recovery = RecoveryEngine::new();
        let session = TurnSession::new(&model, &exec, &store, &recovery, 3);

        let outcome = run_attempt(&session, start(History::starting_with("q")), TimeBudget::start(params())).await;
        assert_eq!(outcome.state(), LoopState::MaxTurnsExceeded);
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn model_call_cut_at_deadline_resumes_from_pre_call_state() {
        let model = ScriptedModel::new(vec![ScriptStep::answer("late").after(Duration::from_secs(60))]);
        let store = InMemoryStore::default();
        let exec = executor();
        let recovery = RecoveryEngine::new();
        let session = TurnSession::new(&model, &exec, &store, &recovery, 20);

        let outcome = run_attempt(&session, start(History::starting_with("q")), TimeBudget::start(params())).await;
        let AttemptOutcome::TimedOut { checkpoint } = outcome else {
            panic!("expected resumable timeout");
        };
        assert_eq!(checkpoint.turn_index, 1);
        assert!(store.load("job-1").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn model_error_is_model_unavailable() {
        let model = ScriptedModel::new(vec![ScriptStep::unavailable("502 bad gateway")]);
        let store = InMemoryStore::default();
        let exec = executor();
        let recovery = RecoveryEngine::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session = TurnSession::new(&model, &exec, &store, &recovery, 20).with_event_tx(&tx);

        let outcome = run_attempt(&session, start(History::starting_with("q")), TimeBudget::start(params())).await;
        assert_eq!(outcome.state(), LoopState::ModelUnavailable);

        let mut last = None;
        while let Ok(ev) = rx.try_recv() {
            last = Some(ev);
        }
        assert!(matches!(
            last,
            Some(OrchestratorEvent::Finished { state: LoopState::ModelUnavailable, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_calls_are_deferred_when_budget_runs_out() {
        // 第一轮一次请求两个工具，模型耗时已超出预算
        let model = ScriptedModel::new(vec![ScriptStep::tools(vec![
            ToolCallRequest::new("list_metrics", json!({})),
            ToolCallRequest::new("list_metrics", json!({})),
        ])
        .after(Duration::from_secs(19))]);
        let store = InMemoryStore::default();
        let exec = executor();
        let recovery = RecoveryEngine::new();
        let session = TurnSession::new(&model, &exec, &store, &recovery, 20);

        let outcome = run_attempt(&session, start(History::starting_with("q")), TimeBudget::start(params())).await;
        let AttemptOutcome::TimedOut { checkpoint } = outcome else {
            panic!("expected resumable timeout");
        };
        let kinds: Vec<_> = checkpoint
            .conversation_history
            .turns()
            .iter()
            .filter_map(|t| match t {
                Turn::Tool { content } => content.error_kind(),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![ToolErrorKind::Deferred, ToolErrorKind::Deferred]);
        assert_eq!(checkpoint.turn_index, 4);
    }

    /// 前 throttled 次调用被限流，之后给出回答；每次调用计 100 + 20 个 token
    struct ThrottledModel {
        throttled: usize,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ThrottledModel {
        fn new(throttled: usize) -> Self {
            Self {
                throttled,
                calls: Default::default(),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ModelClient for ThrottledModel {
        async fn generate(
            &self,
            _history: &History,
            _tools: &[crate::tools::ToolSchema],
        ) -> Result<ModelResponse, LlmError> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n < self.throttled {
                Err(LlmError::RateLimited { retry_after_ms: 500 })
            } else {
                Ok(ModelResponse::FinalAnswer("done".into()))
            }
        }

        fn token_usage(&self) -> TokenCount {
            let n = self.call_count() as u64;
            TokenCount {
                prompt: 100 * n,
                completion: 20 * n,
                total: 120 * n,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_call_is_retried_after_backoff() {
        let model = ThrottledModel::new(1);
        let store = InMemoryStore::default();
        let exec = executor();
        let recovery = RecoveryEngine::new();
        let session = TurnSession::new(&model, &exec, &store, &recovery, 20);

        let started = Instant::now();
        let outcome = run_attempt(&session, start(History::starting_with("q")), TimeBudget::start(params())).await;
        assert_eq!(outcome.state(), LoopState::FinalAnswer);
        assert_eq!(model.call_count(), 2);
        assert!(started.elapsed() >= Duration::from_millis(500));
        // 限流重试不产生模型轮次
        assert_eq!(outcome.history().model_turn_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_rate_limit_becomes_model_unavailable() {
        let model = ThrottledModel::new(usize::MAX);
        let store = InMemoryStore::default();
        let exec = executor();
        let recovery = RecoveryEngine::new();
        let session = TurnSession::new(&model, &exec, &store, &recovery, 20);

        let outcome = run_attempt(&session, start(History::starting_with("q")), TimeBudget::start(params())).await;
        let AttemptOutcome::Failed { error, .. } = outcome else {
            panic!("expected failure");
        };
        assert!(matches!(
            error,
            AgentError::ModelUnavailable(LlmError::RateLimited { .. })
        ));
        assert_eq!(model.call_count(), 1 + MAX_RATE_LIMIT_RETRIES as usize);
        assert_eq!(store.checkpoint_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_event_reports_tokens_spent_in_this_attempt() {
        let model = ThrottledModel::new(0);
        // 之前的尝试已用掉两次调用的 token
        let history = History::starting_with("q");
        model.generate(&history, &[]).await.unwrap();
        model.generate(&history, &[]).await.unwrap();
        let store = InMemoryStore::default();
        let exec = executor();
        let recovery = RecoveryEngine::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session = TurnSession::new(&model, &exec, &store, &recovery, 20).with_event_tx(&tx);

        run_attempt(&session, start(history), TimeBudget::start(params())).await;
        let mut tokens = None;
        while let Ok(ev) = rx.try_recv() {
            if let OrchestratorEvent::Finished { tokens: t, .. } = ev {
                tokens = Some(t);
            }
        }
        assert_eq!(
            tokens,
            Some(TokenCount {
                prompt: 100,
                completion: 20,
                total: 120
            })
        );
    }

    /// 60s 才返回的工具
    struct SlowTool;

    #[async_trait::async_trait]
    impl crate::tools::Tool for SlowTool {
        fn name(&self) -> &str {
            "slow_tool"
        }

        fn description(&self) -> &str {
            "sleeps for a minute"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }

        fn validate(&self, _args: &serde_json::Value) -> Result<(), String> {
            Ok(())
        }

        async fn execute(
            &self,
            _ctx: &ToolContext,
            _args: serde_json::Value,
        ) -> Result<serde_json::Value, crate::tools::ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!("late"))
        }
    }

    /// 每次保存耗时 1.5s
    #[derive(Default)]
    struct SlowStore {
        inner: InMemoryStore,
    }

    #[async_trait::async_trait]
    impl CheckpointStore for SlowStore {
        async fn save(&self, job_id: &str, checkpoint: &Checkpoint) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            self.inner.save(job_id, checkpoint).await
        }

        async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, StoreError> {
            self.inner.load(job_id).await
        }

        async fn delete(&self, job_id: &str) -> Result<(), StoreError> {
            self.inner.delete(job_id).await
        }

        async fn purge_expired(&self) -> Result<usize, StoreError> {
            self.inner.purge_expired().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_and_slow_store_finish_before_hard_limit() {
        let model = ScriptedModel::new(vec![ScriptStep::tool("slow_tool", json!({}))]);
        let store = SlowStore::default();
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let exec = ToolExecutor::new(registry, 30);
        let recovery = RecoveryEngine::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session = TurnSession::new(&model, &exec, &store, &recovery, 20).with_event_tx(&tx);
        let params = crate::config::BudgetSection::default().params();

        let started = Instant::now();
        let outcome = run_attempt(&session, start(History::starting_with("q")), TimeBudget::start(params)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        assert_eq!(outcome.state(), LoopState::BudgetExceeded);
        assert!(elapsed_ms < params.platform_hard_limit_ms, "attempt ran {elapsed_ms}ms");
        let mut reasons = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let OrchestratorEvent::Checkpoint { reason, .. } = ev {
                reasons.push(reason);
            }
        }
        assert_eq!(reasons, vec![CheckpointReason::BudgetExceeded]);
        let checkpoint = store.load("job-1").await.unwrap().unwrap();
        assert!(matches!(
            checkpoint.conversation_history.last(),
            Some(Turn::Tool { content }) if content.error_kind() == Some(ToolErrorKind::Timeout)
        ));
    }
}
