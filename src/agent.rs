//! Job 服务：请求处理与 Job 生命周期
//!
//! 初始请求创建 Job（无检查点）并执行第一次尝试；续跑请求载入检查点、attemptCount 加一后继续。
//! 完成时删除检查点；预算耗尽时确认检查点已写入才返回可续跑超时；尝试次数用尽、模型不可用、
//! 检查点写入失败都以不可续跑的 failed 结束并删除检查点。
//! background 模式立即返回 202，由服务端在同一检查点协议下连续驱动各次尝试。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;

use crate::api::{ApiRequest, ApiResponse, Mode};
use crate::checkpoint::{CheckpointStore, InMemoryStore, JobStore, SqliteStore, ToolCallLogEntry};
use crate::config::{AppConfig, LlmSection, StoreSection};
use crate::core::{
    run_attempt, AgentError, AttemptOutcome, AttemptStart, BudgetParams, ErrorKind, Job,
    JobQuery, JobResult, JobStatus, OrchestratorEvent, RecoveryEngine, TimeBudget, TurnSession,
};
use crate::llm::{LlmClient, MockLlmClient, ModelClient, OpenAiClient, PromptedModel};
use crate::memory::History;
use crate::tools::{default_registry, SensorDataSource, ToolContext, ToolExecutor, WeatherSource};

const MAX_CONTEXT_WINDOW_DAYS: u32 = 365;

/// 服务端限额
#[derive(Clone, Debug)]
pub struct ServiceSettings {
    pub budget: BudgetParams,
    pub max_turns: usize,
    pub max_attempts: u32,
    pub model_timeout: Option<Duration>,
}

impl ServiceSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            budget: cfg.budget.params(),
            max_turns: cfg.budget.max_turns,
            max_attempts: cfg.resume.max_attempts,
            model_timeout: Some(Duration::from_secs(cfg.llm.timeouts.request)),
        }
    }
}

/// 按配置创建补全后端：mock 或 OpenAI 兼容端点
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    match cfg.provider.as_str() {
        "mock" => Arc::new(MockLlmClient),
        _ => Arc::new(OpenAiClient::new(
            cfg.base_url.as_deref(),
            &cfg.model,
            cfg.api_key.as_deref(),
        )),
    }
}

/// 按配置创建存储；同一个后端同时充当检查点存储与 Job 存储
pub fn create_store_from_config(
    cfg: &StoreSection,
) -> Result<(Arc<dyn CheckpointStore>, Arc<dyn JobStore>), AgentError> {
    match cfg.backend.as_str() {
        "memory" => {
            let store = Arc::new(InMemoryStore::new(cfg.ttl_secs));
            let checkpoints: Arc<dyn CheckpointStore> = store.clone();
            let jobs: Arc<dyn JobStore> = store;
            Ok((checkpoints, jobs))
        }
        "sqlite" => {
            let store = Arc::new(
                SqliteStore::open(&cfg.sqlite_path, cfg.ttl_secs)
                    .map_err(|e| AgentError::ConfigError(e.to_string()))?,
            );
            let checkpoints: Arc<dyn CheckpointStore> = store.clone();
            let jobs: Arc<dyn JobStore> = store;
            Ok((checkpoints, jobs))
        }
        other => Err(AgentError::ConfigError(format!(
            "unknown store backend '{other}' (expected memory or sqlite)"
        ))),
    }
}

pub fn validate_query(query: &JobQuery) -> Result<(), AgentError> {
    if query.query.trim().is_empty() {
        return Err(AgentError::InvalidRequest("query must not be empty".into()));
    }
    if query.system_id.trim().is_empty() {
        return Err(AgentError::InvalidRequest("systemId must not be empty".into()));
    }
    if !(1..=MAX_CONTEXT_WINDOW_DAYS).contains(&query.context_window_days) {
        return Err(AgentError::InvalidRequest(format!(
            "contextWindowDays must be between 1 and {MAX_CONTEXT_WINDOW_DAYS}, got {}",
            query.context_window_days
        )));
    }
    Ok(())
}

/// running 状态的 Job 在超过平台硬上限后仍未更新，说明那次尝试已被强杀
fn attempt_abandoned(job: &Job) -> bool {
    let hard_limit_ms = job.budget.platform_hard_limit_ms as i64;
    Utc::now() - job.updated_at > chrono::Duration::milliseconds(hard_limit_ms)
}

pub struct JobService {
    model: Arc<dyn ModelClient>,
    executor: ToolExecutor,
    checkpoints: Arc<dyn CheckpointStore>,
    jobs: Arc<dyn JobStore>,
    recovery: RecoveryEngine,
    settings: ServiceSettings,
    event_tx: Option<UnboundedSender<OrchestratorEvent>>,
}

impl JobService {
    pub fn new(
        model: Arc<dyn ModelClient>,
        executor: ToolExecutor,
        checkpoints: Arc<dyn CheckpointStore>,
        jobs: Arc<dyn JobStore>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            model,
            executor,
            checkpoints,
            jobs,
            recovery: RecoveryEngine::new(),
            settings,
            event_tx: None,
        }
    }

    /// 从配置装配：模型、内置工具、存储
    pub fn from_config(
        cfg: &AppConfig,
        sensor: Arc<dyn SensorDataSource>,
        weather: Arc<dyn WeatherSource>,
    ) -> Result<Self, AgentError> {
        cfg.budget.validate().map_err(AgentError::ConfigError)?;
        let model = Arc::new(PromptedModel::new(create_llm_from_config(&cfg.llm)));
        let registry = default_registry(sensor, weather, cfg.tools.raw_sample_cap);
        let executor = ToolExecutor::new(registry, cfg.tools.tool_timeout_secs);
        let (checkpoints, jobs) = create_store_from_config(&cfg.store)?;
        Ok(Self::new(
            model,
            executor,
            checkpoints,
            jobs,
            ServiceSettings::from_config(cfg),
        ))
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<OrchestratorEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub async fn handle(self: &Arc<Self>, request: ApiRequest) -> ApiResponse {
        match request {
            ApiRequest::Initial {
                query,
                context_window_days,
                system_id,
                mode,
            } => {
                let query = JobQuery {
                    query,
                    system_id,
                    context_window_days,
                };
                match mode {
                    Mode::Sync => self.start_job(query).await,
                    Mode::Background => self.start_background(query).await,
                }
            }
            ApiRequest::Resume { resume_job_id } => self.resume_job(&resume_job_id).await,
        }
    }

    /// 轮询 Job 记录
    pub async fn job_status(&self, job_id: &str) -> Result<Job, AgentError> {
        self.jobs
            .find_job(job_id)
            .await
            .map_err(AgentError::CheckpointPersistence)?
            .ok_or_else(|| AgentError::JobNotFound(job_id.to_string()))
    }

    async fn create_job(&self, query: JobQuery) -> Result<Job, ApiResponse> {
        if let Err(e) = validate_query(&query) {
            tracing::warn!(error = %e, "rejected request");
            return Err(ApiResponse::failed(None, e.kind(), e.to_string()));
        }
        self.purge_expired().await;
        let job = Job::new(query, self.settings.budget);
        if let Err(e) = self.jobs.upsert_job(&job).await {
            let err = AgentError::CheckpointPersistence(e);
            return Err(ApiResponse::failed(None, err.kind(), err.to_string()));
        }
        tracing::info!(job_id = %job.id, system_id = %job.query.system_id, "job created");
        Ok(job)
    }

    pub async fn start_job(&self, query: JobQuery) -> ApiResponse {
        match self.create_job(query).await {
            Ok(job) => {
                let history = History::starting_with(job.query.query.clone());
                self.run_and_record(job, history, Vec::new()).await
            }
            Err(resp) => resp,
        }
    }

    async fn start_background(self: &Arc<Self>, query: JobQuery) -> ApiResponse {
        let job = match self.create_job(query).await {
            Ok(job) => job,
            Err(resp) => return resp,
        };
        let response = ApiResponse::running(&job);
        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.drive(job).await;
        });
        response
    }

    /// 服务端连续驱动：每次尝试结束后若可续跑则立即续跑
    async fn drive(&self, job: Job) {
        let job_id = job.id.clone();
        let history = History::starting_with(job.query.query.clone());
        let mut response = self.run_and_record(job, history, Vec::new()).await;
        while response.is_resumable() {
            response = self.resume_job(&job_id).await;
        }
        tracing::info!(job_id = %job_id, status = response.http_status, "background job finished");
    }

    pub async fn resume_job(&self, job_id: &str) -> ApiResponse {
        let mut job = match self.jobs.find_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                let err = AgentError::JobNotFound(job_id.to_string());
                return ApiResponse::failed(Some(job_id), err.kind(), err.to_string());
            }
            Err(e) => {
                let err = AgentError::CheckpointPersistence(e);
                return ApiResponse::failed(Some(job_id), err.kind(), err.to_string());
            }
        };

        let abandoned = match job.status {
            // 已结束：幂等返回存储的结果
            JobStatus::Completed | JobStatus::Failed => return ApiResponse::from_job(&job),
            // 另一次尝试仍在进行（单写者）
            JobStatus::Running if !attempt_abandoned(&job) => return ApiResponse::running(&job),
            // 上次尝试被平台强杀：从最近的定时检查点恢复
            JobStatus::Running => true,
            JobStatus::TimedOut => false,
        };

        if job.attempt_count >= self.settings.max_attempts {
            let err = AgentError::MaxAttemptsExceeded {
                max_attempts: self.settings.max_attempts,
            };
            return self.fail_job(job, err).await;
        }

        let (history, tool_call_log) = match self.checkpoints.load(job_id).await {
            Ok(Some(cp)) => (cp.conversation_history, cp.tool_call_log),
            Ok(None) if abandoned => {
                tracing::warn!(job_id, "abandoned attempt left no checkpoint, restarting from the query");
                (History::starting_with(job.query.query.clone()), Vec::new())
            }
            Ok(None) => {
                let err = AgentError::JobNotFound(format!("{job_id} (checkpoint expired)"));
                return self.fail_job(job, err).await;
            }
            Err(e) => return self.fail_job(job, AgentError::CheckpointPersistence(e)).await,
        };

        job.begin_resume();
        if let Err(e) = self.jobs.upsert_job(&job).await {
            return self.fail_job(job, AgentError::CheckpointPersistence(e)).await;
        }
        tracing::info!(
            job_id = %job.id,
            attempt = job.attempt_count,
            max_attempts = self.settings.max_attempts,
            turn_index = history.len(),
            abandoned,
            "resuming job"
        );
        self.run_and_record(job, history, tool_call_log).await
    }

    async fn run_and_record(
        &self,
        mut job: Job,
        history: History,
        tool_call_log: Vec<ToolCallLogEntry>,
    ) -> ApiResponse {
        let ctx = ToolContext::new(
            job.query.system_id.clone(),
            job.query.context_window_days,
            job.created_at,
        );
        let mut session = TurnSession::new(
            self.model.as_ref(),
            &self.executor,
            self.checkpoints.as_ref(),
            &self.recovery,
            self.settings.max_turns,
        );
        if let Some(limit) = self.settings.model_timeout {
            session = session.with_model_timeout(limit);
        }
        if let Some(tx) = &self.event_tx {
            session = session.with_event_tx(tx);
        }

        let start = AttemptStart {
            job_id: job.id.clone(),
            attempt: job.attempt_count,
            ctx,
            history,
            tool_call_log,
        };
        let outcome = run_attempt(&session, start, TimeBudget::start(job.budget)).await;

        match outcome {
            AttemptOutcome::Completed { answer, history } => {
                let result = JobResult {
                    answer,
                    turn_count: history.len(),
                    tool_call_count: history.tool_turn_count(),
                };
                job.mark_completed(result.clone());
                self.discard_checkpoint(&job.id).await;
                self.store_final(&job).await;
                ApiResponse::completed(&job, &result)
            }
            AttemptOutcome::TimedOut { checkpoint } => {
                if job.attempt_count >= self.settings.max_attempts {
                    let err = AgentError::MaxAttemptsExceeded {
                        max_attempts: self.settings.max_attempts,
                    };
                    return self.fail_job(job, err).await;
                }
                job.mark_timed_out();
                if let Err(e) = self.jobs.upsert_job(&job).await {
                    // 续跑请求会找不到 Job，不能返回可续跑指针
                    return self.fail_job(job, AgentError::CheckpointPersistence(e)).await;
                }
                tracing::info!(
                    job_id = %job.id,
                    attempt = job.attempt_count,
                    turn_index = checkpoint.turn_index,
                    "attempt timed out, resumable"
                );
                ApiResponse::timed_out(&job)
            }
            AttemptOutcome::Failed { error, .. } => self.fail_job(job, error).await,
        }
    }

    async fn fail_job(&self, mut job: Job, error: AgentError) -> ApiResponse {
        let kind: ErrorKind = error.kind();
        tracing::warn!(job_id = %job.id, %kind, error = %error, "job failed");
        job.mark_failed(kind, error.to_string());
        self.discard_checkpoint(&job.id).await;
        self.store_final(&job).await;
        ApiResponse::failed(Some(&job.id), kind, error.to_string())
    }

    async fn discard_checkpoint(&self, job_id: &str) {
        if let Err(e) = self.checkpoints.delete(job_id).await {
            tracing::warn!(job_id, error = %e, "failed to delete checkpoint, TTL will expire it");
        }
    }

    /// 结束状态写入失败不影响本次响应，只影响之后的幂等查询
    async fn store_final(&self, job: &Job) {
        if let Err(e) = self.jobs.upsert_job(job).await {
            tracing::warn!(job_id = %job.id, error = %e, "failed to store final job state");
        }
    }

    async fn purge_expired(&self) {
        match self.checkpoints.purge_expired().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(purged = n, "expired checkpoints purged"),
            Err(e) => tracing::warn!(error = %e, "checkpoint purge failed"),
        }
        match self.jobs.purge_expired_jobs().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(purged = n, "expired jobs purged"),
            Err(e) => tracing::warn!(error = %e, "job purge failed"),
        }
    }
}
