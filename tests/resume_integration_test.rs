//! 检查点续跑集成测试：JobService + ResumeController + 脚本化模型，暂停时钟精确推进

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sensor_insights::api::{ApiRequest, Mode, ResponseBody};
    use sensor_insights::checkpoint::{
        Checkpoint, CheckpointStore, InMemoryStore, JobStore, SqliteStore, StoreError,
    };
    use sensor_insights::core::{
        run_attempt, AttemptOutcome, AttemptStart, BudgetParams, CheckpointReason, ErrorKind, Job,
        JobQuery, JobStatus, OrchestratorEvent, RecoveryEngine, TimeBudget, TurnSession,
    };
    use sensor_insights::llm::{ModelClient, ScriptStep, ScriptedModel};
    use sensor_insights::memory::{History, Turn};
    use sensor_insights::resume::{ClientError, LocalTransport, ResumeController, ResumeSettings};
    use sensor_insights::tools::{
        default_registry, InMemoryRecords, SensorDataSource, ToolCallRequest, ToolCallResult,
        ToolContext, ToolErrorKind, ToolExecutor, ToolRegistry, WeatherSource,
    };
    use sensor_insights::{AppConfig, JobService, ServiceSettings};
    use serde_json::json;

    const TURN: Duration = Duration::from_secs(7);

    /// 18s 预算、6s 检查点间隔（平台硬上限 26s，保存预留 2s，响应余量 1s）
    fn budget() -> BudgetParams {
        BudgetParams {
            total_budget_ms: 18_000,
            checkpoint_interval_ms: 6_000,
            call_deadline_ms: 23_000,
            checkpoint_reserve_ms: 2_000,
            platform_hard_limit_ms: 26_000,
        }
    }

    fn settings(max_attempts: u32, max_turns: usize) -> ServiceSettings {
        ServiceSettings {
            budget: budget(),
            max_turns,
            max_attempts,
            model_timeout: None,
        }
    }

    fn empty_sources() -> (Arc<dyn SensorDataSource>, Arc<dyn WeatherSource>) {
        (
            Arc::new(InMemoryRecords::new()),
            Arc::new(InMemoryRecords::new()),
        )
    }

    fn executor() -> ToolExecutor {
        let (sensor, weather) = empty_sources();
        ToolExecutor::new(default_registry(sensor, weather, 500), 30)
    }

    /// 每轮 7s 的工具调用，共 n 轮，最后给出回答
    fn slow_script(tool_turns: usize) -> Vec<ScriptStep> {
        let mut steps: Vec<ScriptStep> = (0..tool_turns)
            .map(|_| ScriptStep::tool("list_metrics", json!({})).after(TURN))
            .collect();
        steps.push(ScriptStep::answer("Battery SOC dropped because of overnight load.").after(TURN));
        steps
    }

    fn service_with(
        model: Arc<ScriptedModel>,
        store: Arc<InMemoryStore>,
        settings: ServiceSettings,
    ) -> JobService {
        JobService::new(model, executor(), store.clone(), store, settings)
    }

    fn request() -> ApiRequest {
        ApiRequest::initial("Why did battery SOC drop last night?", "sys-1", 7)
    }

    fn job_id(body: &ResponseBody) -> String {
        match body {
            ResponseBody::Completed { job_id, .. }
            | ResponseBody::TimedOut { job_id, .. }
            | ResponseBody::Running { job_id, .. } => job_id.clone(),
            ResponseBody::Failed { job_id, .. } => job_id.clone().unwrap_or_default(),
        }
    }

    /// 可在运行中切换为保存失败的检查点存储
    struct FailingSaveStore {
        inner: InMemoryStore,
        fail_saves: AtomicBool,
    }

    #[async_trait]
    impl CheckpointStore for FailingSaveStore {
        async fn save(&self, job_id: &str, checkpoint: &Checkpoint) -> Result<(), StoreError> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk full".into()));
            }
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
    async fn test_quick_question_completes_in_one_attempt() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptStep::tool("list_metrics", json!({})),
            ScriptStep::answer("Everything looks normal."),
        ]));
        let store = Arc::new(InMemoryStore::default());
        let service = Arc::new(service_with(model.clone(), store.clone(), settings(15, 20)));

        let resp = service.handle(request()).await;
        assert_eq!(resp.http_status, 200);
        let ResponseBody::Completed { job_id, insights } = resp.body else {
            panic!("expected completion, got {:?}", resp.body);
        };
        assert_eq!(insights.attempt_count, 1);
        assert_eq!(insights.tool_call_count, 1);
        // 用户问题 + 2 个模型轮次 + 1 个工具轮次，无缺口
        assert_eq!(insights.turn_count, 1 + 2 + 1);
        assert_eq!(store.checkpoint_count().await, 0);

        let job = service.job_status(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_checkpoints_and_resumes() {
        let model = Arc::new(ScriptedModel::new(slow_script(5)));
        let store = Arc::new(InMemoryStore::default());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let service = Arc::new(
            service_with(model.clone(), store.clone(), settings(15, 20)).with_event_tx(tx),
        );

        let first = service.handle(request()).await;
        assert_eq!(first.http_status, 408);
        let ResponseBody::TimedOut {
            ref job_id,
            can_resume,
            attempt_count,
        } = first.body
        else {
            panic!("expected resumable timeout, got {:?}", first.body);
        };
        assert!(can_resume);
        assert_eq!(attempt_count, 1);
        let job_id = job_id.clone();

        let mut intervals = Vec::new();
        let mut exit = None;
        while let Ok(ev) = rx.try_recv() {
            if let OrchestratorEvent::Checkpoint {
                elapsed_ms, reason, turn_index,
            } = ev
            {
                match reason {
                    CheckpointReason::Interval => intervals.push(elapsed_ms),
                    CheckpointReason::BudgetExceeded => exit = Some((elapsed_ms, turn_index)),
                }
            }
        }
        assert!((7_000..7_100).contains(&intervals[0]), "{intervals:?}");
        assert!((14_000..14_100).contains(&intervals[1]), "{intervals:?}");
        let (exit_ms, exit_turn) = exit.expect("budget exit checkpoint");
        assert!(exit_ms >= 18_000 && exit_ms < 24_000);
        assert!(exit_turn >= 2);

        let checkpoint = store.load(&job_id).await.unwrap().unwrap();
        assert_eq!(checkpoint.turn_index, checkpoint.conversation_history.len());
        // 第三次工具调用在预算出口前未执行
        assert!(matches!(
            checkpoint.conversation_history.last(),
            Some(Turn::Tool { content }) if content.error_kind() == Some(ToolErrorKind::Deferred)
        ));

        let second = service.handle(ApiRequest::resume(job_id.clone())).await;
        assert_eq!(second.http_status, 200);
        let ResponseBody::Completed { insights, .. } = second.body else {
            panic!("expected completion, got {:?}", second.body);
        };
        assert_eq!(insights.attempt_count, 2);
        assert_eq!(insights.tool_call_count, 5);
        assert_eq!(insights.turn_count, 1 + 6 + 5);
        assert_eq!(model.call_count(), 6);
        assert!(store.load(&job_id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_resume_strictly_extends_history() {
        let model = Arc::new(ScriptedModel::new(slow_script(8)));
        let store = Arc::new(InMemoryStore::default());
        let service = Arc::new(service_with(model.clone(), store.clone(), settings(15, 20)));

        let first = service.handle(request()).await;
        let job_id = job_id(&first.body);
        let h1 = store.load(&job_id).await.unwrap().unwrap().conversation_history;

        let second = service.handle(ApiRequest::resume(job_id.clone())).await;
        assert!(second.is_resumable());
        let h2 = store.load(&job_id).await.unwrap().unwrap().conversation_history;
        assert!(h2.extends(&h1));
        assert!(h2.len() > h1.len());
        assert_eq!(&h2.turns()[..h1.len()], h1.turns());

        let third = service.handle(ApiRequest::resume(job_id.clone())).await;
        assert_eq!(third.http_status, 200);
        // 已完成的 Job 续跑是幂等的，不再调用模型
        let calls = model.call_count();
        let again = service.handle(ApiRequest::resume(job_id.clone())).await;
        assert_eq!(again, third);
        assert_eq!(model.call_count(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_stops_at_max_attempts() {
        // 永远在请求工具，每次尝试都耗尽预算
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptStep::tool("list_metrics", json!({})).after(TURN),
        ]));
        let store = Arc::new(InMemoryStore::default());
        // 出厂配置：累计轮次上限须容纳 15 次尝试
        let cfg = AppConfig::default();
        let service = Arc::new(service_with(
            model.clone(),
            store.clone(),
            ServiceSettings::from_config(&cfg),
        ));

        let resume_settings = ResumeSettings::from_config(&cfg);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let controller =
            ResumeController::new(LocalTransport::new(service.clone()), resume_settings)
                .with_progress_tx(tx);

        let err = controller.run(request()).await.unwrap_err();
        let ClientError::MaxAttemptsExceeded { job_id, max_attempts } = &err else {
            panic!("expected attempt limit, got {err:?}");
        };
        assert_eq!(*max_attempts, 15);
        assert!(err.to_string().contains("Narrow the time range"));

        let job = service.job_status(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 15);
        assert_eq!(job.failure.unwrap().kind, ErrorKind::MaxAttemptsExceeded);
        // 每次尝试 3 个模型轮次，没有第 16 次尝试
        assert_eq!(model.call_count(), 15 * 3);
        assert_eq!(store.checkpoint_count().await, 0);

        let mut last = None;
        while let Ok(p) = rx.try_recv() {
            last = Some(p.to_string());
        }
        assert_eq!(last.as_deref(), Some("continuing, attempt 15 of 15"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_failure_is_never_resumable() {
        let model = Arc::new(ScriptedModel::new(slow_script(5)));
        let checkpoints = Arc::new(FailingSaveStore {
            inner: InMemoryStore::default(),
            fail_saves: AtomicBool::new(false),
        });
        let jobs = Arc::new(InMemoryStore::default());
        let service = Arc::new(JobService::new(
            model,
            executor(),
            checkpoints.clone(),
            jobs,
            settings(15, 20),
        ));

        let first = service.handle(request()).await;
        assert!(first.is_resumable());
        let job_id = job_id(&first.body);

        checkpoints.fail_saves.store(true, Ordering::SeqCst);
        let second = service.handle(ApiRequest::resume(job_id.clone())).await;
        assert_eq!(second.http_status, 500);
        let ResponseBody::Failed {
            error, can_resume, ..
        } = &second.body
        else {
            panic!("expected failure, got {:?}", second.body);
        };
        assert!(!can_resume);
        assert_eq!(error.kind, ErrorKind::CheckpointPersistenceError);
        assert!(!second.is_resumable());

        let job = service.job_status(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tool_is_fed_back_to_model() {
        let model = ScriptedModel::new(vec![
            ScriptStep::tool("get_solar_forecast", json!({})),
            ScriptStep::answer("I could not forecast, but SOC is fine."),
        ]);
        let store = InMemoryStore::default();
        let exec = executor();
        let recovery = RecoveryEngine::new();
        let session = TurnSession::new(&model, &exec, &store, &recovery, 20);
        let start = AttemptStart {
            job_id: "job-unknown".into(),
            attempt: 1,
            ctx: ToolContext::new("sys-1", 7, Utc::now()),
            history: History::starting_with("forecast tomorrow"),
            tool_call_log: Vec::new(),
        };

        let outcome = run_attempt(&session, start, TimeBudget::start(budget())).await;
        let AttemptOutcome::Completed { history, .. } = outcome else {
            panic!("expected completion");
        };
        let turns = history.turns();
        let Turn::Tool { content } = &turns[2] else {
            panic!("expected tool result at turn 2");
        };
        assert_eq!(content.error_kind(), Some(ToolErrorKind::ToolNotFound));
        assert!(content.summary(500).contains("list_metrics"));
        assert!(turns[3].is_model());
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_errors_map_to_status_codes() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptStep::answer("ok")]));
        let store = Arc::new(InMemoryStore::default());
        let service = Arc::new(service_with(model.clone(), store, settings(15, 20)));

        let invalid = service
            .handle(ApiRequest::initial("   ", "sys-1", 7))
            .await;
        assert_eq!(invalid.http_status, 400);

        let missing = service.handle(ApiRequest::resume("no-such-job")).await;
        assert_eq!(missing.http_status, 404);
        let ResponseBody::Failed { error, .. } = missing.body else {
            panic!("expected failure");
        };
        assert_eq!(error.kind, ErrorKind::JobNotFound);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_checkpoint_is_job_not_found() {
        let model = Arc::new(ScriptedModel::new(slow_script(5)));
        let store = Arc::new(InMemoryStore::default());
        let service = Arc::new(service_with(model, store.clone(), settings(15, 20)));

        let first = service.handle(request()).await;
        let job_id = job_id(&first.body);
        store.delete(&job_id).await.unwrap();

        let resp = service.handle(ApiRequest::resume(job_id.clone())).await;
        assert_eq!(resp.http_status, 404);
        assert!(!resp.is_resumable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_outage_fails_without_checkpoint() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptStep::tool("list_metrics", json!({})).after(TURN),
            ScriptStep::unavailable("upstream returned 502"),
        ]));
        let store = Arc::new(InMemoryStore::default());
        let service = Arc::new(service_with(model, store.clone(), settings(15, 20)));

        let resp = service.handle(request()).await;
        assert_eq!(resp.http_status, 503);
        let ResponseBody::Failed { error, can_resume, .. } = resp.body else {
            panic!("expected failure");
        };
        assert_eq!(error.kind, ErrorKind::ModelUnavailable);
        assert!(!can_resume);
        assert_eq!(store.checkpoint_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_mode_drives_attempts_server_side() {
        let model = Arc::new(ScriptedModel::new(slow_script(5)));
        let store = Arc::new(InMemoryStore::default());
        let service = Arc::new(service_with(model.clone(), store, settings(15, 20)));

        let resume_settings = ResumeSettings {
            max_attempts: 15,
            // 与 7s 轮次错开，避免轮询恰好与尝试边界同刻
            retry_delay: Duration::from_millis(1_300),
            client_timeout: Duration::from_millis(budget().total_budget_ms + 10_000),
        };
        let controller = ResumeController::new(LocalTransport::new(service.clone()), resume_settings);

        let finished = controller
            .run(ApiRequest::Initial {
                query: "Why did battery SOC drop last night?".into(),
                context_window_days: 7,
                system_id: "sys-1".into(),
                mode: Mode::Background,
            })
            .await
            .unwrap();
        assert_eq!(finished.insights.attempt_count, 2);
        assert!(finished.requests > 2);
        assert_eq!(model.call_count(), 6);
    }

    /// 停在 running 状态的 Job 记录，最后一次更新在 age 之前
    async fn running_job(store: &InMemoryStore, age: chrono::Duration) -> Job {
        let query = JobQuery {
            query: "Why did battery SOC drop last night?".into(),
            system_id: "sys-1".into(),
            context_window_days: 7,
        };
        let mut job = Job::new(query, budget());
        job.updated_at = Utc::now() - age;
        store.upsert_job(&job).await.unwrap();
        job
    }

    #[tokio::test(start_paused = true)]
    async fn test_killed_attempt_resumes_from_last_interval_checkpoint() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptStep::tool("list_metrics", json!({})),
            ScriptStep::answer("SOC recovered after sunrise."),
        ]));
        let store = Arc::new(InMemoryStore::default());
        let service = Arc::new(service_with(model.clone(), store.clone(), settings(15, 20)));

        // 平台在定时检查点之后强杀了第一次尝试
        let job = running_job(&store, chrono::Duration::seconds(60)).await;
        let req = ToolCallRequest::new("list_metrics", json!({}));
        let history = History::starting_with(job.query.query.clone())
            .append(Turn::tool_requests(None, vec![req.clone()]))
            .append(Turn::tool_result(ToolCallResult::ok(&req, json!({"metrics": []}), 3)));
        store
            .save(&job.id, &Checkpoint::capture(&job.id, &history, &[]))
            .await
            .unwrap();

        let resp = service.handle(ApiRequest::resume(job.id.clone())).await;
        assert_eq!(resp.http_status, 200);
        let ResponseBody::Completed { insights, .. } = resp.body else {
            panic!("expected completion, got {:?}", resp.body);
        };
        assert_eq!(insights.answer, "SOC recovered after sunrise.");
        assert_eq!(insights.attempt_count, 2);
        // 检查点中的 3 条轮次 + 最终回答
        assert_eq!(insights.turn_count, 3 + 1);
        // 只补发了检查点之后的那次模型调用
        assert_eq!(model.call_count(), 1);
        assert_eq!(service.job_status(&job.id).await.unwrap().attempt_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_killed_attempt_without_checkpoint_restarts_from_query() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptStep::answer("Nothing unusual.")]));
        let store = Arc::new(InMemoryStore::default());
        let service = Arc::new(service_with(model.clone(), store.clone(), settings(15, 20)));

        let job = running_job(&store, chrono::Duration::seconds(60)).await;

        let resp = service.handle(ApiRequest::resume(job.id.clone())).await;
        assert_eq!(resp.http_status, 200);
        let ResponseBody::Completed { insights, .. } = resp.body else {
            panic!("expected completion, got {:?}", resp.body);
        };
        assert_eq!(insights.attempt_count, 2);
        assert_eq!(insights.turn_count, 1 + 1);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_running_job_is_not_resumed_concurrently() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptStep::answer("too early")]));
        let store = Arc::new(InMemoryStore::default());
        let service = Arc::new(service_with(model.clone(), store.clone(), settings(15, 20)));

        let job = running_job(&store, chrono::Duration::seconds(2)).await;

        let resp = service.handle(ApiRequest::resume(job.id.clone())).await;
        assert_eq!(resp.http_status, 202);
        assert!(matches!(
            resp.body,
            ResponseBody::Running { attempt_count: 1, .. }
        ));
        assert_eq!(model.call_count(), 0);
        let stored = service.job_status(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.attempt_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_tools_downsample_and_report_empty_ranges() {
        let anchor: DateTime<Utc> = "2024-06-10T00:00:00Z".parse().unwrap();
        let mut sensor = InMemoryRecords::new();
        for i in 0..1_200i64 {
            let t = anchor - chrono::Duration::minutes(5 * (i + 1));
            let record = json!({"timestamp": t.to_rfc3339(), "battery": {"soc": 40.0 + (i % 50) as f64}});
            sensor.insert("sys-1", record.as_object().cloned().unwrap());
        }
        let registry: ToolRegistry =
            default_registry(Arc::new(sensor), Arc::new(InMemoryRecords::new()), 500);
        let exec = ToolExecutor::new(registry, 30);
        let ctx = ToolContext::new("sys-1", 7, anchor);

        let raw = exec
            .execute(
                &ctx,
                &ToolCallRequest::new("get_raw_sensor_data", json!({"metrics": ["battery_soc"]})),
                Duration::from_secs(10),
            )
            .await;
        let payload = serde_json::to_value(&raw).unwrap();
        assert_eq!(payload["payload"]["originalCount"], 1_200);
        assert_eq!(payload["payload"]["returnedCount"], 500);
        assert_eq!(payload["payload"]["downsampled"], true);

        let empty = exec
            .execute(
                &ctx,
                &ToolCallRequest::new(
                    "aggregate_sensor_data",
                    json!({"metric": "battery_soc", "start": "2023-01-01T00:00:00Z", "end": "2023-01-08T00:00:00Z"}),
                ),
                Duration::from_secs(10),
            )
            .await;
        assert!(empty.is_ok());
        let payload = serde_json::to_value(&empty).unwrap();
        assert_eq!(payload["payload"]["empty"], true);
        assert!(payload["payload"]["note"].as_str().unwrap().contains("missing data"));
    }

    /// SQLite 检查点在"进程重启"后仍可续跑（真实时钟，短预算）
    #[tokio::test]
    async fn test_sqlite_checkpoint_survives_new_service_instance() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("checkpoints.db");
        let params = BudgetParams {
            total_budget_ms: 300,
            checkpoint_interval_ms: 10_000,
            call_deadline_ms: 2_000,
            checkpoint_reserve_ms: 500,
            platform_hard_limit_ms: 3_000,
        };
        let settings = ServiceSettings {
            budget: params,
            max_turns: 20,
            max_attempts: 15,
            model_timeout: None,
        };
        let script = || {
            Arc::new(ScriptedModel::new(vec![
                ScriptStep::tool("list_metrics", json!({})).after(Duration::from_millis(400)),
                ScriptStep::answer("Recovered after restart."),
            ]))
        };

        let job_id = {
            let store = Arc::new(SqliteStore::open(&db, 3_600).unwrap());
            let checkpoints: Arc<dyn CheckpointStore> = store.clone();
            let jobs: Arc<dyn JobStore> = store;
            let model: Arc<dyn ModelClient> = script();
            let service = Arc::new(JobService::new(model, executor(), checkpoints, jobs, settings.clone()));
            let first = service.handle(request()).await;
            assert!(first.is_resumable(), "{first:?}");
            job_id(&first.body)
        };

        let store = Arc::new(SqliteStore::open(&db, 3_600).unwrap());
        let checkpoints: Arc<dyn CheckpointStore> = store.clone();
        let jobs: Arc<dyn JobStore> = store;
        let model: Arc<dyn ModelClient> = script();
        let service = Arc::new(JobService::new(model, executor(), checkpoints, jobs, settings));
        let resp = service.handle(ApiRequest::resume(job_id)).await;
        let ResponseBody::Completed { insights, .. } = resp.body else {
            panic!("expected completion, got {:?}", resp.body);
        };
        assert_eq!(insights.answer, "Recovered after restart.");
        assert_eq!(insights.attempt_count, 2);
    }
}
