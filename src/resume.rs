//! 续跑客户端控制器
//!
//! 收到可续跑超时（timed_out, canResume）后，等待 retry_delay 再以同一 jobId 发起续跑请求；
//! 总尝试次数不超过 max_attempts，每次尝试给出 "continuing, attempt N of M" 进度。
//! 单次请求的客户端超时 = 服务端单次预算 + 余量，保证服务端总能先把带检查点的响应送回来。
//! background 模式下收到 202 running 时按 retry_delay 轮询。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{sleep, timeout, Instant};

use crate::agent::JobService;
use crate::api::{ApiRequest, ApiResponse, Insights, ResponseBody};
use crate::config::AppConfig;
use crate::core::{ErrorKind, FailureStory};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request got no response within {timeout_ms}ms")]
    RequestTimedOut { timeout_ms: u64 },

    #[error("Analysis {job_id} did not finish after {max_attempts} attempts. Narrow the time range or ask a more specific question.")]
    MaxAttemptsExceeded { job_id: String, max_attempts: u32 },

    #[error("{kind}: {message}. {advice}")]
    Failed {
        job_id: Option<String>,
        kind: ErrorKind,
        message: String,
        advice: String,
    },
}

impl ClientError {
    /// 用户可见的失败分类
    pub fn story(&self) -> FailureStory {
        match self {
            ClientError::Transport(_) | ClientError::RequestTimedOut { .. } => {
                FailureStory::ServiceUnavailable
            }
            ClientError::MaxAttemptsExceeded { .. } => FailureStory::OutOfTime,
            ClientError::Failed { kind, .. } => FailureStory::of(*kind),
        }
    }
}

/// 请求通道：进程内直接调用 JobService，或由宿主替换为 HTTP 等远程传输
#[async_trait]
pub trait JobTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError>;
}

/// 进程内传输
pub struct LocalTransport {
    service: Arc<JobService>,
}

impl LocalTransport {
    pub fn new(service: Arc<JobService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobTransport for LocalTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        Ok(self.service.handle(request).await)
    }
}

#[derive(Clone, Debug)]
pub struct ResumeSettings {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// 单次请求的客户端超时
    pub client_timeout: Duration,
}

impl ResumeSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_attempts: cfg.resume.max_attempts,
            retry_delay: Duration::from_millis(cfg.resume.retry_delay_ms),
            client_timeout: Duration::from_millis(
                cfg.budget.total_budget_ms() + cfg.resume.client_timeout_margin_ms,
            ),
        }
    }
}

/// 每次发起请求前的进度提示
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResumeProgress {
    Started,
    Continuing {
        job_id: String,
        attempt: u32,
        max_attempts: u32,
    },
    Waiting {
        job_id: String,
    },
}

impl fmt::Display for ResumeProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumeProgress::Started => write!(f, "analysing"),
            ResumeProgress::Continuing {
                attempt,
                max_attempts,
                ..
            } => write!(f, "continuing, attempt {attempt} of {max_attempts}"),
            ResumeProgress::Waiting { job_id } => write!(f, "job {job_id} still running"),
        }
    }
}

/// 客户端拿到的最终结果
#[derive(Clone, Debug, PartialEq)]
pub struct Finished {
    pub job_id: String,
    pub insights: Insights,
    /// 本控制器发出的请求数（含轮询）
    pub requests: u32,
}

pub struct ResumeController<T: JobTransport> {
    transport: T,
    settings: ResumeSettings,
    progress_tx: Option<UnboundedSender<ResumeProgress>>,
}

impl<T: JobTransport> ResumeController<T> {
    pub fn new(transport: T, settings: ResumeSettings) -> Self {
        Self {
            transport,
            settings,
            progress_tx: None,
        }
    }

    pub fn with_progress_tx(mut self, tx: UnboundedSender<ResumeProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn settings(&self) -> &ResumeSettings {
        &self.settings
    }

    fn report(&self, progress: ResumeProgress) {
        tracing::info!("{}", progress);
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(progress);
        }
    }

    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let limit = self.settings.client_timeout;
        timeout(limit, self.transport.send(request))
            .await
            .map_err(|_| ClientError::RequestTimedOut {
                timeout_ms: limit.as_millis() as u64,
            })?
    }

    /// 发起初始请求并驱动续跑直到完成或终止失败
    pub async fn run(&self, request: ApiRequest) -> Result<Finished, ClientError> {
        let max_attempts = self.settings.max_attempts;
        // 轮询 running 的总时长上限
        let poll_deadline = Instant::now() + self.settings.client_timeout * max_attempts.max(1);

        self.report(ResumeProgress::Started);
        let mut response = self.send(request).await?;
        let mut requests = 1;
        let mut attempt = 1;

        loop {
            match response.body {
                ResponseBody::Completed { job_id, insights } => {
                    tracing::info!(job_id = %job_id, attempts = insights.attempt_count, "analysis completed");
                    return Ok(Finished {
                        job_id,
                        insights,
                        requests,
                    });
                }
                ResponseBody::Failed { job_id, error, .. } => {
                    return Err(match (error.kind, job_id) {
                        (ErrorKind::MaxAttemptsExceeded, Some(job_id)) => {
                            ClientError::MaxAttemptsExceeded {
                                job_id,
                                max_attempts,
                            }
                        }
                        (kind, job_id) => ClientError::Failed {
                            job_id,
                            kind,
                            message: error.message,
                            advice: error.advice,
                        },
                    });
                }
                ResponseBody::TimedOut {
                    job_id, can_resume, ..
                } => {
                    if !can_resume {
                        return Err(ClientError::Failed {
                            job_id: Some(job_id),
                            kind: ErrorKind::Timeout,
                            message: "attempt timed out without a checkpoint".into(),
                            advice: FailureStory::OutOfTime.advice().to_string(),
                        });
                    }
                    if attempt >= max_attempts {
                        tracing::warn!(job_id = %job_id, attempt, "attempt limit reached");
                        return Err(ClientError::MaxAttemptsExceeded {
                            job_id,
                            max_attempts,
                        });
                    }
                    attempt += 1;
                    sleep(self.settings.retry_delay).await;
                    self.report(ResumeProgress::Continuing {
                        job_id: job_id.clone(),
                        attempt,
                        max_attempts,
                    });
                    response = self.send(ApiRequest::resume(job_id)).await?;
                }
                ResponseBody::Running { job_id, .. } => {
                    if Instant::now() >= poll_deadline {
                        return Err(ClientError::RequestTimedOut {
                            timeout_ms: (self.settings.client_timeout * max_attempts.max(1))
                                .as_millis() as u64,
                        });
                    }
                    sleep(self.settings.retry_delay).await;
                    self.report(ResumeProgress::Waiting {
                        job_id: job_id.clone(),
                    });
                    response = self.send(ApiRequest::resume(job_id)).await?;
                }
            }
            requests += 1;
        }
    }
}
