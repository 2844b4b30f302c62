//! Job：一次逻辑请求，可能跨越多次尝试
//!
//! 首次请求时创建（无检查点）；每次续跑 attemptCount 严格递增且不超过 MAX_ATTEMPTS；
//! 完成或终止失败后检查点被删除，Job 记录保留至 TTL 过期，供轮询与幂等续跑读取结果。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::budget::BudgetParams;
use crate::core::error::ErrorKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    /// 本次尝试预算耗尽，检查点已保存，可续跑
    TimedOut,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::TimedOut => write!(f, "timed_out"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 工具执行所需的查询上下文（来自初始请求，续跑时沿用）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQuery {
    pub query: String,
    pub system_id: String,
    pub context_window_days: u32,
}

/// 完成时记录的结果（供轮询与幂等续跑返回）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub answer: String,
    pub turn_count: usize,
    pub tool_call_count: usize,
}

/// 终止失败时记录的错误
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub query: JobQuery,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub budget: BudgetParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}

impl Job {
    /// 新建 Job，视为第 1 次尝试
    pub fn new(query: JobQuery, budget: BudgetParams) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Running,
            query,
            created_at: now,
            updated_at: now,
            attempt_count: 1,
            budget,
            result: None,
            failure: None,
        }
    }

    /// 开始一次续跑尝试
    pub fn begin_resume(&mut self) {
        self.attempt_count += 1;
        self.status = JobStatus::Running;
        self.touch();
    }

    pub fn mark_completed(&mut self, result: JobResult) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.touch();
    }

    pub fn mark_timed_out(&mut self) {
        self.status = JobStatus::TimedOut;
        self.touch();
    }

    pub fn mark_failed(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.failure = Some(JobFailure {
            kind,
            message: message.into(),
        });
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
