//! 请求 / 响应线格式
//!
//! 初始请求 `{query, contextWindowDays, systemId, mode?}`，续跑请求 `{resumeJobId}`。
//! 响应体按 status 打标签：completed / timed_out / failed / running；HTTP 状态码随响应一起返回，由外层传输决定如何使用。

use serde::{Deserialize, Serialize};

use crate::core::{http_status, ErrorKind, FailureStory, Job, JobResult, JobStatus};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// 每个请求执行一次尝试
    #[default]
    Sync,
    /// 立即返回 202，由服务端连续驱动各次尝试
    Background,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiRequest {
    #[serde(rename_all = "camelCase")]
    Resume { resume_job_id: String },
    #[serde(rename_all = "camelCase")]
    Initial {
        query: String,
        context_window_days: u32,
        system_id: String,
        #[serde(default)]
        mode: Mode,
    },
}

impl ApiRequest {
    pub fn initial(query: impl Into<String>, system_id: impl Into<String>, context_window_days: u32) -> Self {
        ApiRequest::Initial {
            query: query.into(),
            context_window_days,
            system_id: system_id.into(),
            mode: Mode::Sync,
        }
    }

    pub fn resume(job_id: impl Into<String>) -> Self {
        ApiRequest::Resume {
            resume_job_id: job_id.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub answer: String,
    pub attempt_count: u32,
    pub turn_count: usize,
    pub tool_call_count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    /// 面向用户的下一步建议
    pub advice: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseBody {
    #[serde(rename_all = "camelCase")]
    Completed { job_id: String, insights: Insights },
    #[serde(rename_all = "camelCase")]
    TimedOut {
        job_id: String,
        can_resume: bool,
        attempt_count: u32,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
        error: ErrorBody,
        can_resume: bool,
    },
    #[serde(rename_all = "camelCase")]
    Running { job_id: String, attempt_count: u32 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub http_status: u16,
    pub body: ResponseBody,
}

impl ApiResponse {
    pub fn completed(job: &Job, result: &JobResult) -> Self {
        Self {
            http_status: 200,
            body: ResponseBody::Completed {
                job_id: job.id.clone(),
                insights: Insights {
                    answer: result.answer.clone(),
                    attempt_count: job.attempt_count,
                    turn_count: result.turn_count,
                    tool_call_count: result.tool_call_count,
                },
            },
        }
    }

    pub fn timed_out(job: &Job) -> Self {
        Self {
            http_status: http_status(ErrorKind::Timeout),
            body: ResponseBody::TimedOut {
                job_id: job.id.clone(),
                can_resume: true,
                attempt_count: job.attempt_count,
            },
        }
    }

    pub fn failed(job_id: Option<&str>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            http_status: http_status(kind),
            body: ResponseBody::Failed {
                job_id: job_id.map(str::to_string),
                error: ErrorBody {
                    kind,
                    message: message.into(),
                    advice: FailureStory::of(kind).advice().to_string(),
                },
                can_resume: false,
            },
        }
    }

    pub fn running(job: &Job) -> Self {
        Self {
            http_status: 202,
            body: ResponseBody::Running {
                job_id: job.id.clone(),
                attempt_count: job.attempt_count,
            },
        }
    }

    /// 依据已存储的 Job 记录构造响应（轮询与已结束 Job 的幂等续跑）
    pub fn from_job(job: &Job) -> Self {
        match (job.status, &job.result, &job.failure) {
            (JobStatus::Completed, Some(result), _) => Self::completed(job, result),
            (JobStatus::Failed, _, Some(failure)) => {
                Self::failed(Some(&job.id), failure.kind, failure.message.clone())
            }
            (JobStatus::TimedOut, _, _) => Self::timed_out(job),
            _ => Self::running(job),
        }
    }

    pub fn is_resumable(&self) -> bool {
        matches!(self.body, ResponseBody::TimedOut { can_resume: true, .. })
    }
}
