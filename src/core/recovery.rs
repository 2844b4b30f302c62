//! 错误恢复与用户可见的失败分类
//!
//! 编排层内部：模型输出无法解析时生成纠正提示，作为 user 轮次写回对话后继续（RetryWithPrompt）。
//! 对外：每个 ErrorKind 归入三种失败故事之一（时间不够 / 服务不可用 / 请求本身有误），并决定 HTTP 状态码与提示文案。

use serde::Serialize;

use crate::core::error::ErrorKind;

/// 用户可见的失败故事
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStory {
    /// 多次尝试后仍未完成
    OutOfTime,
    /// 模型或数据服务不可用
    ServiceUnavailable,
    /// 请求本身有误
    MalformedRequest,
    /// 存储等内部故障
    Internal,
}

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 模型输出无法解析时写回对话的纠正提示
    pub fn corrective_prompt(&self, error: &str) -> String {
        format!(
            "Your previous reply could not be parsed ({error}). \
             To call a tool, reply with ONLY one JSON object: {{\"tool\": \"<name>\", \"args\": {{...}}}} \
             or {{\"tool_calls\": [{{\"tool\": \"<name>\", \"args\": {{...}}}}]}}. \
             To finish, reply with the answer as plain text."
        )
    }
}

impl FailureStory {
    pub fn of(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Timeout | ErrorKind::MaxTurnsExceeded | ErrorKind::MaxAttemptsExceeded => {
                FailureStory::OutOfTime
            }
            ErrorKind::ModelUnavailable
            | ErrorKind::ToolExecutionError
            | ErrorKind::ToolNotFound
            | ErrorKind::ServiceMisconfigured => FailureStory::ServiceUnavailable,
            ErrorKind::InvalidRequest | ErrorKind::JobNotFound => FailureStory::MalformedRequest,
            ErrorKind::CheckpointPersistenceError => FailureStory::Internal,
        }
    }

    /// 面向用户的下一步建议
    pub fn advice(self) -> &'static str {
        match self {
            FailureStory::OutOfTime => {
                "The analysis did not finish in the allowed attempts. Narrow the time range or ask a more specific question."
            }
            FailureStory::ServiceUnavailable => {
                "The model or data service is unavailable right now. Try again in a few minutes."
            }
            FailureStory::MalformedRequest => "The request is invalid. Check the query, systemId and contextWindowDays.",
            FailureStory::Internal => "Progress could not be saved. Start the analysis again.",
        }
    }
}

/// 错误种类 → HTTP 状态码（可续跑超时用 408，不占用 5xx）
pub fn http_status(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Timeout => 408,
        ErrorKind::InvalidRequest => 400,
        ErrorKind::JobNotFound => 404,
        ErrorKind::MaxTurnsExceeded | ErrorKind::MaxAttemptsExceeded => 422,
        ErrorKind::ModelUnavailable
        | ErrorKind::ToolExecutionError
        | ErrorKind::ToolNotFound
        | ErrorKind::ServiceMisconfigured => 503,
        ErrorKind::CheckpointPersistenceError => 500,
    }
}
