//! 错误类型与对外错误分类
//!
//! AgentError 是编排层与服务层的统一错误；ErrorKind 是写入响应体 `error.kind` 的稳定标识。
//! 工具级错误（ToolNotFound / ToolExecutionError）在 ToolExecutor 边界内被转成对话轮次，不会以 AgentError 形式向上传播。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkpoint::StoreError;
use crate::llm::LlmError;

/// 响应体中的错误种类（与 HTTP 状态、用户可见文案一一对应）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// 本次尝试预算耗尽，已保存检查点，可续跑
    Timeout,
    ToolExecutionError,
    ToolNotFound,
    /// 模型服务不可用；本次尝试终止，新请求可能成功
    ModelUnavailable,
    MaxTurnsExceeded,
    MaxAttemptsExceeded,
    CheckpointPersistenceError,
    InvalidRequest,
    JobNotFound,
    /// 服务端配置有误（存储后端、预算参数等），与请求内容无关
    ServiceMisconfigured,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Timeout => "Timeout",
            ErrorKind::ToolExecutionError => "ToolExecutionError",
            ErrorKind::ToolNotFound => "ToolNotFound",
            ErrorKind::ModelUnavailable => "ModelUnavailable",
            ErrorKind::MaxTurnsExceeded => "MaxTurnsExceeded",
            ErrorKind::MaxAttemptsExceeded => "MaxAttemptsExceeded",
            ErrorKind::CheckpointPersistenceError => "CheckpointPersistenceError",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::JobNotFound => "JobNotFound",
            ErrorKind::ServiceMisconfigured => "ServiceMisconfigured",
        };
        f.write_str(s)
    }
}

/// 编排与服务过程中的终止性错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(#[from] LlmError),

    #[error("Max turns exceeded ({max_turns} model turns)")]
    MaxTurnsExceeded { max_turns: usize },

    #[error("Max attempts exceeded ({max_attempts} attempts)")]
    MaxAttemptsExceeded { max_attempts: u32 },

    /// 检查点保存失败：必须以不可续跑的失败结束，不能返回指向不存在检查点的续跑指针
    #[error("Checkpoint persistence failed: {0}")]
    CheckpointPersistence(#[source] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            AgentError::MaxTurnsExceeded { .. } => ErrorKind::MaxTurnsExceeded,
            AgentError::MaxAttemptsExceeded { .. } => ErrorKind::MaxAttemptsExceeded,
            AgentError::CheckpointPersistence(_) => ErrorKind::CheckpointPersistenceError,
            AgentError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            AgentError::JobNotFound(_) => ErrorKind::JobNotFound,
            AgentError::ConfigError(_) => ErrorKind::ServiceMisconfigured,
        }
    }
}
