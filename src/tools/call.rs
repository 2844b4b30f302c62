//! 工具调用请求与结果
//!
//! ToolCallRequest 由模型发出；ToolCallResult 由 ToolExecutor 产出并作为 Tool 轮次写回对话。
//! 失败也是结果：outcome 为 Error 时携带 ToolErrorKind，模型在下一轮可见并自行调整。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 模型发出的工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Value,
}

impl ToolCallRequest {
    pub fn new(tool_name: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
        }
    }
}

/// 单次工具调用失败的种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolErrorKind {
    ToolNotFound,
    /// 参数不符合该工具发布给模型的 schema
    InvalidParameters,
    ToolExecutionError,
    /// 在途调用触及硬截止
    Timeout,
    /// 预算耗尽，本次尝试未执行；续跑后模型可重新发起
    Deferred,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok {
        payload: Value,
    },
    Error {
        kind: ToolErrorKind,
        message: String,
    },
}

/// {toolName, parameters, resultPayload | errorKind, durationMs}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub tool_name: String,
    pub parameters: Value,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
    pub duration_ms: u64,
}

impl ToolCallResult {
    pub fn ok(request: &ToolCallRequest, payload: Value, duration_ms: u64) -> Self {
        Self {
            tool_name: request.tool_name.clone(),
            parameters: request.parameters.clone(),
            outcome: ToolOutcome::Ok { payload },
            duration_ms,
        }
    }

    pub fn error(
        request: &ToolCallRequest,
        kind: ToolErrorKind,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            tool_name: request.tool_name.clone(),
            parameters: request.parameters.clone(),
            outcome: ToolOutcome::Error {
                kind,
                message: message.into(),
            },
            duration_ms,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Ok { .. })
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match &self.outcome {
            ToolOutcome::Error { kind, .. } => Some(*kind),
            ToolOutcome::Ok { .. } => None,
        }
    }

    /// 写入 toolCallLog 的简短摘要
    pub fn summary(&self, max_chars: usize) -> String {
        let full = match &self.outcome {
            ToolOutcome::Ok { payload } => payload.to_string(),
            ToolOutcome::Error { kind, message } => format!("{kind:?}: {message}"),
        };
        preview(&full, max_chars)
    }
}

pub(crate) fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}
