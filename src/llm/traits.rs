//! 模型协作方抽象
//!
//! 两层接口：
//! - LlmClient：文本补全后端（OpenAI 兼容 / Mock），输入消息列表，输出文本；
//! - ModelClient：编排层看到的模型，输入完整对话历史 + 工具 schema，输出最终回答或工具调用请求。
//! PromptedModel 把任意 LlmClient 适配为 ModelClient。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::History;
use crate::tools::{ToolCallRequest, ToolSchema};

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条补全消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("model endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("model request timed out after {0}ms")]
    Timeout(u64),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// 模型一轮的输出
#[derive(Clone, Debug, PartialEq)]
pub enum ModelResponse {
    FinalAnswer(String),
    ToolCalls {
        /// 与调用一起给出的说明文字（可无）
        text: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
    /// 看起来想调用工具但 JSON 无法解析；原文与解析错误一起写回对话让模型纠正
    Malformed { raw: String, error: String },
}

/// 累计 token 使用的快照
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCount {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenCount {
    /// 自 earlier 快照以来新增的用量
    pub fn since(self, earlier: TokenCount) -> TokenCount {
        TokenCount {
            prompt: self.prompt.saturating_sub(earlier.prompt),
            completion: self.completion.saturating_sub(earlier.completion),
            total: self.total.saturating_sub(earlier.total),
        }
    }
}

/// 文本补全后端
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 累计 token 使用；不统计的后端返回零
    fn token_usage(&self) -> TokenCount {
        TokenCount::default()
    }
}

/// 编排层使用的模型接口：{conversationHistory, toolSchemas} → {finalAnswer} | {toolCallRequests}
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(
        &self,
        history: &History,
        tools: &[ToolSchema],
    ) -> Result<ModelResponse, LlmError>;

    fn token_usage(&self) -> TokenCount {
        TokenCount::default()
    }
}
