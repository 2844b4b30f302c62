//! Mock 模型（用于测试与无 API 演示）
//!
//! - MockLlmClient：文本后端。首轮请求 list_metrics，见到 Observation 后给出最终回答。
//! - ScriptedModel：按脚本逐轮应答的 ModelClient，每步可设耗时（配合暂停时钟测试预算行为）。
//!   第几步由历史中已有的模型轮次数决定，续跑后从断点处继续。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError, Message, ModelClient, ModelResponse, Role};
use crate::memory::History;
use crate::tools::{ToolCallRequest, ToolSchema};

#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        if last_user.starts_with("Observation from") {
            Ok(format!(
                "Mock analysis based on the tool output: {}",
                crate::tools::call::preview(last_user, 120)
            ))
        } else {
            Ok(r#"{"tool": "list_metrics", "args": {}}"#.to_string())
        }
    }
}

/// 脚本中的一步：先等待 delay，再返回 response
#[derive(Clone, Debug)]
pub struct ScriptStep {
    pub delay: Duration,
    pub response: Result<ModelResponse, LlmError>,
}

impl ScriptStep {
    pub fn answer(text: impl Into<String>) -> Self {
        Self::respond(ModelResponse::FinalAnswer(text.into()))
    }

    pub fn tool(name: &str, args: Value) -> Self {
        Self::tools(vec![ToolCallRequest::new(name, args)])
    }

    pub fn tools(calls: Vec<ToolCallRequest>) -> Self {
        Self::respond(ModelResponse::ToolCalls { text: None, calls })
    }

    pub fn malformed(raw: impl Into<String>) -> Self {
        Self::respond(ModelResponse::Malformed {
            raw: raw.into(),
            error: "expected value".into(),
        })
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            response: Err(LlmError::Unavailable(reason.into())),
        }
    }

    fn respond(response: ModelResponse) -> Self {
        Self {
            delay: Duration::ZERO,
            response: Ok(response),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// 脚本耗尽后重复最后一步
pub struct ScriptedModel {
    steps: Vec<ScriptStep>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            calls: AtomicUsize::new(0),
        }
    }

    /// 实际发起的模型调用次数（含被截断的）
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn generate(
        &self,
        history: &History,
        _tools: &[ToolSchema],
    ) -> Result<ModelResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = history.model_turn_count();
        let step = self
            .steps
            .get(index)
            .or_else(|| self.steps.last())
            .cloned()
            .ok_or_else(|| LlmError::InvalidResponse("empty script".into()))?;
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.response
    }
}
