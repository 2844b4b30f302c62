//! PromptedModel：把文本补全后端适配为编排层的 ModelClient
//!
//! system prompt = 基础说明 + 工具 schema 列表 + 调用格式 schema；对话历史逐轮渲染为消息，
//! 工具结果以 Observation 形式作为 user 消息回填。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::parse::parse_model_output;
use crate::llm::{LlmClient, LlmError, Message, ModelClient, ModelResponse, TokenCount};
use crate::memory::{History, Turn};
use crate::tools::{tool_call_schema_json, ToolCallResult, ToolOutcome, ToolSchema};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an energy-system analyst. Answer questions about a home battery/solar system using only data returned by the tools. \
Missing values are reported as null; never treat them as zero. \
When you need data, reply with ONLY a JSON object {\"tool\": \"<name>\", \"args\": {...}} or {\"tool_calls\": [...]}. \
When you have enough information, reply with the final answer as plain text.";

pub struct PromptedModel {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl PromptedModel {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self::with_system_prompt(llm, DEFAULT_SYSTEM_PROMPT)
    }

    pub fn with_system_prompt(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    fn render_system(&self, tools: &[ToolSchema]) -> String {
        let tool_list = tools
            .iter()
            .map(|t| format!("- {}: {}\n  parameters: {}", t.name, t.description, t.parameters))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{}\n\nAvailable tools:\n{}\n\nTool call format (JSON Schema):\n{}",
            self.system_prompt,
            tool_list,
            tool_call_schema_json()
        )
    }
}

fn render_observation(result: &ToolCallResult) -> String {
    match &result.outcome {
        ToolOutcome::Ok { payload } => format!("Observation from {}: {}", result.tool_name, payload),
        ToolOutcome::Error { kind, message } => format!(
            "Observation from {}: error {:?}: {}",
            result.tool_name, kind, message
        ),
    }
}

/// 对话历史 → 补全消息
pub fn render_messages(system: String, history: &History) -> Vec<Message> {
    let mut messages = vec![Message::system(system)];
    for turn in history.turns() {
        let message = match turn {
            Turn::User { content } => Message::user(content.clone()),
            Turn::Model { content } if content.tool_calls.is_empty() => {
                Message::assistant(content.text.clone().unwrap_or_default())
            }
            Turn::Model { content } => {
                let calls: Vec<_> = content
                    .tool_calls
                    .iter()
                    .map(|c| json!({ "tool": c.tool_name, "args": c.parameters }))
                    .collect();
                Message::assistant(json!({ "tool_calls": calls }).to_string())
            }
            Turn::Tool { content } => Message::user(render_observation(content)),
        };
        messages.push(message);
    }
    messages
}

#[async_trait]
impl ModelClient for PromptedModel {
    async fn generate(
        &self,
        history: &History,
        tools: &[ToolSchema],
    ) -> Result<ModelResponse, LlmError> {
        let messages = render_messages(self.render_system(tools), history);
        let output = self.llm.complete(&messages).await?;
        Ok(parse_model_output(&output))
    }

    fn token_usage(&self) -> TokenCount {
        self.llm.token_usage()
    }
}
