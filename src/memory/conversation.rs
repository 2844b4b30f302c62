//! 对话历史：不可变、只追加的轮次序列
//!
//! History 按值在编排状态之间传递，`append` 消费旧值返回新值；不提供删除、重排、去重。
//! 续跑时从检查点原样载入，之后只能追加，`extends` 用公共前缀的结构相等检查这一约束。

use serde::{Deserialize, Serialize};

use crate::tools::{ToolCallRequest, ToolCallResult};

/// 模型的一轮输出：最终回答文本，或一个/多个工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTurn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

/// 单条轮次：role 为 user / model / tool
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User { content: String },
    Model { content: ModelTurn },
    Tool { content: ToolCallResult },
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Turn::User {
            content: content.into(),
        }
    }

    pub fn final_answer(text: impl Into<String>) -> Self {
        Turn::Model {
            content: ModelTurn {
                text: Some(text.into()),
                tool_calls: Vec::new(),
            },
        }
    }

    pub fn tool_requests(text: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Turn::Model {
            content: ModelTurn { text, tool_calls },
        }
    }

    pub fn tool_result(result: ToolCallResult) -> Self {
        Turn::Tool { content: result }
    }

    pub fn is_model(&self) -> bool {
        matches!(self, Turn::Model { .. })
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Turn::Tool { .. })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以用户问题开启一段对话
    pub fn starting_with(query: impl Into<String>) -> Self {
        Self::new().append(Turn::user(query))
    }

    #[must_use]
    pub fn append(mut self, turn: Turn) -> Self {
        self.turns.push(turn);
        self
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn model_turn_count(&self) -> usize {
        self.turns.iter().filter(|t| t.is_model()).count()
    }

    pub fn tool_turn_count(&self) -> usize {
        self.turns.iter().filter(|t| t.is_tool()).count()
    }

    /// self 是否以 prefix 为前缀（逐条结构相等）
    pub fn extends(&self, prefix: &History) -> bool {
        self.turns.len() >= prefix.turns.len() && self.turns[..prefix.turns.len()] == prefix.turns[..]
    }
}
