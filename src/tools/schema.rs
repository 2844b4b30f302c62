//! 工具 Schema 生成（schemars）
//!
//! 每个工具的参数 schema 由其参数类型生成，并与调用格式 schema 一起注入模型提示词，约束模型只提出类型正确的调用。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 发布给模型的单个工具声明
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub fn schema_value<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null)
}

/// 工具调用格式：与解析器接受的 `{"tool_calls": [{"tool": "...", "args": {...}}]}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallsFormat {
    /// 本轮要执行的工具调用，按顺序逐个执行
    tool_calls: Vec<ToolCallFormat>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，须为已声明的工具之一
    tool: String,
    /// 工具参数，须符合该工具的 parameters schema
    args: serde_json::Map<String, Value>,
}

/// 返回工具调用格式的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallsFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
