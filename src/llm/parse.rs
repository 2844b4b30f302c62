//! 解析文本模型输出
//!
//! 接受三种形式：纯文本（最终回答）、`{"tool": "...", "args": {...}}`、`{"tool_calls": [{"tool": ..., "args": ...}, ...]}`。
//! JSON 可包在 ```json 代码块中。只有疑似工具调用的片段解析失败才算 Malformed，
//! 含花括号的普通回答仍按最终回答处理。

use serde::Deserialize;
use serde_json::Value;

use crate::llm::ModelResponse;
use crate::tools::ToolCallRequest;

#[derive(Debug, Deserialize)]
struct CallFormat {
    #[serde(default)]
    tool: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct CallsFormat {
    tool_calls: Vec<CallFormat>,
}

/// 提取 JSON 片段（```json 代码块，或首个 `{` 到最后一个 `}`）
fn json_fragment(trimmed: &str) -> Option<&str> {
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

fn looks_like_call(fragment: &str) -> bool {
    fragment.contains("\"tool\"") || fragment.contains("\"tool_calls\"")
}

fn to_request(call: CallFormat) -> ToolCallRequest {
    ToolCallRequest::new(call.tool, call.args)
}

pub fn parse_model_output(output: &str) -> ModelResponse {
    let trimmed = output.trim();
    let Some(fragment) = json_fragment(trimmed) else {
        return ModelResponse::FinalAnswer(trimmed.to_string());
    };
    if !looks_like_call(fragment) {
        return ModelResponse::FinalAnswer(trimmed.to_string());
    }

    let value: Value = match serde_json::from_str(fragment) {
        Ok(v) => v,
        Err(e) => {
            return ModelResponse::Malformed {
                raw: trimmed.to_string(),
                error: e.to_string(),
            }
        }
    };

    // 调用前的说明文字
    let text = trimmed
        .find(fragment)
        .map(|i| trimmed[..i].trim().trim_end_matches("```json").trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    if value.get("tool_calls").is_some() {
        return match serde_json::from_value::<CallsFormat>(value) {
            Ok(parsed) if !parsed.tool_calls.is_empty() => ModelResponse::ToolCalls {
                text,
                calls: parsed.tool_calls.into_iter().map(to_request).collect(),
            },
            Ok(_) => ModelResponse::Malformed {
                raw: trimmed.to_string(),
                error: "tool_calls is empty".into(),
            },
            Err(e) => ModelResponse::Malformed {
                raw: trimmed.to_string(),
                error: e.to_string(),
            },
        };
    }

    match serde_json::from_value::<CallFormat>(value) {
        Ok(call) if call.tool.is_empty() => ModelResponse::FinalAnswer(trimmed.to_string()),
        Ok(call) => ModelResponse::ToolCalls {
            text,
            calls: vec![to_request(call)],
        },
        Err(e) => ModelResponse::Malformed {
            raw: trimmed.to_string(),
            error: e.to_string(),
        },
    }
}
