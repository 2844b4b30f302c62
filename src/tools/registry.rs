//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / validate / execute），由 ToolRegistry 按名注册与查找，
//! ToolExecutor 在调用时做校验、加超时并把一切失败转成 ToolCallResult。
//! 参数类型化的工具实现 TypedTool：schema 由 schemars 从参数类型生成，校验即反序列化为同一类型，
//! 保证发布给模型的 schema 与实际校验规则一致。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::tools::schema::{schema_value, ToolSchema};
use crate::tools::source::TimeRange;

/// 工具内部错误（不会越过 ToolExecutor 边界）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("{0}")]
    Execution(String),

    #[error("data source unavailable: {0}")]
    SourceUnavailable(String),
}

/// 工具执行上下文：系统 ID 与默认时间窗口（锚定 Job 创建时刻，续跑时查询同一窗口）
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub system_id: String,
    pub context_window_days: u32,
    pub anchor: DateTime<Utc>,
}

impl ToolContext {
    pub fn new(system_id: impl Into<String>, context_window_days: u32, anchor: DateTime<Utc>) -> Self {
        Self {
            system_id: system_id.into(),
            context_window_days,
            anchor,
        }
    }

    /// 缺省 end 为锚点，缺省 start 为 end 往前 contextWindowDays 天
    pub fn resolve_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<TimeRange, ToolError> {
        let end = end.unwrap_or(self.anchor);
        let start =
            start.unwrap_or_else(|| end - Duration::days(i64::from(self.context_window_days)));
        if start >= end {
            return Err(ToolError::InvalidParameters(format!(
                "start ({}) must be before end ({})",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(TimeRange { start, end })
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型工具调用中的 toolName）
    fn name(&self) -> &str;

    /// 工具描述（供模型理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（与发布给模型的完全一致）
    fn parameters_schema(&self) -> Value;

    /// 按声明的 schema 校验参数
    fn validate(&self, args: &Value) -> Result<(), String>;

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError>;
}

/// 参数类型化的工具
#[async_trait]
pub trait TypedTool: Send + Sync {
    type Params: DeserializeOwned + JsonSchema + Send;

    const NAME: &'static str;

    fn description(&self) -> &str;

    async fn run(&self, ctx: &ToolContext, params: Self::Params) -> Result<Value, ToolError>;
}

/// 模型可能对无参工具给出 null
fn parse_params<P: DeserializeOwned>(args: Value) -> Result<P, String> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| e.to_string())
}

#[async_trait]
impl<T: TypedTool> Tool for T {
    fn name(&self) -> &str {
        T::NAME
    }

    fn description(&self) -> &str {
        TypedTool::description(self)
    }

    fn parameters_schema(&self) -> Value {
        schema_value::<T::Params>()
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        parse_params::<T::Params>(args.clone()).map(|_| ())
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let params = parse_params::<T::Params>(args).map_err(ToolError::InvalidParameters)?;
        self.run(ctx, params).await
    }
}

/// 工具注册表：按名称有序存储 Arc<dyn Tool>，保证 schema 列表顺序稳定
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 发布给模型的工具 schema 列表
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}
