//! 工具执行器
//!
//! 持有 ToolRegistry 与单次工具超时。execute 对模型发出的调用依次做：按名查找、按 schema 校验、
//! 在 min(工具超时, 本次尝试剩余的在途上限) 内执行、捕获 panic。任何失败都转成 ToolCallResult，
//! 从不向编排层返回错误；每次调用输出一行结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::time::{timeout, Instant};

use crate::tools::call::{preview, ToolCallRequest, ToolCallResult, ToolErrorKind};
use crate::tools::registry::{ToolContext, ToolError, ToolRegistry};
use crate::tools::schema::ToolSchema;

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 发布给模型的 schema，与 validate 使用的是同一份
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.registry.schemas()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行一次工具调用；call_time_left 为本次尝试在途调用的剩余硬上限
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        request: &ToolCallRequest,
        call_time_left: Duration,
    ) -> ToolCallResult {
        let start = Instant::now();
        let result = self.dispatch(ctx, request, call_time_left).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = match result {
            Ok(payload) => ToolCallResult::ok(request, payload, duration_ms),
            Err((kind, message)) => ToolCallResult::error(request, kind, message, duration_ms),
        };

        let outcome = match result.error_kind() {
            None => "ok".to_string(),
            Some(kind) => format!("{kind:?}"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": request.tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": preview(&request.parameters.to_string(), 200),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }

    async fn dispatch(
        &self,
        ctx: &ToolContext,
        request: &ToolCallRequest,
        call_time_left: Duration,
    ) -> Result<serde_json::Value, (ToolErrorKind, String)> {
        let Some(tool) = self.registry.get(&request.tool_name) else {
            return Err((
                ToolErrorKind::ToolNotFound,
                format!(
                    "Unknown tool '{}'. Available tools: {}",
                    request.tool_name,
                    self.tool_names().join(", ")
                ),
            ));
        };

        tool.validate(&request.parameters)
            .map_err(|e| (ToolErrorKind::InvalidParameters, e))?;

        let limit = self.timeout.min(call_time_left);
        let call = AssertUnwindSafe(tool.execute(ctx, request.parameters.clone())).catch_unwind();
        match timeout(limit, call).await {
            Ok(Ok(Ok(payload))) => Ok(payload),
            Ok(Ok(Err(ToolError::InvalidParameters(msg)))) => {
                Err((ToolErrorKind::InvalidParameters, msg))
            }
            Ok(Ok(Err(e))) => Err((ToolErrorKind::ToolExecutionError, e.to_string())),
            Ok(Err(panic)) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::warn!(tool = %request.tool_name, "tool panicked: {}", msg);
                Err((ToolErrorKind::ToolExecutionError, format!("tool panicked: {msg}")))
            }
            Err(_) => Err((
                ToolErrorKind::Timeout,
                format!("tool call exceeded {}ms", limit.as_millis()),
            )),
        }
    }
}
