//! 编排状态与单次尝试的结果
//!
//! INIT → AWAITING_MODEL → EXECUTING_TOOL → AWAITING_MODEL … → FINAL_ANSWER | BUDGET_EXCEEDED |
//! MAX_TURNS_EXCEEDED | MODEL_UNAVAILABLE。状态本身只用于日志与事件；携带数据的转移在 turn_loop 中按值传递。

use serde::Serialize;

use crate::checkpoint::Checkpoint;
use crate::core::error::AgentError;
use crate::memory::History;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    Init,
    AwaitingModel,
    ExecutingTool,
    FinalAnswer,
    BudgetExceeded,
    MaxTurnsExceeded,
    ModelUnavailable,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopState::Init => "INIT",
            LoopState::AwaitingModel => "AWAITING_MODEL",
            LoopState::ExecutingTool => "EXECUTING_TOOL",
            LoopState::FinalAnswer => "FINAL_ANSWER",
            LoopState::BudgetExceeded => "BUDGET_EXCEEDED",
            LoopState::MaxTurnsExceeded => "MAX_TURNS_EXCEEDED",
            LoopState::ModelUnavailable => "MODEL_UNAVAILABLE",
        };
        f.write_str(s)
    }
}

/// 一次尝试的结局
#[derive(Debug)]
pub enum AttemptOutcome {
    /// FINAL_ANSWER
    Completed { answer: String, history: History },
    /// BUDGET_EXCEEDED：检查点已确认写入
    TimedOut { checkpoint: Checkpoint },
    /// MAX_TURNS_EXCEEDED / MODEL_UNAVAILABLE / 检查点写入失败
    Failed { error: AgentError, history: History },
}

impl AttemptOutcome {
    pub fn state(&self) -> LoopState {
        match self {
            AttemptOutcome::Completed { .. } => LoopState::FinalAnswer,
            AttemptOutcome::TimedOut { .. } => LoopState::BudgetExceeded,
            AttemptOutcome::Failed { error, .. } => match error {
                AgentError::MaxTurnsExceeded { .. } => LoopState::MaxTurnsExceeded,
                AgentError::ModelUnavailable(_) => LoopState::ModelUnavailable,
                // 写检查点失败发生在预算出口或定时检查点
                _ => LoopState::BudgetExceeded,
            },
        }
    }

    pub fn history(&self) -> &History {
        match self {
            AttemptOutcome::Completed { history, .. } | AttemptOutcome::Failed { history, .. } => {
                history
            }
            AttemptOutcome::TimedOut { checkpoint } => &checkpoint.conversation_history,
        }
    }
}
