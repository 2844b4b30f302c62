//! 时间预算控制器
//!
//! 每次尝试的自设上限 totalBudgetMs = platformHardLimit − safetyMargin，始终先于平台硬杀触发。
//! 检查点按**经过时间**触发而非按轮数：单次模型/工具调用耗时无上界，轮数无法约束墙钟风险。
//! 全部基于 `tokio::time::Instant`，测试中可用暂停时钟精确推进。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// 剩余毫秒数（可为负，表示已超出）
pub fn remaining_ms(start_time: Instant, total_budget_ms: u64) -> i64 {
    let elapsed = start_time.elapsed().as_millis() as i64;
    total_budget_ms as i64 - elapsed
}

/// 距上次检查点是否已满一个间隔
pub fn should_checkpoint(last_checkpoint_time: Instant, interval_ms: u64) -> bool {
    last_checkpoint_time.elapsed() >= Duration::from_millis(interval_ms)
}

pub fn is_budget_exceeded(start_time: Instant, total_budget_ms: u64) -> bool {
    remaining_ms(start_time, total_budget_ms) <= 0
}

/// 单个 Job 的预算参数（随 Job 持久化，续跑时沿用同一组数值）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetParams {
    pub total_budget_ms: u64,
    pub checkpoint_interval_ms: u64,
    /// 在途调用的硬截止（自尝试开始计），= platformHardLimit − checkpointReserve − responseHeadroom
    pub call_deadline_ms: u64,
    /// 保存检查点的子预算
    pub checkpoint_reserve_ms: u64,
    pub platform_hard_limit_ms: u64,
}

/// 一次尝试的运行期预算：{totalBudgetMs, checkpointIntervalMs, startTime}
#[derive(Clone, Copy, Debug)]
pub struct TimeBudget {
    params: BudgetParams,
    start: Instant,
}

impl TimeBudget {
    pub fn start(params: BudgetParams) -> Self {
        Self::starting_at(params, Instant::now())
    }

    pub fn starting_at(params: BudgetParams, start: Instant) -> Self {
        Self { params, start }
    }

    pub fn params(&self) -> &BudgetParams {
        &self.params
    }

    pub fn start_time(&self) -> Instant {
        self.start
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn remaining_ms(&self) -> i64 {
        remaining_ms(self.start, self.params.total_budget_ms)
    }

    pub fn is_exceeded(&self) -> bool {
        is_budget_exceeded(self.start, self.params.total_budget_ms)
    }

    pub fn checkpoint_due(&self, last_checkpoint: Instant) -> bool {
        should_checkpoint(last_checkpoint, self.params.checkpoint_interval_ms)
    }

    /// 在途调用还能等多久；到达硬截止后为零
    pub fn call_time_left(&self) -> Duration {
        Duration::from_millis(self.params.call_deadline_ms).saturating_sub(self.start.elapsed())
    }

    pub fn save_timeout(&self) -> Duration {
        Duration::from_millis(self.params.checkpoint_reserve_ms)
    }
}
