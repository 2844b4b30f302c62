//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `INSIGHTS__*` 覆盖（双下划线表示嵌套，如 `INSIGHTS__BUDGET__SAFETY_MARGIN_MS=9000`）。
//! 所有键都有安全默认值，没有配置文件也能运行。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::budget::BudgetParams;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub budget: BudgetSection,
    pub resume: ResumeSection,
    pub tools: ToolsSection,
    pub store: StoreSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// CLI 演示用的传感器/天气数据文件（JSON）
    pub data_path: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "sensor-insights".to_string(),
            data_path: PathBuf::from("data/sensor_data.json"),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai（任意 OpenAI 兼容端点）/ mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次模型请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [budget] 段：每次尝试的时间预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    /// 平台硬性执行上限的估计值
    pub platform_hard_limit_ms: u64,
    /// 预算与硬上限之间的余量，须覆盖保存检查点与序列化响应的耗时
    pub safety_margin_ms: u64,
    /// 未设置时取 max(total / 3, min_checkpoint_interval_ms)
    pub checkpoint_interval_ms: Option<u64>,
    pub min_checkpoint_interval_ms: u64,
    /// 保存检查点的子预算
    pub checkpoint_reserve_ms: u64,
    /// 预算出口保存之后留给序列化与返回响应的时间
    pub response_headroom_ms: u64,
    /// 累计模型轮次上限（跨尝试计），须容纳 max_attempts 次尝试的正常轮次
    pub max_turns: usize,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            platform_hard_limit_ms: 26_000,
            safety_margin_ms: 8_000,
            checkpoint_interval_ms: None,
            min_checkpoint_interval_ms: 5_000,
            checkpoint_reserve_ms: 2_000,
            response_headroom_ms: 1_000,
            max_turns: 60,
        }
    }
}

impl BudgetSection {
    pub fn validate(&self) -> Result<(), String> {
        if self.safety_margin_ms >= self.platform_hard_limit_ms {
            return Err(format!(
                "safety_margin_ms ({}) must be smaller than platform_hard_limit_ms ({})",
                self.safety_margin_ms, self.platform_hard_limit_ms
            ));
        }
        let exit_cost = self.checkpoint_reserve_ms + self.response_headroom_ms;
        if self.safety_margin_ms <= exit_cost {
            return Err(format!(
                "safety_margin_ms ({}) must exceed checkpoint_reserve_ms + response_headroom_ms ({})",
                self.safety_margin_ms, exit_cost
            ));
        }
        if self.max_turns == 0 {
            return Err("max_turns must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn total_budget_ms(&self) -> u64 {
        self.platform_hard_limit_ms.saturating_sub(self.safety_margin_ms)
    }

    /// 在途调用的硬截止：截断后还要完成一次保存并返回响应，全部落在平台硬上限之前
    pub fn call_deadline_ms(&self) -> u64 {
        self.platform_hard_limit_ms
            .saturating_sub(self.checkpoint_reserve_ms)
            .saturating_sub(self.response_headroom_ms)
    }

    pub fn params(&self) -> BudgetParams {
        let total = self.total_budget_ms();
        BudgetParams {
            total_budget_ms: total,
            checkpoint_interval_ms: self
                .checkpoint_interval_ms
                .unwrap_or_else(|| (total / 3).max(self.min_checkpoint_interval_ms)),
            call_deadline_ms: self.call_deadline_ms(),
            checkpoint_reserve_ms: self.checkpoint_reserve_ms,
            platform_hard_limit_ms: self.platform_hard_limit_ms,
        }
    }
}

/// [resume] 段：调用方续跑策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResumeSection {
    pub max_attempts: u32,
    /// 收到可续跑超时后，发起下一次请求前的等待
    pub retry_delay_ms: u64,
    /// 客户端单次请求超时 = 服务端预算 + 此余量
    pub client_timeout_margin_ms: u64,
}

impl Default for ResumeSection {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            retry_delay_ms: 1_500,
            client_timeout_margin_ms: 10_000,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 原始读数返回条数上限，超过则降采样
    pub raw_sample_cap: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            raw_sample_cap: 500,
        }
    }
}

/// [store] 段：检查点与 Job 记录存储
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// memory / sqlite
    pub backend: String,
    pub sqlite_path: PathBuf,
    pub ttl_secs: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            sqlite_path: PathBuf::from("data/checkpoints.db"),
            ttl_secs: 86_400,
        }
    }
}

/// 从 config 目录加载配置，环境变量 INSIGHTS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 INSIGHTS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();
    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }
    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }
    builder = builder.add_source(
        config::Environment::with_prefix("INSIGHTS")
            .separator("__")
            .try_parsing(true),
    );
    let c = builder.build()?;
    let cfg: AppConfig = c.try_deserialize()?;
    cfg.budget.validate().map_err(config::ConfigError::Message)?;
    Ok(cfg)
}
