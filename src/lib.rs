//! Sensor Insights - 传感器时序数据问答智能体
//!
//! 模块划分：
//! - **agent**: JobService，初始 / 续跑 / background 请求与 Job 生命周期
//! - **api**: 请求与响应线格式
//! - **checkpoint**: 检查点与 Job 记录存储（内存 / SQLite）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 时间预算、编排主循环、状态、错误与恢复
//! - **llm**: 模型协作者抽象与实现（OpenAI 兼容 / Mock / 脚本化）
//! - **memory**: 只追加的对话历史
//! - **resume**: 续跑客户端控制器
//! - **tools**: 传感器 / 天气数据工具与执行器

pub mod agent;
pub mod api;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod resume;
pub mod tools;

pub use agent::{JobService, ServiceSettings};
pub use api::{ApiRequest, ApiResponse};
pub use config::{load_config, AppConfig};
pub use resume::{LocalTransport, ResumeController, ResumeSettings};
