//! 命令行参数（clap derive）

use std::path::PathBuf;

use clap::Parser;
use sensor_insights::api::Mode;
use sensor_insights::ApiRequest;

/// 针对单个能源系统的传感器数据提问，超时自动从检查点续跑
#[derive(Debug, Parser)]
#[command(name = "insights", version, about)]
pub struct Cli {
    /// 配置文件路径（缺省为 config/default.toml）
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// 默认查询窗口（天）
    #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(1..=365))]
    pub days: u32,

    /// 服务端连续驱动各次尝试，客户端只轮询
    #[arg(long, default_value_t = false)]
    pub background: bool,

    /// 系统 ID
    pub system_id: String,

    /// 问题（多个词按空格拼接）
    #[arg(required = true, num_args = 1..)]
    pub query: Vec<String>,
}

impl Cli {
    pub fn request(&self) -> ApiRequest {
        ApiRequest::Initial {
            query: self.query.join(" "),
            context_window_days: self.days,
            system_id: self.system_id.clone(),
            mode: if self.background {
                Mode::Background
            } else {
                Mode::Sync
            },
        }
    }
}
