//! Sensor Insights CLI
//!
//! 用法：`insights [--config <path>] [--days <n>] [--background] <systemId> <query...>`
//! 加载配置与数据文件，通过续跑控制器驱动一次完整分析，结果以 JSON 打印到 stdout。

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sensor_insights::resume::ResumeProgress;
use sensor_insights::tools::source::load_data_file;
use sensor_insights::tools::{SensorDataSource, WeatherSource};
use sensor_insights::{
    load_config, observability, JobService, LocalTransport, ResumeController, ResumeSettings,
};

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = Cli::parse();
    let cfg = load_config(args.config.clone()).context("Failed to load config")?;

    let (sensor, weather) = load_data_file(&cfg.app.data_path)
        .with_context(|| format!("Failed to load data file {:?}", cfg.app.data_path))?;
    let sensor: Arc<dyn SensorDataSource> = Arc::new(sensor);
    let weather: Arc<dyn WeatherSource> = Arc::new(weather);

    let service = Arc::new(
        JobService::from_config(&cfg, sensor, weather).context("Failed to create job service")?,
    );

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<ResumeProgress>();
    tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            if matches!(progress, ResumeProgress::Continuing { .. }) {
                eprintln!("  ↻ {progress}");
            }
        }
    });

    let controller = ResumeController::new(
        LocalTransport::new(service),
        ResumeSettings::from_config(&cfg),
    )
    .with_progress_tx(progress_tx);

    match controller.run(args.request()).await {
        Ok(finished) => {
            let out = serde_json::json!({
                "status": "completed",
                "jobId": finished.job_id,
                "insights": finished.insights,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Err(e) => {
            let out = serde_json::json!({
                "status": "failed",
                "error": e.to_string(),
                "story": e.story(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            std::process::exit(1);
        }
    }
}
