//! 数据协作方接口
//!
//! 工具背后的数据源以普通的请求/响应函数形式暴露：按 systemId 与时间范围返回原始记录（JSON 对象）。
//! 具体存储引擎不在本 crate 范围内；InMemoryRecords 用于测试与 CLI 演示（从 JSON 文件加载）。

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::extract::{record_timestamp, TIMESTAMP_FIELD};

/// 数据源返回的原始记录
pub type RawRecord = Map<String, Value>;

/// 半开区间 [start, end)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }
}

/// 传感器时序数据源
#[async_trait]
pub trait SensorDataSource: Send + Sync {
    async fn fetch_records(&self, system_id: &str, range: TimeRange)
        -> Result<Vec<RawRecord>, String>;
}

/// 天气 / 日照数据源
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch_weather(&self, system_id: &str, range: TimeRange)
        -> Result<Vec<RawRecord>, String>;
}

/// 内存记录集：按 systemId 分组，按时间戳字段过滤
#[derive(Debug, Default, Clone)]
pub struct InMemoryRecords {
    records: HashMap<String, Vec<RawRecord>>,
}

impl InMemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, system_id: impl Into<String>, record: RawRecord) {
        self.records.entry(system_id.into()).or_default().push(record);
    }

    pub fn extend(&mut self, system_id: impl Into<String>, records: impl IntoIterator<Item = RawRecord>) {
        self.records.entry(system_id.into()).or_default().extend(records);
    }

    fn query(&self, system_id: &str, range: TimeRange) -> Vec<RawRecord> {
        self.records
            .get(system_id)
            .map(|rows| {
                rows.iter()
                    .filter(|r| record_timestamp(r, TIMESTAMP_FIELD).is_some_and(|t| range.contains(t)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SensorDataSource for InMemoryRecords {
    async fn fetch_records(
        &self,
        system_id: &str,
        range: TimeRange,
    ) -> Result<Vec<RawRecord>, String> {
        Ok(self.query(system_id, range))
    }
}

#[async_trait]
impl WeatherSource for InMemoryRecords {
    async fn fetch_weather(
        &self,
        system_id: &str,
        range: TimeRange,
    ) -> Result<Vec<RawRecord>, String> {
        Ok(self.query(system_id, range))
    }
}

/// CLI 演示数据文件：`{"sensor": {"<systemId>": [...]}, "weather": {"<systemId>": [...]}}`
#[derive(Debug, Default, Deserialize)]
struct DataFile {
    #[serde(default)]
    sensor: HashMap<String, Vec<RawRecord>>,
    #[serde(default)]
    weather: HashMap<String, Vec<RawRecord>>,
}

/// 从 JSON 文件加载 (传感器记录, 天气记录)；文件不存在时返回空数据集
pub fn load_data_file(path: impl AsRef<Path>) -> anyhow::Result<(InMemoryRecords, InMemoryRecords)> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::warn!("Data file {:?} not found, starting with empty data", path);
        return Ok((InMemoryRecords::new(), InMemoryRecords::new()));
    }
    let data = std::fs::read_to_string(path)?;
    let file: DataFile = serde_json::from_str(&data)?;
    let mut sensor = InMemoryRecords::new();
    for (system_id, rows) in file.sensor {
        sensor.extend(system_id, rows);
    }
    let mut weather = InMemoryRecords::new();
    for (system_id, rows) in file.weather {
        weather.extend(system_id, rows);
    }
    Ok((sensor, weather))
}
