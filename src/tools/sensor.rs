//! 传感器数据工具：分桶聚合与原始读数

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::aggregate::{aggregate, downsample_uniform, Granularity, EMPTY_RANGE_NOTE};
use crate::tools::extract::{extract, record_timestamp, Metric, Reading, TIMESTAMP_FIELD};
use crate::tools::registry::{ToolContext, ToolError, TypedTool};
use crate::tools::source::SensorDataSource;

fn metric_name(metric: Metric) -> String {
    serde_json::to_value(metric)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{metric:?}"))
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::Execution(e.to_string()))
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AggregateParams {
    /// 要聚合的指标
    pub metric: Metric,
    /// 分桶粒度：hourly 或 daily；缺省为 daily
    #[serde(default)]
    pub granularity: Granularity,
    /// 起始时刻（RFC3339，含）；缺省为 end 往前 contextWindowDays 天
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// 结束时刻（RFC3339，不含）；缺省为 Job 创建时刻
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

/// aggregate_sensor_data：按小时/天分桶的 avg/min/max 与样本数
pub struct AggregateSensorDataTool {
    source: Arc<dyn SensorDataSource>,
}

impl AggregateSensorDataTool {
    pub fn new(source: Arc<dyn SensorDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl TypedTool for AggregateSensorDataTool {
    type Params = AggregateParams;
    const NAME: &'static str = "aggregate_sensor_data";

    fn description(&self) -> &str {
        "Aggregate one sensor metric into hourly or daily buckets. Returns avg/min/max and sample count per bucket; null statistics mean no data, never zero."
    }

    async fn run(&self, ctx: &ToolContext, params: AggregateParams) -> Result<Value, ToolError> {
        let range = ctx.resolve_range(params.start, params.end)?;
        let records = self
            .source
            .fetch_records(&ctx.system_id, range)
            .await
            .map_err(ToolError::SourceUnavailable)?;
        let result = aggregate(
            metric_name(params.metric),
            &records,
            params.metric.mapping(),
            params.granularity,
            range,
        );
        to_payload(&result)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RawParams {
    /// 要返回的指标（至少一个）
    #[schemars(length(min = 1))]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// 最多返回的点数；超过服务端上限时按上限处理
    #[serde(default)]
    pub max_points: Option<usize>,
}

#[derive(Clone, Debug, Serialize)]
struct RawPoint {
    timestamp: Option<DateTime<Utc>>,
    values: BTreeMap<String, Reading>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RawSeries {
    metrics: Vec<Value>,
    original_count: usize,
    returned_count: usize,
    downsampled: bool,
    empty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'static str>,
    points: Vec<RawPoint>,
}

/// get_raw_sensor_data：逐条读数，超过上限时等步长降采样
pub struct RawSensorDataTool {
    source: Arc<dyn SensorDataSource>,
    sample_cap: usize,
}

impl RawSensorDataTool {
    pub fn new(source: Arc<dyn SensorDataSource>, sample_cap: usize) -> Self {
        Self { source, sample_cap }
    }
}

#[async_trait]
impl TypedTool for RawSensorDataTool {
    type Params = RawParams;
    const NAME: &'static str = "get_raw_sensor_data";

    fn description(&self) -> &str {
        "Fetch raw sensor readings for the given metrics. Large results are uniformly downsampled; originalCount and returnedCount show truncation. null means the field was absent."
    }

    async fn run(&self, ctx: &ToolContext, params: RawParams) -> Result<Value, ToolError> {
        if params.metrics.is_empty() {
            return Err(ToolError::InvalidParameters(
                "metrics must contain at least one metric".into(),
            ));
        }
        let range = ctx.resolve_range(params.start, params.end)?;
        let mut records = self
            .source
            .fetch_records(&ctx.system_id, range)
            .await
            .map_err(ToolError::SourceUnavailable)?;
        records.sort_by_key(|r| record_timestamp(r, TIMESTAMP_FIELD));

        let points: Vec<RawPoint> = records
            .iter()
            .map(|record| RawPoint {
                timestamp: record_timestamp(record, TIMESTAMP_FIELD),
                values: params
                    .metrics
                    .iter()
                    .map(|m| (metric_name(*m), extract(record, m.mapping())))
                    .collect(),
            })
            .collect();

        let cap = match params.max_points {
            Some(n) if n > 0 => n.min(self.sample_cap),
            _ => self.sample_cap,
        };
        let original_count = points.len();
        let points = downsample_uniform(&points, cap);
        let returned_count = points.len();
        if returned_count < original_count {
            tracing::debug!(original_count, returned_count, "raw series downsampled");
        }

        to_payload(&RawSeries {
            metrics: params
                .metrics
                .iter()
                .map(|m| json!({ "metric": metric_name(*m), "unit": m.mapping().unit }))
                .collect(),
            original_count,
            returned_count,
            downsampled: returned_count < original_count,
            empty: original_count == 0,
            note: (original_count == 0).then_some(EMPTY_RANGE_NOTE),
            points,
        })
    }
}
