//! 分桶聚合与降采样
//!
//! 聚合按小时或按天分桶，每桶给出 avg / min / max 与样本数；桶内没有任何有效读数时统计量为 Absent。
//! 原始结果超过上限时做确定性的等步长降采样，保留 originalCount 与 returnedCount。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::extract::{extract, record_timestamp, FieldMapping, Reading, TIMESTAMP_FIELD};
use crate::tools::source::{RawRecord, TimeRange};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hourly,
    #[default]
    Daily,
}

impl Granularity {
    fn bucket_secs(self) -> i64 {
        match self {
            Granularity::Hourly => 3_600,
            Granularity::Daily => 86_400,
        }
    }

    /// 所在桶的起始时刻（UTC 对齐）
    pub fn bucket_start(self, t: DateTime<Utc>) -> DateTime<Utc> {
        let secs = t.timestamp();
        let aligned = secs - secs.rem_euclid(self.bucket_secs());
        DateTime::<Utc>::from_timestamp(aligned, 0).unwrap_or(t)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketStats {
    pub bucket_start: DateTime<Utc>,
    /// 有效读数个数
    pub sample_count: usize,
    /// 该字段缺失的记录数
    pub missing_count: usize,
    pub avg: Reading,
    pub min: Reading,
    pub max: Reading,
}

/// 一个字段的聚合结果；空结果也是合法结果
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    pub field: String,
    pub unit: &'static str,
    pub granularity: Granularity,
    pub range: TimeRange,
    pub record_count: usize,
    pub empty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub buckets: Vec<BucketStats>,
}

pub const EMPTY_RANGE_NOTE: &str =
    "No records in the requested time range. This is missing data, not a zero reading.";

impl Aggregation {
    pub fn empty(field: String, mapping: &FieldMapping, granularity: Granularity, range: TimeRange) -> Self {
        Self {
            field,
            unit: mapping.unit,
            granularity,
            range,
            record_count: 0,
            empty: true,
            note: Some(EMPTY_RANGE_NOTE.to_string()),
            buckets: Vec::new(),
        }
    }
}

/// 按映射字段分桶聚合；无时间戳的记录被跳过
pub fn aggregate(
    field: String,
    records: &[RawRecord],
    mapping: &FieldMapping,
    granularity: Granularity,
    range: TimeRange,
) -> Aggregation {
    if records.is_empty() {
        return Aggregation::empty(field, mapping, granularity, range);
    }

    let mut buckets: BTreeMap<DateTime<Utc>, Vec<Reading>> = BTreeMap::new();
    for record in records {
        let Some(t) = record_timestamp(record, TIMESTAMP_FIELD) else {
            tracing::debug!("skipping record without timestamp");
            continue;
        };
        buckets
            .entry(granularity.bucket_start(t))
            .or_default()
            .push(extract(record, mapping));
    }

    let buckets: Vec<BucketStats> = buckets
        .into_iter()
        .map(|(bucket_start, readings)| bucket_stats(bucket_start, &readings))
        .collect();
    let all_missing = buckets.iter().all(|b| b.sample_count == 0);

    Aggregation {
        field,
        unit: mapping.unit,
        granularity,
        range,
        record_count: records.len(),
        empty: false,
        note: all_missing.then(|| {
            format!(
                "Records exist but none contain '{}'; the field is absent, not zero.",
                mapping.source_path
            )
        }),
        buckets,
    }
}

fn bucket_stats(bucket_start: DateTime<Utc>, readings: &[Reading]) -> BucketStats {
    let values: Vec<f64> = readings.iter().filter_map(|r| r.value()).collect();
    let missing_count = readings.len() - values.len();
    if values.is_empty() {
        return BucketStats {
            bucket_start,
            sample_count: 0,
            missing_count,
            avg: Reading::Absent,
            min: Reading::Absent,
            max: Reading::Absent,
        };
    }
    let sum: f64 = values.iter().sum();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    BucketStats {
        bucket_start,
        sample_count: values.len(),
        missing_count,
        avg: Reading::Value(sum / values.len() as f64),
        min: Reading::Value(min),
        max: Reading::Value(max),
    }
}

/// 等步长降采样：取下标 i*n/cap（i < cap），结果确定且保持原有顺序
pub fn downsample_uniform<T: Clone>(items: &[T], cap: usize) -> Vec<T> {
    let n = items.len();
    if cap == 0 || n <= cap {
        return items.to_vec();
    }
    (0..cap).map(|i| items[i * n / cap].clone()).collect()
}
