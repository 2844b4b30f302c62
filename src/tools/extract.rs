//! 字段映射与取值
//!
//! 原始记录中的值一律经显式映射表读取（指标 → 源字段路径 + 单位），不做位置或隐式访问：
//! 底层存储的 schema 漂移体现为映射表的改动，而不是运行期故障。
//! 缺失字段解析为 `Reading::Absent`，绝不当作 0 交给模型。

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::tools::source::RawRecord;

pub const TIMESTAMP_FIELD: &str = "timestamp";

/// 单个读数：测得的数值，或明确的"缺失"
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reading {
    Value(f64),
    Absent,
}

impl Reading {
    pub fn value(self) -> Option<f64> {
        match self {
            Reading::Value(v) => Some(v),
            Reading::Absent => None,
        }
    }

    pub fn is_absent(self) -> bool {
        matches!(self, Reading::Absent)
    }
}

impl From<Option<f64>> for Reading {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Reading::Absent, Reading::Value)
    }
}

/// Absent 序列化为 null，与任何测得数值可区分
impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reading::Value(v) => serializer.serialize_f64(*v),
            Reading::Absent => serializer.serialize_none(),
        }
    }
}

/// 映射表中的一行
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldMapping {
    /// 源记录中的字段路径，`.` 分隔嵌套对象
    pub source_path: &'static str,
    pub unit: &'static str,
    pub description: &'static str,
}

/// 传感器指标（发布给模型的枚举）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    BatterySoc,
    BatteryVoltage,
    BatteryCurrent,
    BatteryPower,
    BatteryTemperature,
    SolarPower,
    LoadPower,
    GridPower,
}

pub const SENSOR_FIELD_MAP: &[(Metric, FieldMapping)] = &[
    (
        Metric::BatterySoc,
        FieldMapping {
            source_path: "battery.soc",
            unit: "%",
            description: "Battery state of charge",
        },
    ),
    (
        Metric::BatteryVoltage,
        FieldMapping {
            source_path: "battery.voltage",
            unit: "V",
            description: "Battery pack voltage",
        },
    ),
    (
        Metric::BatteryCurrent,
        FieldMapping {
            source_path: "battery.current",
            unit: "A",
            description: "Battery current, positive while charging",
        },
    ),
    (
        Metric::BatteryPower,
        FieldMapping {
            source_path: "battery.power",
            unit: "W",
            description: "Battery power, positive while charging",
        },
    ),
    (
        Metric::BatteryTemperature,
        FieldMapping {
            source_path: "battery.temperature",
            unit: "°C",
            description: "Battery temperature",
        },
    ),
    (
        Metric::SolarPower,
        FieldMapping {
            source_path: "solar.power",
            unit: "W",
            description: "PV array output power",
        },
    ),
    (
        Metric::LoadPower,
        FieldMapping {
            source_path: "load.power",
            unit: "W",
            description: "Household load power",
        },
    ),
    (
        Metric::GridPower,
        FieldMapping {
            source_path: "grid.power",
            unit: "W",
            description: "Grid power, positive while importing",
        },
    ),
];

/// 天气 / 日照字段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WeatherField {
    TemperatureC,
    CloudCover,
    SolarIrradiance,
    UvIndex,
    Precipitation,
}

pub const WEATHER_FIELD_MAP: &[(WeatherField, FieldMapping)] = &[
    (
        WeatherField::TemperatureC,
        FieldMapping {
            source_path: "temp",
            unit: "°C",
            description: "Air temperature",
        },
    ),
    (
        WeatherField::CloudCover,
        FieldMapping {
            source_path: "clouds",
            unit: "%",
            description: "Cloud cover",
        },
    ),
    (
        WeatherField::SolarIrradiance,
        FieldMapping {
            source_path: "ghi",
            unit: "W/m²",
            description: "Global horizontal irradiance",
        },
    ),
    (
        WeatherField::UvIndex,
        FieldMapping {
            source_path: "uvi",
            unit: "",
            description: "UV index",
        },
    ),
    (
        WeatherField::Precipitation,
        FieldMapping {
            source_path: "precip_mm",
            unit: "mm",
            description: "Precipitation",
        },
    ),
];

impl Metric {
    pub fn mapping(self) -> &'static FieldMapping {
        lookup(SENSOR_FIELD_MAP, self)
    }

    pub fn all() -> impl Iterator<Item = Metric> {
        SENSOR_FIELD_MAP.iter().map(|(m, _)| *m)
    }
}

impl WeatherField {
    pub fn mapping(self) -> &'static FieldMapping {
        lookup(WEATHER_FIELD_MAP, self)
    }

    pub fn all() -> impl Iterator<Item = WeatherField> {
        WEATHER_FIELD_MAP.iter().map(|(f, _)| *f)
    }
}

// 每个枚举值在表中恰好一行，由下方测试保证
fn lookup<K: PartialEq + Copy>(table: &'static [(K, FieldMapping)], key: K) -> &'static FieldMapping {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, m)| m)
        .unwrap_or(&UNMAPPED)
}

const UNMAPPED: FieldMapping = FieldMapping {
    source_path: "",
    unit: "",
    description: "unmapped",
};

fn lookup_path<'a>(record: &'a RawRecord, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut parts = path.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// 按映射读取数值；字段缺失、为 null、非数值或非有限值时为 Absent
pub fn extract(record: &RawRecord, mapping: &FieldMapping) -> Reading {
    let value = match lookup_path(record, mapping.source_path) {
        Some(v) => v,
        None => return Reading::Absent,
    };
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(v) if v.is_finite() => Reading::Value(v),
        _ => {
            if !value.is_null() {
                tracing::debug!(path = mapping.source_path, value = %value, "unreadable field value");
            }
            Reading::Absent
        }
    }
}

/// 读取记录时间戳（RFC3339 字符串或 Unix 毫秒）
pub fn record_timestamp(record: &RawRecord, field: &str) -> Option<DateTime<Utc>> {
    match lookup_path(record, field)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}
