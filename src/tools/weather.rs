//! 天气 / 日照工具

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::aggregate::{aggregate, Granularity, EMPTY_RANGE_NOTE};
use crate::tools::extract::WeatherField;
use crate::tools::registry::{ToolContext, ToolError, TypedTool};
use crate::tools::source::WeatherSource;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WeatherParams {
    /// 需要的字段；缺省为全部
    #[serde(default)]
    pub fields: Option<Vec<WeatherField>>,
    /// 分桶粒度，缺省 daily
    #[serde(default)]
    pub granularity: Granularity,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

pub struct GetWeatherTool {
    source: Arc<dyn WeatherSource>,
}

impl GetWeatherTool {
    pub fn new(source: Arc<dyn WeatherSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl TypedTool for GetWeatherTool {
    type Params = WeatherParams;
    const NAME: &'static str = "get_weather";

    fn description(&self) -> &str {
        "Weather and solar conditions at the system's site (temperature, cloud cover, irradiance, UV, precipitation), aggregated per hour or day."
    }

    async fn run(&self, ctx: &ToolContext, params: WeatherParams) -> Result<Value, ToolError> {
        let range = ctx.resolve_range(params.start, params.end)?;
        let fields: Vec<WeatherField> = match params.fields {
            Some(f) if !f.is_empty() => f,
            _ => WeatherField::all().collect(),
        };
        let records = self
            .source
            .fetch_weather(&ctx.system_id, range)
            .await
            .map_err(ToolError::SourceUnavailable)?;

        let mut series = Vec::with_capacity(fields.len());
        for field in fields {
            let name = serde_json::to_value(field)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let agg = aggregate(name, &records, field.mapping(), params.granularity, range);
            series.push(serde_json::to_value(&agg).map_err(|e| ToolError::Execution(e.to_string()))?);
        }

        let mut out = json!({
            "range": range,
            "granularity": params.granularity,
            "recordCount": records.len(),
            "empty": records.is_empty(),
            "fields": series,
        });
        if records.is_empty() {
            out["note"] = json!(EMPTY_RANGE_NOTE);
        }
        Ok(out)
    }
}
