//! list_metrics：列出可查询的指标与天气字段（直接来自映射表）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::extract::{FieldMapping, SENSOR_FIELD_MAP, WEATHER_FIELD_MAP};
use crate::tools::registry::{ToolContext, ToolError, TypedTool};

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NoParams {}

pub struct ListMetricsTool;

fn describe<K: serde::Serialize>(table: &[(K, FieldMapping)]) -> Vec<Value> {
    table
        .iter()
        .map(|(key, m)| {
            json!({
                "name": key,
                "unit": m.unit,
                "description": m.description,
            })
        })
        .collect()
}

#[async_trait]
impl TypedTool for ListMetricsTool {
    type Params = NoParams;
    const NAME: &'static str = "list_metrics";

    fn description(&self) -> &str {
        "List the sensor metrics and weather fields that can be queried, with units, plus the default time window."
    }

    async fn run(&self, ctx: &ToolContext, _params: NoParams) -> Result<Value, ToolError> {
        Ok(json!({
            "systemId": ctx.system_id,
            "metrics": describe(SENSOR_FIELD_MAP),
            "weatherFields": describe(WEATHER_FIELD_MAP),
            "granularities": ["hourly", "daily"],
            "defaultWindow": {
                "days": ctx.context_window_days,
                "end": ctx.anchor,
            },
        }))
    }
}
