pub mod aggregate;
pub mod call;
pub mod catalog;
pub mod executor;
pub mod extract;
pub mod registry;
pub mod schema;
pub mod sensor;
pub mod source;
pub mod weather;

use std::sync::Arc;

pub use aggregate::{downsample_uniform, Granularity};
pub use call::{ToolCallRequest, ToolCallResult, ToolErrorKind, ToolOutcome};
pub use catalog::ListMetricsTool;
pub use executor::ToolExecutor;
pub use extract::{Metric, Reading, WeatherField};
pub use registry::{Tool, ToolContext, ToolError, ToolRegistry, TypedTool};
pub use schema::{tool_call_schema_json, ToolSchema};
pub use sensor::{AggregateSensorDataTool, RawSensorDataTool};
pub use source::{InMemoryRecords, RawRecord, SensorDataSource, TimeRange, WeatherSource};
pub use weather::GetWeatherTool;

/// 注册内置工具
pub fn default_registry(
    sensor: Arc<dyn SensorDataSource>,
    weather: Arc<dyn WeatherSource>,
    raw_sample_cap: usize,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ListMetricsTool);
    registry.register(AggregateSensorDataTool::new(Arc::clone(&sensor)));
    registry.register(RawSensorDataTool::new(sensor, raw_sample_cap));
    registry.register(GetWeatherTool::new(weather));
    registry
}
