use std::future::ready;

use fairweather_core::tool::{Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

/// Returns the weather report for `city`.
///
/// Every city gets the same forecast. The name is inserted verbatim, an
/// empty name included.
///
/// ```
/// assert_eq!(
///     fairweather::tools::get_weather("Paris"),
///     "It's always sunny in Paris!"
/// );
/// ```
pub fn get_weather(city: &str) -> String {
    format!("It's always sunny in {city}!")
}

/// Arguments of the weather tool.
#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct GetWeatherParameters {
    /// Name of the city, e.g. Paris.
    pub city: String,
}

/// Exposes [`get_weather`] to the model as `get_weather`.
pub struct GetWeatherTool {
    parameter_schema: Value,
}

impl GetWeatherTool {
    /// Creates a new weather tool.
    #[inline]
    pub fn new() -> Self {
        GetWeatherTool {
            parameter_schema: schema_for!(GetWeatherParameters).to_value(),
        }
    }
}

impl Default for GetWeatherTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for GetWeatherTool {
    type Input = GetWeatherParameters;

    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get weather for a given city."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: GetWeatherParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        trace!("weather requested for {:?}", input.city);
        ready(Ok(get_weather(&input.city)))
    }
}
