//! The tools the assistant can call.

mod weather;

pub use weather::{GetWeatherParameters, GetWeatherTool, get_weather};
