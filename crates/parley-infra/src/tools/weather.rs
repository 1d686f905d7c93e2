//! `weather` tool backed by Open-Meteo (geocoding + current forecast).
//!
//! No API key required.

use parley_core::tools::executor::ToolExecutor;
use parley_types::tool::{ToolError, ToolKind, WeatherInput};
use serde::Deserialize;
use serde_json::json;

use super::{http_client, upstream};

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const CURRENT_FIELDS: &str =
    "temperature_2m,relative_humidity_2m,apparent_temperature,weather_code,wind_speed_10m";

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<Place>,
}

#[derive(Debug, Clone, Deserialize)]
struct Place {
    name: String,
    latitude: f64,
    longitude: f64,
    country: Option<String>,
    timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: CurrentConditions,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    time: String,
    temperature_2m: f64,
    relative_humidity_2m: Option<f64>,
    apparent_temperature: Option<f64>,
    weather_code: Option<u8>,
    wind_speed_10m: Option<f64>,
}

/// WMO weather interpretation code to a short description.
fn describe(code: u8) -> &'static str {
    match code {
        0 => "clear sky",
        1 => "mainly clear",
        2 => "partly cloudy",
        3 => "overcast",
        45 | 48 => "fog",
        51 | 53 | 55 => "drizzle",
        56 | 57 => "freezing drizzle",
        61 | 63 | 65 => "rain",
        66 | 67 => "freezing rain",
        71 | 73 | 75 | 77 => "snow",
        80..=82 => "rain showers",
        85 | 86 => "snow showers",
        95 => "thunderstorm",
        96 | 99 => "thunderstorm with hail",
        _ => "unknown",
    }
}

fn parse_input(input: serde_json::Value) -> Result<WeatherInput, ToolError> {
    let parsed: WeatherInput =
        serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
    if parsed.location.trim().is_empty() {
        return Err(ToolError::InvalidInput("location must not be empty".to_string()));
    }
    Ok(parsed)
}

fn render(place: &Place, current: &CurrentConditions) -> serde_json::Value {
    json!({
        "location": place.name,
        "country": place.country,
        "timezone": place.timezone,
        "observed_at": current.time,
        "temperature_c": current.temperature_2m,
        "feels_like_c": current.apparent_temperature,
        "humidity_percent": current.relative_humidity_2m,
        "wind_speed_kmh": current.wind_speed_10m,
        "conditions": current.weather_code.map(describe),
    })
}

pub struct WeatherTool {
    client: reqwest::Client,
    geocoding_url: String,
    forecast_url: String,
}

impl WeatherTool {
    pub fn new() -> Result<Self, ToolError> {
        Ok(Self {
            client: http_client()?,
            geocoding_url: GEOCODING_URL.to_string(),
            forecast_url: FORECAST_URL.to_string(),
        })
    }

    async fn geocode(&self, location: &str) -> Result<Place, ToolError> {
        let response: GeocodingResponse = self
            .client
            .get(&self.geocoding_url)
            .query(&[("name", location), ("count", "1"), ("language", "en"), ("format", "json")])
            .send()
            .await
            .map_err(upstream)?
            .error_for_status()
            .map_err(upstream)?
            .json()
            .await
            .map_err(upstream)?;

        response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::InvalidInput(format!("no place found for '{location}'")))
    }

    async fn current(&self, place: &Place) -> Result<CurrentConditions, ToolError> {
        let response: ForecastResponse = self
            .client
            .get(&self.forecast_url)
            .query(&[
                ("latitude", place.latitude.to_string()),
                ("longitude", place.longitude.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await
            .map_err(upstream)?
            .error_for_status()
            .map_err(upstream)?
            .json()
            .await
            .map_err(upstream)?;
        Ok(response.current)
    }
}

impl ToolExecutor for WeatherTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Weather
    }

    async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let input = parse_input(input)?;
        let place = self.geocode(input.location.trim()).await?;
        tracing::debug!(place = %place.name, "resolved weather location");
        let current = self.current(&place).await?;
        Ok(render(&place, &current))
    }
}
