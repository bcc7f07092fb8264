//! Weather tools over an OpenWeatherMap-compatible HTTP API.
//!
//! `weather_current`, `weather_forecast` and `weather_compare` share one
//! [`WeatherClient`]. Responses are reduced to a compact summary before
//! they reach the synthesizer.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{required_str, send_json, Tool, ToolContext, ToolRegistry};
use crate::config::Secret;
use crate::error::ToolError;

/// Forecast entries come in 3-hour steps.
const ENTRIES_PER_DAY: u32 = 8;
const MAX_COMPARE: usize = 5;

pub struct WeatherClient {
    base_url: String,
    api_key: Secret,
    client: reqwest::Client,
}

impl WeatherClient {
    pub fn new(base_url: &str, api_key: Secret, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    async fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Value, ToolError> {
        debug!(endpoint, "weather request");
        let request = self
            .client
            .get(format!("{}/{}", self.base_url, endpoint))
            .query(query)
            .query(&[("appid", self.api_key.expose()), ("units", "metric")]);
        send_json(request).await
    }

    pub async fn current(&self, location: &str) -> Result<Value, ToolError> {
        let raw = self
            .get("weather", &[("q", location.to_string())])
            .await?;
        Ok(summarize_current(location, &raw))
    }

    pub async fn forecast(&self, location: &str, days: u32) -> Result<Value, ToolError> {
        let raw = self
            .get(
                "forecast",
                &[
                    ("q", location.to_string()),
                    ("cnt", (days * ENTRIES_PER_DAY).to_string()),
                ],
            )
            .await?;
        Ok(summarize_forecast(location, days, &raw))
    }
}

/// Reduce a `/weather` response to the fields worth showing.
pub fn summarize_current(location: &str, raw: &Value) -> Value {
    json!({
        "location": raw.get("name").and_then(|n| n.as_str()).unwrap_or(location),
        "temperature_c": raw["main"]["temp"],
        "feels_like_c": raw["main"]["feels_like"],
        "humidity_pct": raw["main"]["humidity"],
        "conditions": raw["weather"][0]["description"],
        "wind_speed_ms": raw["wind"]["speed"],
    })
}

/// Group 3-hourly `/forecast` entries into per-day min/max summaries.
pub fn summarize_forecast(location: &str, days: u32, raw: &Value) -> Value {
    let mut by_day: BTreeMap<String, (f64, f64, String)> = BTreeMap::new();

    for entry in raw["list"].as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
        let Some(date) = entry["dt_txt"].as_str().and_then(|t| t.split(' ').next()) else {
            continue;
        };
        let Some(temp) = entry["main"]["temp"].as_f64() else {
            continue;
        };
        let conditions = entry["weather"][0]["description"]
            .as_str()
            .unwrap_or("")
            .to_string();
        by_day
            .entry(date.to_string())
            .and_modify(|(lo, hi, _)| {
                *lo = lo.min(temp);
                *hi = hi.max(temp);
            })
            .or_insert((temp, temp, conditions));
    }

    let daily: Vec<Value> = by_day
        .into_iter()
        .take(days as usize)
        .map(|(date, (lo, hi, conditions))| {
            json!({
                "date": date,
                "min_c": lo,
                "max_c": hi,
                "conditions": conditions,
            })
        })
        .collect();

    json!({
        "location": raw["city"]["name"].as_str().unwrap_or(location),
        "days": daily,
    })
}

pub fn register(registry: &mut ToolRegistry, client: WeatherClient) {
    let client = Arc::new(client);
    registry.register(Box::new(CurrentWeatherTool(client.clone())));
    registry.register(Box::new(ForecastTool(client.clone())));
    registry.register(Box::new(CompareTool(client)));
}

pub struct CurrentWeatherTool(pub Arc<WeatherClient>);

#[async_trait]
impl Tool for CurrentWeatherTool {
    fn name(&self) -> &str {
        "weather_current"
    }

    fn description(&self) -> &str {
        "Get current weather conditions for a city"
    }

    fn category(&self) -> &str {
        "weather"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": { "type": "string", "minLength": 1, "description": "City name, e.g. \"Paris\" or \"Austin,US\"" }
            },
            "required": ["location"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let location = required_str(&params, "location")?;
        self.0.current(location).await
    }
}

pub struct ForecastTool(pub Arc<WeatherClient>);

#[async_trait]
impl Tool for ForecastTool {
    fn name(&self) -> &str {
        "weather_forecast"
    }

    fn description(&self) -> &str {
        "Get a daily weather forecast (1 to 5 days) for a city"
    }

    fn category(&self) -> &str {
        "weather"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": { "type": "string", "minLength": 1, "description": "City name" },
                "days": { "type": "integer", "minimum": 1, "maximum": 5, "default": 3 }
            },
            "required": ["location"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let location = required_str(&params, "location")?;
        let days = params["days"].as_u64().unwrap_or(3).clamp(1, 5) as u32;
        self.0.forecast(location, days).await
    }
}

pub struct CompareTool(pub Arc<WeatherClient>);

#[async_trait]
impl Tool for CompareTool {
    fn name(&self) -> &str {
        "weather_compare"
    }

    fn description(&self) -> &str {
        "Compare current weather across several cities"
    }

    fn category(&self) -> &str {
        "weather"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "locations": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Two to five city names"
                }
            },
            "required": ["locations"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let locations: Vec<&str> = params["locations"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if locations.len() < 2 || locations.len() > MAX_COMPARE {
            return Err(ToolError::InvalidInput(format!(
                "locations must contain 2 to {} cities",
                MAX_COMPARE
            )));
        }

        let results = futures::future::join_all(locations.iter().map(|l| self.0.current(l))).await;
        let mut out = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for (location, result) in locations.iter().zip(results) {
            match result {
                Ok(summary) => out.push(summary),
                Err(e) => {
                    warn!(query_id = %ctx.query_id, location, error = %e, "compare location failed");
                    out.push(json!({ "location": location, "error": "data unavailable" }));
                    errors.push(e);
                }
            }
        }

        if errors.len() == locations.len() {
            // nothing to compare; surface a retryable cause if there is one
            let position = errors.iter().position(ToolError::is_retryable).unwrap_or(0);
            return Err(errors.swap_remove(position));
        }
        Ok(json!({ "locations": out, "failed": errors.len() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_current() {
        let raw = json!({
            "name": "Paris",
            "main": { "temp": 18.5, "feels_like": 17.9, "humidity": 60 },
            "weather": [{ "description": "light rain" }],
            "wind": { "speed": 4.1 }
        });
        let s = summarize_current("paris", &raw);
        assert_eq!(s["location"], "Paris");
        assert_eq!(s["temperature_c"], 18.5);
        assert_eq!(s["conditions"], "light rain");
    }

    #[test]
    fn test_summarize_forecast_groups_by_day() {
        let raw = json!({
            "city": { "name": "Austin" },
            "list": [
                { "dt_txt": "2024-05-01 09:00:00", "main": { "temp": 20.0 }, "weather": [{ "description": "sunny" }] },
                { "dt_txt": "2024-05-01 15:00:00", "main": { "temp": 28.0 }, "weather": [{ "description": "hot" }] },
                { "dt_txt": "2024-05-02 09:00:00", "main": { "temp": 22.0 }, "weather": [{ "description": "clouds" }] },
                { "dt_txt": "2024-05-03 09:00:00", "main": { "temp": 19.0 }, "weather": [{ "description": "rain" }] }
            ]
        });
        let s = summarize_forecast("austin", 2, &raw);
        assert_eq!(s["location"], "Austin");
        let days = s["days"].as_array().unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0]["date"], "2024-05-01");
        assert_eq!(days[0]["min_c"], 20.0);
        assert_eq!(days[0]["max_c"], 28.0);
        assert_eq!(days[0]["conditions"], "sunny");
        assert_eq!(days[1]["date"], "2024-05-02");
    }
}
