use crate::config::Settings;
use crate::error::{DemandError, Result};
use crate::weather::WeatherSource;
use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

const SERVICE: &str = "weatherapi";
const FORECAST_PATH: &str = "/v1/forecast.json";

#[derive(Debug, Clone)]
pub struct WeatherApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub condition: String,
    pub avg_temp_c: Option<f64>,
}

impl WeatherApiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_weatherapi_key()?.to_string();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.weatherapi_timeout_secs))
            .build()
            .context("failed to build weather http client")?;

        Ok(Self {
            http,
            base_url: settings.weatherapi_base_url.clone(),
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), FORECAST_PATH)
    }

    pub async fn forecast(&self, region: &str, date: NaiveDate) -> Result<WeatherReport> {
        let dt = date.to_string();
        let res = self
            .http
            .get(self.url())
            .query(&[("key", self.api_key.as_str()), ("q", region), ("dt", dt.as_str())])
            .send()
            .await
            .map_err(|e| request_error("request", e))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| request_error("reading response body", e))?;
        if !status.is_success() {
            return Err(external(format!("HTTP {status}: {text}")));
        }

        let report = parse_forecast(&text)?;
        tracing::debug!(
            region,
            %date,
            condition = %report.condition,
            avg_temp_c = ?report.avg_temp_c,
            "resolved weather"
        );
        Ok(report)
    }
}

#[async_trait::async_trait]
impl WeatherSource for WeatherApiClient {
    fn source_name(&self) -> &'static str {
        SERVICE
    }

    async fn condition(&self, region: &str, date: NaiveDate) -> Result<String> {
        Ok(self.forecast(region, date).await?.condition)
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    forecast: Forecast,
}

#[derive(Debug, Deserialize)]
struct Forecast {
    forecastday: Vec<ForecastDay>,
}

#[derive(Debug, Deserialize)]
struct ForecastDay {
    day: Day,
}

#[derive(Debug, Deserialize)]
struct Day {
    condition: Condition,
    #[serde(default)]
    avgtemp_c: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    text: String,
}

fn parse_forecast(text: &str) -> Result<WeatherReport> {
    let parsed = serde_json::from_str::<ForecastResponse>(text)
        .map_err(|e| external(format!("unexpected forecast payload: {e}")))?;
    let day = parsed
        .forecast
        .forecastday
        .into_iter()
        .next()
        .ok_or_else(|| external("forecast has no days"))?
        .day;
    let condition = day.condition.text.trim().to_string();
    if condition.is_empty() {
        return Err(external("forecast condition is empty"));
    }
    Ok(WeatherReport {
        condition,
        avg_temp_c: day.avgtemp_c,
    })
}

/// The request URL carries the API key in its query string, so it never reaches the detail.
fn request_error(stage: &str, e: reqwest::Error) -> DemandError {
    let what = if e.is_timeout() {
        "timed out"
    } else if e.is_connect() {
        "could not connect"
    } else {
        "failed"
    };
    external(format!("{stage} {what}: {}", e.without_url()))
}

fn external(detail: impl Into<String>) -> DemandError {
    DemandError::ExternalService {
        service: SERVICE,
        detail: detail.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_first_day_condition() {
        let body = json!({
            "location": {"name": "Pune"},
            "forecast": {
                "forecastday": [
                    {"date": "2024-06-01", "day": {"avgtemp_c": 29.4, "condition": {"text": "Patchy rain nearby"}}},
                    {"date": "2024-06-02", "day": {"avgtemp_c": 30.1, "condition": {"text": "Sunny"}}}
                ]
            }
        });
        let report = parse_forecast(&body.to_string()).unwrap();
        assert_eq!(report.condition, "Patchy rain nearby");
        assert_eq!(report.avg_temp_c, Some(29.4));
    }

    #[test]
    fn empty_forecast_is_an_external_error() {
        let body = json!({"forecast": {"forecastday": []}});
        let err = parse_forecast(&body.to_string()).unwrap_err();
        assert_eq!(err.kind(), "external_service");
    }

    #[test]
    fn error_payload_is_not_silently_defaulted() {
        let body = json!({"error": {"code": 1006, "message": "No matching location found."}});
        assert!(matches!(
            parse_forecast(&body.to_string()),
            Err(DemandError::ExternalService { .. })
        ));
    }

    #[test]
    fn builds_url_without_double_slash() {
        let client = WeatherApiClient {
            http: reqwest::Client::new(),
            base_url: "http://api.weatherapi.com/".to_string(),
            api_key: "k".to_string(),
        };
        assert_eq!(client.url(), "http://api.weatherapi.com/v1/forecast.json");
    }

    #[tokio::test]
    async fn unreachable_service_is_an_external_error() {
        let client = WeatherApiClient {
            http: reqwest::Client::builder()
                .timeout(Duration::from_millis(500))
                .build()
                .unwrap(),
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: "SECRET123".to_string(),
        };
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let err = client.condition("Pune", date).await.unwrap_err();
        assert_eq!(err.kind(), "external_service");
        assert!(!err.to_string().contains("SECRET123"), "{err}");
        assert!(!format!("{err:?}").contains("SECRET123"));
    }
}
