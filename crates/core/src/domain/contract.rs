use crate::domain::recommendation::Recommendation;
use crate::error::{DemandError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Inbound prediction request as received from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub date: NaiveDate,
    pub product_id: i64,
    pub region: String,
    #[serde(default)]
    pub weather: Option<String>,
    #[serde(default)]
    pub is_festival: bool,
    #[serde(default)]
    pub current_stock: Option<i64>,
}

/// A validated single-row model input. Weather is always resolved by this point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionInput {
    pub date: NaiveDate,
    pub product_id: i64,
    pub region: String,
    pub weather: String,
    pub is_festival: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predicted_demand: f64,
    pub recommendation: Recommendation,
    pub confidence_score: f64,
}

impl PredictionRequest {
    /// True when the caller has to look up weather before predicting.
    pub fn needs_weather(&self) -> bool {
        self.weather
            .as_deref()
            .map(|w| w.trim().is_empty())
            .unwrap_or(true)
    }

    pub fn validate_and_into_input(self, resolved_weather: Option<String>) -> Result<PredictionInput> {
        let region = self.region.trim().to_string();
        if region.is_empty() {
            return Err(DemandError::validation("region must be non-empty"));
        }

        if let Some(stock) = self.current_stock {
            if stock < 0 {
                return Err(DemandError::validation(format!(
                    "current_stock must be >= 0 (got {stock})"
                )));
            }
        }

        let weather = self
            .weather
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .or_else(|| {
                resolved_weather
                    .map(|w| w.trim().to_string())
                    .filter(|w| !w.is_empty())
            })
            .ok_or_else(|| DemandError::validation("weather is required when it cannot be resolved"))?;

        Ok(PredictionInput {
            date: self.date,
            product_id: self.product_id,
            region,
            weather,
            is_festival: self.is_festival,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(weather: Option<&str>) -> PredictionRequest {
        serde_json::from_value(json!({
            "date": "2024-06-01",
            "product_id": 7,
            "region": " East ",
            "weather": weather,
        }))
        .unwrap()
    }

    #[test]
    fn defaults_optional_fields() {
        let req = request(Some("Rainy"));
        assert!(!req.is_festival);
        assert_eq!(req.current_stock, None);
        assert!(!req.needs_weather());
    }

    #[test]
    fn blank_weather_needs_lookup_and_uses_resolved_value() {
        let req = request(Some("  "));
        assert!(req.needs_weather());
        let input = req.validate_and_into_input(Some("Cloudy".to_string())).unwrap();
        assert_eq!(input.weather, "Cloudy");
        assert_eq!(input.region, "East");
    }

    #[test]
    fn provided_weather_takes_precedence() {
        let input = request(Some("Rainy"))
            .validate_and_into_input(Some("Sunny".to_string()))
            .unwrap();
        assert_eq!(input.weather, "Rainy");
    }

    #[test]
    fn unresolved_weather_is_a_validation_error() {
        let err = request(None).validate_and_into_input(None).unwrap_err();
        assert_eq!(err.kind(), "data_validation");
    }

    #[test]
    fn negative_stock_is_rejected() {
        let mut req = request(Some("Rainy"));
        req.current_stock = Some(-1);
        assert!(matches!(
            req.validate_and_into_input(None),
            Err(DemandError::DataValidation(_))
        ));
    }
}
