pub mod dataset;
pub mod domain;
pub mod error;
pub mod features;
pub mod model;
pub mod weather;

pub use error::DemandError;

pub mod config {
    use crate::features::FeatureConfig;
    use anyhow::Context;
    use std::path::PathBuf;

    const DEFAULT_DATA_PATH: &str = "data/smart_inventory_stock_dataset.csv";
    const DEFAULT_MODEL_PATH: &str = "data/models/demand_model.json";
    const DEFAULT_LAGS: &[usize] = &[1, 3, 7];
    const DEFAULT_ROLLING_WINDOWS: &[usize] = &[3, 7, 14];
    const DEFAULT_RESTOCK_THRESHOLD: i64 = 60;
    const DEFAULT_WEATHER_BASE_URL: &str = "http://api.weatherapi.com";
    const DEFAULT_WEATHER_TIMEOUT_SECS: u64 = 10;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub data_path: PathBuf,
        pub model_path: PathBuf,
        pub lag_features: Vec<usize>,
        pub rolling_windows: Vec<usize>,
        pub default_restock_threshold: i64,
        pub weatherapi_key: Option<String>,
        pub weatherapi_base_url: String,
        pub weatherapi_timeout_secs: u64,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let lag_features = match std::env::var("LAG_FEATURES") {
                Ok(s) => parse_offsets(&s).context("invalid LAG_FEATURES")?,
                Err(_) => DEFAULT_LAGS.to_vec(),
            };
            let rolling_windows = match std::env::var("ROLLING_WINDOWS") {
                Ok(s) => parse_offsets(&s).context("invalid ROLLING_WINDOWS")?,
                Err(_) => DEFAULT_ROLLING_WINDOWS.to_vec(),
            };
            let default_restock_threshold = match std::env::var("DEFAULT_RESTOCK_THRESHOLD") {
                Ok(s) => s
                    .trim()
                    .parse::<i64>()
                    .with_context(|| format!("invalid DEFAULT_RESTOCK_THRESHOLD: {s}"))?,
                Err(_) => DEFAULT_RESTOCK_THRESHOLD,
            };
            let weatherapi_timeout_secs = match std::env::var("WEATHERAPI_TIMEOUT_SECS") {
                Ok(s) => parse_timeout_secs(&s).context("invalid WEATHERAPI_TIMEOUT_SECS")?,
                Err(_) => DEFAULT_WEATHER_TIMEOUT_SECS,
            };

            Ok(Self {
                data_path: std::env::var("DATA_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_PATH)),
                model_path: std::env::var("MODEL_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_MODEL_PATH)),
                lag_features,
                rolling_windows,
                default_restock_threshold,
                weatherapi_key: std::env::var("WEATHERAPI_KEY")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                weatherapi_base_url: std::env::var("WEATHERAPI_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_WEATHER_BASE_URL.to_string()),
                weatherapi_timeout_secs,
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            })
        }

        pub fn require_weatherapi_key(&self) -> anyhow::Result<&str> {
            self.weatherapi_key
                .as_deref()
                .context("WEATHERAPI_KEY is required")
        }

        pub fn feature_config(&self) -> FeatureConfig {
            FeatureConfig {
                lags: self.lag_features.clone(),
                rolling_windows: self.rolling_windows.clone(),
            }
        }
    }

    /// Parses an ordered, comma separated list of positive offsets ("1,3,7").
    pub fn parse_offsets(s: &str) -> anyhow::Result<Vec<usize>> {
        let mut out = Vec::new();
        for part in s.split(',') {
            let part = part.trim().trim_matches(|c| c == '[' || c == ']').trim();
            if part.is_empty() {
                continue;
            }
            let value = part
                .parse::<usize>()
                .with_context(|| format!("not a positive integer: {part}"))?;
            anyhow::ensure!(value >= 1, "offsets must be >= 1 (got {value})");
            anyhow::ensure!(!out.contains(&value), "duplicate offset: {value}");
            out.push(value);
        }
        Ok(out)
    }

    pub fn parse_timeout_secs(s: &str) -> anyhow::Result<u64> {
        let secs = s
            .trim()
            .parse::<u64>()
            .with_context(|| format!("not a whole number of seconds: {s}"))?;
        anyhow::ensure!(secs >= 1, "timeout must be at least one second");
        Ok(secs)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parses_plain_and_bracketed_lists() {
            assert_eq!(parse_offsets("1,3,7").unwrap(), vec![1, 3, 7]);
            assert_eq!(parse_offsets("[3, 7, 14]").unwrap(), vec![3, 7, 14]);
            assert!(parse_offsets("").unwrap().is_empty());
        }

        #[test]
        fn rejects_zero_duplicates_and_garbage() {
            assert!(parse_offsets("0,1").is_err());
            assert!(parse_offsets("1,1").is_err());
            assert!(parse_offsets("1,x").is_err());
        }

        #[test]
        fn timeout_must_be_a_positive_integer() {
            assert_eq!(parse_timeout_secs(" 15 ").unwrap(), 15);
            assert!(parse_timeout_secs("ten").is_err());
            assert!(parse_timeout_secs("0").is_err());
            assert!(parse_timeout_secs("-5").is_err());
        }
    }
}
