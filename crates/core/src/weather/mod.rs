mod weatherapi;

pub use weatherapi::{WeatherApiClient, WeatherReport};

use crate::error::Result;
use chrono::NaiveDate;

/// Supplies a weather condition string for a region and day.
///
/// Implementations make at most one attempt per call; failures surface as
/// [`crate::DemandError::ExternalService`] and are never replaced by a default condition.
#[async_trait::async_trait]
pub trait WeatherSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn condition(&self, region: &str, date: NaiveDate) -> Result<String>;
}
