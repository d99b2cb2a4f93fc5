use anyhow::Context;
use chrono::NaiveDate;
use stocksense_core::dataset;
use stocksense_core::domain::record::SalesRecord;
use stocksense_core::domain::recommendation::{InventoryQuery, InventoryStatus};
use stocksense_core::model::DemandModel;
use stocksense_core::weather::WeatherSource;

/// Latest state per product/region, with blank weather resolved through `weather` when a
/// source is configured.
pub async fn build_queries(
    records: &[SalesRecord],
    as_of_date: NaiveDate,
    weather: Option<&dyn WeatherSource>,
) -> anyhow::Result<Vec<InventoryQuery>> {
    let mut queries = dataset::latest_per_group(records)
        .into_iter()
        .map(InventoryQuery::from_record)
        .collect::<Result<Vec<_>, _>>()?;

    for query in queries.iter_mut().filter(|q| q.needs_weather()) {
        let source = weather.with_context(|| {
            format!(
                "weather missing for product_id={} region={} and WEATHERAPI_KEY is not set",
                query.product_id, query.region
            )
        })?;
        query.weather = source.condition(&query.region, as_of_date).await?;
    }
    Ok(queries)
}

pub async fn run(
    model: &DemandModel,
    records: &[SalesRecord],
    as_of_date: NaiveDate,
    weather: Option<&dyn WeatherSource>,
) -> anyhow::Result<InventoryStatus> {
    let queries = build_queries(records, as_of_date, weather).await?;
    Ok(model.inventory_status(as_of_date, &queries)?)
}
