use anyhow::Context;
use chrono::{Datelike, Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use stocksense_core::domain::record::SalesRecord;

const PRODUCTS: &[(i64, &str, &str, f64)] = &[
    (101, "Whole Milk 1L", "Dairy", 45.0),
    (102, "Basmati Rice 5kg", "Grains", 18.0),
    (103, "Sunflower Oil 1L", "Cooking", 25.0),
    (104, "Sparkling Water 500ml", "Beverages", 60.0),
];
const REGIONS: &[(&str, f64)] = &[("North", 1.0), ("South", 1.3), ("East", 0.8)];
const WEATHER: &[(&str, f64)] = &[("Sunny", 1.1), ("Cloudy", 1.0), ("Rainy", 0.85)];

#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub rows_per_group: usize,
    pub start_date: NaiveDate,
    pub seed: u64,
}

impl SeedOptions {
    pub fn new(rows_per_group: usize, seed: u64) -> anyhow::Result<Self> {
        anyhow::ensure!(
            (1..=3650).contains(&rows_per_group),
            "rows per group must be 1..=3650 (got {rows_per_group})"
        );
        Ok(Self {
            rows_per_group,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).context("invalid start date")?,
            seed,
        })
    }
}

/// Deterministic daily history for every product/region pair: a base rate shaped by
/// region, weekday, weather and festivals plus bounded noise.
pub fn generate_sales_dataset(opts: &SeedOptions) -> Vec<SalesRecord> {
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut out = Vec::with_capacity(PRODUCTS.len() * REGIONS.len() * opts.rows_per_group);

    for day in 0..opts.rows_per_group {
        let date = opts.start_date + Duration::days(day as i64);
        let weekend = date.weekday().num_days_from_monday() >= 5;
        let is_festival = date.day() == 1 || date.day() == 15;
        for &(region, region_factor) in REGIONS {
            let (weather, weather_factor) = WEATHER[rng.random_range(0..WEATHER.len())];
            for &(product_id, name, category, base) in PRODUCTS {
                let mut demand = base * region_factor * weather_factor;
                if weekend {
                    demand *= 1.2;
                }
                if is_festival {
                    demand *= 1.5;
                }
                demand += rng.random_range(-3.0..3.0);
                let quantity_sold = demand.max(0.0).round();
                let restock_threshold = (base * region_factor * 0.8).round() as i64;
                out.push(SalesRecord {
                    date,
                    product_id,
                    product_name: name.to_string(),
                    category: category.to_string(),
                    region: region.to_string(),
                    weather: weather.to_string(),
                    is_festival,
                    quantity_sold,
                    current_stock: Some(rng.random_range(0..(base as i64 * 4))),
                    restock_threshold: Some(restock_threshold),
                });
            }
        }
    }
    out
}

pub fn write_dataset(path: &Path, records: &[SalesRecord]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open {} for writing", path.display()))?;
    for record in records {
        writer.serialize(record).context("failed to write dataset row")?;
    }
    writer.flush().context("failed to flush dataset")?;
    Ok(())
}
