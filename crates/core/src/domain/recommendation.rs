use crate::domain::contract::PredictionInput;
use crate::domain::record::SalesRecord;
use crate::error::{DemandError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "Restock")]
    Restock,
    #[serde(rename = "Overstock")]
    Overstock,
    #[serde(rename = "Stock OK")]
    StockOk,
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Restock => "Restock",
            Recommendation::Overstock => "Overstock",
            Recommendation::StockOk => "Stock OK",
            Recommendation::NotApplicable => "N/A",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stock decision rule. Rules are evaluated in order; the first match wins:
///
/// 1. `current_stock <= restock_threshold` -> [`Recommendation::Restock`]
/// 2. `current_stock > 2 * predicted_demand` -> [`Recommendation::Overstock`]
/// 3. otherwise [`Recommendation::StockOk`]
pub fn recommend(predicted_demand: f64, current_stock: i64, restock_threshold: i64) -> Recommendation {
    if current_stock <= restock_threshold {
        Recommendation::Restock
    } else if current_stock as f64 > predicted_demand * 2.0 {
        Recommendation::Overstock
    } else {
        Recommendation::StockOk
    }
}

/// Same rule, but without a known stock level no recommendation is made.
pub fn recommend_optional(
    predicted_demand: f64,
    current_stock: Option<i64>,
    restock_threshold: i64,
) -> Recommendation {
    match current_stock {
        Some(stock) => recommend(predicted_demand, stock, restock_threshold),
        None => Recommendation::NotApplicable,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub predicted_demand: f64,
    pub confidence_score: f64,
    pub label: Recommendation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockRecommendation {
    pub product_id: i64,
    pub product_name: String,
    pub region: String,
    pub current_stock: i64,
    pub predicted_demand: f64,
    pub recommendation: Recommendation,
    pub restock_threshold: i64,
}

/// The latest known inventory state of one (product, region) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryQuery {
    pub product_id: i64,
    pub product_name: String,
    pub region: String,
    pub weather: String,
    pub is_festival: bool,
    pub current_stock: i64,
    pub restock_threshold: i64,
}

impl InventoryQuery {
    pub fn from_record(record: &SalesRecord) -> Result<Self> {
        let missing = |column: &str| {
            DemandError::validation(format!(
                "{column} is missing for product_id={} region={} on {}",
                record.product_id, record.region, record.date
            ))
        };
        Ok(Self {
            product_id: record.product_id,
            product_name: record.product_name.clone(),
            region: record.region.clone(),
            weather: record.weather.trim().to_string(),
            is_festival: record.is_festival,
            current_stock: record.current_stock.ok_or_else(|| missing("current_stock"))?,
            restock_threshold: record
                .restock_threshold
                .ok_or_else(|| missing("restock_threshold"))?,
        })
    }

    pub fn needs_weather(&self) -> bool {
        self.weather.trim().is_empty()
    }

    pub fn to_input(&self, date: NaiveDate) -> Result<PredictionInput> {
        if self.needs_weather() {
            return Err(DemandError::validation(format!(
                "weather unresolved for product_id={} region={}",
                self.product_id, self.region
            )));
        }
        Ok(PredictionInput {
            date,
            product_id: self.product_id,
            region: self.region.clone(),
            weather: self.weather.clone(),
            is_festival: self.is_festival,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryStatus {
    pub items: Vec<StockRecommendation>,
    pub total_items: usize,
    pub low_stock_count: usize,
    pub overstock_count: usize,
}

impl InventoryStatus {
    pub fn from_items(items: Vec<StockRecommendation>) -> Self {
        let low_stock_count = items
            .iter()
            .filter(|i| i.recommendation == Recommendation::Restock)
            .count();
        let overstock_count = items
            .iter()
            .filter(|i| i.recommendation == Recommendation::Overstock)
            .count();
        Self {
            total_items: items.len(),
            items,
            low_stock_count,
            overstock_count,
        }
    }
}
