use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// One historical sales row as it appears in the training dataset.
///
/// `product_name` and `category` are descriptive only; `current_stock` and
/// `restock_threshold` describe inventory state for the status report. None of them are
/// model inputs (see [`crate::features::RESERVED_COLUMNS`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesRecord {
    pub date: NaiveDate,
    pub product_id: i64,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub category: String,
    pub region: String,
    #[serde(default)]
    pub weather: String,
    #[serde(deserialize_with = "deserialize_flag")]
    pub is_festival: bool,
    pub quantity_sold: f64,
    #[serde(default)]
    pub current_stock: Option<i64>,
    #[serde(default)]
    pub restock_threshold: Option<i64>,
}

impl SalesRecord {
    pub fn group_key(&self) -> (i64, &str) {
        (self.product_id, self.region.as_str())
    }
}

/// Accepts the boolean spellings found in exported spreadsheets.
pub fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(other) => Err(serde::de::Error::custom(format!(
            "invalid boolean flag: {other}"
        ))),
        Flag::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid boolean flag: {other}"
            ))),
        },
    }
}
