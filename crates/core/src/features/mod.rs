//! Feature engineering shared by training and single-row inference.
//!
//! Training runs the full pipeline over a date-sorted history: date decomposition, lagged
//! targets, trailing rolling statistics, one-hot categoricals, then the fill pass. A single
//! prediction row only has date and categorical features; lag and rolling columns need a
//! per-group history and are reconciled later by [`FeatureVector::reindex`], which zero-fills
//! them against the trained schema.

mod frame;
mod vector;

pub use frame::{Column, FeatureFrame, GroupIndex};
pub use vector::{check_schema, FeatureVector};

use crate::domain::contract::PredictionInput;
use crate::domain::record::SalesRecord;
use crate::error::{DemandError, Result};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeSet;
use std::fmt;

pub const TARGET_COLUMN: &str = "quantity_sold";

/// Columns that exist in the dataset but must never reach the model.
pub const RESERVED_COLUMNS: &[&str] = &[
    "date",
    TARGET_COLUMN,
    "product_name",
    "category",
    "recommendation",
    "current_stock",
    "restock_threshold",
];

pub const DATE_FEATURES: [&str; 3] = ["day_of_week", "month", "day_of_month"];

/// Row accessors the pipeline needs. Implemented by training records and prediction inputs
/// so both paths go through the same date and categorical code.
pub trait FeatureSource {
    fn date(&self) -> NaiveDate;
    fn product_id(&self) -> i64;
    fn region(&self) -> &str;
    fn weather(&self) -> &str;
    fn is_festival(&self) -> bool;
}

impl<T: FeatureSource + ?Sized> FeatureSource for &T {
    fn date(&self) -> NaiveDate {
        (**self).date()
    }
    fn product_id(&self) -> i64 {
        (**self).product_id()
    }
    fn region(&self) -> &str {
        (**self).region()
    }
    fn weather(&self) -> &str {
        (**self).weather()
    }
    fn is_festival(&self) -> bool {
        (**self).is_festival()
    }
}

impl FeatureSource for SalesRecord {
    fn date(&self) -> NaiveDate {
        self.date
    }
    fn product_id(&self) -> i64 {
        self.product_id
    }
    fn region(&self) -> &str {
        &self.region
    }
    fn weather(&self) -> &str {
        &self.weather
    }
    fn is_festival(&self) -> bool {
        self.is_festival
    }
}

impl FeatureSource for PredictionInput {
    fn date(&self) -> NaiveDate {
        self.date
    }
    fn product_id(&self) -> i64 {
        self.product_id
    }
    fn region(&self) -> &str {
        &self.region
    }
    fn weather(&self) -> &str {
        &self.weather
    }
    fn is_festival(&self) -> bool {
        self.is_festival
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Categorical {
    ProductId,
    Region,
    Weather,
    IsFestival,
}

impl Categorical {
    pub const ALL: [Categorical; 4] = [
        Categorical::ProductId,
        Categorical::Region,
        Categorical::Weather,
        Categorical::IsFestival,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            Categorical::ProductId => "product_id",
            Categorical::Region => "region",
            Categorical::Weather => "weather",
            Categorical::IsFestival => "is_festival",
        }
    }

    /// `None` for blank text, which encodes to no indicator at all.
    fn value<S: FeatureSource>(&self, row: &S) -> Option<CategoryValue> {
        match self {
            Categorical::ProductId => Some(CategoryValue::Int(row.product_id())),
            Categorical::Region => CategoryValue::text(row.region()),
            Categorical::Weather => CategoryValue::text(row.weather()),
            Categorical::IsFestival => Some(CategoryValue::Bool(row.is_festival())),
        }
    }

    pub fn indicator_name(&self, value: &CategoryValue) -> String {
        format!("{}_{}", self.column(), value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum CategoryValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl CategoryValue {
    fn text(s: &str) -> Option<Self> {
        let s = s.trim();
        (!s.is_empty()).then(|| CategoryValue::Text(s.to_string()))
    }
}

impl fmt::Display for CategoryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryValue::Bool(true) => f.write_str("True"),
            CategoryValue::Bool(false) => f.write_str("False"),
            CategoryValue::Int(v) => write!(f, "{v}"),
            CategoryValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureConfig {
    pub lags: Vec<usize>,
    pub rolling_windows: Vec<usize>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags: vec![1, 3, 7],
            rolling_windows: vec![3, 7, 14],
        }
    }
}

/// Output of the batch path: a fully filled feature frame plus the aligned target.
#[derive(Debug, Clone)]
pub struct TrainingFrame {
    pub features: FeatureFrame,
    pub target: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct FeaturePipeline {
    config: FeatureConfig,
}

impl FeaturePipeline {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn lag_column(lag: usize) -> String {
        format!("{TARGET_COLUMN}_lag_{lag}")
    }

    pub fn rolling_mean_column(window: usize) -> String {
        format!("{TARGET_COLUMN}_rolling_mean_{window}")
    }

    pub fn rolling_std_column(window: usize) -> String {
        format!("{TARGET_COLUMN}_rolling_std_{window}")
    }

    pub fn build_date_features<S: FeatureSource>(&self, rows: &[S]) -> Vec<Column> {
        let mut day_of_week = Vec::with_capacity(rows.len());
        let mut month = Vec::with_capacity(rows.len());
        let mut day_of_month = Vec::with_capacity(rows.len());
        for row in rows {
            let date = row.date();
            day_of_week.push(Some(date.weekday().num_days_from_monday() as f64));
            month.push(Some(date.month() as f64));
            day_of_month.push(Some(date.day() as f64));
        }
        vec![
            Column::new(DATE_FEATURES[0], day_of_week),
            Column::new(DATE_FEATURES[1], month),
            Column::new(DATE_FEATURES[2], day_of_month),
        ]
    }

    /// `quantity_sold` shifted by each configured lag within its group. Rows are expected to
    /// be sorted by date; the first `k` rows of a group get a missing value.
    pub fn build_lag_features(&self, rows: &[&SalesRecord], groups: &GroupIndex) -> Vec<Column> {
        self.config
            .lags
            .iter()
            .map(|&lag| {
                let mut values = vec![None; rows.len()];
                for members in groups.iter() {
                    for (pos, &row) in members.iter().enumerate() {
                        if pos >= lag {
                            values[row] = Some(rows[members[pos - lag]].quantity_sold);
                        }
                    }
                }
                Column::new(Self::lag_column(lag), values)
            })
            .collect()
    }

    /// Trailing mean and sample standard deviation over the previous `window` rows of the
    /// group. The current row's own target is never part of its window, so the first row of
    /// a group has no value and a single prior observation yields no deviation.
    pub fn build_rolling_features(&self, rows: &[&SalesRecord], groups: &GroupIndex) -> Vec<Column> {
        let mut out = Vec::with_capacity(self.config.rolling_windows.len() * 2);
        for &window in &self.config.rolling_windows {
            let mut means = vec![None; rows.len()];
            let mut stds = vec![None; rows.len()];
            for members in groups.iter() {
                for (pos, &row) in members.iter().enumerate() {
                    let start = pos.saturating_sub(window);
                    let history: Vec<f64> = members[start..pos]
                        .iter()
                        .map(|&i| rows[i].quantity_sold)
                        .collect();
                    let (mean, std) = mean_and_sample_std(&history);
                    means[row] = mean;
                    stds[row] = std;
                }
            }
            out.push(Column::new(Self::rolling_mean_column(window), means));
            out.push(Column::new(Self::rolling_std_column(window), stds));
        }
        out
    }

    /// One indicator column per distinct value, named `{column}_{value}`, values in ascending
    /// order. The source columns themselves never appear in the output.
    pub fn encode_categoricals<S: FeatureSource>(
        &self,
        rows: &[S],
        columns: &[Categorical],
    ) -> Vec<Column> {
        let mut out = Vec::new();
        for categorical in columns {
            let values: Vec<Option<CategoryValue>> =
                rows.iter().map(|row| categorical.value(row)).collect();
            let distinct: BTreeSet<&CategoryValue> = values.iter().flatten().collect();
            for value in distinct {
                let indicator = values
                    .iter()
                    .map(|v| Some(if v.as_ref() == Some(value) { 1.0 } else { 0.0 }))
                    .collect();
                out.push(Column::new(categorical.indicator_name(value), indicator));
            }
        }
        out
    }

    /// Forward-fill within each group in sorted order, then zero-fill whatever is still
    /// missing (rows with no earlier observation in their group).
    pub fn fill_missing(&self, frame: &mut FeatureFrame, groups: &GroupIndex) {
        for column in frame.columns_mut() {
            for members in groups.iter() {
                let mut last: Option<f64> = None;
                for &row in members {
                    match column.values[row] {
                        Some(v) => last = Some(v),
                        None => column.values[row] = last,
                    }
                }
            }
            for value in column.values.iter_mut() {
                if value.is_none() {
                    *value = Some(0.0);
                }
            }
        }
    }

    /// Full batch path over a training history.
    pub fn process(&self, records: &[SalesRecord]) -> Result<TrainingFrame> {
        if records.is_empty() {
            return Err(DemandError::validation("dataset is empty"));
        }
        for (idx, record) in records.iter().enumerate() {
            validate_record(idx, record)?;
        }

        // Stable sort keeps file order for same-day rows.
        let mut rows: Vec<&SalesRecord> = records.iter().collect();
        rows.sort_by_key(|r| r.date);
        let groups = GroupIndex::from_rows(&rows);

        let mut frame = FeatureFrame::new(rows.len());
        frame.extend(self.build_date_features(&rows))?;
        frame.extend(self.build_lag_features(&rows, &groups))?;
        frame.extend(self.build_rolling_features(&rows, &groups))?;
        frame.extend(self.encode_categoricals(&rows, &Categorical::ALL))?;
        self.fill_missing(&mut frame, &groups);

        tracing::debug!(
            rows = frame.rows(),
            columns = frame.width(),
            groups = groups.len(),
            "built training feature frame"
        );

        Ok(TrainingFrame {
            features: frame,
            target: rows.iter().map(|r| r.quantity_sold).collect(),
        })
    }

    /// Single-row path: date and categorical features only.
    pub fn prepare_prediction_features(&self, input: &PredictionInput) -> FeatureVector {
        let rows = std::slice::from_ref(input);
        self.build_date_features(rows)
            .into_iter()
            .chain(self.encode_categoricals(rows, &Categorical::ALL))
            .filter_map(|c| c.values.first().copied().flatten().map(|v| (c.name, v)))
            .collect()
    }
}

fn validate_record(idx: usize, record: &SalesRecord) -> Result<()> {
    if record.region.trim().is_empty() {
        return Err(DemandError::validation(format!("row {idx}: region is empty")));
    }
    if !record.quantity_sold.is_finite() {
        return Err(DemandError::validation(format!(
            "row {idx}: quantity_sold is not a finite number"
        )));
    }
    Ok(())
}

fn mean_and_sample_std(values: &[f64]) -> (Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (Some(mean), None);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (Some(mean), Some(var.sqrt()))
}
