use crate::domain::record::SalesRecord;
use crate::error::{DemandError, Result};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

pub const REQUIRED_COLUMNS: &[&str] = &[
    "date",
    "product_id",
    "region",
    "weather",
    "is_festival",
    "quantity_sold",
];

pub fn load_sales_records(path: &Path) -> Result<Vec<SalesRecord>> {
    let file = std::fs::File::open(path).map_err(|e| {
        DemandError::validation(format!("cannot open dataset {}: {e}", path.display()))
    })?;
    let records = read_sales_records(file)?;
    tracing::info!(path = %path.display(), rows = records.len(), "loaded sales dataset");
    Ok(records)
}

pub fn read_sales_records<R: Read>(reader: R) -> Result<Vec<SalesRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| DemandError::validation(format!("cannot read dataset header: {e}")))?
        .clone();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !headers.iter().any(|h| h == *c))
        .collect();
    if !missing.is_empty() {
        return Err(DemandError::validation(format!(
            "dataset is missing required columns: {}",
            missing.join(", ")
        )));
    }

    let mut out = Vec::new();
    for (idx, row) in rdr.deserialize::<SalesRecord>().enumerate() {
        let record = row.map_err(|e| {
            // Header is line 1, so data row `idx` sits on line idx + 2.
            DemandError::validation(format!("dataset line {}: {e}", idx + 2))
        })?;
        out.push(record);
    }

    if out.is_empty() {
        return Err(DemandError::validation("dataset has no rows"));
    }
    Ok(out)
}

/// Most recent record of each (product_id, region) group, ordered by group key. Same-day
/// ties resolve to the row that appears last in the input.
pub fn latest_per_group(records: &[SalesRecord]) -> Vec<&SalesRecord> {
    let mut latest: BTreeMap<(i64, &str), &SalesRecord> = BTreeMap::new();
    for record in records {
        latest
            .entry(record.group_key())
            .and_modify(|current| {
                if record.date >= current.date {
                    *current = record;
                }
            })
            .or_insert(record);
    }
    latest.into_values().collect()
}
