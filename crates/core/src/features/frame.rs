use crate::domain::record::SalesRecord;
use crate::error::{DemandError, Result};
use crate::features::RESERVED_COLUMNS;
use std::collections::{BTreeMap, HashSet};

/// A named numeric column; `None` marks a value still missing before the fill pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Column-major feature table with a fixed row count and unique column names.
#[derive(Debug, Clone, Default)]
pub struct FeatureFrame {
    rows: usize,
    columns: Vec<Column>,
}

impl FeatureFrame {
    pub fn new(rows: usize) -> Self {
        Self {
            rows,
            columns: Vec::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn push(&mut self, column: Column) -> Result<()> {
        if column.values.len() != self.rows {
            return Err(DemandError::FeatureSchemaMismatch(format!(
                "column {} has {} values, frame has {} rows",
                column.name,
                column.values.len(),
                self.rows
            )));
        }
        if RESERVED_COLUMNS.contains(&column.name.as_str()) {
            return Err(DemandError::FeatureSchemaMismatch(format!(
                "reserved column {} cannot be a feature",
                column.name
            )));
        }
        if self.columns.iter().any(|c| c.name == column.name) {
            return Err(DemandError::FeatureSchemaMismatch(format!(
                "duplicate feature column {}",
                column.name
            )));
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn extend(&mut self, columns: impl IntoIterator<Item = Column>) -> Result<()> {
        for column in columns {
            self.push(column)?;
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub(crate) fn columns_mut(&mut self) -> impl Iterator<Item = &mut Column> {
        self.columns.iter_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.columns
            .iter()
            .all(|c| c.values.iter().all(|v| v.map(f64::is_finite).unwrap_or(false)))
    }

    /// Row-major matrix in column order. Fails if any value survived the fill pass missing.
    pub fn to_rows(&self) -> Result<Vec<Vec<f64>>> {
        let mut out = vec![Vec::with_capacity(self.columns.len()); self.rows];
        for column in &self.columns {
            for (row, value) in column.values.iter().enumerate() {
                match value {
                    Some(v) if v.is_finite() => out[row].push(*v),
                    _ => {
                        return Err(DemandError::FeatureSchemaMismatch(format!(
                            "column {} row {row} is missing after fill",
                            column.name
                        )))
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Row positions of each (product_id, region) group, in the order rows were given.
#[derive(Debug, Clone, Default)]
pub struct GroupIndex {
    groups: Vec<Vec<usize>>,
}

impl GroupIndex {
    pub fn from_rows(rows: &[&SalesRecord]) -> Self {
        let mut by_key: BTreeMap<(i64, &str), Vec<usize>> = BTreeMap::new();
        for (idx, row) in rows.iter().enumerate() {
            by_key.entry(row.group_key()).or_default().push(idx);
        }
        Self {
            groups: by_key.into_values().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vec<usize>> {
        self.groups.iter()
    }
}

/// Names must be non-empty and unique to act as a schema.
pub(crate) fn ensure_unique(names: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(DemandError::FeatureSchemaMismatch(format!(
                "duplicate feature name {name}"
            )));
        }
    }
    Ok(())
}
