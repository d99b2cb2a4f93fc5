use crate::error::{DemandError, Result};
use crate::features::frame::ensure_unique;
use crate::features::RESERVED_COLUMNS;
use std::collections::HashMap;

/// Ordered name -> value mapping for a single row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    entries: Vec<(String, f64)>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites `name`, keeping its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, v)| *v).collect()
    }

    /// Aligns this vector to `canonical`: canonical names missing here become 0, names not in
    /// `canonical` are dropped, output order follows `canonical`. Reindexing an already
    /// reindexed vector against the same schema returns it unchanged.
    pub fn reindex(&self, canonical: &[String]) -> Result<FeatureVector> {
        check_schema(canonical)?;

        let lookup: HashMap<&str, f64> = self
            .entries
            .iter()
            .map(|(n, v)| (n.as_str(), *v))
            .collect();

        let mut entries = Vec::with_capacity(canonical.len());
        for name in canonical {
            let value = lookup.get(name.as_str()).copied().unwrap_or(0.0);
            if !value.is_finite() {
                return Err(DemandError::FeatureSchemaMismatch(format!(
                    "feature {name} is not finite ({value})"
                )));
            }
            entries.push((name.clone(), value));
        }

        let dropped = self
            .entries
            .iter()
            .filter(|(n, _)| !canonical.contains(n))
            .count();
        if dropped > 0 {
            tracing::debug!(dropped, "features outside the trained schema were dropped");
        }

        Ok(FeatureVector { entries })
    }
}

impl FromIterator<(String, f64)> for FeatureVector {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut out = FeatureVector::new();
        for (name, value) in iter {
            out.insert(name, value);
        }
        out
    }
}

/// A usable schema is non-empty, duplicate-free and holds no reserved column.
pub fn check_schema(names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Err(DemandError::FeatureSchemaMismatch(
            "feature schema is empty".to_string(),
        ));
    }
    ensure_unique(names)?;
    if let Some(reserved) = names
        .iter()
        .find(|n| RESERVED_COLUMNS.contains(&n.as_str()))
    {
        return Err(DemandError::FeatureSchemaMismatch(format!(
            "reserved column {reserved} in feature schema"
        )));
    }
    Ok(())
}
