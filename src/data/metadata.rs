//! Sample metadata (clinical records)

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{DgeError, Result};

/// Clinical record table: one row per sample, categorical attribute columns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleMetadata {
    sample_ids: Vec<String>,
    /// Attribute name -> value per sample
    attributes: HashMap<String, Vec<String>>,
    /// Attribute names in file order
    attribute_order: Vec<String>,
}

impl SampleMetadata {
    pub fn new(sample_ids: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(sample_ids.len());
        if let Some(dup) = sample_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(DgeError::InvalidMetadata {
                reason: format!("Duplicate sample ID '{}'", dup),
            });
        }
        Ok(Self {
            sample_ids,
            attributes: HashMap::new(),
            attribute_order: Vec::new(),
        })
    }

    /// Add a categorical attribute column
    pub fn add_attribute(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} values", self.sample_ids.len()),
                got: format!("{} values", values.len()),
            });
        }
        if self.attributes.insert(name.to_string(), values).is_none() {
            self.attribute_order.push(name.to_string());
        }
        Ok(())
    }

    /// Values of an attribute, one per sample
    pub fn attribute(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(name).map(|v| v.as_slice())
    }

    /// Same as [`attribute`](Self::attribute) but errors on unknown names
    pub fn require_attribute(&self, name: &str) -> Result<&[String]> {
        self.attribute(name).ok_or_else(|| DgeError::InvalidMetadata {
            reason: format!(
                "attribute '{}' not found (available: {})",
                name,
                self.attribute_order.join(", ")
            ),
        })
    }

    pub fn attribute_names(&self) -> &[String] {
        &self.attribute_order
    }

    /// Sorted unique levels of an attribute
    pub fn levels(&self, name: &str) -> Result<Vec<String>> {
        let mut unique = self.require_attribute(name)?.to_vec();
        unique.sort();
        unique.dedup();
        Ok(unique)
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Sample indices whose attribute equals `level`
    pub fn samples_with_level(&self, name: &str, level: &str) -> Vec<usize> {
        self.attribute(name)
            .map(|values| {
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_str() == level)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Indices of samples where `attribute == value`; empty selection is an error
    pub fn select_where(&self, attribute: &str, value: &str) -> Result<Vec<usize>> {
        self.require_attribute(attribute)?;
        let selected = self.samples_with_level(attribute, value);
        if selected.is_empty() {
            return Err(DgeError::EmptyData {
                reason: format!("no samples with {} = '{}'", attribute, value),
            });
        }
        Ok(selected)
    }

    /// Restrict to the given samples, in the given order
    pub fn subset(&self, sample_indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = sample_indices.iter().find(|&&i| i >= self.n_samples()) {
            return Err(DgeError::InvalidInput {
                reason: format!("Sample index {} out of range", bad),
            });
        }
        let new_ids = sample_indices
            .iter()
            .map(|&i| self.sample_ids[i].clone())
            .collect();
        let mut new_meta = SampleMetadata::new(new_ids)?;

        for name in &self.attribute_order {
            let values = &self.attributes[name];
            let new_values = sample_indices.iter().map(|&i| values[i].clone()).collect();
            new_meta.add_attribute(name, new_values)?;
        }

        Ok(new_meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> SampleMetadata {
        let ids = vec!["s1", "s2", "s3", "s4"]
            .into_iter()
            .map(String::from)
            .collect();
        let mut meta = SampleMetadata::new(ids).unwrap();
        meta.add_attribute(
            "organ",
            vec!["kidney", "liver", "kidney", "liver"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
        .unwrap();
        meta.add_attribute(
            "condition",
            vec!["untrt", "untrt", "cis", "cis"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
        .unwrap();
        meta
    }

    #[test]
    fn test_levels_sorted() {
        let meta = sample_meta();
        assert_eq!(meta.levels("condition").unwrap(), vec!["cis", "untrt"]);
        assert!(meta.levels("batch").is_err());
    }

    #[test]
    fn test_select_and_subset() {
        let meta = sample_meta();
        let idx = meta.select_where("organ", "kidney").unwrap();
        assert_eq!(idx, vec![0, 2]);

        let sub = meta.subset(&idx).unwrap();
        assert_eq!(sub.sample_ids(), &["s1".to_string(), "s3".to_string()]);
        assert_eq!(sub.attribute("condition").unwrap(), &["untrt", "cis"]);
        assert_eq!(sub.attribute_names(), meta.attribute_names());
    }

    #[test]
    fn test_select_empty_is_error() {
        let meta = sample_meta();
        assert!(matches!(
            meta.select_where("organ", "brain"),
            Err(DgeError::EmptyData { .. })
        ));
    }

    #[test]
    fn test_attribute_length_checked() {
        let mut meta = sample_meta();
        assert!(meta.add_attribute("batch", vec!["a".to_string()]).is_err());
    }
}
