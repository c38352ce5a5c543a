//! Covariate design templates.
//!
//! The design is the fixed part of the observed data: predictor values,
//! grouping labels and trial counts. Every simulated dataset reuses it
//! unchanged and differs only in the outcome column.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::validate::{ValidationError, ValidationResult};

/// A design column: numeric values or group labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Column {
    Numbers(Vec<f64>),
    Labels(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numbers(v) => v.len(),
            Column::Labels(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Column::Numbers(_) => "numeric",
            Column::Labels(_) => "label",
        }
    }
}

/// Fixed covariate structure shared by every replicate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Design {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Observation count for designs without columns (intercept-only models).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_obs: Option<usize>,

    #[serde(default)]
    pub columns: IndexMap<String, Column>,
}

impl Design {
    pub fn from_file(path: &Path) -> ValidationResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> ValidationResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ValidationError::ParseError(format!("Invalid design JSON: {}", e)))
    }

    /// Number of observations: the explicit count, else the first column's length.
    pub fn n_obs(&self) -> usize {
        self.n_obs
            .or_else(|| self.columns.values().next().map(Column::len))
            .unwrap_or(0)
    }

    pub fn numeric(&self, name: &str) -> Option<&[f64]> {
        match self.columns.get(name)? {
            Column::Numbers(v) => Some(v),
            Column::Labels(_) => None,
        }
    }

    pub fn labels(&self, name: &str) -> Option<&[String]> {
        match self.columns.get(name)? {
            Column::Labels(v) => Some(v),
            Column::Numbers(_) => None,
        }
    }

    /// Distinct labels of a grouping column in first-appearance order.
    pub fn levels(&self, name: &str) -> Option<Vec<String>> {
        let labels = self.labels(name)?;
        let mut seen = HashSet::new();
        Some(
            labels
                .iter()
                .filter(|l| seen.insert(l.as_str()))
                .cloned()
                .collect(),
        )
    }

    pub fn with_numbers(mut self, name: &str, values: Vec<f64>) -> Self {
        self.columns.insert(name.to_string(), Column::Numbers(values));
        self
    }

    pub fn with_labels(mut self, name: &str, labels: Vec<String>) -> Self {
        self.columns.insert(name.to_string(), Column::Labels(labels));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_and_label_columns() {
        let design = Design::from_json_str(
            r#"{ "columns": { "x": [0, 1.5, 2], "g": ["b", "a", "b"] } }"#,
        )
        .unwrap();
        assert_eq!(design.n_obs(), 3);
        assert_eq!(design.numeric("x"), Some(&[0.0, 1.5, 2.0][..]));
        assert!(design.numeric("g").is_none());
        assert_eq!(design.columns["g"].kind(), "label");
    }

    #[test]
    fn levels_keep_first_appearance_order() {
        let design = Design::default().with_labels(
            "county",
            ["c", "a", "c", "b", "a"].iter().map(|s| s.to_string()).collect(),
        );
        assert_eq!(design.levels("county").unwrap(), vec!["c", "a", "b"]);
        assert!(design.levels("missing").is_none());
    }

    #[test]
    fn explicit_count_for_column_free_design() {
        let design = Design::from_json_str(r#"{ "n_obs": 12 }"#).unwrap();
        assert_eq!(design.n_obs(), 12);
        assert!(design.columns.is_empty());
    }
}
