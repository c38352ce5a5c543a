//! Parameter vectors: ordered name -> value maps.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One named draw of every scalar parameter, in schema order.
///
/// Produced by the prior sampler as ground truth for a replicate, and used
/// row-wise for posterior draws.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterVector {
    values: IndexMap<String, f64>,
}

impl ParameterVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        ParameterVector {
            values: IndexMap::with_capacity(n),
        }
    }

    /// Insert or overwrite a value; insertion order is kept for new names.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Values in the order of `names`; `None` if any name is absent.
    pub fn values_for(&self, names: &[String]) -> Option<Vec<f64>> {
        names.iter().map(|n| self.get(n)).collect()
    }
}

impl FromIterator<(String, f64)> for ParameterVector {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        ParameterVector {
            values: iter.into_iter().collect(),
        }
    }
}
