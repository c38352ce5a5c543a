//! Persisted per-replicate outcome.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use sbc_common::{Error, ReplicateIndex};
use serde::{Deserialize, Serialize};

use crate::fit::{DrawTable, FitDiagnostics};
use crate::model::ParameterVector;

/// Final state of one replicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicateStatus {
    /// Ranks computed, fit looked healthy.
    Ok,
    /// Ranks computed, but the fitter reported non-convergence.
    Flagged,
    /// No ranks; excluded from aggregation.
    Failed,
}

impl ReplicateStatus {
    /// Whether the record contributes ranks.
    pub fn has_ranks(self) -> bool {
        !matches!(self, ReplicateStatus::Failed)
    }
}

impl std::fmt::Display for ReplicateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicateStatus::Ok => write!(f, "ok"),
            ReplicateStatus::Flagged => write!(f, "flagged"),
            ReplicateStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Posterior mean and variance of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSummary {
    pub mean: f64,
    pub variance: f64,
}

/// Error captured for a failed replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedError {
    pub code: u32,
    pub kind: String,
    pub message: String,
}

impl From<&Error> for RecordedError {
    fn from(err: &Error) -> Self {
        RecordedError {
            code: err.code(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Everything persisted for one replicate index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateRecord {
    pub schema_version: String,
    pub index: ReplicateIndex,
    pub status: ReplicateStatus,
    /// Generating parameter values.
    pub truth: ParameterVector,
    /// Simulated outcome column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Vec<f64>>,
    /// Thinned posterior draws.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draws: Option<DrawTable>,
    #[serde(default)]
    pub ranks: IndexMap<String, u32>,
    #[serde(default)]
    pub posterior: IndexMap<String, PosteriorSummary>,
    /// Thinned draw count the ranks were computed against.
    pub max_rank: u32,
    #[serde(default)]
    pub diagnostics: FitDiagnostics,
    /// Reasons the replicate was flagged.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordedError>,
    pub backend: String,
    pub elapsed_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl ReplicateRecord {
    /// Record for a replicate that never produced ranks.
    pub fn failed(
        index: ReplicateIndex,
        truth: ParameterVector,
        max_rank: u32,
        backend: &str,
        err: &Error,
        elapsed_ms: u64,
    ) -> Self {
        ReplicateRecord {
            schema_version: sbc_common::SCHEMA_VERSION.to_string(),
            index,
            status: ReplicateStatus::Failed,
            truth,
            outcome: None,
            draws: None,
            ranks: IndexMap::new(),
            posterior: IndexMap::new(),
            max_rank,
            diagnostics: FitDiagnostics::default(),
            issues: Vec::new(),
            error: Some(RecordedError::from(err)),
            backend: backend.to_string(),
            elapsed_ms,
            finished_at: Utc::now(),
        }
    }

    /// Check the record against the run's parameter schema and rank support.
    pub fn validate(&self, parameters: &[String], max_rank: u32) -> Result<(), Error> {
        if self.max_rank != max_rank {
            return Err(Error::RecordCorrupted(format!(
                "{}: ranks computed against {} draws, run uses {}",
                self.index.file_stem(),
                self.max_rank,
                max_rank
            )));
        }
        if !self.status.has_ranks() {
            return Ok(());
        }
        for name in parameters {
            match self.ranks.get(name) {
                Some(&r) if r <= max_rank => {}
                Some(&r) => {
                    return Err(Error::RecordCorrupted(format!(
                        "{}: rank {} for {} exceeds {}",
                        self.index.file_stem(),
                        r,
                        name,
                        max_rank
                    )))
                }
                None => {
                    return Err(Error::RecordCorrupted(format!(
                        "{}: missing rank for {}",
                        self.index.file_stem(),
                        name
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Per-parameter posterior mean and variance from a draw table.
pub fn summarize_draws(draws: &DrawTable) -> IndexMap<String, PosteriorSummary> {
    draws
        .parameters
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let (mean, variance) = sbc_math::mean_variance(&draws.column(j));
            (name.clone(), PosteriorSummary { mean, variance })
        })
        .collect()
}
