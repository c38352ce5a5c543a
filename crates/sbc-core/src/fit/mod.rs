//! Posterior fitting.
//!
//! The core only sees a [`PosteriorFitter`]: give it a simulated dataset and
//! the compiled model, get back a table of raw posterior draws whose columns
//! are the model's parameter names. Thinning to the fixed `L` the rank
//! statistic needs happens here, after the fitter returns.
//!
//! Two backends:
//! - [`ConjugateNormalFitter`]: exact posterior for conjugate normal
//!   regressions, the reference oracle
//! - [`CommandFitter`]: an external sampler process speaking JSON

pub mod command;
pub mod conjugate;
pub mod diagnostics;

pub use command::{CommandFitter, FitRequestMessage, FitResponseMessage};
pub use conjugate::ConjugateNormalFitter;

use std::time::{Duration, Instant};

use rand::RngCore;
use sbc_common::Error;
use sbc_config::{Backend, RunConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::model::{CompiledModel, SimulatedDataset};

/// Rows of posterior draws over named columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawTable {
    pub parameters: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    /// Chain id of every row, when the sampler ran several chains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains: Option<Vec<u32>>,
}

impl DrawTable {
    pub fn new(parameters: Vec<String>) -> Self {
        DrawTable {
            parameters,
            rows: Vec::new(),
            chains: None,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p == name)
    }

    pub fn column(&self, idx: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[idx]).collect()
    }

    /// Draws of one column split by chain, in row order. Without chain ids
    /// the whole column is one chain.
    pub fn chain_columns(&self, idx: usize) -> Vec<Vec<f64>> {
        let Some(chains) = &self.chains else {
            return vec![self.column(idx)];
        };
        let mut ids: Vec<u32> = Vec::new();
        let mut out: Vec<Vec<f64>> = Vec::new();
        for (row, &chain) in self.rows.iter().zip(chains) {
            let slot = match ids.iter().position(|&c| c == chain) {
                Some(slot) => slot,
                None => {
                    ids.push(chain);
                    out.push(Vec::new());
                    out.len() - 1
                }
            };
            out[slot].push(row[idx]);
        }
        out
    }

    /// Check that columns match `expected` exactly (same names, same order)
    /// and every row is complete and finite.
    pub fn check_against(&self, expected: &[String]) -> Result<(), FitError> {
        if self.parameters != expected {
            let missing: Vec<&str> = expected
                .iter()
                .filter(|e| !self.parameters.contains(e))
                .map(String::as_str)
                .collect();
            let unexpected: Vec<&str> = self
                .parameters
                .iter()
                .filter(|p| !expected.contains(p))
                .map(String::as_str)
                .collect();
            return Err(FitError::Schema(format!(
                "posterior columns differ from the parameter schema (missing: [{}], unexpected: [{}])",
                missing.join(", "),
                unexpected.join(", ")
            )));
        }
        if let Some(chains) = &self.chains {
            if chains.len() != self.rows.len() {
                return Err(FitError::Schema(format!(
                    "{} chain ids for {} draws",
                    chains.len(),
                    self.rows.len()
                )));
            }
        }
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != expected.len() {
                return Err(FitError::Schema(format!(
                    "draw {} has {} values, expected {}",
                    i,
                    row.len(),
                    expected.len()
                )));
            }
            if let Some(j) = row.iter().position(|v| !v.is_finite()) {
                return Err(FitError::Numerical(format!(
                    "draw {} of '{}' is {}",
                    i, expected[j], row[j]
                )));
            }
        }
        Ok(())
    }
}

/// Convergence diagnostics reported by (or computed for) one fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    #[serde(default)]
    pub divergences: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rhat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_ess: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl FitDiagnostics {
    /// Combine two sets of diagnostics, keeping the worse of each.
    pub fn merge(mut self, other: FitDiagnostics) -> FitDiagnostics {
        self.divergences = self.divergences.max(other.divergences);
        self.max_rhat = worse(self.max_rhat, other.max_rhat, f64::max);
        self.min_ess = worse(self.min_ess, other.min_ess, f64::min);
        self.warnings.extend(other.warnings);
        self
    }

    /// Reasons to flag the fit as non-converged; empty when it looks fine.
    pub fn convergence_issues(&self, rhat_threshold: f64, min_ess: f64) -> Vec<String> {
        let mut issues = Vec::new();
        if self.divergences > 0 {
            issues.push(format!("{} divergent transitions", self.divergences));
        }
        if let Some(rhat) = self.max_rhat {
            if !(rhat <= rhat_threshold) {
                issues.push(format!("max R-hat {:.3} above {}", rhat, rhat_threshold));
            }
        }
        if let Some(ess) = self.min_ess {
            if !(ess >= min_ess) {
                issues.push(format!("min bulk ESS {:.0} below {}", ess, min_ess));
            }
        }
        issues
    }
}

fn worse(a: Option<f64>, b: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(pick(x, y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Everything a fitter needs for one replicate.
#[derive(Debug, Clone, Copy)]
pub struct FitRequest<'a> {
    pub model: &'a CompiledModel,
    pub dataset: &'a SimulatedDataset,
    /// Raw draws to return before thinning.
    pub n_raw_draws: usize,
    /// Abandon the fit after this instant.
    pub deadline: Option<Instant>,
}

impl FitRequest<'_> {
    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// Raw posterior draws plus diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutput {
    pub draws: DrawTable,
    pub diagnostics: FitDiagnostics,
}

/// Errors raised by a fitter.
#[derive(ThisError, Debug)]
pub enum FitError {
    #[error("{backend} cannot fit this model: {reason}")]
    Unsupported { backend: &'static str, reason: String },

    #[error("fit exceeded its {seconds}s budget")]
    Timeout { seconds: u64 },

    #[error("{0}")]
    Failed(String),

    #[error("{0}")]
    Schema(String),

    #[error("{0}")]
    Numerical(String),

    #[error("sampler I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("sampler protocol: {0}")]
    Protocol(#[from] serde_json::Error),
}

impl From<FitError> for Error {
    fn from(err: FitError) -> Self {
        match err {
            FitError::Unsupported { .. } => Error::Config(err.to_string()),
            FitError::Timeout { seconds } => Error::FitTimeout { seconds },
            FitError::Schema(message) => Error::SchemaMismatch(message),
            FitError::Numerical(message) => Error::NumericalInstability(message),
            FitError::Failed(_) | FitError::Io(_) | FitError::Protocol(_) => {
                Error::FitFailed(err.to_string())
            }
        }
    }
}

/// A posterior fitting backend.
pub trait PosteriorFitter: Send + Sync {
    /// Short backend name for logs and records.
    fn name(&self) -> &'static str;

    /// Whether this backend can fit `model` at all. Checked once before a
    /// run starts.
    fn supports(&self, model: &CompiledModel) -> Result<(), FitError>;

    /// Fit one simulated dataset. `rng` is the replicate's fit stream.
    fn fit(&self, request: &FitRequest<'_>, rng: &mut dyn RngCore) -> Result<FitOutput, FitError>;
}

/// Build the fitter a run configuration asks for.
pub fn fitter_for(config: &RunConfig) -> Result<Box<dyn PosteriorFitter>, Error> {
    match config.backend {
        Backend::Conjugate => Ok(Box::new(ConjugateNormalFitter::new())),
        Backend::Command => {
            let fitter = CommandFitter::new(config.fit_command.clone()).map_err(Error::from)?;
            Ok(Box::new(fitter.with_timeout_secs(config.fit_timeout_secs)))
        }
    }
}

/// Keep every `stride`-th draw counted back from the last one until `l`
/// remain, returned in original order.
///
/// Counting from the end keeps the most-adapted draws; fewer than `l`
/// selectable draws is `InsufficientDraws`.
pub fn thin(draws: &DrawTable, stride: usize, l: usize) -> Result<DrawTable, Error> {
    let stride = stride.max(1);
    let n = draws.len();
    let available = if n == 0 { 0 } else { (n - 1) / stride + 1 };
    if available < l {
        return Err(Error::InsufficientDraws {
            requested: l,
            available,
        });
    }
    let mut picked: Vec<usize> = (0..l).map(|k| n - 1 - k * stride).collect();
    picked.reverse();
    Ok(DrawTable {
        parameters: draws.parameters.clone(),
        rows: picked.iter().map(|&i| draws.rows[i].clone()).collect(),
        chains: draws
            .chains
            .as_ref()
            .map(|c| picked.iter().map(|&i| c[i]).collect()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(n: usize) -> DrawTable {
        let mut t = DrawTable::new(vec!["a".to_string(), "b".to_string()]);
        t.rows = (0..n).map(|i| vec![i as f64, -(i as f64)]).collect();
        t
    }

    #[test]
    fn thin_counts_from_the_end() {
        let thinned = thin(&table(10), 3, 3).unwrap();
        assert_eq!(thinned.column(0), vec![3.0, 6.0, 9.0]);
        assert_eq!(thinned.len(), 3);
    }

    #[test]
    fn thin_exact_fit() {
        // 990 raw draws, stride 10 -> exactly 99
        let thinned = thin(&table(990), 10, 99).unwrap();
        assert_eq!(thinned.len(), 99);
        assert_eq!(thinned.rows[0][0], 9.0);
        assert_eq!(thinned.rows[98][0], 989.0);
    }

    #[test]
    fn thin_reports_shortfall() {
        let err = thin(&table(20), 10, 3).unwrap_err();
        match err {
            Error::InsufficientDraws {
                requested,
                available,
            } => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            thin(&table(0), 1, 1),
            Err(Error::InsufficientDraws { available: 0, .. })
        ));
    }

    #[test]
    fn thin_keeps_chain_ids() {
        let mut t = table(6);
        t.chains = Some(vec![1, 1, 1, 2, 2, 2]);
        let thinned = thin(&t, 2, 3).unwrap();
        assert_eq!(thinned.chains, Some(vec![1, 2, 2]));
    }

    #[test]
    fn chain_columns_group_rows() {
        let mut t = table(4);
        t.chains = Some(vec![7, 3, 7, 3]);
        assert_eq!(t.chain_columns(0), vec![vec![0.0, 2.0], vec![1.0, 3.0]]);
        t.chains = None;
        assert_eq!(t.chain_columns(1).len(), 1);
    }

    #[test]
    fn schema_check_names_differences() {
        let t = table(2);
        let err = t
            .check_against(&["a".to_string(), "c".to_string()])
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("missing: [c]"), "{msg}");
        assert!(msg.contains("unexpected: [b]"), "{msg}");

        let mut bad = table(2);
        bad.rows[1][1] = f64::NAN;
        assert!(matches!(
            bad.check_against(&["a".to_string(), "b".to_string()]),
            Err(FitError::Numerical(_))
        ));
    }

    #[test]
    fn diagnostics_flag_problems() {
        let clean = FitDiagnostics {
            max_rhat: Some(1.01),
            min_ess: Some(400.0),
            ..Default::default()
        };
        assert!(clean.convergence_issues(1.05, 100.0).is_empty());

        let bad = clean.clone().merge(FitDiagnostics {
            divergences: 3,
            max_rhat: Some(1.2),
            min_ess: Some(50.0),
            warnings: vec!["treedepth".to_string()],
        });
        let issues = bad.convergence_issues(1.05, 100.0);
        assert_eq!(issues.len(), 3);
        assert_eq!(bad.warnings, vec!["treedepth".to_string()]);

        let nan = FitDiagnostics {
            max_rhat: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(nan.convergence_issues(1.05, 100.0).len(), 1);
    }

    #[test]
    fn fit_errors_map_to_taxonomy() {
        assert_eq!(Error::from(FitError::Timeout { seconds: 5 }).code(), 23);
        assert_eq!(Error::from(FitError::Schema("x".into())).code(), 12);
        assert_eq!(Error::from(FitError::Failed("x".into())).code(), 22);
    }
}
