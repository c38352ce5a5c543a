//! Prior predictive summaries.
//!
//! Simulates datasets from prior then likelihood and reports where common
//! outcome statistics land, to catch priors that imply absurd data before
//! spending compute on calibration.

use std::fmt::Write as _;

use indexmap::IndexMap;
use sbc_common::{Error, OutputFormat, Result};
use serde::Serialize;

use crate::model::{sample_prior, simulate, CompiledModel};
use crate::runner::seed::{stream_rng, Stream};

/// Statistics computed for each simulated outcome vector.
pub const STATISTICS: [&str; 5] = ["mean", "sd", "min", "max", "frac_zero"];

/// 5%, 50% and 95% quantiles of one statistic across datasets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatQuantiles {
    pub q05: f64,
    pub q50: f64,
    pub q95: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriorPredictive {
    pub model: String,
    pub datasets: usize,
    pub seed: u64,
    pub n_obs: usize,
    /// Datasets whose simulation failed numerically.
    pub failed: usize,
    pub statistics: IndexMap<String, StatQuantiles>,
}

fn outcome_statistics(y: &[f64]) -> [f64; 5] {
    let (mean, var) = sbc_math::mean_variance(y);
    let min = y.iter().copied().fold(f64::INFINITY, f64::min);
    let max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let zeros = y.iter().filter(|&&v| v == 0.0).count();
    let frac_zero = if y.is_empty() {
        f64::NAN
    } else {
        zeros as f64 / y.len() as f64
    };
    [mean, var.sqrt(), min, max, frac_zero]
}

/// Simulate `n` prior predictive datasets. Streams derive from `seed` so
/// the summary is reproducible.
pub fn prior_predictive(model: &CompiledModel, n: usize, seed: u64) -> Result<PriorPredictive> {
    if n == 0 {
        return Err(Error::Config("prior predictive needs at least one dataset".to_string()));
    }
    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(n); STATISTICS.len()];
    let mut failed = 0;
    for i in 0..n {
        let mut rng = stream_rng(seed, i as u32 + 1, Stream::Simulate);
        let params = sample_prior(model, &mut rng)?;
        match simulate(model, &params, &mut rng) {
            Ok(data) => {
                for (col, v) in columns.iter_mut().zip(outcome_statistics(&data.outcome)) {
                    col.push(v);
                }
            }
            Err(Error::NumericalInstability(_)) => failed += 1,
            Err(e) => return Err(e),
        }
    }
    let statistics = STATISTICS
        .iter()
        .zip(&columns)
        .map(|(name, col)| {
            let q = sbc_math::quantiles(col, &[0.05, 0.5, 0.95]);
            (
                name.to_string(),
                StatQuantiles {
                    q05: q[0],
                    q50: q[1],
                    q95: q[2],
                },
            )
        })
        .collect();
    Ok(PriorPredictive {
        model: model.spec().name.clone(),
        datasets: n,
        seed,
        n_obs: model.n_obs(),
        failed,
        statistics,
    })
}

pub fn render(summary: &PriorPredictive, format: OutputFormat) -> Result<String> {
    let mut out = String::new();
    match format {
        OutputFormat::Json => return Ok(serde_json::to_string_pretty(summary)?),
        OutputFormat::Summary => {
            let _ = writeln!(
                out,
                "Prior predictive: {} ({} datasets x {} observations, seed {})",
                summary.model, summary.datasets, summary.n_obs, summary.seed
            );
            let _ = writeln!(out, "  {:<10} {:>12} {:>12} {:>12}", "statistic", "5%", "50%", "95%");
            for (name, q) in &summary.statistics {
                let _ = writeln!(out, "  {:<10} {:>12.4} {:>12.4} {:>12.4}", name, q.q05, q.q50, q.q95);
            }
        }
        OutputFormat::Md => {
            let _ = writeln!(out, "# Prior predictive: {}\n", summary.model);
            let _ = writeln!(
                out,
                "{} datasets of {} observations (seed {}).\n",
                summary.datasets, summary.n_obs, summary.seed
            );
            out.push_str("| Statistic | 5% | 50% | 95% |\n|---|---|---|---|\n");
            for (name, q) in &summary.statistics {
                let _ = writeln!(out, "| {} | {:.4} | {:.4} | {:.4} |", name, q.q05, q.q50, q.q95);
            }
        }
    }
    if summary.failed > 0 {
        let _ = writeln!(out, "\n{} dataset(s) failed to simulate", summary.failed);
    }
    Ok(out)
}
