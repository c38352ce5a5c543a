//! ECDF-difference curves with a simulated null envelope.
//!
//! Bin-free view of rank uniformity: the empirical CDF of the ranks minus
//! the discrete uniform CDF, evaluated at every rank value. The envelope is
//! the pointwise central interval of the same curve computed from uniform
//! rank samples of the same size.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sbc_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// One evaluation point of the curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EcdfPoint {
    pub rank: u32,
    /// Uniform CDF at `rank`, `(rank + 1) / (L + 1)`.
    pub fraction: f64,
    pub diff: f64,
    pub lower: f64,
    pub upper: f64,
}

impl EcdfPoint {
    pub fn outside(&self) -> bool {
        self.diff < self.lower || self.diff > self.upper
    }
}

/// ECDF difference of one parameter's ranks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcdfDiff {
    pub max_rank: u32,
    pub replicates: usize,
    pub level: f64,
    pub simulations: usize,
    /// Points at ranks `0..L`; the last rank is omitted, its difference is
    /// always zero.
    pub points: Vec<EcdfPoint>,
    pub max_abs_diff: f64,
    pub outside_fraction: f64,
}

/// ECDF minus uniform CDF at ranks `0..L`, from per-rank counts.
fn diff_curve(counts: &[u64], n: usize, out: &mut Vec<f64>) {
    out.clear();
    let support = counts.len() as f64;
    let mut cumulative = 0u64;
    for (r, &c) in counts[..counts.len() - 1].iter().enumerate() {
        cumulative += c;
        out.push(cumulative as f64 / n as f64 - (r as f64 + 1.0) / support);
    }
}

/// Compute the curve and its envelope from `sims` seeded uniform resamples.
pub fn ecdf_diff(ranks: &[u32], max_rank: u32, level: f64, sims: usize, seed: u64) -> Result<EcdfDiff> {
    if ranks.is_empty() {
        return Err(Error::Config("no ranks to compare".to_string()));
    }
    if !(level > 0.0 && level < 1.0) || sims == 0 {
        return Err(Error::Config(format!(
            "envelope needs 0 < level < 1 and at least one simulation (level {}, sims {})",
            level, sims
        )));
    }
    let support = max_rank as usize + 1;
    let n = ranks.len();

    let mut counts = vec![0u64; support];
    for &r in ranks {
        let slot = counts.get_mut(r as usize).ok_or_else(|| {
            Error::RecordCorrupted(format!("rank {} outside 0..={}", r, max_rank))
        })?;
        *slot += 1;
    }
    let mut observed = Vec::with_capacity(support);
    diff_curve(&counts, n, &mut observed);

    // null[point][sim]
    let mut null: Vec<Vec<f64>> = vec![Vec::with_capacity(sims); support - 1];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut sim_counts = vec![0u64; support];
    let mut curve = Vec::with_capacity(support);
    for _ in 0..sims {
        sim_counts.iter_mut().for_each(|c| *c = 0);
        for _ in 0..n {
            sim_counts[rng.random_range(0..support)] += 1;
        }
        diff_curve(&sim_counts, n, &mut curve);
        for (column, v) in null.iter_mut().zip(&curve) {
            column.push(*v);
        }
    }

    let tail = 0.5 * (1.0 - level);
    let points: Vec<EcdfPoint> = observed
        .iter()
        .zip(null.iter_mut())
        .enumerate()
        .map(|(r, (&diff, column))| {
            column.sort_by(|a, b| a.total_cmp(b));
            EcdfPoint {
                rank: r as u32,
                fraction: (r as f64 + 1.0) / support as f64,
                diff,
                lower: sbc_math::quantile_sorted(column, tail),
                upper: sbc_math::quantile_sorted(column, 1.0 - tail),
            }
        })
        .collect();

    let max_abs_diff = observed.iter().fold(0.0f64, |m, d| m.max(d.abs()));
    let outside_fraction = if points.is_empty() {
        0.0
    } else {
        points.iter().filter(|p| p.outside()).count() as f64 / points.len() as f64
    };

    Ok(EcdfDiff {
        max_rank,
        replicates: n,
        level,
        simulations: sims,
        points,
        max_abs_diff,
        outside_fraction,
    })
}
