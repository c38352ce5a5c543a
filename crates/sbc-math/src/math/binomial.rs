//! Binomial distribution helpers for rank-histogram reference bands.
//!
//! Under the calibration null every replicate's rank lands in a given bin
//! independently with probability `width / (L + 1)`, so the count in that bin
//! is `Binomial(n_replicates, width / (L + 1))`. The band drawn behind a rank
//! histogram is a pair of quantiles of that distribution.

use super::stable::{log1m, log_choose};
use serde::{Deserialize, Serialize};

/// log P(X = k) for X ~ Binomial(n, p).
pub fn ln_pmf(k: u64, n: u64, p: f64) -> f64 {
    if p.is_nan() || !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if k > n {
        return f64::NEG_INFINITY;
    }
    if p == 0.0 {
        return if k == 0 { 0.0 } else { f64::NEG_INFINITY };
    }
    if p == 1.0 {
        return if k == n { 0.0 } else { f64::NEG_INFINITY };
    }
    log_choose(n, k) + k as f64 * p.ln() + (n - k) as f64 * log1m(p)
}

/// P(X = k).
pub fn pmf(k: u64, n: u64, p: f64) -> f64 {
    ln_pmf(k, n, p).exp()
}

/// P(X <= k).
pub fn cdf(k: u64, n: u64, p: f64) -> f64 {
    if p.is_nan() || !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if k >= n {
        return 1.0;
    }
    let total: f64 = (0..=k).map(|j| pmf(j, n, p)).sum();
    total.min(1.0)
}

/// Smallest `k` with `P(X <= k) >= q`.
///
/// Returns `None` for a probability outside `[0, 1]` or an invalid `p`.
pub fn quantile(q: f64, n: u64, p: f64) -> Option<u64> {
    if q.is_nan() || !(0.0..=1.0).contains(&q) || p.is_nan() || !(0.0..=1.0).contains(&p) {
        return None;
    }
    let mut acc = 0.0;
    for k in 0..=n {
        acc += pmf(k, n, p);
        // Summation error can leave acc a hair under q at the top of the support.
        if acc >= q - 1e-12 {
            return Some(k);
        }
    }
    Some(n)
}

/// Expected count and central interval for one histogram bin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinomialBand {
    /// Lower quantile at `(1 - level) / 2`.
    pub lower: u64,
    /// Median count.
    pub median: u64,
    /// Upper quantile at `(1 + level) / 2`.
    pub upper: u64,
    /// Mean count `n * p`.
    pub expected: f64,
}

impl BinomialBand {
    /// Whether an observed count falls inside the band (inclusive).
    pub fn contains(&self, count: u64) -> bool {
        count >= self.lower && count <= self.upper
    }
}

/// Central `level` band of Binomial(n, p); `None` if inputs are invalid.
pub fn band(n: u64, p: f64, level: f64) -> Option<BinomialBand> {
    if level.is_nan() || level <= 0.0 || level >= 1.0 {
        return None;
    }
    let tail = 0.5 * (1.0 - level);
    Some(BinomialBand {
        lower: quantile(tail, n, p)?,
        median: quantile(0.5, n, p)?,
        upper: quantile(1.0 - tail, n, p)?,
        expected: n as f64 * p,
    })
}
