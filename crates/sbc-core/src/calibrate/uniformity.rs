//! Automated uniformity check and deviation pattern.
//!
//! A chi-squared goodness-of-fit test over the histogram bins, one test per
//! parameter. Rejection does not say *how* ranks deviate, so a rejected
//! histogram is also classified by where its excess mass sits.

use serde::{Deserialize, Serialize};

use super::histogram::RankHistogram;

/// Chi-squared test of rank uniformity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniformityTest {
    pub statistic: f64,
    pub df: usize,
    pub p_value: f64,
    pub alpha: f64,
    pub rejected: bool,
}

impl UniformityTest {
    /// Pearson chi-squared on the bins, `df = k - 1`; expected counts use
    /// each bin's own width.
    pub fn chi_squared(histogram: &RankHistogram, alpha: f64) -> Self {
        let n = histogram.replicates as f64;
        let support = histogram.max_rank as f64 + 1.0;
        let statistic: f64 = histogram
            .bins
            .iter()
            .map(|b| {
                let expected = n * b.width() as f64 / support;
                if expected > 0.0 {
                    (b.count as f64 - expected).powi(2) / expected
                } else {
                    0.0
                }
            })
            .sum();
        let df = histogram.k().saturating_sub(1);
        let p_value = if df == 0 || n == 0.0 {
            1.0
        } else {
            sbc_math::chi_squared_sf(statistic, df as f64)
        };
        UniformityTest {
            statistic,
            df,
            p_value,
            alpha,
            rejected: p_value < alpha,
        }
    }
}

/// Shape of a rank histogram's deviation from uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankPattern {
    Uniform,
    /// Excess at both ends.
    UShaped,
    /// Excess in the middle.
    Frown,
    /// Excess at low ranks.
    SkewLow,
    /// Excess at high ranks.
    SkewHigh,
}

impl RankPattern {
    /// What the pattern usually means for the fitted posterior.
    pub fn interpretation(&self) -> &'static str {
        match self {
            RankPattern::Uniform => "consistent with a faithful posterior",
            RankPattern::UShaped => "posterior too narrow (overconfident)",
            RankPattern::Frown => "posterior too wide (underconfident)",
            RankPattern::SkewLow => "posterior biased upward (draws exceed the truth)",
            RankPattern::SkewHigh => "posterior biased downward (draws fall below the truth)",
        }
    }

    /// Classify a histogram. Only rejected tests get a non-uniform pattern.
    pub fn classify(histogram: &RankHistogram, test: &UniformityTest) -> Self {
        if !test.rejected || histogram.bins.is_empty() {
            return RankPattern::Uniform;
        }
        let k = histogram.k();
        let n = histogram.replicates as f64;
        let support = histogram.max_rank as f64 + 1.0;

        // Relative excess of observed over expected mass per third of the bins.
        let mut observed = [0.0f64; 3];
        let mut expected = [0.0f64; 3];
        for (b, bin) in histogram.bins.iter().enumerate() {
            let third = (3 * b / k).min(2);
            observed[third] += bin.count as f64;
            expected[third] += n * bin.width() as f64 / support;
        }
        let excess: Vec<f64> = observed
            .iter()
            .zip(&expected)
            .map(|(o, e)| if *e > 0.0 { o / e - 1.0 } else { 0.0 })
            .collect();
        let (low, mid, high) = (excess[0], excess[1], excess[2]);

        if low > 0.0 && high > 0.0 && mid < 0.0 {
            RankPattern::UShaped
        } else if mid > 0.0 && low < 0.0 && high < 0.0 {
            RankPattern::Frown
        } else if low > high {
            RankPattern::SkewLow
        } else {
            RankPattern::SkewHigh
        }
    }
}

impl std::fmt::Display for RankPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RankPattern::Uniform => "uniform",
            RankPattern::UShaped => "u_shaped",
            RankPattern::Frown => "frown",
            RankPattern::SkewLow => "skew_low",
            RankPattern::SkewHigh => "skew_high",
        };
        write!(f, "{}", s)
    }
}
