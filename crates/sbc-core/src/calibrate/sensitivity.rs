//! Posterior z-scores and contraction.

use serde::{Deserialize, Serialize};

/// `(mean - truth) / sqrt(variance)`. Non-finite when the variance is zero
/// and the mean misses the truth.
pub fn z_score(posterior_mean: f64, posterior_variance: f64, truth: f64) -> f64 {
    (posterior_mean - truth) / posterior_variance.sqrt()
}

/// `1 - posterior_variance / prior_variance`; NaN for a non-positive prior
/// variance.
pub fn contraction(posterior_variance: f64, prior_variance: f64) -> f64 {
    if !(prior_variance > 0.0) {
        return f64::NAN;
    }
    1.0 - posterior_variance / prior_variance
}

/// One replicate's sensitivity statistics for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensitivityPoint {
    pub replicate: u32,
    pub z_score: f64,
    pub contraction: f64,
}

/// Across-replicate sensitivity summary for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivitySummary {
    pub replicates: usize,
    pub mean_z: f64,
    pub sd_z: f64,
    pub mean_contraction: f64,
    /// 5%, 50% and 95% quantiles of contraction.
    pub contraction_quantiles: [f64; 3],
    pub points: Vec<SensitivityPoint>,
}

impl SensitivitySummary {
    /// Summarize points; non-finite values are left out of the moments.
    pub fn from_points(points: Vec<SensitivityPoint>) -> Self {
        let z: Vec<f64> = points
            .iter()
            .map(|p| p.z_score)
            .filter(|v| v.is_finite())
            .collect();
        let c: Vec<f64> = points
            .iter()
            .map(|p| p.contraction)
            .filter(|v| v.is_finite())
            .collect();
        let (mean_z, var_z) = sbc_math::mean_variance(&z);
        let q = sbc_math::quantiles(&c, &[0.05, 0.5, 0.95]);
        SensitivitySummary {
            replicates: points.len(),
            mean_z,
            sd_z: var_z.sqrt(),
            mean_contraction: sbc_math::mean(&c),
            contraction_quantiles: [q[0], q[1], q[2]],
            points,
        }
    }

    /// Fraction of replicates whose contraction lies in `[lo, hi]`.
    pub fn fraction_in(&self, lo: f64, hi: f64) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        let inside = self
            .points
            .iter()
            .filter(|p| p.contraction >= lo && p.contraction <= hi)
            .count();
        inside as f64 / self.points.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contraction_bounds() {
        assert_eq!(contraction(0.0, 4.0), 1.0);
        assert_eq!(contraction(4.0, 4.0), 0.0);
        assert!((contraction(1.0, 4.0) - 0.75).abs() < 1e-15);
        assert!(contraction(1.0, 0.0).is_nan());
        assert!(contraction(1.0, f64::NAN).is_nan());
    }

    #[test]
    fn z_score_is_standardized_distance() {
        assert_eq!(z_score(1.0, 4.0, 0.0), 0.5);
        assert_eq!(z_score(-3.0, 9.0, 0.0), -1.0);
        assert_eq!(z_score(2.0, 1.0, 2.0), 0.0);
        assert!(z_score(1.0, 0.0, 0.0).is_infinite());
    }

    #[test]
    fn summary_moments_and_fraction() {
        let points: Vec<SensitivityPoint> = [(-1.0, 0.85), (1.0, 0.9), (0.0, 0.95), (f64::INFINITY, 0.5)]
            .iter()
            .enumerate()
            .map(|(i, &(z, c))| SensitivityPoint {
                replicate: i as u32 + 1,
                z_score: z,
                contraction: c,
            })
            .collect();
        let summary = SensitivitySummary::from_points(points);
        assert_eq!(summary.replicates, 4);
        assert!(summary.mean_z.abs() < 1e-12);
        assert!((summary.sd_z - 1.0).abs() < 1e-12);
        assert!((summary.mean_contraction - 0.8).abs() < 1e-12);
        assert_eq!(summary.fraction_in(0.8, 1.0), 0.75);
    }

    #[test]
    fn empty_summary() {
        let summary = SensitivitySummary::from_points(Vec::new());
        assert!(summary.mean_z.is_nan());
        assert_eq!(summary.fraction_in(0.0, 1.0), 0.0);
    }
}
