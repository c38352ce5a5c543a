//! Standard normal CDF (probit link) and quantile (rank normalization).
//!
//! `erf(x) = P(1/2, x^2)`, so the CDF reuses the incomplete gamma routines
//! and keeps full relative precision in the lower tail via `Q`.

use super::gamma::{gamma_p, gamma_q};

/// Standard normal CDF `Phi(x)`.
pub fn normal_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    let half_sq = 0.5 * x * x;
    if x < 0.0 {
        0.5 * gamma_q(0.5, half_sq)
    } else {
        0.5 + 0.5 * gamma_p(0.5, half_sq)
    }
}

/// Standard normal quantile `Phi^-1(p)`.
///
/// Acklam's rational approximation, relative error below 1.2e-9 over (0, 1).
/// Returns -inf / +inf at 0 / 1 and NaN outside [0, 1].
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e1,
        2.209460984245205e2,
        -2.759285104469687e2,
        1.383577518672690e2,
        -3.066479806614716e1,
        2.506628277459239,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e1,
        1.615858368580409e2,
        -1.556989798598866e2,
        6.680131188771972e1,
        -1.328068155288572e1,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-3,
        -3.223964580411365e-1,
        -2.400758277161838,
        -2.549732539343734,
        4.374664141464968,
        2.938163982698783,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-3,
        3.224671290700398e-1,
        2.445134137142996,
        3.754408661907416,
    ];
    const P_LOW: f64 = 0.02425;

    if p.is_nan() || !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if p == 0.0 {
        return f64::NEG_INFINITY;
    }
    if p == 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        let t = (-2.0 * q.ln()).sqrt();
        (((((C[0] * t + C[1]) * t + C[2]) * t + C[3]) * t + C[4]) * t + C[5])
            / ((((D[0] * t + D[1]) * t + D[2]) * t + D[3]) * t + 1.0)
    };

    if p < P_LOW {
        tail(p)
    } else if p > 1.0 - P_LOW {
        -tail(1.0 - p)
    } else {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values() {
        assert_eq!(normal_cdf(0.0), 0.5);
        assert!((normal_cdf(1.959963984540054) - 0.975).abs() < 1e-10);
        assert!((normal_cdf(-1.0) - 0.158_655_253_931_457).abs() < 1e-10);
    }

    #[test]
    fn symmetric_and_tail_accurate() {
        for x in [0.3, 1.2, 2.5, 4.0] {
            assert!((normal_cdf(x) + normal_cdf(-x) - 1.0).abs() < 1e-12);
        }
        // Phi(-8) ~ 6.22e-16; a 1 - Phi(8) formulation would round to zero.
        let tail = normal_cdf(-8.0);
        assert!(tail > 6.0e-16 && tail < 6.5e-16, "tail={tail}");
    }

    #[test]
    fn quantile_inverts_cdf() {
        for p in [1e-6, 0.01, 0.2, 0.5, 0.7, 0.975, 0.999] {
            let x = normal_quantile(p);
            assert!((normal_cdf(x) - p).abs() < 1e-8 * p.max(1e-3), "p={p}");
        }
        assert_eq!(normal_quantile(0.5), 0.0);
        assert_eq!(normal_quantile(0.0), f64::NEG_INFINITY);
        assert!(normal_quantile(1.5).is_nan());
    }
}
