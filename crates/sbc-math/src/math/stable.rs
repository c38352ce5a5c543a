//! Log-domain special functions.

use std::f64::consts::PI;

const HALF_LN_2PI: f64 = 0.918_938_533_204_672_8;
const LANCZOS_G: f64 = 7.0;
#[allow(clippy::excessive_precision)] // Published Lanczos coefficients (g = 7, n = 9)
const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_59,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_571_6e-6,
    1.505_632_735_149_311_6e-7,
];

/// Natural log of |Gamma(z)|.
///
/// Lanczos approximation, with the reflection formula below 0.5. Poles
/// (non-positive integers) return NaN.
pub fn log_gamma(z: f64) -> f64 {
    if z.is_nan() || z == f64::NEG_INFINITY {
        return f64::NAN;
    }
    if z == f64::INFINITY {
        return f64::INFINITY;
    }
    if z <= 0.0 && (z - z.round()).abs() < 1e-15 {
        return f64::NAN;
    }
    if z < 0.5 {
        let sin_pi = (PI * z).sin();
        return PI.ln() - sin_pi.abs().ln() - log_gamma(1.0 - z);
    }

    let z = z - 1.0;
    let series = LANCZOS_COEFFS
        .iter()
        .enumerate()
        .skip(1)
        .fold(LANCZOS_COEFFS[0], |acc, (i, c)| acc + c / (z + i as f64));
    let t = z + LANCZOS_G + 0.5;
    HALF_LN_2PI + (z + 0.5) * t.ln() - t + series.ln()
}

/// log(n!).
pub fn log_factorial(n: u64) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    log_gamma(n as f64 + 1.0)
}

/// log(n choose k); `-inf` when k > n.
pub fn log_choose(n: u64, k: u64) -> f64 {
    if k > n {
        return f64::NEG_INFINITY;
    }
    if k == 0 || k == n {
        return 0.0;
    }
    log_factorial(n) - log_factorial(k) - log_factorial(n - k)
}

/// log(1 - p) that stays accurate for tiny p.
pub fn log1m(p: f64) -> f64 {
    (-p).ln_1p()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        !a.is_nan() && !b.is_nan() && (a - b).abs() <= tol
    }

    #[test]
    fn log_gamma_integers_match_factorials() {
        assert!(close(log_gamma(1.0), 0.0, 1e-12));
        assert!(close(log_gamma(2.0), 0.0, 1e-12));
        assert!(close(log_gamma(5.0), 24.0f64.ln(), 1e-10));
        assert!(close(log_gamma(11.0), 3_628_800.0f64.ln(), 1e-9));
    }

    #[test]
    fn log_gamma_half() {
        assert!(close(log_gamma(0.5), 0.5 * PI.ln(), 1e-10));
    }

    #[test]
    fn log_gamma_reflection_region() {
        // Gamma(-0.5) = -2 sqrt(pi)
        let expected = (2.0 * PI.sqrt()).ln();
        assert!(close(log_gamma(-0.5), expected, 1e-9));
    }

    #[test]
    fn log_gamma_poles_are_nan() {
        assert!(log_gamma(0.0).is_nan());
        assert!(log_gamma(-3.0).is_nan());
        assert!(log_gamma(f64::NAN).is_nan());
    }

    #[test]
    fn log_choose_known_values() {
        assert!(close(log_choose(5, 2), 10.0f64.ln(), 1e-12));
        assert!(close(log_choose(10, 5), 252.0f64.ln(), 1e-10));
        assert_eq!(log_choose(7, 0), 0.0);
        assert_eq!(log_choose(7, 7), 0.0);
        assert_eq!(log_choose(3, 4), f64::NEG_INFINITY);
    }

    #[test]
    fn log1m_small_argument() {
        let p = 1e-12;
        assert!(close(log1m(p), -p, 1e-20));
    }
}
