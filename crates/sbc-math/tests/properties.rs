//! Property-based tests for sbc-math numerical functions.

use proptest::prelude::*;
use sbc_math::binomial;
use sbc_math::linalg::{cholesky, cholesky_solve, Matrix};
use sbc_math::{chi_squared_sf, gamma_p, gamma_q, log_choose, log_gamma, quantiles};

// ============================================================================
// Special functions
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Gamma(z + 1) = z Gamma(z).
    #[test]
    fn log_gamma_recurrence(z in 0.1..50.0f64) {
        let lhs = log_gamma(z + 1.0);
        let rhs = z.ln() + log_gamma(z);
        prop_assert!((lhs - rhs).abs() < 1e-8 * lhs.abs().max(1.0), "z={z} lhs={lhs} rhs={rhs}");
    }

    /// C(n, k) = C(n, n - k).
    #[test]
    fn log_choose_symmetric(n in 0u64..500, k_frac in 0.0..=1.0f64) {
        let k = ((n as f64) * k_frac).floor() as u64;
        prop_assert!((log_choose(n, k) - log_choose(n, n - k)).abs() < 1e-9);
    }

    #[test]
    fn incomplete_gamma_in_unit_interval(a in 0.05..200.0f64, x in 0.0..400.0f64) {
        let p = gamma_p(a, x);
        let q = gamma_q(a, x);
        prop_assert!((0.0..=1.0).contains(&p));
        prop_assert!((0.0..=1.0).contains(&q));
        prop_assert!((p + q - 1.0).abs() < 1e-9, "a={a} x={x} p={p} q={q}");
    }

    /// The chi-squared tail decreases as the statistic grows.
    #[test]
    fn chi_squared_tail_monotone(x in 0.0..100.0f64, dx in 0.01..10.0f64, df in 1u32..60) {
        let df = df as f64;
        prop_assert!(chi_squared_sf(x + dx, df) <= chi_squared_sf(x, df) + 1e-12);
    }
}

// ============================================================================
// Binomial band
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn band_is_ordered_and_covers_mean(n in 1u64..400, p in 0.0..=1.0f64, level in 0.5..0.99f64) {
        let band = binomial::band(n, p, level).unwrap();
        prop_assert!(band.lower <= band.median);
        prop_assert!(band.median <= band.upper);
        prop_assert!(band.upper <= n);
        prop_assert!(band.lower as f64 <= band.expected + 1.0);
        prop_assert!(band.upper as f64 >= band.expected - 1.0);
    }

    #[test]
    fn quantile_is_smallest_covering_count(n in 1u64..200, p in 0.01..0.99f64, q in 0.001..0.999f64) {
        let k = binomial::quantile(q, n, p).unwrap();
        prop_assert!(binomial::cdf(k, n, p) >= q - 1e-9);
        if k > 0 {
            prop_assert!(binomial::cdf(k - 1, n, p) < q + 1e-9);
        }
    }
}

// ============================================================================
// Linear algebra and summaries
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Diagonally dominant symmetric matrices are SPD and solve exactly.
    #[test]
    fn cholesky_solves_diagonally_dominant(
        off in prop::collection::vec(-1.0..1.0f64, 3),
        x in prop::collection::vec(-10.0..10.0f64, 3),
    ) {
        let a = Matrix::from_rows(&[
            vec![4.0, off[0], off[1]],
            vec![off[0], 4.0, off[2]],
            vec![off[1], off[2], 4.0],
        ]).unwrap();
        let l = cholesky(&a).expect("diagonally dominant matrix is SPD");
        let solved = cholesky_solve(&l, &a.mul_vec(&x));
        for (got, want) in solved.iter().zip(&x) {
            prop_assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn quantiles_are_monotone(values in prop::collection::vec(-1e6..1e6f64, 1..100)) {
        let q = quantiles(&values, &[0.05, 0.5, 0.95]);
        prop_assert!(q[0] <= q[1] && q[1] <= q[2]);
    }
}
