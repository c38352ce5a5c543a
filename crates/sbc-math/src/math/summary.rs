//! Sample summaries used for posterior and prior draws.

/// Arithmetic mean; NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance (n - 1 denominator); NaN below two values.
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Mean and variance in one pass over the data (Welford).
pub fn mean_variance(values: &[f64]) -> (f64, f64) {
    let mut count = 0.0;
    let mut m = 0.0;
    let mut m2 = 0.0;
    for &v in values {
        count += 1.0;
        let delta = v - m;
        m += delta / count;
        m2 += delta * (v - m);
    }
    if count == 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let var = if count < 2.0 { f64::NAN } else { m2 / (count - 1.0) };
    (m, var)
}

/// Linear-interpolation quantile of already sorted data (type 7).
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() || q.is_nan() {
        return f64::NAN;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = pos - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

/// Quantiles of unsorted data; NaNs are dropped first.
pub fn quantiles(values: &[f64], qs: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    qs.iter().map(|&q| quantile_sorted(&sorted, q)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_variance_basic() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(mean(&v), 2.5);
        assert!((variance(&v) - 5.0 / 3.0).abs() < 1e-12);
        let (m, var) = mean_variance(&v);
        assert!((m - 2.5).abs() < 1e-12);
        assert!((var - 5.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_inputs() {
        assert!(mean(&[]).is_nan());
        assert!(variance(&[1.0]).is_nan());
        assert!(mean_variance(&[]).0.is_nan());
        assert_eq!(variance(&[3.0, 3.0, 3.0]), 0.0);
    }

    #[test]
    fn quantiles_interpolate() {
        let v = [4.0, 1.0, 3.0, 2.0, f64::NAN];
        let q = quantiles(&v, &[0.0, 0.5, 1.0]);
        assert_eq!(q, vec![1.0, 2.5, 4.0]);
    }
}
