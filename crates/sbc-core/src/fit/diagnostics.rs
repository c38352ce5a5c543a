//! Convergence diagnostics computed from raw sampler output.
//!
//! Split R-hat and rank-normalized bulk ESS (Vehtari et al. 2021). Both work
//! on per-chain traces of one parameter; a single chain is split in halves,
//! which still catches drift within the chain.

use super::{DrawTable, FitDiagnostics};

/// Shortest trace, per chain, that the diagnostics accept.
const MIN_DRAWS_PER_CHAIN: usize = 4;

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Split every chain in two equal halves (dropping the middle draw of odd
/// chains) truncated to a common length.
fn split_chains(chains: &[Vec<f64>]) -> Option<Vec<&[f64]>> {
    let half = chains.iter().map(|c| c.len() / 2).min()?;
    if half * 2 < MIN_DRAWS_PER_CHAIN {
        return None;
    }
    let mut split = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        let n = chain.len();
        split.push(&chain[n / 2 - half..n / 2]);
        split.push(&chain[n - half..]);
    }
    Some(split)
}

/// Mean within-chain variance of equally long chains.
fn within_variance(split: &[&[f64]]) -> f64 {
    let n = split[0].len() as f64;
    split
        .iter()
        .map(|c| {
            let m = mean(c);
            c.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n - 1.0)
        })
        .sum::<f64>()
        / split.len() as f64
}

/// Split R-hat of one parameter; `None` when too short or constant.
pub fn split_rhat(chains: &[Vec<f64>]) -> Option<f64> {
    let split = split_chains(chains)?;
    let m = split.len() as f64;
    let n = split[0].len() as f64;

    let means: Vec<f64> = split.iter().map(|c| mean(c)).collect();
    let grand = mean(&means);
    let b = n / (m - 1.0) * means.iter().map(|cm| (cm - grand).powi(2)).sum::<f64>();
    let w = within_variance(&split);
    if !(w > 1e-300) {
        return None;
    }
    let var_hat = (n - 1.0) / n * w + b / n;
    Some((var_hat / w).sqrt())
}

/// Replace values by normal scores of their pooled ranks (average ties).
fn rank_normalize(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut indexed: Vec<(f64, usize, usize)> = chains
        .iter()
        .enumerate()
        .flat_map(|(c, chain)| chain.iter().enumerate().map(move |(d, &v)| (v, c, d)))
        .collect();
    indexed.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total = indexed.len();
    let mut out: Vec<Vec<f64>> = chains.iter().map(|c| vec![0.0; c.len()]).collect();
    let mut i = 0;
    while i < total {
        let mut j = i;
        while j < total && indexed[j].0 == indexed[i].0 {
            j += 1;
        }
        // Ranks are 1-based; tied values share their average rank.
        let rank = (i + j + 1) as f64 / 2.0;
        let score = sbc_math::normal_quantile((rank - 0.375) / (total as f64 + 0.25));
        for &(_, c, d) in &indexed[i..j] {
            out[c][d] = score;
        }
        i = j;
    }
    out
}

/// ESS of split chains via Geyer's initial positive sequence.
fn ess_split(split: &[&[f64]]) -> Option<f64> {
    let m = split.len() as f64;
    let n = split[0].len();
    let nf = n as f64;
    let w = within_variance(split);
    if !(w > 1e-300) {
        return None;
    }
    let means: Vec<f64> = split.iter().map(|c| mean(c)).collect();
    let grand = mean(&means);
    let b_over_n = means.iter().map(|cm| (cm - grand).powi(2)).sum::<f64>() / (m - 1.0).max(1.0);
    let var_plus = (nf - 1.0) / nf * w + b_over_n;

    let autocov = |lag: usize| -> f64 {
        split
            .iter()
            .zip(&means)
            .map(|(c, cm)| {
                (0..n - lag)
                    .map(|t| (c[t] - cm) * (c[t + lag] - cm))
                    .sum::<f64>()
                    / nf
            })
            .sum::<f64>()
            / m
    };
    let rho = |lag: usize| 1.0 - (w - autocov(lag)) / var_plus;

    let mut tau = -1.0;
    let mut lag = 0;
    while lag + 1 < n {
        let pair = rho(lag) + rho(lag + 1);
        if pair < 0.0 {
            break;
        }
        tau += 2.0 * pair;
        lag += 2;
    }
    let tau = tau.max(1.0 / (m * nf).log10().max(1.0));
    Some(m * nf / tau)
}

/// Bulk effective sample size of one parameter.
pub fn ess_bulk(chains: &[Vec<f64>]) -> Option<f64> {
    let normalized = rank_normalize(chains);
    let split = split_chains(&normalized)?;
    ess_split(&split)
}

/// Worst split R-hat and bulk ESS over every column of `draws`.
///
/// Constant columns (fixed parameters) have neither and are skipped.
pub fn summarize(draws: &DrawTable) -> FitDiagnostics {
    let mut diagnostics = FitDiagnostics::default();
    for idx in 0..draws.parameters.len() {
        let chains = draws.chain_columns(idx);
        if let Some(rhat) = split_rhat(&chains) {
            diagnostics.max_rhat = Some(diagnostics.max_rhat.map_or(rhat, |r: f64| r.max(rhat)));
        }
        if let Some(ess) = ess_bulk(&chains) {
            diagnostics.min_ess = Some(diagnostics.min_ess.map_or(ess, |e: f64| e.min(ess)));
        }
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn iid(seed: u64, chains: usize, n: usize) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..chains)
            .map(|_| (0..n).map(|_| rng.sample(StandardNormal)).collect())
            .collect()
    }

    fn ar1(seed: u64, n: usize, phi: f64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = 0.0;
        (0..n)
            .map(|_| {
                let e: f64 = rng.sample(StandardNormal);
                x = phi * x + e;
                x
            })
            .collect()
    }

    #[test]
    fn rhat_near_one_for_mixed_chains() {
        let rhat = split_rhat(&iid(1, 4, 500)).unwrap();
        assert!(rhat < 1.02, "rhat {rhat}");
    }

    #[test]
    fn rhat_large_for_separated_chains() {
        let mut chains = iid(2, 2, 300);
        for v in &mut chains[1] {
            *v += 10.0;
        }
        assert!(split_rhat(&chains).unwrap() > 1.5);
    }

    #[test]
    fn split_catches_drift_within_one_chain() {
        let chain: Vec<f64> = (0..400).map(|i| i as f64 * 0.05).collect();
        assert!(split_rhat(&[chain]).unwrap() > 1.5);
    }

    #[test]
    fn ess_close_to_draw_count_for_iid() {
        let ess = ess_bulk(&iid(3, 4, 500)).unwrap();
        assert!(ess > 1400.0 && ess < 2600.0, "ess {ess}");
    }

    #[test]
    fn ess_small_for_autocorrelated_chain() {
        let ess = ess_bulk(&[ar1(4, 2000, 0.95)]).unwrap();
        assert!(ess < 300.0, "ess {ess}");
    }

    #[test]
    fn constant_and_short_traces_have_no_diagnostics() {
        assert!(split_rhat(&[vec![1.0; 50]]).is_none());
        assert!(ess_bulk(&[vec![1.0; 50]]).is_none());
        assert!(split_rhat(&[vec![1.0, 2.0, 3.0]]).is_none());
    }

    #[test]
    fn summarize_skips_fixed_columns() {
        let mut table = DrawTable::new(vec!["a".to_string(), "fixed".to_string()]);
        let values = iid(5, 1, 400).remove(0);
        table.rows = values.iter().map(|v| vec![*v, 1.0]).collect();
        let diag = summarize(&table);
        assert!(diag.max_rhat.unwrap() < 1.05);
        assert!(diag.min_ess.unwrap() > 200.0);
    }
}
