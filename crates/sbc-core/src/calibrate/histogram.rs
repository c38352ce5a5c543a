//! Binned rank histograms with a binomial reference band.

use sbc_common::{Error, Result};
use sbc_math::binomial::{self, BinomialBand};
use serde::{Deserialize, Serialize};

/// One histogram bin over an inclusive rank range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankBin {
    pub lower: u32,
    pub upper: u32,
    pub count: u64,
    /// Count band under uniform ranks.
    pub band: BinomialBand,
    pub inside: bool,
}

impl RankBin {
    pub fn width(&self) -> u32 {
        self.upper - self.lower + 1
    }
}

/// Rank counts in `k` bins over `0..=L`.
///
/// When `L + 1` is not a multiple of `k` the bins differ in width by at most
/// one rank, and each bin's band uses its own width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankHistogram {
    pub max_rank: u32,
    pub replicates: u64,
    pub level: f64,
    pub bins: Vec<RankBin>,
    pub bins_inside: usize,
}

/// Inclusive rank ranges of `k` near-equal bins over `0..=max_rank`.
pub fn bin_edges(max_rank: u32, k: usize) -> Result<Vec<(u32, u32)>> {
    let support = max_rank as u64 + 1;
    if k == 0 || k as u64 > support {
        return Err(Error::Config(format!(
            "cannot split {} rank values into {} bins",
            support, k
        )));
    }
    Ok((0..k as u64)
        .map(|b| {
            let lo = b * support / k as u64;
            let hi = (b + 1) * support / k as u64 - 1;
            (lo as u32, hi as u32)
        })
        .collect())
}

impl RankHistogram {
    pub fn build(ranks: &[u32], max_rank: u32, k: usize, level: f64) -> Result<Self> {
        let edges = bin_edges(max_rank, k)?;
        let support = max_rank as f64 + 1.0;
        let n = ranks.len() as u64;

        let mut counts = vec![0u64; k];
        for &r in ranks {
            if r > max_rank {
                return Err(Error::RecordCorrupted(format!(
                    "rank {} outside 0..={}",
                    r, max_rank
                )));
            }
            // Bins are sorted and contiguous; find the owning one.
            let b = edges.partition_point(|&(_, hi)| hi < r);
            counts[b] += 1;
        }

        let mut bins = Vec::with_capacity(k);
        for (&(lower, upper), count) in edges.iter().zip(counts) {
            let p = (upper - lower + 1) as f64 / support;
            let band = binomial::band(n, p, level).ok_or_else(|| {
                Error::Config(format!("invalid band level {} for bin probability {}", level, p))
            })?;
            bins.push(RankBin {
                lower,
                upper,
                count,
                inside: band.contains(count),
                band,
            });
        }
        let bins_inside = bins.iter().filter(|b| b.inside).count();

        Ok(RankHistogram {
            max_rank,
            replicates: n,
            level,
            bins,
            bins_inside,
        })
    }

    pub fn k(&self) -> usize {
        self.bins.len()
    }

    pub fn counts(&self) -> Vec<u64> {
        self.bins.iter().map(|b| b.count).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_edges() {
        let edges = bin_edges(99, 10).unwrap();
        assert_eq!(edges[0], (0, 9));
        assert_eq!(edges[9], (90, 99));
    }

    #[test]
    fn uneven_edges_cover_support_once() {
        let edges = bin_edges(9, 3).unwrap();
        assert_eq!(edges, vec![(0, 2), (3, 5), (6, 9)]);
        let covered: u32 = edges.iter().map(|(lo, hi)| hi - lo + 1).sum();
        assert_eq!(covered, 10);
    }

    #[test]
    fn rejects_too_many_bins() {
        assert!(bin_edges(4, 6).is_err());
        assert!(bin_edges(4, 0).is_err());
        assert!(bin_edges(4, 5).is_ok());
    }

    #[test]
    fn counts_land_in_their_bins() {
        let ranks = [0, 1, 2, 3, 9, 9, 5];
        let h = RankHistogram::build(&ranks, 9, 3, 0.95).unwrap();
        assert_eq!(h.counts(), vec![3, 2, 2]);
        assert_eq!(h.replicates, 7);
        assert_eq!(h.bins[2].width(), 4);
    }

    #[test]
    fn uniform_counts_sit_inside_band() {
        let ranks: Vec<u32> = (0..1000).map(|i| i % 100).collect();
        let h = RankHistogram::build(&ranks, 99, 20, 0.95).unwrap();
        assert_eq!(h.bins_inside, 20);
        assert!((h.bins[0].band.expected - 50.0).abs() < 1e-9);
    }

    #[test]
    fn piled_up_ranks_leave_the_band() {
        let ranks = vec![0u32; 200];
        let h = RankHistogram::build(&ranks, 99, 10, 0.95).unwrap();
        assert!(!h.bins[0].inside);
        assert_eq!(h.bins_inside, 0);
    }

    #[test]
    fn out_of_range_rank_is_rejected() {
        assert!(RankHistogram::build(&[100], 99, 10, 0.95).is_err());
    }
}
