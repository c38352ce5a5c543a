//! Property-based tests for rank statistics and their aggregation.

use proptest::prelude::*;
use sbc_core::calibrate::{bin_edges, ecdf_diff, RankHistogram, UniformityTest};
use sbc_core::fit::DrawTable;
use sbc_core::model::ParameterVector;
use sbc_core::rank::{rank, rank_all};

proptest! {
    #[test]
    fn rank_stays_within_draw_count(
        truth in -1e6f64..1e6,
        draws in prop::collection::vec(-1e6f64..1e6, 0..200),
    ) {
        let r = rank(truth, &draws).unwrap();
        prop_assert!(r as usize <= draws.len());
    }

    #[test]
    fn ties_never_count(
        truth in -100.0f64..100.0,
        below in 0usize..20,
        ties in 0usize..20,
        above in 0usize..20,
    ) {
        let mut draws = Vec::new();
        draws.extend(std::iter::repeat(truth - 1.0).take(below));
        draws.extend(std::iter::repeat(truth).take(ties));
        draws.extend(std::iter::repeat(truth + 1.0).take(above));
        prop_assert_eq!(rank(truth, &draws).unwrap() as usize, below);
    }

    #[test]
    fn rank_ignores_draw_order(
        truth in -10.0f64..10.0,
        mut draws in prop::collection::vec(-10.0f64..10.0, 1..100),
    ) {
        let forward = rank(truth, &draws).unwrap();
        draws.reverse();
        prop_assert_eq!(forward, rank(truth, &draws).unwrap());
    }

    #[test]
    fn rank_all_matches_columns_by_name(
        a in -5.0f64..5.0,
        b in -5.0f64..5.0,
        rows in prop::collection::vec((-5.0f64..5.0, -5.0f64..5.0), 1..50),
    ) {
        let mut truth = ParameterVector::new();
        truth.insert("a", a);
        truth.insert("b", b);
        // Columns deliberately stored in the opposite order.
        let mut table = DrawTable::new(vec!["b".to_string(), "a".to_string()]);
        table.rows = rows.iter().map(|&(x, y)| vec![y, x]).collect();

        let ranks = rank_all(&truth, &table).unwrap();
        let a_draws: Vec<f64> = rows.iter().map(|r| r.0).collect();
        let b_draws: Vec<f64> = rows.iter().map(|r| r.1).collect();
        prop_assert_eq!(ranks["a"], rank(a, &a_draws).unwrap());
        prop_assert_eq!(ranks["b"], rank(b, &b_draws).unwrap());
    }

    #[test]
    fn bins_partition_the_rank_support(max_rank in 1u32..500, k in 1usize..40) {
        prop_assume!(k as u32 <= max_rank + 1);
        let edges = bin_edges(max_rank, k).unwrap();
        prop_assert_eq!(edges.len(), k);
        prop_assert_eq!(edges[0].0, 0);
        prop_assert_eq!(edges[k - 1].1, max_rank);
        for pair in edges.windows(2) {
            prop_assert_eq!(pair[0].1 + 1, pair[1].0);
        }
        let widths: Vec<u32> = edges.iter().map(|(lo, hi)| hi - lo + 1).collect();
        let min = widths.iter().min().unwrap();
        let max = widths.iter().max().unwrap();
        prop_assert!(max - min <= 1);
    }

    #[test]
    fn histogram_conserves_replicates(
        ranks in prop::collection::vec(0u32..=99, 1..300),
        k in 2usize..=20,
    ) {
        let hist = RankHistogram::build(&ranks, 99, k, 0.95).unwrap();
        prop_assert_eq!(hist.counts().iter().sum::<u64>(), ranks.len() as u64);
        let test = UniformityTest::chi_squared(&hist, 0.01);
        prop_assert!((0.0..=1.0).contains(&test.p_value));
        prop_assert!(test.statistic >= 0.0);
    }

    #[test]
    fn ecdf_is_deterministic_for_a_seed(
        ranks in prop::collection::vec(0u32..=19, 5..100),
        seed in any::<u64>(),
    ) {
        let a = ecdf_diff(&ranks, 19, 0.95, 50, seed).unwrap();
        let b = ecdf_diff(&ranks, 19, 0.95, 50, seed).unwrap();
        prop_assert_eq!(a.points.len(), 19);
        prop_assert_eq!(a, b);
    }
}
