//! Per-replicate random streams.
//!
//! Every replicate derives its generators from `(master seed, index,
//! stream)` alone, so results do not depend on which worker ran the
//! replicate or in what order.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Stream ids within one replicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Stream {
    /// Prior draw and data simulation.
    Simulate = 1,
    /// Posterior fitting.
    Fit = 2,
}

/// Stream id reserved for the prior-variance baseline.
pub const BASELINE_INDEX: u32 = 0;

/// SplitMix64 finalizer.
#[allow(clippy::unreadable_literal)]
pub fn mix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E3779B97F4A7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Seed for one stream of one replicate.
pub fn derive_seed(master: u64, index: u32, stream: Stream) -> u64 {
    mix64(mix64(mix64(master) ^ u64::from(index)) ^ stream as u64)
}

pub fn stream_rng(master: u64, index: u32, stream: Stream) -> StdRng {
    StdRng::seed_from_u64(derive_seed(master, index, stream))
}
