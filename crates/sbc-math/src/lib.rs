//! Numerical primitives for simulation-based calibration.
//!
//! Everything here is deterministic and allocation-light: log-domain special
//! functions, the binomial reference band used by rank histograms, the
//! chi-squared tail used by the uniformity test, and the handful of dense
//! linear algebra routines the conjugate oracle needs.

pub mod math;

pub use math::binomial;
pub use math::gamma::*;
pub use math::linalg;
pub use math::normal::{normal_cdf, normal_quantile};
pub use math::stable::*;
pub use math::summary::*;
