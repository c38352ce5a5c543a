//! Simulation-Based Calibration Core Library
//!
//! This library provides the calibration engine behind the `sbc` binary:
//! - Model compilation, prior sampling and outcome simulation
//! - Posterior fitting backends (closed-form and external sampler)
//! - Rank statistics and replicate records
//! - Resumable run storage and the parallel replicate runner
//! - Calibration analysis and report rendering
//!
//! The binary entry point is in `main.rs`.

pub mod calibrate;
pub mod exit_codes;
pub mod fit;
pub mod logging;
pub mod model;
pub mod predictive;
pub mod rank;
pub mod record;
pub mod runner;
pub mod store;
