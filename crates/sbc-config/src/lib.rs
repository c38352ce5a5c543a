//! Simulation-based calibration configuration loading and validation.
//!
//! This crate provides:
//! - Typed model specifications (priors, hierarchical group effects, likelihood)
//! - Covariate design templates
//! - Run configuration (`sbc.toml`) with defaults
//! - Config resolution (CLI → env → working directory → defaults)
//! - Semantic validation and configuration fingerprints
//! - Built-in presets

pub mod design;
pub mod fingerprint;
pub mod model;
pub mod preset;
pub mod resolve;
pub mod run;
pub mod validate;

pub use design::{Column, Design};
pub use fingerprint::fingerprint;
pub use model::{
    Distribution, Family, GroupEffectSpec, GroupTerm, Hyper, LikelihoodSpec, Link, LkjSpec,
    ModelSpec, ParameterDecl, Support, Term,
};
pub use resolve::{resolve_config, ConfigPaths, ConfigSource};
pub use run::{AnalysisConfig, Backend, RunConfig};
pub use validate::{ValidationError, ValidationResult};

/// Schema version for model and design files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
