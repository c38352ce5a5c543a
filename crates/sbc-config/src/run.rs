//! Run configuration (`sbc.toml`).
//!
//! ```toml
//! model = "model.json"
//! design = "design.json"
//! replicates = 200
//! draws = 99
//! thin = 10
//! seed = 7
//! backend = "command"
//! fit_command = ["python", "fit.py"]
//!
//! [analysis]
//! bins = 20
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::validate::{ValidationError, ValidationResult};

/// Posterior fitting backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Closed-form posterior for conjugate normal models.
    #[default]
    Conjugate,
    /// External sampler process speaking JSON over stdin/stdout.
    Command,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Conjugate => write!(f, "conjugate"),
            Backend::Command => write!(f, "command"),
        }
    }
}

/// Settings for the calibration analyzers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Histogram bins over the rank support.
    pub bins: usize,
    /// Confidence level of the binomial band and ECDF envelope.
    pub level: f64,
    /// Uniform resamples used to build the ECDF envelope.
    pub envelope_sims: usize,
    /// Significance level of the per-parameter chi-squared test.
    pub alpha: f64,
    /// Seed for the envelope resampling.
    pub envelope_seed: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            bins: 10,
            level: 0.95,
            envelope_sims: 1000,
            alpha: 0.01,
            envelope_seed: 1,
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Model specification file (relative to the config file).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<PathBuf>,

    /// Design template file (relative to the config file).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub design: Option<PathBuf>,

    /// Number of replicate indices to run.
    pub replicates: u32,

    /// First replicate index (1-based).
    pub start: u32,

    /// Posterior draws kept after thinning (`L`).
    pub draws: usize,

    /// Thinning stride applied to raw sampler draws.
    pub thin: usize,

    /// Master seed; per-replicate streams derive from it.
    pub seed: u64,

    /// Worker threads; defaults to available parallelism.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Per-replicate fit budget in seconds.
    pub fit_timeout_secs: u64,

    pub backend: Backend,

    /// Argument vector of the external sampler (command backend).
    pub fit_command: Vec<String>,

    /// Flag non-convergence when split R-hat exceeds this.
    pub rhat_threshold: f64,

    /// Flag non-convergence when bulk ESS falls below this.
    pub min_ess: f64,

    /// Keep thinned draws in replicate records.
    pub persist_draws: bool,

    /// Prior draws used to estimate prior variances.
    pub prior_variance_draws: usize,

    /// Re-run replicates previously recorded as failed.
    pub retry_failed: bool,

    pub analysis: AnalysisConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: None,
            design: None,
            replicates: 100,
            start: 1,
            draws: 99,
            thin: 10,
            seed: 20240101,
            workers: None,
            fit_timeout_secs: 300,
            backend: Backend::Conjugate,
            fit_command: Vec::new(),
            rhat_threshold: 1.05,
            min_ess: 100.0,
            persist_draws: true,
            prior_variance_draws: 4000,
            retry_failed: false,
            analysis: AnalysisConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load from a TOML file; relative model/design paths are resolved
    /// against the file's directory.
    pub fn from_file(path: &Path) -> ValidationResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> ValidationResult<Self> {
        toml::from_str(content)
            .map_err(|e| ValidationError::ParseError(format!("Invalid TOML: {}", e)))
    }

    pub fn to_toml_string(&self) -> ValidationResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ValidationError::ParseError(format!("TOML serialization: {}", e)))
    }

    fn resolve_relative(&mut self, base: &Path) {
        for path in [&mut self.model, &mut self.design].into_iter().flatten() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Raw draws the sampler must deliver so that `draws` remain after thinning.
    pub fn raw_draws(&self) -> usize {
        self.draws.saturating_mul(self.thin)
    }

    pub fn effective_workers(&self) -> usize {
        self.workers
            .filter(|&w| w > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }

    /// Replicate indices covered by this configuration, inclusive.
    pub fn indices(&self) -> std::ops::RangeInclusive<u32> {
        let end = self.start.saturating_add(self.replicates.saturating_sub(1));
        self.start..=end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = RunConfig::from_toml_str("replicates = 20\n[analysis]\nbins = 5\n").unwrap();
        assert_eq!(config.replicates, 20);
        assert_eq!(config.draws, 99);
        assert_eq!(config.thin, 10);
        assert_eq!(config.analysis.bins, 5);
        assert_eq!(config.analysis.level, 0.95);
        assert_eq!(config.backend, Backend::Conjugate);
        assert_eq!(config.raw_draws(), 990);
    }

    #[test]
    fn indices_are_inclusive_and_one_based() {
        let config = RunConfig {
            start: 51,
            replicates: 50,
            ..Default::default()
        };
        assert_eq!(config.indices(), 51..=100);
        assert_eq!(RunConfig::default().indices(), 1..=100);
    }

    #[test]
    fn relative_paths_follow_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sbc.toml");
        std::fs::write(
            &path,
            "model = \"model.json\"\ndesign = \"/abs/design.json\"\nbackend = \"command\"\nfit_command = [\"fit\"]\n",
        )
        .unwrap();
        let config = RunConfig::from_file(&path).unwrap();
        assert_eq!(config.model, Some(dir.path().join("model.json")));
        assert_eq!(config.design, Some(PathBuf::from("/abs/design.json")));
        assert_eq!(config.backend, Backend::Command);
    }

    #[test]
    fn serializes_back_to_toml() {
        let text = RunConfig::default().to_toml_string().unwrap();
        let back = RunConfig::from_toml_str(&text).unwrap();
        assert_eq!(back, RunConfig::default());
    }

    #[test]
    fn unknown_backend_is_a_parse_error() {
        assert!(matches!(
            RunConfig::from_toml_str("backend = \"nuts\""),
            Err(ValidationError::ParseError(_))
        ));
    }
}
