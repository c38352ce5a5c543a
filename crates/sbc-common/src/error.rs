//! Error types for simulation-based calibration runs.
//!
//! Errors carry:
//! - Stable error codes for machine parsing
//! - A category for grouping
//! - Whether the failure is fatal to the whole run or only to one replicate
//! - Remediation hints for humans
//!
//! # Propagation policy
//!
//! Specification errors (`InvalidPriorSpec`, structural `SchemaMismatch`
//! detected while compiling the model, `Config`) abort a run before any
//! replicate starts. Everything raised while a replicate executes is isolated
//! to that replicate: it is logged with the replicate index and recorded,
//! never allowed to abort the remaining replicates.
//!
//! # Agent-facing output
//!
//! ```json
//! {
//!   "code": 11,
//!   "category": "spec",
//!   "message": "invalid prior specification: sd_school: sd must be > 0, got -1",
//!   "fatal_for_run": true
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for sbc operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Model, design or run configuration problems.
    Spec,
    /// Posterior fitting problems within one replicate.
    Fit,
    /// Run store problems (missing run, corrupted record).
    Store,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Spec => write!(f, "spec"),
            ErrorCategory::Fit => write!(f, "fit"),
            ErrorCategory::Store => write!(f, "store"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for sbc.
#[derive(Error, Debug)]
pub enum Error {
    // Specification errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid prior specification: {0}")]
    InvalidPriorSpec(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("run configuration changed: stored fingerprint {expected}, current {actual}")]
    ConfigMismatch { expected: String, actual: String },

    // Fit errors (20-29)
    #[error("posterior fit did not converge: {0}")]
    FitNonConvergence(String),

    #[error("insufficient posterior draws: requested {requested}, got {available}")]
    InsufficientDraws { requested: usize, available: usize },

    #[error("posterior fit failed: {0}")]
    FitFailed(String),

    #[error("posterior fit exceeded its {seconds}s budget")]
    FitTimeout { seconds: u64 },

    #[error("numerical instability detected: {0}")]
    NumericalInstability(String),

    // Store errors (30-39)
    #[error("run not found at {path}")]
    RunNotFound { path: String },

    #[error("replicate record corrupted: {0}")]
    RecordCorrupted(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Machine-readable kind name, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::InvalidPriorSpec(_) => "invalid_prior_spec",
            Error::SchemaMismatch(_) => "schema_mismatch",
            Error::ConfigMismatch { .. } => "config_mismatch",
            Error::FitNonConvergence(_) => "fit_non_convergence",
            Error::InsufficientDraws { .. } => "insufficient_draws",
            Error::FitFailed(_) => "fit_failed",
            Error::FitTimeout { .. } => "fit_timeout",
            Error::NumericalInstability(_) => "numerical_instability",
            Error::RunNotFound { .. } => "run_not_found",
            Error::RecordCorrupted(_) => "record_corrupted",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Toml(_) => "toml",
        }
    }

    /// Returns the error code for this error type.
    ///
    /// - 10-19: specification errors
    /// - 20-29: fit errors
    /// - 30-39: store errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidPriorSpec(_) => 11,
            Error::SchemaMismatch(_) => 12,
            Error::ConfigMismatch { .. } => 13,
            Error::FitNonConvergence(_) => 20,
            Error::InsufficientDraws { .. } => 21,
            Error::FitFailed(_) => 22,
            Error::FitTimeout { .. } => 23,
            Error::NumericalInstability(_) => 24,
            Error::RunNotFound { .. } => 30,
            Error::RecordCorrupted(_) => 31,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::Toml(_) => 62,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_)
            | Error::InvalidPriorSpec(_)
            | Error::SchemaMismatch(_)
            | Error::ConfigMismatch { .. } => ErrorCategory::Spec,

            Error::FitNonConvergence(_)
            | Error::InsufficientDraws { .. }
            | Error::FitFailed(_)
            | Error::FitTimeout { .. }
            | Error::NumericalInstability(_) => ErrorCategory::Fit,

            Error::RunNotFound { .. } | Error::RecordCorrupted(_) => ErrorCategory::Store,

            Error::Io(_) | Error::Json(_) | Error::Toml(_) => ErrorCategory::Io,
        }
    }

    /// Whether a replicate that raised this error still contributes a rank.
    ///
    /// Only non-convergence is recoverable: the replicate is kept and flagged
    /// so that selective exclusion cannot bias the calibration check.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::FitNonConvergence(_))
    }

    /// Whether this error aborts the whole run rather than one replicate.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Spec | ErrorCategory::Store | ErrorCategory::Io
        )
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => "Check sbc.toml and command-line flags; run 'sbc check' to validate.",
            Error::InvalidPriorSpec(_) => {
                "Fix the prior declaration: scales, rates and shapes must be positive and references must name declared parameters without cycles."
            }
            Error::SchemaMismatch(_) => {
                "Make the design template and model agree: every predictor, grouping and trials column the model names must exist with one value per observation."
            }
            Error::ConfigMismatch { .. } => {
                "The run directory was created with a different model, design or configuration. Use a new run directory or restore the original inputs."
            }
            Error::FitNonConvergence(_) => {
                "The replicate is kept but flagged. Increase warmup or reparameterize; a high flagged fraction invalidates the calibration conclusion."
            }
            Error::InsufficientDraws { .. } => {
                "Ask the sampler for at least draws * thin raw draws, or lower 'draws'/'thin'."
            }
            Error::FitFailed(_) => "Inspect the sampler's stderr in the log; the replicate is recorded as failed.",
            Error::FitTimeout { .. } => {
                "Raise 'fit_timeout_secs' or simplify the model; rerun with --retry-failed to revisit abandoned replicates."
            }
            Error::NumericalInstability(_) => {
                "A posterior summary was not finite. Check the sampler output for NaN or infinite draws."
            }
            Error::RunNotFound { .. } => "Start the run with 'sbc run' or point --run-dir at an existing run.",
            Error::RecordCorrupted(_) => {
                "Delete the corrupted replicate file; the next 'sbc run' recomputes it deterministically."
            }
            Error::Io(_) => "Check disk space and permissions for the run directory.",
            Error::Json(_) => "Invalid JSON. Check the file syntax or regenerate it.",
            Error::Toml(_) => "Invalid TOML. Check the file syntax against 'sbc init' output.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidPriorSpec(_) => "Invalid Prior Specification",
            Error::SchemaMismatch(_) => "Schema Mismatch",
            Error::ConfigMismatch { .. } => "Run Configuration Changed",
            Error::FitNonConvergence(_) => "Fit Did Not Converge",
            Error::InsufficientDraws { .. } => "Insufficient Posterior Draws",
            Error::FitFailed(_) => "Posterior Fit Failed",
            Error::FitTimeout { .. } => "Posterior Fit Timed Out",
            Error::NumericalInstability(_) => "Numerical Instability",
            Error::RunNotFound { .. } => "Run Not Found",
            Error::RecordCorrupted(_) => "Replicate Record Corrupted",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
            Error::Toml(_) => "TOML Parse Error",
        }
    }

    /// Format for a terminal: headline, reason, fix.
    pub fn human(&self) -> String {
        format!(
            "✗ {}\n  Reason: {}\n  Fix: {}",
            self.headline(),
            self,
            self.remediation()
        )
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error aborts the whole run.
    pub fatal_for_run: bool,

    /// Remediation hint.
    pub remediation: String,

    /// Additional structured context (e.g., replicate index, path).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();
        match err {
            Error::InsufficientDraws {
                requested,
                available,
            } => {
                context.insert("requested".to_string(), serde_json::json!(requested));
                context.insert("available".to_string(), serde_json::json!(available));
            }
            Error::FitTimeout { seconds } => {
                context.insert("timeout_seconds".to_string(), serde_json::json!(seconds));
            }
            Error::ConfigMismatch { expected, actual } => {
                context.insert("stored_fingerprint".to_string(), serde_json::json!(expected));
                context.insert("current_fingerprint".to_string(), serde_json::json!(actual));
            }
            Error::RunNotFound { path } => {
                context.insert("path".to_string(), serde_json::json!(path));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            fatal_for_run: err.is_fatal_for_run(),
            remediation: err.remediation().to_string(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}
