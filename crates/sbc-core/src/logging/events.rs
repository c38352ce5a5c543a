//! Structured event vocabulary for logging.
//!
//! Event names are used as tracing targets so the JSONL layer can emit them
//! verbatim in the `event` field.

use serde::{Deserialize, Serialize};

/// Log levels for JSONL events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Stages of one calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Configuration loading and model compilation.
    Init,
    /// Prior variance baseline.
    Baseline,
    /// Replicate loop (prior draw, simulation, fit, ranks).
    Replicate,
    /// Rank and sensitivity aggregation.
    Analyze,
    /// Report rendering.
    Report,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Baseline => "baseline",
            Stage::Replicate => "replicate",
            Stage::Analyze => "analyze",
            Stage::Report => "report",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_RESUMED: &str = "run.resumed";
    pub const RUN_FINISHED: &str = "run.finished";

    // Baseline
    pub const BASELINE_COMPUTED: &str = "baseline.computed";
    pub const BASELINE_LOADED: &str = "baseline.loaded";

    // Replicates
    pub const REPLICATE_STARTED: &str = "replicate.started";
    pub const REPLICATE_FINISHED: &str = "replicate.finished";
    pub const REPLICATE_FLAGGED: &str = "replicate.flagged";
    pub const REPLICATE_FAILED: &str = "replicate.failed";
    pub const REPLICATE_SKIPPED: &str = "replicate.skipped";

    // Fitting
    pub const FIT_TIMEOUT: &str = "fit.timeout";
    pub const FIT_STDERR: &str = "fit.stderr";

    // Analysis
    pub const ANALYSIS_FINISHED: &str = "analysis.finished";
    pub const ANALYSIS_SUSPECT: &str = "analysis.suspect";

    // Config
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";
}

/// Correlation context attached to every event of one run.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub run_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
        }
    }

    /// Span carrying the run id and stage; enter it on every worker thread.
    pub fn span(&self, stage: Stage) -> tracing::Span {
        tracing::info_span!("sbc", run_id = %self.run_id, stage = %stage)
    }
}
