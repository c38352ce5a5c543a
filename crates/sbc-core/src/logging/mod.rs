//! Diagnostics for `sbc` runs: a `fmt` console layer when a person is
//! watching, or [`JsonlLayer`] when the output feeds another tool. Every
//! event target is a constant from [`event_names`].
//!
//! # Usage
//!
//! ```ignore
//! use sbc_core::logging::{init_logging, LogConfig, LogContext, Stage, event_names};
//!
//! init_logging(&LogConfig::from_env(None, None));
//!
//! let ctx = LogContext::new(run_id.to_string());
//! let _guard = ctx.span(Stage::Replicate).entered();
//! tracing::info!(target: event_names::REPLICATE_FINISHED, replicate = 3, "replicate complete");
//! ```
//!
//! Logs always go to stderr so stdout carries only the command result.

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, LogContext, Stage};
pub use layer::JsonlLayer;

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn build_filter(config: &LogConfig) -> EnvFilter {
    if let Some(directives) = &config.directives {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return filter;
        }
    }
    EnvFilter::default().add_directive(config.level.filter().into())
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(config: &LogConfig) {
    let human = config.format == LogFormat::Human;
    let ansi = std::io::stderr().is_terminal();

    // Unused layers stay `None`; `Option<L>` is itself a layer.
    let timed = (human && config.timestamps)
        .then(|| fmt::layer().with_writer(std::io::stderr).with_ansi(ansi));
    let untimed = (human && !config.timestamps).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(ansi)
            .without_time()
    });
    let jsonl = (!human).then(JsonlLayer::stderr);

    let _ = tracing_subscriber::registry()
        .with(build_filter(config))
        .with(timed)
        .with(untimed)
        .with(jsonl)
        .try_init();
}
