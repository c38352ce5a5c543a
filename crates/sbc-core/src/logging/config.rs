//! Log level and format selection.
//!
//! Precedence, lowest first: built-in defaults, `RUST_LOG` directives,
//! `SBC_LOG` / `SBC_LOG_FORMAT`, then the `-v`/`-q`/`--log-format` flags.

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

pub const ENV_LEVEL: &str = "SBC_LOG";
pub const ENV_FORMAT: &str = "SBC_LOG_FORMAT";
pub const ENV_DIRECTIVES: &str = "RUST_LOG";

/// Where diagnostics go: a terminal reader or a log shipper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per line on stderr.
    Jsonl,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Human => "human",
            LogFormat::Jsonl => "jsonl",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "human" | "pretty" | "text" => Ok(LogFormat::Human),
            "jsonl" | "json" | "ndjson" => Ok(LogFormat::Jsonl),
            _ => Err(format!("log format must be human or jsonl, got {s:?}")),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verbosity threshold, ordered from chattiest to silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    const LADDER: [LogLevel; 6] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Off,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }

    /// Level after applying `-v` / `-q` counts to this one.
    pub fn adjusted(self, verbose: u8, quiet: u8) -> Self {
        let top = Self::LADDER.len() as i32 - 1;
        let pos = self as i32 - i32::from(verbose) + i32::from(quiet);
        Self::LADDER[pos.clamp(0, top) as usize]
    }

    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let alias = match lowered.as_str() {
            "warning" => "warn",
            "none" | "quiet" | "silent" => "off",
            other => other,
        };
        Self::LADDER
            .iter()
            .copied()
            .find(|level| level.as_str() == alias)
            .ok_or_else(|| format!("unrecognized log level {s:?}"))
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        level.filter()
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Prefix human lines with a timestamp.
    pub timestamps: bool,
    /// Raw `RUST_LOG` directives, used verbatim when `SBC_LOG` is unset.
    pub directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::default(),
            level: LogLevel::default(),
            timestamps: true,
            directives: None,
        }
    }
}

impl LogConfig {
    /// Resolve from the process environment, then apply CLI flags.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), cli_level, cli_format)
    }

    /// Same as [`LogConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F, cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = LogConfig::default();

        match lookup(ENV_LEVEL) {
            Some(raw) => {
                if let Ok(level) = raw.parse() {
                    config.level = level;
                }
            }
            None => {
                config.directives = lookup(ENV_DIRECTIVES).filter(|d| !d.trim().is_empty());
            }
        }

        if let Some(format) = lookup(ENV_FORMAT).and_then(|raw| raw.parse().ok()) {
            config.format = format;
        }

        if let Some(level) = cli_level {
            config.level = level;
            config.directives = None;
        }
        if let Some(format) = cli_format {
            config.format = format;
        }
        config
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn format_aliases() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Jsonl);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Human);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn level_aliases_round_trip() {
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("silent".parse::<LogLevel>().unwrap(), LogLevel::Off);
        for level in LogLevel::LADDER {
            assert_eq!(level.to_string().parse::<LogLevel>().unwrap(), level);
        }
    }

    #[test]
    fn verbosity_flags_shift_level() {
        assert_eq!(LogLevel::Info.adjusted(1, 0), LogLevel::Debug);
        assert_eq!(LogLevel::Info.adjusted(5, 0), LogLevel::Trace);
        assert_eq!(LogLevel::Info.adjusted(0, 2), LogLevel::Error);
        assert_eq!(LogLevel::Warn.adjusted(1, 1), LogLevel::Warn);
    }

    #[test]
    fn sbc_log_shadows_rust_log() {
        let config = LogConfig::from_lookup(
            vars(&[(ENV_LEVEL, "debug"), (ENV_DIRECTIVES, "sbc=trace")]),
            None,
            None,
        );
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.directives.is_none());

        let config = LogConfig::from_lookup(vars(&[(ENV_DIRECTIVES, "sbc=trace")]), None, None);
        assert_eq!(config.directives.as_deref(), Some("sbc=trace"));
    }

    #[test]
    fn cli_flags_win() {
        let config = LogConfig::from_lookup(
            vars(&[(ENV_FORMAT, "human"), (ENV_DIRECTIVES, "trace")]),
            Some(LogLevel::Error),
            Some(LogFormat::Jsonl),
        );
        assert_eq!(config.level, LogLevel::Error);
        assert_eq!(config.format, LogFormat::Jsonl);
        assert!(config.directives.is_none());

        let built = LogConfig::default().with_timestamps(false);
        assert!(!built.timestamps);
    }
}
