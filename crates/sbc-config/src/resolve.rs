//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → `SBC_CONFIG` → `./sbc.toml` → XDG config → defaults.

use std::path::{Path, PathBuf};

/// Discovered run configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    /// Path to sbc.toml (or None when built-in defaults apply).
    pub config: Option<PathBuf>,

    /// Where the file was found (for diagnostics).
    pub source: ConfigSource,
}

/// Where a configuration file was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via the SBC_CONFIG environment variable.
    Environment,

    /// Found in the working directory.
    WorkingDirectory,

    /// Found in the XDG config directory.
    XdgConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::WorkingDirectory => write!(f, "working directory"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Environment variable naming the config file.
pub const ENV_CONFIG_PATH: &str = "SBC_CONFIG";

/// Standard config file name.
pub const CONFIG_FILENAME: &str = "sbc.toml";

/// Application name for XDG directories.
const APP_NAME: &str = "sbc";

/// Resolve the run configuration file.
///
/// An explicit CLI path is returned even when it does not exist so the
/// caller reports the missing file instead of silently using defaults.
pub fn resolve_config(cli_config: Option<&Path>) -> ConfigPaths {
    if let Some(path) = cli_config {
        return ConfigPaths {
            config: Some(path.to_path_buf()),
            source: ConfigSource::CliArgument,
        };
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        if !env_path.is_empty() {
            return ConfigPaths {
                config: Some(PathBuf::from(env_path)),
                source: ConfigSource::Environment,
            };
        }
    }

    let local = PathBuf::from(CONFIG_FILENAME);
    if local.is_file() {
        return ConfigPaths {
            config: Some(local),
            source: ConfigSource::WorkingDirectory,
        };
    }

    if let Some(dir) = xdg_config_dir() {
        let path = dir.join(CONFIG_FILENAME);
        if path.is_file() {
            return ConfigPaths {
                config: Some(path),
                source: ConfigSource::XdgConfig,
            };
        }
    }

    ConfigPaths::default()
}

/// Get the XDG config directory for sbc.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::CliArgument), "CLI argument");
        assert_eq!(format!("{}", ConfigSource::WorkingDirectory), "working directory");
        assert_eq!(format!("{}", ConfigSource::BuiltinDefault), "builtin default");
    }

    #[test]
    fn cli_path_wins_even_when_missing() {
        let paths = resolve_config(Some(Path::new("/nonexistent/sbc.toml")));
        assert_eq!(paths.source, ConfigSource::CliArgument);
        assert_eq!(paths.config, Some(PathBuf::from("/nonexistent/sbc.toml")));
    }

    #[test]
    fn test_xdg_config_dir() {
        if let Some(path) = xdg_config_dir() {
            assert!(path.ends_with(APP_NAME));
        }
    }
}
