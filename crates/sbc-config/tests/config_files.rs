//! File-level configuration tests.
//!
//! Covers:
//! - Presets written to disk and read back through the public loaders
//! - Resolution order (CLI > SBC_CONFIG > working directory)
//! - Validation errors surfacing with the right kind

use sbc_config::preset::{get_preset, PresetName};
use sbc_config::resolve::{resolve_config, ConfigSource, ENV_CONFIG_PATH};
use sbc_config::validate::{validate_design, validate_model, validate_run, ValidationError};
use sbc_config::{Design, ModelSpec, RunConfig};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

struct EnvGuard {
    key: &'static str,
    saved: Option<String>,
}

impl EnvGuard {
    fn new(key: &'static str) -> Self {
        Self {
            key,
            saved: env::var(key).ok(),
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.saved {
            Some(val) => env::set_var(self.key, val),
            None => env::remove_var(self.key),
        }
    }
}

fn with_env_lock<T>(f: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("env lock poisoned");
    f()
}

fn write_preset(dir: &Path, name: PresetName) -> std::path::PathBuf {
    let preset = get_preset(name);
    fs::write(
        dir.join("model.json"),
        serde_json::to_string_pretty(&preset.model).unwrap(),
    )
    .unwrap();
    fs::write(
        dir.join("design.json"),
        serde_json::to_string_pretty(&preset.design).unwrap(),
    )
    .unwrap();
    let mut run = preset.run.clone();
    run.model = Some("model.json".into());
    run.design = Some("design.json".into());
    let path = dir.join("sbc.toml");
    fs::write(&path, run.to_toml_string().unwrap()).unwrap();
    path
}

#[test]
fn presets_round_trip_through_files() {
    for &name in PresetName::ALL {
        let dir = TempDir::new().unwrap();
        let config_path = write_preset(dir.path(), name);
        let run = RunConfig::from_file(&config_path).unwrap();
        let model = ModelSpec::from_file(run.model.as_deref().unwrap()).unwrap();
        let design = Design::from_file(run.design.as_deref().unwrap()).unwrap();

        let preset = get_preset(name);
        assert_eq!(model, preset.model);
        assert_eq!(design, preset.design);
        validate_model(&model).unwrap();
        validate_design(&model, &design).unwrap();
        validate_run(&run).unwrap();
    }
}

#[test]
fn model_file_errors_are_typed() {
    let dir = TempDir::new().unwrap();
    let missing = ModelSpec::from_file(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(missing, ValidationError::IoError(_)));

    let bad = dir.path().join("bad.json");
    fs::write(&bad, "{ \"name\": ").unwrap();
    assert!(matches!(
        ModelSpec::from_file(&bad),
        Err(ValidationError::ParseError(_))
    ));

    let negative = dir.path().join("negative.json");
    fs::write(
        &negative,
        r#"{
            "schema_version": "1.0.0",
            "name": "bad-scale",
            "parameters": [ { "name": "mu", "prior": { "dist": "normal", "mean": 0, "sd": -2 } } ],
            "likelihood": { "family": "poisson", "terms": [ { "parameter": "mu" } ] }
        }"#,
    )
    .unwrap();
    let model = ModelSpec::from_file(&negative).unwrap();
    let err = validate_model(&model).unwrap_err();
    assert!(err.to_string().contains("mu.sd"));
    let unified = sbc_common::Error::from(err);
    assert!(unified.is_fatal_for_run());
    assert_eq!(unified.code(), 11);
}

#[test]
fn resolve_prefers_cli_over_env() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(ENV_CONFIG_PATH);
        let dir = TempDir::new().unwrap();
        let env_path = write_preset(dir.path(), PresetName::NormalNormal);
        env::set_var(ENV_CONFIG_PATH, &env_path);

        let from_env = resolve_config(None);
        assert_eq!(from_env.source, ConfigSource::Environment);
        assert_eq!(from_env.config.as_deref(), Some(env_path.as_path()));

        let cli = dir.path().join("other.toml");
        let from_cli = resolve_config(Some(&cli));
        assert_eq!(from_cli.source, ConfigSource::CliArgument);
        assert_eq!(from_cli.config, Some(cli));
    });
}
