//! Built-in model presets.
//!
//! Provides ready-made model, design and run configurations for:
//! - Normal-normal: two-parameter conjugate regression, exact posterior
//! - Eight schools: hierarchical normal with partial pooling
//! - Radon logit: binomial logit with correlated varying intercepts and slopes

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::design::Design;
use crate::model::{
    Distribution, Family, GroupEffectSpec, GroupTerm, Hyper, LikelihoodSpec, LkjSpec, ModelSpec,
    ParameterDecl, Term,
};
use crate::run::{AnalysisConfig, Backend, RunConfig};

/// Available presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresetName {
    /// Conjugate normal regression; runs with the closed-form backend
    NormalNormal,
    /// Hierarchical normal; needs an external sampler
    EightSchools,
    /// Binomial logit with correlated group effects; needs an external sampler
    RadonLogit,
}

impl PresetName {
    /// All available preset names.
    pub const ALL: &'static [PresetName] = &[
        PresetName::NormalNormal,
        PresetName::EightSchools,
        PresetName::RadonLogit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PresetName::NormalNormal => "normal-normal",
            PresetName::EightSchools => "eight-schools",
            PresetName::RadonLogit => "radon-logit",
        }
    }

    /// Parse preset name from string.
    pub fn parse(s: &str) -> Option<PresetName> {
        match s.to_lowercase().as_str() {
            "normal-normal" | "normal" | "conjugate" => Some(PresetName::NormalNormal),
            "eight-schools" | "8schools" | "schools" => Some(PresetName::EightSchools),
            "radon-logit" | "radon" | "logit" => Some(PresetName::RadonLogit),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PresetName::NormalNormal => {
                "Two-parameter normal regression with N(0,1) priors and known sigma; exact posterior"
            }
            PresetName::EightSchools => {
                "Hierarchical normal: school intercepts drawn given a sampled between-school sd"
            }
            PresetName::RadonLogit => {
                "Binomial logit with correlated county intercepts and floor slopes (LKJ prior)"
            }
        }
    }
}

impl fmt::Display for PresetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error for unknown preset names.
#[derive(Debug, Clone)]
pub struct PresetError {
    pub name: String,
}

impl fmt::Display for PresetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = PresetName::ALL.iter().map(|p| p.as_str()).collect();
        write!(
            f,
            "unknown preset '{}'; available: {}",
            self.name,
            names.join(", ")
        )
    }
}

impl std::error::Error for PresetError {}

impl std::str::FromStr for PresetName {
    type Err = PresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PresetName::parse(s).ok_or_else(|| PresetError {
            name: s.to_string(),
        })
    }
}

/// A complete, runnable configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub name: PresetName,
    pub model: ModelSpec,
    pub design: Design,
    pub run: RunConfig,
}

/// Summary row for `sbc presets`.
#[derive(Debug, Clone, Serialize)]
pub struct PresetInfo {
    pub name: PresetName,
    pub description: &'static str,
    pub parameters: usize,
    pub group_effects: usize,
    pub observations: usize,
    pub backend: Backend,
}

impl PresetInfo {
    pub fn from_preset(name: PresetName) -> Self {
        let preset = get_preset(name);
        PresetInfo {
            name,
            description: name.description(),
            parameters: preset.model.parameters.len(),
            group_effects: preset.model.group_effects.len(),
            observations: preset.design.n_obs(),
            backend: preset.run.backend,
        }
    }
}

pub fn get_preset(name: PresetName) -> Preset {
    match name {
        PresetName::NormalNormal => normal_normal(),
        PresetName::EightSchools => eight_schools(),
        PresetName::RadonLogit => radon_logit(),
    }
}

pub fn list_presets() -> Vec<PresetInfo> {
    PresetName::ALL
        .iter()
        .map(|&name| PresetInfo::from_preset(name))
        .collect()
}

fn param(name: &str, prior: Distribution) -> ParameterDecl {
    ParameterDecl {
        name: name.to_string(),
        prior,
    }
}

fn normal(mean: f64, sd: f64) -> Distribution {
    Distribution::Normal {
        mean: mean.into(),
        sd: sd.into(),
    }
}

fn half_normal(sd: f64) -> Distribution {
    Distribution::HalfNormal { sd: sd.into() }
}

fn term(parameter: &str, predictor: Option<&str>) -> Term {
    Term {
        parameter: parameter.to_string(),
        predictor: predictor.map(str::to_string),
    }
}

fn labels(levels: &[&str], per_level: usize) -> Vec<String> {
    levels
        .iter()
        .flat_map(|l| std::iter::repeat(l.to_string()).take(per_level))
        .collect()
}

/// Sampler command placeholder written by `sbc init` for non-conjugate presets.
fn external_sampler(mut run: RunConfig) -> RunConfig {
    run.backend = Backend::Command;
    run.fit_command = vec!["./fit-posterior".to_string()];
    run.fit_timeout_secs = 600;
    run
}

/// y = alpha + beta * x + e, e ~ N(0, 1), n = 10, priors N(0, 1).
fn normal_normal() -> Preset {
    let x: Vec<f64> = (0..10).map(|i| -2.25 + 0.5 * i as f64).collect();
    Preset {
        name: PresetName::NormalNormal,
        model: ModelSpec {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            name: "normal-normal".to_string(),
            description: Some(PresetName::NormalNormal.description().to_string()),
            parameters: vec![param("alpha", normal(0.0, 1.0)), param("beta", normal(0.0, 1.0))],
            group_effects: Vec::new(),
            likelihood: LikelihoodSpec {
                family: Family::Normal,
                link: None,
                terms: vec![term("alpha", None), term("beta", Some("x"))],
                sigma: Some(Hyper::Literal(1.0)),
                trials: None,
            },
        },
        design: Design {
            name: Some("normal-normal".to_string()),
            ..Default::default()
        }
        .with_numbers("x", x),
        run: RunConfig {
            replicates: 200,
            analysis: AnalysisConfig {
                bins: 20,
                ..Default::default()
            },
            ..Default::default()
        },
    }
}

fn eight_schools() -> Preset {
    let schools = ["A", "B", "C", "D", "E", "F", "G", "H"];
    Preset {
        name: PresetName::EightSchools,
        model: ModelSpec {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            name: "eight-schools".to_string(),
            description: Some(PresetName::EightSchools.description().to_string()),
            parameters: vec![param("mu", normal(0.0, 5.0)), param("sigma", half_normal(5.0))],
            group_effects: vec![GroupEffectSpec {
                grouping: "school".to_string(),
                terms: vec![GroupTerm {
                    name: "intercept".to_string(),
                    predictor: None,
                    sd_prior: half_normal(5.0),
                }],
                correlation: None,
            }],
            likelihood: LikelihoodSpec {
                family: Family::Normal,
                link: None,
                terms: vec![term("mu", None)],
                sigma: Some(Hyper::Ref("sigma".to_string())),
                trials: None,
            },
        },
        design: Design {
            name: Some("eight-schools".to_string()),
            ..Default::default()
        }
        .with_labels("school", labels(&schools, 4)),
        run: external_sampler(RunConfig::default()),
    }
}

fn radon_logit() -> Preset {
    let counties = ["aitkin", "anoka", "becker", "beltrami", "benton", "blue_earth"];
    let n = counties.len() * 4;
    let floor: Vec<f64> = (0..n).map(|i| (i % 2) as f64).collect();
    let trials: Vec<f64> = (0..n).map(|i| 10.0 + 2.0 * (i % 3) as f64).collect();
    Preset {
        name: PresetName::RadonLogit,
        model: ModelSpec {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            name: "radon-logit".to_string(),
            description: Some(PresetName::RadonLogit.description().to_string()),
            parameters: vec![param("alpha", normal(0.0, 1.5)), param("beta", normal(0.0, 1.0))],
            group_effects: vec![GroupEffectSpec {
                grouping: "county".to_string(),
                terms: vec![
                    GroupTerm {
                        name: "intercept".to_string(),
                        predictor: None,
                        sd_prior: half_normal(1.0),
                    },
                    GroupTerm {
                        name: "floor".to_string(),
                        predictor: Some("floor".to_string()),
                        sd_prior: half_normal(0.5),
                    },
                ],
                correlation: Some(LkjSpec { eta: 2.0 }),
            }],
            likelihood: LikelihoodSpec {
                family: Family::Binomial,
                link: None,
                terms: vec![term("alpha", None), term("beta", Some("floor"))],
                sigma: None,
                trials: Some("n".to_string()),
            },
        },
        design: Design {
            name: Some("radon-logit".to_string()),
            ..Default::default()
        }
        .with_labels("county", labels(&counties, 4))
        .with_numbers("floor", floor)
        .with_numbers("n", trials),
        run: external_sampler(RunConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{validate_design, validate_model, validate_run};

    #[test]
    fn test_preset_name_parsing() {
        assert_eq!(PresetName::parse("normal-normal"), Some(PresetName::NormalNormal));
        assert_eq!(PresetName::parse("8schools"), Some(PresetName::EightSchools));
        assert_eq!(PresetName::parse("Radon"), Some(PresetName::RadonLogit));
        assert_eq!(PresetName::parse("unknown"), None);
        assert!("nope".parse::<PresetName>().is_err());
    }

    #[test]
    fn every_preset_validates() {
        for &name in PresetName::ALL {
            let preset = get_preset(name);
            validate_model(&preset.model).unwrap();
            validate_design(&preset.model, &preset.design).unwrap();
            validate_run(&preset.run).unwrap();
            assert_eq!(preset.model.name, name.as_str());
        }
    }

    #[test]
    fn normal_normal_design() {
        let preset = get_preset(PresetName::NormalNormal);
        let x = preset.design.numeric("x").unwrap();
        assert_eq!(x.len(), 10);
        let sum_sq: f64 = x.iter().map(|v| v * v).sum();
        assert!((sum_sq - 20.625).abs() < 1e-12);
        assert!(x.iter().sum::<f64>().abs() < 1e-12);
        assert_eq!(preset.run.backend, Backend::Conjugate);
    }

    #[test]
    fn hierarchical_presets_use_external_sampler() {
        for name in [PresetName::EightSchools, PresetName::RadonLogit] {
            let preset = get_preset(name);
            assert_eq!(preset.run.backend, Backend::Command);
            assert!(!preset.run.fit_command.is_empty());
        }
        let radon = get_preset(PresetName::RadonLogit);
        assert_eq!(radon.design.levels("county").unwrap().len(), 6);
    }

    #[test]
    fn list_presets_covers_all() {
        let infos = list_presets();
        assert_eq!(infos.len(), PresetName::ALL.len());
        assert_eq!(infos[0].observations, 10);
    }
}
