//! Model specification types.
//!
//! A model is a set of named scalar parameters with prior distributions,
//! optional hierarchical group-effect blocks, and a likelihood that links a
//! linear predictor over the design columns to an outcome family.
//!
//! ```json
//! {
//!   "schema_version": "1.0.0",
//!   "name": "eight-schools",
//!   "parameters": [
//!     { "name": "mu", "prior": { "dist": "normal", "mean": 0, "sd": 5 } },
//!     { "name": "sigma", "prior": { "dist": "half_normal", "sd": 5 } }
//!   ],
//!   "group_effects": [
//!     { "grouping": "school",
//!       "terms": [ { "name": "intercept", "sd_prior": { "dist": "half_normal", "sd": 5 } } ] }
//!   ],
//!   "likelihood": {
//!     "family": "normal",
//!     "terms": [ { "parameter": "mu" } ],
//!     "sigma": "sigma"
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::validate::{ValidationError, ValidationResult};

/// Complete model specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub schema_version: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub parameters: Vec<ParameterDecl>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_effects: Vec<GroupEffectSpec>,

    pub likelihood: LikelihoodSpec,
}

impl ModelSpec {
    /// Load a model from a JSON file (or TOML when the extension is `.toml`).
    pub fn from_file(path: &Path) -> ValidationResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)
                .map_err(|e| ValidationError::ParseError(format!("Invalid TOML: {}", e)))
        } else {
            Self::from_json_str(&content)
        }
    }

    /// Parse a model from a JSON string.
    pub fn from_json_str(json: &str) -> ValidationResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ValidationError::ParseError(format!("Invalid JSON: {}", e)))
    }

    /// Look up a declared (non-generated) parameter.
    pub fn parameter(&self, name: &str) -> Option<&ParameterDecl> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Names of scalars with a `constant` prior, group sds included. Every
    /// draw equals the truth for these, so they carry no rank information.
    pub fn fixed_parameters(&self) -> Vec<String> {
        let declared = self
            .parameters
            .iter()
            .filter(|p| p.prior.is_constant())
            .map(|p| p.name.clone());
        let sds = self.group_effects.iter().flat_map(|block| {
            block
                .terms
                .iter()
                .filter(|t| t.sd_prior.is_constant())
                .map(move |t| sd_name(&block.grouping, &t.name))
        });
        declared.chain(sds).collect()
    }
}

/// One declared scalar parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub name: String,
    pub prior: Distribution,
}

/// A hyperparameter: a literal number, or the name of another parameter
/// whose sampled value is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Hyper {
    Literal(f64),
    Ref(String),
}

impl Hyper {
    pub fn literal(&self) -> Option<f64> {
        match self {
            Hyper::Literal(v) => Some(*v),
            Hyper::Ref(_) => None,
        }
    }

    pub fn reference(&self) -> Option<&str> {
        match self {
            Hyper::Literal(_) => None,
            Hyper::Ref(name) => Some(name),
        }
    }
}

impl From<f64> for Hyper {
    fn from(v: f64) -> Self {
        Hyper::Literal(v)
    }
}

impl From<&str> for Hyper {
    fn from(name: &str) -> Self {
        Hyper::Ref(name.to_string())
    }
}

impl fmt::Display for Hyper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hyper::Literal(v) => write!(f, "{}", v),
            Hyper::Ref(name) => write!(f, "{}", name),
        }
    }
}

/// Domain a hyperparameter value must lie in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HyperDomain {
    Real,
    Positive,
}

/// Support of a distribution, used to check references used as scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Support {
    Real,
    Positive,
    UnitInterval,
    Interval,
}

impl Support {
    /// Whether every draw is strictly positive (almost surely).
    pub fn is_positive(&self) -> bool {
        matches!(self, Support::Positive | Support::UnitInterval)
    }
}

/// Prior distribution families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dist", rename_all = "snake_case")]
pub enum Distribution {
    Normal { mean: Hyper, sd: Hyper },
    HalfNormal { sd: Hyper },
    StudentT { df: Hyper, location: Hyper, scale: Hyper },
    HalfStudentT { df: Hyper, scale: Hyper },
    Exponential { rate: Hyper },
    /// Shape/rate parameterization.
    Gamma { shape: Hyper, rate: Hyper },
    Lognormal { meanlog: Hyper, sdlog: Hyper },
    Beta { alpha: Hyper, beta: Hyper },
    Uniform { lower: Hyper, upper: Hyper },
    Constant { value: Hyper },
}

impl Distribution {
    pub fn name(&self) -> &'static str {
        match self {
            Distribution::Normal { .. } => "normal",
            Distribution::HalfNormal { .. } => "half_normal",
            Distribution::StudentT { .. } => "student_t",
            Distribution::HalfStudentT { .. } => "half_student_t",
            Distribution::Exponential { .. } => "exponential",
            Distribution::Gamma { .. } => "gamma",
            Distribution::Lognormal { .. } => "lognormal",
            Distribution::Beta { .. } => "beta",
            Distribution::Uniform { .. } => "uniform",
            Distribution::Constant { .. } => "constant",
        }
    }

    /// Named hyperparameters with the domain each must satisfy.
    pub fn hypers(&self) -> Vec<(&'static str, &Hyper, HyperDomain)> {
        use HyperDomain::{Positive, Real};
        match self {
            Distribution::Normal { mean, sd } => vec![("mean", mean, Real), ("sd", sd, Positive)],
            Distribution::HalfNormal { sd } => vec![("sd", sd, Positive)],
            Distribution::StudentT {
                df,
                location,
                scale,
            } => vec![
                ("df", df, Positive),
                ("location", location, Real),
                ("scale", scale, Positive),
            ],
            Distribution::HalfStudentT { df, scale } => {
                vec![("df", df, Positive), ("scale", scale, Positive)]
            }
            Distribution::Exponential { rate } => vec![("rate", rate, Positive)],
            Distribution::Gamma { shape, rate } => {
                vec![("shape", shape, Positive), ("rate", rate, Positive)]
            }
            Distribution::Lognormal { meanlog, sdlog } => {
                vec![("meanlog", meanlog, Real), ("sdlog", sdlog, Positive)]
            }
            Distribution::Beta { alpha, beta } => {
                vec![("alpha", alpha, Positive), ("beta", beta, Positive)]
            }
            Distribution::Uniform { lower, upper } => {
                vec![("lower", lower, Real), ("upper", upper, Real)]
            }
            Distribution::Constant { value } => vec![("value", value, Real)],
        }
    }

    /// Names of parameters referenced by this distribution's hyperparameters.
    pub fn references(&self) -> Vec<&str> {
        self.hypers()
            .into_iter()
            .filter_map(|(_, h, _)| h.reference())
            .collect()
    }

    pub fn support(&self) -> Support {
        match self {
            Distribution::Normal { .. } | Distribution::StudentT { .. } => Support::Real,
            Distribution::HalfNormal { .. }
            | Distribution::HalfStudentT { .. }
            | Distribution::Exponential { .. }
            | Distribution::Gamma { .. }
            | Distribution::Lognormal { .. } => Support::Positive,
            Distribution::Beta { .. } => Support::UnitInterval,
            Distribution::Uniform { lower, .. } => match lower.literal() {
                Some(lo) if lo >= 0.0 => Support::Positive,
                _ => Support::Interval,
            },
            Distribution::Constant { value } => match value.literal() {
                Some(v) if v > 0.0 => Support::Positive,
                _ => Support::Real,
            },
        }
    }

    /// Whether a sample from this distribution is the same every time.
    pub fn is_constant(&self) -> bool {
        matches!(self, Distribution::Constant { .. })
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self
            .hypers()
            .into_iter()
            .map(|(name, h, _)| format!("{}={}", name, h))
            .collect();
        write!(f, "{}({})", self.name(), args.join(", "))
    }
}

/// Varying effects by a grouping factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEffectSpec {
    /// Label column in the design whose levels index the effects.
    pub grouping: String,

    pub terms: Vec<GroupTerm>,

    /// LKJ prior on the correlation between terms; independent when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<LkjSpec>,
}

/// One varying term: an intercept (no predictor) or a slope on a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTerm {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predictor: Option<String>,

    /// Prior on the between-group standard deviation.
    pub sd_prior: Distribution,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LkjSpec {
    pub eta: f64,
}

/// Observation families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Normal,
    Binomial,
    Bernoulli,
    Poisson,
}

impl Family {
    pub fn canonical_link(&self) -> Link {
        match self {
            Family::Normal => Link::Identity,
            Family::Binomial | Family::Bernoulli => Link::Logit,
            Family::Poisson => Link::Log,
        }
    }

    pub fn allows(&self, link: Link) -> bool {
        match self {
            Family::Normal => matches!(link, Link::Identity),
            Family::Binomial | Family::Bernoulli => matches!(link, Link::Logit | Link::Probit),
            Family::Poisson => matches!(link, Link::Log),
        }
    }

    /// Whether outcomes are counts (so a fraction of zeros is meaningful).
    pub fn is_discrete(&self) -> bool {
        !matches!(self, Family::Normal)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Family::Normal => "normal",
            Family::Binomial => "binomial",
            Family::Bernoulli => "bernoulli",
            Family::Poisson => "poisson",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    Identity,
    Logit,
    Log,
    Probit,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Link::Identity => "identity",
            Link::Logit => "logit",
            Link::Log => "log",
            Link::Probit => "probit",
        };
        write!(f, "{}", name)
    }
}

/// Likelihood: `y_i ~ family(link^-1(eta_i))` with
/// `eta_i = sum_t parameter_t * predictor_t[i] + group effects`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikelihoodSpec {
    pub family: Family,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,

    pub terms: Vec<Term>,

    /// Residual standard deviation (normal family only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma: Option<Hyper>,

    /// Column holding trial counts (binomial family only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trials: Option<String>,
}

impl LikelihoodSpec {
    /// Declared link, or the family's canonical one.
    pub fn link(&self) -> Link {
        self.link.unwrap_or_else(|| self.family.canonical_link())
    }
}

/// One population-level term: a parameter times a predictor column (or 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub parameter: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predictor: Option<String>,
}

/// Name of the between-group standard deviation of a term.
pub fn sd_name(grouping: &str, term: &str) -> String {
    format!("sd_{}__{}", grouping, term)
}

/// Name of the correlation between two terms of a group block.
pub fn cor_name(grouping: &str, a: &str, b: &str) -> String {
    format!("cor_{}__{}__{}", grouping, a, b)
}

/// Name of one group-level deviation.
pub fn group_effect_name(grouping: &str, level: &str, term: &str) -> String {
    format!("r_{}[{},{}]", grouping, level, term)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EIGHT_SCHOOLS: &str = r#"{
        "schema_version": "1.0.0",
        "name": "eight-schools",
        "parameters": [
            { "name": "mu", "prior": { "dist": "normal", "mean": 0, "sd": 5 } },
            { "name": "sigma", "prior": { "dist": "half_normal", "sd": 5 } }
        ],
        "group_effects": [
            { "grouping": "school",
              "terms": [ { "name": "intercept", "sd_prior": { "dist": "half_normal", "sd": 5 } } ] }
        ],
        "likelihood": {
            "family": "normal",
            "terms": [ { "parameter": "mu" } ],
            "sigma": "sigma"
        }
    }"#;

    #[test]
    fn parses_tagged_distributions_and_references() {
        let model = ModelSpec::from_json_str(EIGHT_SCHOOLS).unwrap();
        assert_eq!(model.parameters.len(), 2);
        assert_eq!(
            model.parameters[0].prior,
            Distribution::Normal {
                mean: Hyper::Literal(0.0),
                sd: Hyper::Literal(5.0)
            }
        );
        assert_eq!(model.likelihood.sigma, Some(Hyper::Ref("sigma".into())));
        assert_eq!(model.likelihood.link(), Link::Identity);
        assert_eq!(model.group_effects[0].terms[0].predictor, None);
    }

    #[test]
    fn rejects_unknown_distribution() {
        let json = EIGHT_SCHOOLS.replace("\"dist\": \"normal\"", "\"dist\": \"cauchy\"");
        assert!(matches!(
            ModelSpec::from_json_str(&json),
            Err(ValidationError::ParseError(_))
        ));
    }

    #[test]
    fn supports() {
        let uniform = Distribution::Uniform {
            lower: 0.0.into(),
            upper: 2.0.into(),
        };
        assert!(uniform.support().is_positive());
        let shifted = Distribution::Uniform {
            lower: (-1.0).into(),
            upper: 2.0.into(),
        };
        assert_eq!(shifted.support(), Support::Interval);
        assert!(Distribution::Beta {
            alpha: 2.0.into(),
            beta: 2.0.into()
        }
        .support()
        .is_positive());
        assert!(!Distribution::StudentT {
            df: 3.0.into(),
            location: 0.0.into(),
            scale: 1.0.into()
        }
        .support()
        .is_positive());
    }

    #[test]
    fn references_and_display() {
        let d = Distribution::Normal {
            mean: "mu".into(),
            sd: "tau".into(),
        };
        assert_eq!(d.references(), vec!["mu", "tau"]);
        assert_eq!(d.to_string(), "normal(mean=mu, sd=tau)");
    }

    #[test]
    fn canonical_links() {
        assert_eq!(Family::Binomial.canonical_link(), Link::Logit);
        assert_eq!(Family::Poisson.canonical_link(), Link::Log);
        assert!(Family::Bernoulli.allows(Link::Probit));
        assert!(!Family::Normal.allows(Link::Logit));
    }

    #[test]
    fn constant_priors_are_fixed() {
        let mut model = ModelSpec::from_json_str(EIGHT_SCHOOLS).unwrap();
        assert!(model.fixed_parameters().is_empty());

        model.parameters[1].prior = Distribution::Constant { value: 1.0.into() };
        model.group_effects[0].terms[0].sd_prior = Distribution::Constant { value: 2.0.into() };
        assert_eq!(
            model.fixed_parameters(),
            vec!["sigma".to_string(), "sd_school__intercept".to_string()]
        );
    }

    #[test]
    fn generated_names() {
        assert_eq!(sd_name("county", "intercept"), "sd_county__intercept");
        assert_eq!(cor_name("county", "intercept", "floor"), "cor_county__intercept__floor");
        assert_eq!(group_effect_name("county", "A", "floor"), "r_county[A,floor]");
    }
}
