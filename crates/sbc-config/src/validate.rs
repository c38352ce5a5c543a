//! Configuration validation errors and semantic validation.
//!
//! Model checks raise prior-specification errors, design checks raise schema
//! errors, run checks raise configuration errors. All of them run before any
//! replicate starts.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::design::{Column, Design};
use crate::model::{cor_name, sd_name, Distribution, Family, Hyper, HyperDomain, ModelSpec, Support};
use crate::run::{Backend, RunConfig};

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("Invalid prior for {field}: {message}")]
    InvalidPrior { field: String, message: String },

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Design does not match model: {0}")]
    Schema(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        sbc_common::Error::from(self.clone()).code()
    }
}

impl From<ValidationError> for sbc_common::Error {
    fn from(err: ValidationError) -> Self {
        use sbc_common::Error;
        match err {
            ValidationError::InvalidPrior { .. } | ValidationError::InvalidModel(_) => {
                Error::InvalidPriorSpec(err.to_string())
            }
            ValidationError::Schema(message) => Error::SchemaMismatch(message),
            ValidationError::IoError(_)
            | ValidationError::ParseError(_)
            | ValidationError::VersionMismatch { .. }
            | ValidationError::InvalidValue { .. } => Error::Config(err.to_string()),
        }
    }
}

/// Validate a model specification on its own.
pub fn validate_model(model: &ModelSpec) -> ValidationResult<()> {
    if model.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: model.schema_version.clone(),
        });
    }
    if model.parameters.is_empty() && model.group_effects.is_empty() {
        return Err(ValidationError::InvalidModel(
            "model declares no parameters".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for param in &model.parameters {
        check_name(&param.name)?;
        if !names.insert(param.name.clone()) {
            return Err(ValidationError::InvalidModel(format!(
                "duplicate parameter name '{}'",
                param.name
            )));
        }
    }

    let supports: HashMap<&str, Support> = model
        .parameters
        .iter()
        .map(|p| (p.name.as_str(), p.prior.support()))
        .collect();

    for param in &model.parameters {
        validate_distribution(&param.name, &param.prior, &supports)?;
    }

    for block in &model.group_effects {
        check_name(&block.grouping)?;
        if block.terms.is_empty() {
            return Err(ValidationError::InvalidModel(format!(
                "group effect on '{}' has no terms",
                block.grouping
            )));
        }
        let mut term_names = HashSet::new();
        for term in &block.terms {
            check_name(&term.name)?;
            if !term_names.insert(term.name.as_str()) {
                return Err(ValidationError::InvalidModel(format!(
                    "group effect on '{}' repeats term '{}'",
                    block.grouping, term.name
                )));
            }
            let sd = sd_name(&block.grouping, &term.name);
            validate_distribution(&sd, &term.sd_prior, &supports)?;
            if !term.sd_prior.support().is_positive() {
                return Err(ValidationError::InvalidPrior {
                    field: sd,
                    message: format!(
                        "a standard deviation prior needs positive support, {} does not have it",
                        term.sd_prior.name()
                    ),
                });
            }
            if !names.insert(sd.clone()) {
                return Err(ValidationError::InvalidModel(format!(
                    "generated name '{}' collides with another parameter",
                    sd
                )));
            }
        }
        if let Some(lkj) = &block.correlation {
            if !(lkj.eta.is_finite() && lkj.eta > 0.0) {
                return Err(ValidationError::InvalidPrior {
                    field: format!("group_effects.{}.correlation.eta", block.grouping),
                    message: format!("must be > 0, got {}", lkj.eta),
                });
            }
            if block.terms.len() < 2 {
                return Err(ValidationError::InvalidModel(format!(
                    "correlation on '{}' needs at least two terms",
                    block.grouping
                )));
            }
            for (i, a) in block.terms.iter().enumerate() {
                for b in &block.terms[i + 1..] {
                    let cor = cor_name(&block.grouping, &a.name, &b.name);
                    if !names.insert(cor.clone()) {
                        return Err(ValidationError::InvalidModel(format!(
                            "generated name '{}' collides with another parameter",
                            cor
                        )));
                    }
                }
            }
        }
    }
    let groupings: HashSet<&str> = model
        .group_effects
        .iter()
        .map(|b| b.grouping.as_str())
        .collect();
    if groupings.len() != model.group_effects.len() {
        return Err(ValidationError::InvalidModel(
            "each grouping factor may have only one group effect block".to_string(),
        ));
    }

    validate_likelihood(model, &supports)
}

fn validate_likelihood(
    model: &ModelSpec,
    supports: &HashMap<&str, Support>,
) -> ValidationResult<()> {
    let lik = &model.likelihood;
    if lik.terms.is_empty() && model.group_effects.is_empty() {
        return Err(ValidationError::InvalidModel(
            "likelihood has an empty linear predictor".to_string(),
        ));
    }
    for term in &lik.terms {
        if !supports.contains_key(term.parameter.as_str()) {
            return Err(ValidationError::InvalidModel(format!(
                "likelihood term names undeclared parameter '{}'",
                term.parameter
            )));
        }
    }
    if !lik.family.allows(lik.link()) {
        return Err(ValidationError::InvalidModel(format!(
            "link '{}' is not available for family '{}'",
            lik.link(),
            lik.family
        )));
    }

    match (lik.family, &lik.sigma) {
        (Family::Normal, None) => {
            return Err(ValidationError::InvalidModel(
                "normal likelihood needs 'sigma'".to_string(),
            ))
        }
        (Family::Normal, Some(sigma)) => {
            check_hyper("likelihood.sigma", sigma, HyperDomain::Positive, supports)?;
        }
        (_, Some(_)) => {
            return Err(ValidationError::InvalidModel(format!(
                "'sigma' only applies to the normal family, not '{}'",
                lik.family
            )))
        }
        (_, None) => {}
    }

    match (lik.family, &lik.trials) {
        (Family::Binomial, None) => Err(ValidationError::InvalidModel(
            "binomial likelihood needs a 'trials' column".to_string(),
        )),
        (Family::Binomial, Some(_)) | (_, None) => Ok(()),
        (_, Some(_)) => Err(ValidationError::InvalidModel(format!(
            "'trials' only applies to the binomial family, not '{}'",
            lik.family
        ))),
    }
}

fn validate_distribution(
    field: &str,
    dist: &Distribution,
    supports: &HashMap<&str, Support>,
) -> ValidationResult<()> {
    for (hyper_name, hyper, domain) in dist.hypers() {
        check_hyper(&format!("{}.{}", field, hyper_name), hyper, domain, supports)?;
    }
    if let Distribution::Uniform { lower, upper } = dist {
        if let (Some(lo), Some(hi)) = (lower.literal(), upper.literal()) {
            if lo >= hi {
                return Err(ValidationError::InvalidPrior {
                    field: field.to_string(),
                    message: format!("uniform lower {} must be below upper {}", lo, hi),
                });
            }
        }
    }
    Ok(())
}

fn check_hyper(
    field: &str,
    hyper: &Hyper,
    domain: HyperDomain,
    supports: &HashMap<&str, Support>,
) -> ValidationResult<()> {
    match (hyper.literal(), hyper.reference()) {
        (Some(v), _) => {
            if !v.is_finite() {
                return Err(ValidationError::InvalidPrior {
                    field: field.to_string(),
                    message: format!("must be finite, got {}", v),
                });
            }
            if domain == HyperDomain::Positive && v <= 0.0 {
                return Err(ValidationError::InvalidPrior {
                    field: field.to_string(),
                    message: format!("must be > 0, got {}", v),
                });
            }
        }
        (None, Some(name)) => {
            let Some(support) = supports.get(name) else {
                return Err(ValidationError::InvalidPrior {
                    field: field.to_string(),
                    message: format!("references undeclared parameter '{}'", name),
                });
            };
            if domain == HyperDomain::Positive && !support.is_positive() {
                return Err(ValidationError::InvalidPrior {
                    field: field.to_string(),
                    message: format!(
                        "must be positive but references '{}' whose prior is not",
                        name
                    ),
                });
            }
        }
        (None, None) => {}
    }
    Ok(())
}

fn check_name(name: &str) -> ValidationResult<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidModel(format!(
            "'{}' is not a valid name (letters, digits, '_' and '.')",
            name
        )))
    }
}

/// Validate that a design supplies every column the model needs.
pub fn validate_design(model: &ModelSpec, design: &Design) -> ValidationResult<()> {
    let n = design.n_obs();
    if n == 0 {
        return Err(ValidationError::Schema(
            "design has no observations".to_string(),
        ));
    }
    for (name, column) in &design.columns {
        if column.len() != n {
            return Err(ValidationError::Schema(format!(
                "column '{}' has {} values, expected {}",
                name,
                column.len(),
                n
            )));
        }
        if let Column::Numbers(values) = column {
            if let Some(v) = values.iter().find(|v| !v.is_finite()) {
                return Err(ValidationError::Schema(format!(
                    "column '{}' holds non-finite value {}",
                    name, v
                )));
            }
        }
    }

    let predictors = model
        .likelihood
        .terms
        .iter()
        .filter_map(|t| t.predictor.as_deref())
        .chain(
            model
                .group_effects
                .iter()
                .flat_map(|b| b.terms.iter().filter_map(|t| t.predictor.as_deref())),
        );
    for predictor in predictors {
        require_numeric(design, predictor, "predictor")?;
    }

    for block in &model.group_effects {
        match design.columns.get(&block.grouping) {
            None => {
                return Err(ValidationError::Schema(format!(
                    "grouping column '{}' is missing",
                    block.grouping
                )))
            }
            Some(Column::Numbers(_)) => {
                return Err(ValidationError::Schema(format!(
                    "grouping column '{}' must hold labels, found numbers",
                    block.grouping
                )))
            }
            Some(Column::Labels(_)) => {}
        }
    }

    if let Some(trials) = &model.likelihood.trials {
        let values = require_numeric(design, trials, "trials")?;
        if let Some(v) = values.iter().find(|v| **v < 0.0 || v.fract() != 0.0) {
            return Err(ValidationError::Schema(format!(
                "trials column '{}' must hold non-negative integers, found {}",
                trials, v
            )));
        }
    }
    Ok(())
}

fn require_numeric<'a>(design: &'a Design, name: &str, role: &str) -> ValidationResult<&'a [f64]> {
    match design.columns.get(name) {
        None => Err(ValidationError::Schema(format!(
            "{} column '{}' is missing",
            role, name
        ))),
        Some(Column::Labels(_)) => Err(ValidationError::Schema(format!(
            "{} column '{}' must be numeric, found labels",
            role, name
        ))),
        Some(Column::Numbers(values)) => Ok(values),
    }
}

/// Validate run settings.
pub fn validate_run(config: &RunConfig) -> ValidationResult<()> {
    fn invalid(field: &str, message: String) -> ValidationResult<()> {
        Err(ValidationError::InvalidValue {
            field: field.to_string(),
            message,
        })
    }

    if config.replicates == 0 {
        return invalid("replicates", "must be at least 1".to_string());
    }
    if config.start == 0 {
        return invalid("start", "replicate indices are 1-based".to_string());
    }
    if config.draws == 0 {
        return invalid("draws", "must be at least 1".to_string());
    }
    if config.thin == 0 {
        return invalid("thin", "must be at least 1".to_string());
    }
    if config.fit_timeout_secs == 0 {
        return invalid("fit_timeout_secs", "must be at least 1".to_string());
    }
    if !(config.rhat_threshold.is_finite() && config.rhat_threshold >= 1.0) {
        return invalid(
            "rhat_threshold",
            format!("must be >= 1, got {}", config.rhat_threshold),
        );
    }
    if !(config.min_ess.is_finite() && config.min_ess >= 0.0) {
        return invalid("min_ess", format!("must be >= 0, got {}", config.min_ess));
    }
    if config.prior_variance_draws < 2 {
        return invalid(
            "prior_variance_draws",
            "need at least 2 draws to estimate a variance".to_string(),
        );
    }
    if config.backend == Backend::Command && config.fit_command.is_empty() {
        return invalid(
            "fit_command",
            "the command backend needs a sampler command".to_string(),
        );
    }

    let analysis = &config.analysis;
    if analysis.bins == 0 {
        return invalid("analysis.bins", "must be at least 1".to_string());
    }
    if analysis.bins > config.draws + 1 {
        return invalid(
            "analysis.bins",
            format!(
                "{} bins exceed the {} possible ranks (draws + 1)",
                analysis.bins,
                config.draws + 1
            ),
        );
    }
    if !(analysis.level > 0.0 && analysis.level < 1.0) {
        return invalid(
            "analysis.level",
            format!("must be in (0, 1), got {}", analysis.level),
        );
    }
    if !(analysis.alpha > 0.0 && analysis.alpha < 1.0) {
        return invalid(
            "analysis.alpha",
            format!("must be in (0, 1), got {}", analysis.alpha),
        );
    }
    if analysis.envelope_sims == 0 {
        return invalid("analysis.envelope_sims", "must be at least 1".to_string());
    }
    Ok(())
}
