//! Data simulator.
//!
//! Reuses the design template unchanged and draws only a fresh outcome
//! column from the likelihood, conditional on one parameter vector.

use rand::distr::Bernoulli;
use rand::Rng;
use rand_distr::{Binomial, Distribution as _, Normal, Poisson};
use sbc_common::{Error, Result};
use sbc_config::{Column, Design, Family, Link};
use serde::{Deserialize, Serialize};

use super::{CompiledModel, ParameterVector};

/// Column name the outcome takes when a dataset is materialized.
pub const OUTCOME_COLUMN: &str = "y";

/// One synthetic dataset: the shared design plus a simulated outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedDataset {
    pub outcome: Vec<f64>,
}

impl SimulatedDataset {
    pub fn len(&self) -> usize {
        self.outcome.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcome.is_empty()
    }

    /// The full table: design columns followed by the outcome column.
    pub fn to_table(&self, design: &Design) -> Design {
        let mut table = design.clone();
        table
            .columns
            .insert(OUTCOME_COLUMN.to_string(), Column::Numbers(self.outcome.clone()));
        table
    }
}

/// Linear predictor `eta` for every observation.
pub fn linear_predictor(model: &CompiledModel, params: &ParameterVector) -> Result<Vec<f64>> {
    let mut eta = vec![0.0; model.n_obs()];

    for term in &model.likelihood().terms {
        let coef = params.get(&term.parameter).ok_or_else(|| {
            Error::SchemaMismatch(format!("parameter vector lacks '{}'", term.parameter))
        })?;
        let x = model.predictor_values(term.predictor.as_deref())?;
        for (e, xi) in eta.iter_mut().zip(x) {
            *e += coef * xi;
        }
    }

    for group in model.groups() {
        let columns: Vec<Vec<f64>> = group
            .predictors
            .iter()
            .map(|p| model.predictor_values(p.as_deref()))
            .collect::<Result<_>>()?;
        let effects: Vec<Vec<f64>> = group
            .effect_names
            .iter()
            .map(|names| {
                params.values_for(names).ok_or_else(|| {
                    Error::SchemaMismatch(format!(
                        "parameter vector lacks deviations for group '{}'",
                        group.grouping
                    ))
                })
            })
            .collect::<Result<_>>()?;
        for (i, e) in eta.iter_mut().enumerate() {
            let level = &effects[group.level_of_obs[i]];
            for (t, column) in columns.iter().enumerate() {
                *e += level[t] * column[i];
            }
        }
    }

    Ok(eta)
}

/// Apply the inverse link.
pub fn inverse_link(link: Link, eta: f64) -> f64 {
    match link {
        Link::Identity => eta,
        Link::Log => eta.exp(),
        Link::Logit => {
            if eta >= 0.0 {
                1.0 / (1.0 + (-eta).exp())
            } else {
                let e = eta.exp();
                e / (1.0 + e)
            }
        }
        Link::Probit => sbc_math::normal_cdf(eta),
    }
}

/// Simulate one outcome per observation of the design.
///
/// The parameter vector must carry exactly the model's schema; anything else
/// (for example a deviation for a level the design lacks) is a
/// `SchemaMismatch`.
pub fn simulate<R: Rng + ?Sized>(
    model: &CompiledModel,
    params: &ParameterVector,
    rng: &mut R,
) -> Result<SimulatedDataset> {
    model.check_schema(params)?;
    let eta = linear_predictor(model, params)?;
    let lik = model.likelihood();
    let link = lik.link();

    let unstable = |what: &str, i: usize, v: f64| {
        Error::NumericalInstability(format!(
            "observation {}: {} = {} is outside the {} family's domain",
            i, what, v, lik.family
        ))
    };

    let outcome = match lik.family {
        Family::Normal => {
            let sigma = match &lik.sigma {
                Some(h) => CompiledModel::resolve_hyper(h, params)?,
                None => return Err(Error::InvalidPriorSpec("normal likelihood needs sigma".into())),
            };
            if !(sigma.is_finite() && sigma > 0.0) {
                return Err(Error::InvalidPriorSpec(format!(
                    "likelihood sigma resolved to {}",
                    sigma
                )));
            }
            eta.iter()
                .enumerate()
                .map(|(i, &e)| {
                    let mu = inverse_link(link, e);
                    Normal::new(mu, sigma)
                        .map(|d| d.sample(rng))
                        .map_err(|_| unstable("mean", i, mu))
                })
                .collect::<Result<Vec<f64>>>()?
        }
        Family::Binomial => {
            let column = lik.trials.as_deref().ok_or_else(|| {
                Error::InvalidPriorSpec("binomial likelihood needs a trials column".into())
            })?;
            let trials = model.design().numeric(column).ok_or_else(|| {
                Error::SchemaMismatch(format!("trials column '{}' is missing", column))
            })?;
            eta.iter()
                .zip(trials)
                .enumerate()
                .map(|(i, (&e, &n))| {
                    let p = inverse_link(link, e);
                    Binomial::new(n as u64, p)
                        .map(|d| d.sample(rng) as f64)
                        .map_err(|_| unstable("probability", i, p))
                })
                .collect::<Result<Vec<f64>>>()?
        }
        Family::Bernoulli => eta
            .iter()
            .enumerate()
            .map(|(i, &e)| {
                let p = inverse_link(link, e);
                Bernoulli::new(p)
                    .map(|d| if d.sample(rng) { 1.0 } else { 0.0 })
                    .map_err(|_| unstable("probability", i, p))
            })
            .collect::<Result<Vec<f64>>>()?,
        Family::Poisson => eta
            .iter()
            .enumerate()
            .map(|(i, &e)| {
                let lambda = inverse_link(link, e);
                // Poisson::new rejects a zero rate; its draw is zero anyway.
                if lambda == 0.0 {
                    return Ok(0.0);
                }
                Poisson::new(lambda)
                    .map(|d| d.sample(rng))
                    .map_err(|_| unstable("rate", i, lambda))
            })
            .collect::<Result<Vec<f64>>>()?,
    };

    Ok(SimulatedDataset { outcome })
}
