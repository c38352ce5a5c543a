//! Closed-form posterior for conjugate normal regressions.
//!
//! With `y ~ N(X beta, sigma^2 I)`, known `sigma` and independent
//! `beta_j ~ N(mu_j, tau_j^2)` priors, the posterior is multivariate normal
//! with precision `P = X'X / sigma^2 + diag(1 / tau^2)` and mean solving
//! `P m = X'y / sigma^2 + mu / tau^2`. Draws are exact and independent, so
//! this backend is the reference oracle for calibration tests.

use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use sbc_config::{Distribution, Family, Hyper, Link};
use sbc_math::linalg::{self, Matrix};

use super::{DrawTable, FitDiagnostics, FitError, FitOutput, FitRequest, PosteriorFitter};
use crate::model::prior::draw;
use crate::model::{CompiledModel, ParameterVector, SimulatedDataset};

const BACKEND: &str = "conjugate";

/// Exact posterior sampler for conjugate normal models.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConjugateNormalFitter;

/// Gaussian posterior over the regression coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalPosterior {
    pub parameters: Vec<String>,
    pub mean: Vec<f64>,
    /// Cholesky factor of the posterior precision.
    pub precision_factor: Matrix,
}

impl NormalPosterior {
    /// Marginal posterior variances, the diagonal of `P^-1`.
    pub fn variances(&self) -> Vec<f64> {
        let k = self.mean.len();
        (0..k)
            .map(|j| {
                let mut e = vec![0.0; k];
                e[j] = 1.0;
                // P^-1 e_j = L^-T L^-1 e_j, and its j-th entry is |L^-1 e_j|^2.
                let w = linalg::solve_lower(&self.precision_factor, &e);
                w.iter().map(|v| v * v).sum()
            })
            .collect()
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let z: Vec<f64> = (0..self.mean.len())
            .map(|_| rng.sample(StandardNormal))
            .collect();
        let offset = linalg::solve_lower_transpose(&self.precision_factor, &z);
        self.mean.iter().zip(offset).map(|(m, o)| m + o).collect()
    }
}

impl ConjugateNormalFitter {
    pub fn new() -> Self {
        ConjugateNormalFitter
    }

    fn unsupported(reason: impl Into<String>) -> FitError {
        FitError::Unsupported {
            backend: BACKEND,
            reason: reason.into(),
        }
    }

    /// Known residual sd: a literal, or a reference to a constant parameter.
    fn sigma(model: &CompiledModel) -> Result<f64, FitError> {
        match &model.likelihood().sigma {
            Some(Hyper::Literal(v)) => Ok(*v),
            Some(Hyper::Ref(name)) => match model.spec().parameter(name).map(|p| &p.prior) {
                Some(Distribution::Constant {
                    value: Hyper::Literal(v),
                }) => Ok(*v),
                _ => Err(Self::unsupported(format!(
                    "sigma references '{}', which is not a known constant",
                    name
                ))),
            },
            None => Err(Self::unsupported("likelihood has no sigma")),
        }
    }

    /// Exact posterior of the coefficients given one dataset.
    pub fn posterior(
        &self,
        model: &CompiledModel,
        dataset: &SimulatedDataset,
    ) -> Result<NormalPosterior, FitError> {
        self.supports(model)?;
        let sigma = Self::sigma(model)?;
        let columns = model
            .population_columns()
            .map_err(|e| FitError::Schema(e.to_string()))?;
        if dataset.len() != model.n_obs() {
            return Err(FitError::Schema(format!(
                "dataset has {} outcomes, design has {} observations",
                dataset.len(),
                model.n_obs()
            )));
        }

        let k = columns.len();
        let inv_var = 1.0 / (sigma * sigma);
        let mut precision = Matrix::zeros(k);
        let mut rhs = vec![0.0; k];
        for (a, (name, xa)) in columns.iter().enumerate() {
            let (mu, tau) = normal_prior(model, name)?;
            precision.add_to(a, a, 1.0 / (tau * tau));
            rhs[a] += mu / (tau * tau);
            rhs[a] += inv_var * xa.iter().zip(&dataset.outcome).map(|(x, y)| x * y).sum::<f64>();
            for (b, (_, xb)) in columns.iter().enumerate() {
                let cross: f64 = xa.iter().zip(xb).map(|(p, q)| p * q).sum();
                precision.add_to(a, b, inv_var * cross);
            }
        }

        let factor = linalg::cholesky(&precision).ok_or_else(|| {
            FitError::Numerical("posterior precision is not positive definite".to_string())
        })?;
        let mean = linalg::cholesky_solve(&factor, &rhs);
        Ok(NormalPosterior {
            parameters: columns.into_iter().map(|(name, _)| name).collect(),
            mean,
            precision_factor: factor,
        })
    }
}

fn normal_prior(model: &CompiledModel, name: &str) -> Result<(f64, f64), FitError> {
    match model.spec().parameter(name).map(|p| &p.prior) {
        Some(Distribution::Normal {
            mean: Hyper::Literal(mu),
            sd: Hyper::Literal(tau),
        }) => Ok((*mu, *tau)),
        Some(other) => Err(ConjugateNormalFitter::unsupported(format!(
            "coefficient '{}' has prior {}, need normal with literal mean and sd",
            name, other
        ))),
        None => Err(ConjugateNormalFitter::unsupported(format!(
            "coefficient '{}' is not declared",
            name
        ))),
    }
}

impl PosteriorFitter for ConjugateNormalFitter {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn supports(&self, model: &CompiledModel) -> Result<(), FitError> {
        let lik = model.likelihood();
        if lik.family != Family::Normal || lik.link() != Link::Identity {
            return Err(Self::unsupported(format!(
                "needs a normal likelihood with identity link, got {} / {}",
                lik.family,
                lik.link()
            )));
        }
        if !model.groups().is_empty() {
            return Err(Self::unsupported("group effects are not conjugate here"));
        }
        Self::sigma(model)?;
        for term in &lik.terms {
            normal_prior(model, &term.parameter)?;
        }
        // Parameters outside the linear predictor keep their prior; they
        // must not depend on anything the data informs.
        for param in &model.spec().parameters {
            if !param.prior.references().is_empty() {
                return Err(Self::unsupported(format!(
                    "'{}' has a hierarchical prior",
                    param.name
                )));
            }
        }
        Ok(())
    }

    fn fit(&self, request: &FitRequest<'_>, rng: &mut dyn RngCore) -> Result<FitOutput, FitError> {
        let model = request.model;
        let posterior = self.posterior(model, request.dataset)?;
        let names = model.parameter_names().to_vec();

        let mut table = DrawTable::new(names.clone());
        table.rows.reserve(request.n_raw_draws);
        let empty = ParameterVector::new();
        for _ in 0..request.n_raw_draws {
            let coefficients = posterior.sample(rng);
            let mut row = Vec::with_capacity(names.len());
            for name in &names {
                let value = match posterior.parameters.iter().position(|p| p == name) {
                    Some(j) => coefficients[j],
                    None => {
                        let prior = model
                            .spec()
                            .parameter(name)
                            .map(|p| &p.prior)
                            .ok_or_else(|| Self::unsupported(format!("unknown '{}'", name)))?;
                        draw(name, prior, &empty, rng)
                            .map_err(|e| FitError::Failed(e.to_string()))?
                    }
                };
                row.push(value);
            }
            table.rows.push(row);
        }

        Ok(FitOutput {
            draws: table,
            diagnostics: FitDiagnostics::default(),
        })
    }
}
