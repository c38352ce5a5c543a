//! Prior sampler.
//!
//! Draws one full parameter vector by walking the compiled units in
//! dependency order, so every hyperparameter reference is resolved against a
//! value already drawn for this replicate.

use std::collections::HashMap;

use rand::Rng;
use rand_distr::{Beta, Distribution as _, Exp, Gamma, LogNormal, Normal, StandardNormal, StudentT};
use sbc_common::{Error, Result};
use sbc_config::model::HyperDomain;
use sbc_config::Distribution;
use sbc_math::linalg::{self, Matrix};

use super::{CompiledModel, ParameterVector, Unit};

/// Draw every parameter of `model` from its prior.
pub fn sample_prior<R: Rng + ?Sized>(model: &CompiledModel, rng: &mut R) -> Result<ParameterVector> {
    let mut values = ParameterVector::with_capacity(model.parameter_names().len());
    let mut cholesky: HashMap<usize, Matrix> = HashMap::new();

    for unit in model.units() {
        match unit {
            Unit::Scalar { name, prior } => {
                let value = draw(name, prior, &values, rng)?;
                values.insert(name.clone(), value);
            }
            Unit::Correlation { group, eta } => {
                let block = &model.groups()[*group];
                let l = lkj_cholesky(block.terms.len(), *eta, rng)?;
                let corr = l.mul_transpose();
                for ((i, j), name) in &block.cor_names {
                    values.insert(name.clone(), corr.get(*i, *j));
                }
                cholesky.insert(*group, l);
            }
            Unit::Deviations { group } => {
                let block = &model.groups()[*group];
                let k = block.terms.len();
                let sds = values.values_for(&block.sd_names).ok_or_else(|| {
                    Error::InvalidPriorSpec(format!(
                        "group block '{}' drawn before its scales",
                        block.grouping
                    ))
                })?;
                let identity;
                let l = match cholesky.get(group) {
                    Some(l) => l,
                    None => {
                        identity = Matrix::identity(k);
                        &identity
                    }
                };
                for names in &block.effect_names {
                    let z: Vec<f64> = (0..k).map(|_| rng.sample(StandardNormal)).collect();
                    let correlated = l.mul_vec(&z);
                    for ((name, sd), r) in names.iter().zip(&sds).zip(correlated) {
                        values.insert(name.clone(), sd * r);
                    }
                }
            }
        }
    }

    Ok(values)
}

/// Resolve hyperparameters and draw one value of `dist`.
///
/// Referenced values are checked against each hyperparameter's domain here,
/// since they are only known at draw time.
pub fn draw<R: Rng + ?Sized>(
    field: &str,
    dist: &Distribution,
    values: &ParameterVector,
    rng: &mut R,
) -> Result<f64> {
    let mut resolved = Vec::with_capacity(3);
    for (hyper_name, hyper, domain) in dist.hypers() {
        let v = CompiledModel::resolve_hyper(hyper, values)?;
        let ok = v.is_finite() && (domain == HyperDomain::Real || v > 0.0);
        if !ok {
            return Err(Error::InvalidPriorSpec(format!(
                "{}.{} resolved to {} (from {})",
                field, hyper_name, v, hyper
            )));
        }
        resolved.push(v);
    }

    let invalid = |e: &dyn std::fmt::Display| {
        Error::InvalidPriorSpec(format!("{}: {} rejected: {}", field, dist, e))
    };

    let value = match dist {
        Distribution::Normal { .. } => {
            Normal::new(resolved[0], resolved[1]).map_err(|e| invalid(&e))?.sample(rng)
        }
        Distribution::HalfNormal { .. } => {
            Normal::new(0.0, resolved[0]).map_err(|e| invalid(&e))?.sample(rng).abs()
        }
        Distribution::StudentT { .. } => {
            let t = StudentT::new(resolved[0]).map_err(|e| invalid(&e))?.sample(rng);
            resolved[1] + resolved[2] * t
        }
        Distribution::HalfStudentT { .. } => {
            let t: f64 = StudentT::new(resolved[0]).map_err(|e| invalid(&e))?.sample(rng);
            resolved[1] * t.abs()
        }
        Distribution::Exponential { .. } => {
            Exp::new(resolved[0]).map_err(|e| invalid(&e))?.sample(rng)
        }
        Distribution::Gamma { .. } => {
            // rand_distr takes a scale, not a rate.
            Gamma::new(resolved[0], 1.0 / resolved[1]).map_err(|e| invalid(&e))?.sample(rng)
        }
        Distribution::Lognormal { .. } => {
            LogNormal::new(resolved[0], resolved[1]).map_err(|e| invalid(&e))?.sample(rng)
        }
        Distribution::Beta { .. } => {
            Beta::new(resolved[0], resolved[1]).map_err(|e| invalid(&e))?.sample(rng)
        }
        Distribution::Uniform { .. } => {
            let (lower, upper) = (resolved[0], resolved[1]);
            if lower >= upper {
                return Err(Error::InvalidPriorSpec(format!(
                    "{}: uniform lower {} is not below upper {}",
                    field, lower, upper
                )));
            }
            lower + (upper - lower) * rng.random::<f64>()
        }
        Distribution::Constant { .. } => resolved[0],
    };
    Ok(value)
}

/// Cholesky factor of a `k x k` correlation matrix drawn from LKJ(eta),
/// built row by row with the onion method.
pub fn lkj_cholesky<R: Rng + ?Sized>(k: usize, eta: f64, rng: &mut R) -> Result<Matrix> {
    let mut l = Matrix::identity(k);
    if k < 2 {
        return Ok(l);
    }
    let invalid = |e: &dyn std::fmt::Display| {
        Error::InvalidPriorSpec(format!("LKJ(eta = {}) rejected: {}", eta, e))
    };

    let mut beta = eta + (k as f64 - 2.0) / 2.0;
    let r12 = 2.0 * Beta::new(beta, beta).map_err(|e| invalid(&e))?.sample(rng) - 1.0;
    l.set(1, 0, r12);
    l.set(1, 1, (1.0 - r12 * r12).max(0.0).sqrt());

    for m in 2..k {
        beta -= 0.5;
        let y = Beta::new(m as f64 / 2.0, beta).map_err(|e| invalid(&e))?.sample(rng);
        let z: Vec<f64> = (0..m).map(|_| rng.sample(StandardNormal)).collect();
        let norm = z.iter().map(|v| v * v).sum::<f64>().sqrt();
        if !(norm > 0.0) {
            return Err(Error::NumericalInstability(
                "degenerate direction in LKJ onion step".to_string(),
            ));
        }
        let scale = y.sqrt() / norm;
        for (j, zj) in z.iter().enumerate() {
            l.set(m, j, zj * scale);
        }
        l.set(m, m, (1.0 - y).max(0.0).sqrt());
    }

    // Rows have unit norm by construction; a failed refactorization means
    // the draw sits on the boundary of the correlation set.
    if linalg::cholesky(&l.mul_transpose()).is_none() {
        return Err(Error::NumericalInstability(format!(
            "LKJ(eta = {}) draw is not positive definite",
            eta
        )));
    }
    Ok(l)
}
