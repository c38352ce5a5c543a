//! Compiled models.
//!
//! Compilation checks a model specification against a design template,
//! expands group-effect blocks into named scalar parameters, and fixes the
//! order in which sampling units are drawn. The resulting parameter schema
//! is the one naming contract shared by the prior sampler, the simulator,
//! every posterior fitter and the rank calculator.

pub mod graph;
pub mod params;
pub mod prior;
pub mod simulate;

pub use params::ParameterVector;
pub use prior::sample_prior;
pub use simulate::{simulate, SimulatedDataset, OUTCOME_COLUMN};

use std::collections::HashMap;

use sbc_common::{Error, Result};
use sbc_config::model::{cor_name, group_effect_name, sd_name};
use sbc_config::validate::{validate_design, validate_model};
use sbc_config::{Design, Distribution, Hyper, LikelihoodSpec, ModelSpec};

/// One step of the prior draw sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Unit {
    /// A scalar drawn from its prior (declared parameters and group sds).
    Scalar { name: String, prior: Distribution },
    /// Correlation matrix of one group block, LKJ(eta).
    Correlation { group: usize, eta: f64 },
    /// Deviations of every level of one group block, given its sds and
    /// correlation.
    Deviations { group: usize },
}

/// A group-effect block expanded against the design.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledGroup {
    pub grouping: String,
    pub terms: Vec<String>,
    /// Predictor column per term; `None` for an intercept.
    pub predictors: Vec<Option<String>>,
    pub sd_names: Vec<String>,
    /// Upper-triangle pairs `(i, j)`, `i < j`, with their names; empty when
    /// terms are independent.
    pub cor_names: Vec<((usize, usize), String)>,
    pub levels: Vec<String>,
    /// Level index of every observation.
    pub level_of_obs: Vec<usize>,
    /// `effect_names[level][term]`.
    pub effect_names: Vec<Vec<String>>,
}

impl CompiledGroup {
    pub fn is_correlated(&self) -> bool {
        !self.cor_names.is_empty()
    }
}

/// A model checked and expanded against one design.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    spec: ModelSpec,
    design: Design,
    units: Vec<Unit>,
    parameter_names: Vec<String>,
    groups: Vec<CompiledGroup>,
}

impl CompiledModel {
    /// Validate and compile. Prior problems surface as `InvalidPriorSpec`,
    /// design problems as `SchemaMismatch`.
    pub fn compile(spec: &ModelSpec, design: &Design) -> Result<Self> {
        validate_model(spec).map_err(Error::from)?;
        validate_design(spec, design).map_err(Error::from)?;

        let mut units = Vec::new();
        let mut producer: HashMap<String, usize> = HashMap::new();
        let mut parameter_names = Vec::new();

        for param in &spec.parameters {
            producer.insert(param.name.clone(), units.len());
            parameter_names.push(param.name.clone());
            units.push(Unit::Scalar {
                name: param.name.clone(),
                prior: param.prior.clone(),
            });
        }

        let mut groups = Vec::with_capacity(spec.group_effects.len());
        let mut group_edges = Vec::new();
        for (g, block) in spec.group_effects.iter().enumerate() {
            let labels = design.labels(&block.grouping).ok_or_else(|| {
                Error::SchemaMismatch(format!(
                    "grouping column '{}' is missing",
                    block.grouping
                ))
            })?;
            let levels = design.levels(&block.grouping).unwrap_or_default();
            let index: HashMap<&str, usize> = levels
                .iter()
                .enumerate()
                .map(|(i, l)| (l.as_str(), i))
                .collect();
            let level_of_obs = labels
                .iter()
                .map(|l| index.get(l.as_str()).copied().unwrap_or(0))
                .collect();

            let terms: Vec<String> = block.terms.iter().map(|t| t.name.clone()).collect();
            let sd_names: Vec<String> = terms.iter().map(|t| sd_name(&block.grouping, t)).collect();
            let mut sd_units = Vec::with_capacity(terms.len());
            for (term, sd) in block.terms.iter().zip(&sd_names) {
                sd_units.push(units.len());
                producer.insert(sd.clone(), units.len());
                parameter_names.push(sd.clone());
                units.push(Unit::Scalar {
                    name: sd.clone(),
                    prior: term.sd_prior.clone(),
                });
            }

            let mut cor_names = Vec::new();
            let mut cor_unit = None;
            if let Some(lkj) = &block.correlation {
                for i in 0..terms.len() {
                    for j in i + 1..terms.len() {
                        let name = cor_name(&block.grouping, &terms[i], &terms[j]);
                        parameter_names.push(name.clone());
                        cor_names.push(((i, j), name));
                    }
                }
                cor_unit = Some(units.len());
                units.push(Unit::Correlation {
                    group: g,
                    eta: lkj.eta,
                });
            }

            let effect_names: Vec<Vec<String>> = levels
                .iter()
                .map(|level| {
                    terms
                        .iter()
                        .map(|t| group_effect_name(&block.grouping, level, t))
                        .collect()
                })
                .collect();
            parameter_names.extend(effect_names.iter().flatten().cloned());

            let deviations = units.len();
            units.push(Unit::Deviations { group: g });
            group_edges.extend(sd_units.iter().map(|&sd| (sd, deviations)));
            if let Some(cor) = cor_unit {
                group_edges.push((cor, deviations));
            }

            groups.push(CompiledGroup {
                grouping: block.grouping.clone(),
                terms,
                predictors: block.terms.iter().map(|t| t.predictor.clone()).collect(),
                sd_names,
                cor_names,
                levels,
                level_of_obs,
                effect_names,
            });
        }

        let mut edges = group_edges;
        for (idx, unit) in units.iter().enumerate() {
            if let Unit::Scalar { prior, .. } = unit {
                for reference in prior.references() {
                    let Some(&from) = producer.get(reference) else {
                        return Err(Error::InvalidPriorSpec(format!(
                            "'{}' references unknown parameter '{}'",
                            unit_label(unit),
                            reference
                        )));
                    };
                    edges.push((from, idx));
                }
            }
        }

        let order = graph::topological_order(units.len(), &edges).map_err(|stuck| {
            let names: Vec<String> = stuck.iter().map(|&i| unit_label(&units[i])).collect();
            Error::InvalidPriorSpec(format!(
                "circular hyperparameter references among: {}",
                names.join(", ")
            ))
        })?;
        let ordered = order.into_iter().map(|i| units[i].clone()).collect();

        Ok(CompiledModel {
            spec: spec.clone(),
            design: design.clone(),
            units: ordered,
            parameter_names,
            groups,
        })
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn design(&self) -> &Design {
        &self.design
    }

    pub fn likelihood(&self) -> &LikelihoodSpec {
        &self.spec.likelihood
    }

    /// Sampling units in draw order.
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Every scalar the model defines, in schema order: declared parameters,
    /// then per group block its sds, correlations and level deviations.
    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    pub fn groups(&self) -> &[CompiledGroup] {
        &self.groups
    }

    pub fn n_obs(&self) -> usize {
        self.design.n_obs()
    }

    /// Values of a predictor column, or ones for an intercept.
    pub fn predictor_values(&self, predictor: Option<&str>) -> Result<Vec<f64>> {
        match predictor {
            None => Ok(vec![1.0; self.n_obs()]),
            Some(name) => self.design.numeric(name).map(<[f64]>::to_vec).ok_or_else(|| {
                Error::SchemaMismatch(format!("predictor column '{}' is missing", name))
            }),
        }
    }

    /// Population-level design: one column per distinct term parameter, in
    /// first-use order. Terms sharing a parameter add their columns.
    pub fn population_columns(&self) -> Result<Vec<(String, Vec<f64>)>> {
        let mut columns: Vec<(String, Vec<f64>)> = Vec::new();
        for term in &self.spec.likelihood.terms {
            let values = self.predictor_values(term.predictor.as_deref())?;
            match columns.iter_mut().find(|(name, _)| *name == term.parameter) {
                Some((_, existing)) => {
                    for (e, v) in existing.iter_mut().zip(values) {
                        *e += v;
                    }
                }
                None => columns.push((term.parameter.clone(), values)),
            }
        }
        Ok(columns)
    }

    /// Resolve a hyperparameter against a (partial) parameter vector.
    pub fn resolve_hyper(hyper: &Hyper, params: &ParameterVector) -> Result<f64> {
        match hyper {
            Hyper::Literal(v) => Ok(*v),
            Hyper::Ref(name) => params.get(name).ok_or_else(|| {
                Error::SchemaMismatch(format!("parameter vector lacks '{}'", name))
            }),
        }
    }

    /// Check that a parameter vector carries exactly this model's schema.
    pub fn check_schema(&self, params: &ParameterVector) -> Result<()> {
        if let Some(missing) = self.parameter_names.iter().find(|n| !params.contains(n)) {
            return Err(Error::SchemaMismatch(format!(
                "parameter vector lacks '{}'",
                missing
            )));
        }
        if params.len() != self.parameter_names.len() {
            let known: std::collections::HashSet<&str> =
                self.parameter_names.iter().map(String::as_str).collect();
            let extra: Vec<&str> = params.names().filter(|n| !known.contains(n)).collect();
            return Err(Error::SchemaMismatch(format!(
                "parameter vector carries values the design does not define: {}",
                extra.join(", ")
            )));
        }
        Ok(())
    }
}

fn unit_label(unit: &Unit) -> String {
    match unit {
        Unit::Scalar { name, .. } => name.clone(),
        Unit::Correlation { group, .. } => format!("correlation of group block {}", group),
        Unit::Deviations { group } => format!("deviations of group block {}", group),
    }
}
