//! Calibration analysis over accumulated replicate records.
//!
//! Per parameter, independently:
//! - Binned rank histogram with a binomial reference band
//! - ECDF difference against a simulated uniform envelope
//! - Chi-squared uniformity test and the shape of any deviation
//! - Posterior z-score and contraction (when a prior baseline exists)
//!
//! Flagged replicates contribute ranks; failed replicates do not. The
//! flagged fraction is reported separately because a large one undermines
//! the histograms regardless of how uniform they look.

pub mod ecdf;
pub mod histogram;
pub mod report;
pub mod sensitivity;
pub mod uniformity;

pub use ecdf::{ecdf_diff, EcdfDiff, EcdfPoint};
pub use histogram::{bin_edges, RankBin, RankHistogram};
pub use report::{export_csv, render};
pub use sensitivity::{contraction, z_score, SensitivityPoint, SensitivitySummary};
pub use uniformity::{RankPattern, UniformityTest};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sbc_common::{Error, Result};
use sbc_config::AnalysisConfig;
use serde::Serialize;

use crate::exit_codes::ExitCode;
use crate::record::{ReplicateRecord, ReplicateStatus};
use crate::store::{PriorVariance, RunManifest};

/// Flagged fractions above this make a run's calibration suspect.
pub const MAX_FLAGGED_FRACTION: f64 = 0.10;

/// Replicate outcome counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplicateCounts {
    pub total: usize,
    pub ok: usize,
    pub flagged: usize,
    pub failed: usize,
    /// Flagged share of the replicates that produced ranks.
    pub flagged_fraction: f64,
    /// Failed replicates by error kind.
    pub failures: BTreeMap<String, usize>,
}

impl ReplicateCounts {
    pub fn from_records(records: &[ReplicateRecord]) -> Self {
        let mut counts = ReplicateCounts {
            total: records.len(),
            ..Default::default()
        };
        for record in records {
            match record.status {
                ReplicateStatus::Ok => counts.ok += 1,
                ReplicateStatus::Flagged => counts.flagged += 1,
                ReplicateStatus::Failed => {
                    counts.failed += 1;
                    let kind = record
                        .error
                        .as_ref()
                        .map_or("unknown", |e| e.kind.as_str());
                    *counts.failures.entry(kind.to_string()).or_default() += 1;
                }
            }
        }
        let ranked = counts.ok + counts.flagged;
        counts.flagged_fraction = if ranked == 0 {
            0.0
        } else {
            counts.flagged as f64 / ranked as f64
        };
        counts
    }

    pub fn ranked(&self) -> usize {
        self.ok + self.flagged
    }
}

/// Calibration of one parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterCalibration {
    pub parameter: String,
    pub histogram: RankHistogram,
    pub ecdf: EcdfDiff,
    pub uniformity: UniformityTest,
    pub pattern: RankPattern,
    pub interpretation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<SensitivitySummary>,
}

impl ParameterCalibration {
    pub fn is_suspect(&self) -> bool {
        self.uniformity.rejected
    }
}

/// Full analysis of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub schema_version: String,
    pub run_id: String,
    pub run_name: String,
    pub generated_at: DateTime<Utc>,
    pub backend: String,
    /// Thinned draws per replicate; ranks lie in `0..=max_rank`.
    pub max_rank: u32,
    pub analysis: AnalysisConfig,
    pub counts: ReplicateCounts,
    pub parameters: Vec<ParameterCalibration>,
    /// Parameters whose uniformity test rejected.
    pub suspect_parameters: Vec<String>,
    /// Constant-prior parameters; not ranked or tested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed_parameters: Vec<String>,
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn flagged_fraction_too_high(&self) -> bool {
        self.counts.flagged_fraction > MAX_FLAGGED_FRACTION
    }

    /// Operational exit code for this report.
    pub fn exit_code(&self) -> ExitCode {
        if !self.suspect_parameters.is_empty() || self.flagged_fraction_too_high() {
            ExitCode::CalibrationSuspect
        } else if self.counts.failed > 0 {
            ExitCode::PartialFail
        } else {
            ExitCode::Clean
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterCalibration> {
        self.parameters.iter().find(|p| p.parameter == name)
    }
}

/// Ranks of one parameter across ranked records, in record order.
pub fn collect_ranks(records: &[ReplicateRecord], parameter: &str) -> Vec<u32> {
    records
        .iter()
        .filter(|r| r.status.has_ranks())
        .filter_map(|r| r.ranks.get(parameter).copied())
        .collect()
}

/// Sensitivity points of one parameter; records without a finite posterior
/// summary are skipped.
pub fn sensitivity_points(
    records: &[ReplicateRecord],
    parameter: &str,
    prior_variance: f64,
) -> Vec<SensitivityPoint> {
    records
        .iter()
        .filter(|r| r.status.has_ranks())
        .filter_map(|r| {
            let post = r.posterior.get(parameter)?;
            let truth = r.truth.get(parameter)?;
            if !(post.mean.is_finite() && post.variance.is_finite()) {
                return None;
            }
            Some(SensitivityPoint {
                replicate: r.index.get(),
                z_score: z_score(post.mean, post.variance, truth),
                contraction: contraction(post.variance, prior_variance),
            })
        })
        .collect()
}

/// Analyze every stored record of a run.
pub fn analyze(
    manifest: &RunManifest,
    records: &[ReplicateRecord],
    baseline: Option<&PriorVariance>,
    analysis: &AnalysisConfig,
) -> Result<RunReport> {
    let max_rank = manifest.max_rank();
    let ranked = manifest.ranked_parameters();
    for record in records {
        record.validate(&ranked, max_rank)?;
    }
    if analysis.bins == 0 || analysis.bins > max_rank as usize + 1 {
        return Err(Error::Config(format!(
            "analysis.bins must be in 1..={}, got {}",
            max_rank as usize + 1,
            analysis.bins
        )));
    }

    let counts = ReplicateCounts::from_records(records);
    let mut warnings = Vec::new();
    if counts.ranked() == 0 {
        warnings.push("no replicate produced ranks; nothing to analyze".to_string());
    }
    if counts.flagged_fraction > MAX_FLAGGED_FRACTION {
        warnings.push(format!(
            "{:.1}% of ranked replicates were flagged for non-convergence (limit {:.0}%); \
             the rank histograms cannot be trusted",
            100.0 * counts.flagged_fraction,
            100.0 * MAX_FLAGGED_FRACTION
        ));
    }
    if counts.failed > 0 {
        warnings.push(format!(
            "{} replicate(s) failed and were excluded from aggregation",
            counts.failed
        ));
    }
    if baseline.is_none() {
        warnings.push("no prior variance baseline; sensitivity skipped".to_string());
    }

    let fixed_parameters = manifest.model.fixed_parameters();
    let mut parameters = Vec::with_capacity(ranked.len());
    if counts.ranked() > 0 {
        for name in &ranked {
            let ranks = collect_ranks(records, name);
            let histogram = RankHistogram::build(&ranks, max_rank, analysis.bins, analysis.level)?;
            let ecdf = ecdf_diff(
                &ranks,
                max_rank,
                analysis.level,
                analysis.envelope_sims,
                analysis.envelope_seed,
            )?;
            let uniformity = UniformityTest::chi_squared(&histogram, analysis.alpha);
            let pattern = RankPattern::classify(&histogram, &uniformity);
            let sensitivity = baseline
                .and_then(|b| b.variances.get(name))
                .map(|&prior_var| {
                    SensitivitySummary::from_points(sensitivity_points(records, name, prior_var))
                });
            parameters.push(ParameterCalibration {
                parameter: name.clone(),
                histogram,
                ecdf,
                uniformity,
                pattern,
                interpretation: pattern.interpretation().to_string(),
                sensitivity,
            });
        }
    }

    let suspect_parameters = parameters
        .iter()
        .filter(|p| p.is_suspect())
        .map(|p| p.parameter.clone())
        .collect();

    Ok(RunReport {
        schema_version: sbc_common::SCHEMA_VERSION.to_string(),
        run_id: manifest.run_id.to_string(),
        run_name: manifest.name.clone(),
        generated_at: Utc::now(),
        backend: manifest.config.backend.to_string(),
        max_rank,
        analysis: analysis.clone(),
        counts,
        parameters,
        suspect_parameters,
        fixed_parameters,
        warnings,
    })
}
