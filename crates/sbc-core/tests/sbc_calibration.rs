//! End-to-end calibration of the conjugate normal-normal preset.
//!
//! The closed-form backend samples the exact posterior, so ranks must look
//! uniform and contraction must match the information in ten observations.

use sbc_config::preset::{get_preset, PresetName};
use sbc_config::{Design, Distribution, Hyper, ModelSpec, ParameterDecl, RunConfig};
use sbc_core::calibrate::{analyze, RankPattern, RunReport};
use sbc_core::exit_codes::ExitCode;
use sbc_core::fit::ConjugateNormalFitter;
use sbc_core::logging::events::LogContext;
use sbc_core::model::CompiledModel;
use sbc_core::runner::Runner;
use sbc_core::store::{RunHandle, RunManifest};
use tempfile::TempDir;

fn calibrate(replicates: u32, bins: usize, seed: u64) -> RunReport {
    let preset = get_preset(PresetName::NormalNormal);
    calibrate_model(&preset.model, &preset.design, replicates, bins, seed)
}

fn calibrate_model(
    spec: &ModelSpec,
    design: &Design,
    replicates: u32,
    bins: usize,
    seed: u64,
) -> RunReport {
    let preset = get_preset(PresetName::NormalNormal);
    let model = CompiledModel::compile(spec, design).unwrap();
    let mut config = RunConfig {
        replicates,
        seed,
        persist_draws: false,
        ..preset.run.clone()
    };
    config.analysis.bins = bins;

    let tmp = TempDir::new().unwrap();
    let manifest = RunManifest::new(
        "normal-normal",
        model.parameter_names().to_vec(),
        spec,
        design,
        &config,
    );
    let handle = RunHandle::create(tmp.path().join("normal-normal"), &manifest).unwrap();
    let fitter = ConjugateNormalFitter::new();
    let runner = Runner::new(&model, &config, &fitter, LogContext::new(manifest.run_id.to_string()));
    let summary = runner.run(&handle).unwrap();
    assert_eq!(summary.ok, replicates as usize);

    let records = handle.load_records().unwrap();
    let baseline = handle.read_prior_variance().unwrap();
    analyze(&manifest, &records, baseline.as_ref(), &config.analysis).unwrap()
}

#[test]
fn normal_normal_histograms_stay_in_band() {
    let report = calibrate(200, 20, 20240101);
    assert_eq!(report.max_rank, 99);
    assert_eq!(report.counts.ranked(), 200);

    for name in ["alpha", "beta"] {
        let param = report.parameter(name).unwrap();
        assert_eq!(param.histogram.bins.len(), 20);
        assert!(
            param.histogram.bins_inside >= 18,
            "{name}: {} of 20 bins inside the band",
            param.histogram.bins_inside
        );
        assert_eq!(param.histogram.replicates, 200);
    }
}

#[test]
fn normal_normal_contraction_reflects_ten_observations() {
    let report = calibrate(200, 20, 20240101);
    for name in ["alpha", "beta"] {
        let sensitivity = report.parameter(name).unwrap().sensitivity.as_ref().unwrap();
        let median = sensitivity.contraction_quantiles[1];
        assert!((0.8..=1.0).contains(&median), "{name}: median contraction {median}");
        assert!(
            sensitivity.fraction_in(0.8, 1.0) >= 0.9,
            "{name}: contraction spread too wide"
        );
        assert!(sensitivity.mean_z.abs() < 0.3, "{name}: mean z {}", sensitivity.mean_z);
    }
}

#[test]
fn exact_posterior_passes_uniformity_at_scale() {
    let report = calibrate(1000, 20, 7);
    assert_eq!(report.counts.failed, 0);
    for param in &report.parameters {
        assert!(
            param.uniformity.p_value > 0.001,
            "{}: p = {}",
            param.parameter,
            param.uniformity.p_value
        );
        assert!(param.ecdf.outside_fraction < 0.5, "{}", param.parameter);
    }
    assert!(report.suspect_parameters.is_empty(), "{:?}", report.suspect_parameters);
    assert_eq!(report.exit_code(), ExitCode::Clean);
    assert!(report
        .parameters
        .iter()
        .all(|p| p.pattern == RankPattern::Uniform));
}

#[test]
fn constant_sigma_parameter_is_reported_fixed_not_suspect() {
    let preset = get_preset(PresetName::NormalNormal);
    let mut spec = preset.model.clone();
    spec.parameters.push(ParameterDecl {
        name: "s".to_string(),
        prior: Distribution::Constant {
            value: Hyper::Literal(1.0),
        },
    });
    spec.likelihood.sigma = Some(Hyper::Ref("s".to_string()));

    let report = calibrate_model(&spec, &preset.design, 200, 10, 20240101);
    assert_eq!(report.fixed_parameters, vec!["s".to_string()]);
    assert!(report.parameter("s").is_none());
    assert_eq!(report.parameters.len(), 2);
    assert!(report.suspect_parameters.is_empty(), "{:?}", report.suspect_parameters);
    assert_eq!(report.exit_code(), ExitCode::Clean);
}
