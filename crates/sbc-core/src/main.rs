//! SBC - Simulation-Based Calibration for Bayesian models
//!
//! The entry point for the `sbc` binary, handling:
//! - Resumable calibration runs over many simulated replicates
//! - Calibration analysis and report rendering
//! - Configuration checks, presets and prior predictive summaries

use clap::{Args, Parser, Subcommand};
use sbc_common::{Error, OutputFormat, StructuredError, SCHEMA_VERSION};
use sbc_config::preset::{get_preset, list_presets, PresetName};
use sbc_config::resolve::CONFIG_FILENAME;
use sbc_config::validate::{validate_design, validate_model, validate_run};
use sbc_config::{resolve_config, Design, ModelSpec, RunConfig};
use sbc_core::calibrate::{analyze, export_csv, render, RunReport};
use sbc_core::exit_codes::ExitCode;
use sbc_core::fit::command::answer_with_conjugate;
use sbc_core::fit::{fitter_for, FitRequestMessage};
use sbc_core::logging::events::{event_names, LogContext, Stage};
use sbc_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use sbc_core::model::CompiledModel;
use sbc_core::predictive;
use sbc_core::record::ReplicateStatus;
use sbc_core::runner::{RunSummary, Runner};
use sbc_core::store::{RunHandle, RunManifest, RunStore};
use std::io::Read;
use std::path::PathBuf;
use tracing::{info, warn};

/// Simulation-based calibration of Bayesian model specifications
#[derive(Parser)]
#[command(name = "sbc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Log format on stderr
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run (or resume) replicates, then analyze the run
    Run(RunArgs),

    /// Show progress of a run directory
    Status(RunTargetArgs),

    /// Analyze the recorded replicates of a run
    Analyze(AnalyzeArgs),

    /// List runs under the data directory
    List,

    /// Validate model, design and run configuration
    Check(InputArgs),

    /// Summarize datasets simulated from the prior
    PriorPredictive(PriorPredictiveArgs),

    /// Write a preset's model, design and sbc.toml to a directory
    Init(InitArgs),

    /// List built-in presets
    Presets,

    /// Print version information
    Version,

    /// Answer one sampler request on stdin with the closed-form posterior
    #[command(hide = true)]
    Oracle,
}

// ============================================================================
// Command argument structs
// ============================================================================

#[derive(Args, Debug)]
struct InputArgs {
    /// Run configuration file (default: SBC_CONFIG, then ./sbc.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Use a built-in preset instead of a configuration file
    #[arg(long, conflicts_with = "config")]
    preset: Option<PresetName>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    inputs: InputArgs,

    /// Run directory (default: <data dir>/runs/<name>)
    #[arg(long)]
    run_dir: Option<PathBuf>,

    /// Run name; defaults to the model name
    #[arg(long)]
    name: Option<String>,

    /// Number of replicate indices to cover
    #[arg(long)]
    replicates: Option<u32>,

    /// First replicate index (1-based)
    #[arg(long)]
    start: Option<u32>,

    /// Worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Master seed
    #[arg(long)]
    seed: Option<u64>,

    /// Re-run replicates recorded as failed
    #[arg(long)]
    retry_failed: bool,

    /// Skip the analysis after the replicates finish
    #[arg(long)]
    no_analyze: bool,
}

#[derive(Args, Debug)]
struct RunTargetArgs {
    /// Run directory, or a run name under the data directory
    run: String,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    #[command(flatten)]
    target: RunTargetArgs,

    /// Histogram bins
    #[arg(long)]
    bins: Option<usize>,

    /// Confidence level of the band and envelope
    #[arg(long)]
    level: Option<f64>,

    /// Significance level of the uniformity test
    #[arg(long)]
    alpha: Option<f64>,

    /// Also write ranks, histograms, ECDF and sensitivity tables as CSV
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PriorPredictiveArgs {
    #[command(flatten)]
    inputs: InputArgs,

    /// Datasets to simulate
    #[arg(long, short = 'n', default_value = "1000")]
    datasets: usize,

    /// Seed (default: the configured master seed)
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct InitArgs {
    /// Preset to write
    preset: PresetName,

    /// Target directory
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Overwrite existing files
    #[arg(long)]
    force: bool,
}

fn main() {
    let cli = Cli::parse();

    let cli_level = if cli.global.verbose > 0 || cli.global.quiet > 0 {
        Some(LogLevel::Info.adjusted(cli.global.verbose, cli.global.quiet))
    } else {
        None
    };
    init_logging(&LogConfig::from_env(cli_level, cli.global.log_format));

    let result = match &cli.command {
        Commands::Run(args) => run_calibration(&cli.global, args),
        Commands::Status(args) => run_status(&cli.global, args),
        Commands::Analyze(args) => run_analyze(&cli.global, args),
        Commands::List => run_list(&cli.global),
        Commands::Check(args) => run_check(&cli.global, args),
        Commands::PriorPredictive(args) => run_prior_predictive(&cli.global, args),
        Commands::Init(args) => run_init(&cli.global, args),
        Commands::Presets => run_presets(&cli.global),
        Commands::Version => {
            print_version(&cli.global);
            Ok(ExitCode::Clean)
        }
        Commands::Oracle => run_oracle(),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(err) => {
            output_error(&cli.global, &err);
            ExitCode::from_error(&err)
        }
    };
    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Model, design and run configuration for one invocation.
struct Inputs {
    model: ModelSpec,
    design: Design,
    config: RunConfig,
    source: String,
}

fn load_inputs(args: &InputArgs) -> Result<Inputs, Error> {
    if let Some(name) = args.preset {
        let preset = get_preset(name);
        info!(target: event_names::CONFIG_DEFAULT_USED, preset = %name, "using built-in preset");
        return Ok(Inputs {
            model: preset.model,
            design: preset.design,
            config: preset.run,
            source: format!("preset {}", name),
        });
    }

    let paths = resolve_config(args.config.as_deref());
    let Some(path) = paths.config else {
        return Err(Error::Config(format!(
            "no {} found; pass --config or --preset, or run `sbc init`",
            CONFIG_FILENAME
        )));
    };
    let config = RunConfig::from_file(&path)?;
    let model_path = config.model.clone().ok_or_else(|| {
        Error::Config(format!("{} does not name a model file", path.display()))
    })?;
    let model = ModelSpec::from_file(&model_path)?;
    let design = match &config.design {
        Some(design_path) => Design::from_file(design_path)?,
        None => Design::default(),
    };
    info!(
        target: event_names::CONFIG_LOADED,
        path = %path.display(),
        source = %paths.source,
        "configuration loaded"
    );
    Ok(Inputs {
        model,
        design,
        config,
        source: format!("{} ({})", path.display(), paths.source),
    })
}

/// Interpret a run argument as a directory when it looks like one,
/// otherwise as a run name under the data directory.
fn resolve_run_target(run: &str) -> Result<PathBuf, Error> {
    let path = PathBuf::from(run);
    if path.is_dir() || run.contains(std::path::MAIN_SEPARATOR) || run.starts_with('.') {
        return Ok(path);
    }
    Ok(RunStore::from_env()?.run_dir(run))
}

fn print_json(value: &impl serde::Serialize) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn output_error(global: &GlobalOpts, err: &Error) {
    match global.format {
        OutputFormat::Json => eprintln!("{}", StructuredError::from(err).to_json()),
        OutputFormat::Summary | OutputFormat::Md => eprintln!("{}", err.human()),
    }
}

fn log_report(report: &RunReport) {
    let _span = LogContext::new(report.run_id.clone())
        .span(Stage::Analyze)
        .entered();
    if report.suspect_parameters.is_empty() {
        info!(
            target: event_names::ANALYSIS_FINISHED,
            parameters = report.parameters.len(),
            ranked = report.counts.ranked(),
            "analysis finished"
        );
    } else {
        warn!(
            target: event_names::ANALYSIS_SUSPECT,
            suspect = %report.suspect_parameters.join(","),
            ranked = report.counts.ranked(),
            "calibration suspect"
        );
    }
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_calibration(global: &GlobalOpts, args: &RunArgs) -> Result<ExitCode, Error> {
    let mut inputs = load_inputs(&args.inputs)?;
    let config = &mut inputs.config;
    if let Some(replicates) = args.replicates {
        config.replicates = replicates;
    }
    if let Some(start) = args.start {
        config.start = start;
    }
    if let Some(workers) = args.workers {
        config.workers = Some(workers);
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.retry_failed {
        config.retry_failed = true;
    }

    validate_model(&inputs.model)?;
    validate_design(&inputs.model, &inputs.design)?;
    validate_run(&inputs.config)?;

    let model = CompiledModel::compile(&inputs.model, &inputs.design)?;
    let fitter = fitter_for(&inputs.config)?;
    fitter.supports(&model)?;

    let name = args
        .name
        .clone()
        .unwrap_or_else(|| inputs.model.name.clone());
    let dir = match &args.run_dir {
        Some(dir) => dir.clone(),
        None => RunStore::from_env()?.run_dir(&name),
    };
    let fresh = RunManifest::new(
        &name,
        model.parameter_names().to_vec(),
        &inputs.model,
        &inputs.design,
        &inputs.config,
    );
    let (handle, manifest) = RunHandle::open_or_create(&dir, &fresh)?;

    let context = LogContext::new(manifest.run_id.to_string());
    let runner = Runner::new(&model, &inputs.config, fitter.as_ref(), context);
    let summary = runner.run(&handle)?;

    if args.no_analyze {
        output_run_summary(global, &summary)?;
        return Ok(if summary.failed > 0 {
            ExitCode::PartialFail
        } else {
            ExitCode::Clean
        });
    }

    let records = handle.load_records()?;
    let baseline = handle.read_prior_variance()?;
    let report = analyze(&manifest, &records, baseline.as_ref(), &inputs.config.analysis)?;
    log_report(&report);

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "source": inputs.source,
            "run": summary,
            "report": report,
        }))?,
        OutputFormat::Summary | OutputFormat::Md => {
            output_run_summary(global, &summary)?;
            println!();
            print!("{}", render(&report, global.format)?);
        }
    }
    Ok(report.exit_code())
}

fn output_run_summary(global: &GlobalOpts, summary: &RunSummary) -> Result<(), Error> {
    match global.format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Summary | OutputFormat::Md => {
            println!("run {} ({})", summary.run_id, summary.run_dir);
            println!(
                "  {} requested, {} already recorded, {} executed in {} ms",
                summary.requested, summary.skipped, summary.executed, summary.elapsed_ms
            );
            println!(
                "  ok {}, flagged {}, failed {}",
                summary.ok, summary.flagged, summary.failed
            );
            Ok(())
        }
    }
}

fn run_status(global: &GlobalOpts, args: &RunTargetArgs) -> Result<ExitCode, Error> {
    let dir = resolve_run_target(&args.run)?;
    let handle = RunHandle::open(&dir)?;
    let manifest = handle.read_manifest()?;
    let scan = handle.scan()?;

    let requested: Vec<u32> = manifest.config.indices().collect();
    let pending = requested
        .iter()
        .filter(|&&i| !scan.completed.contains_key(&sbc_common::ReplicateIndex(i)))
        .count();
    let ok = scan.count(ReplicateStatus::Ok);
    let flagged = scan.count(ReplicateStatus::Flagged);
    let failed = scan.count(ReplicateStatus::Failed);

    match global.format {
        OutputFormat::Json => {
            let corrupted: Vec<serde_json::Value> = scan
                .corrupted
                .iter()
                .map(|(index, reason)| serde_json::json!({ "index": index.get(), "reason": reason }))
                .collect();
            print_json(&serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "run_id": manifest.run_id,
                "name": manifest.name,
                "run_dir": handle.dir().display().to_string(),
                "created_at": manifest.created_at,
                "updated_at": manifest.updated_at,
                "fingerprint": manifest.fingerprint,
                "backend": manifest.config.backend,
                "parameters": manifest.parameters,
                "requested": requested.len(),
                "recorded": scan.completed.len(),
                "pending": pending,
                "ok": ok,
                "flagged": flagged,
                "failed": failed,
                "corrupted": corrupted,
            }))?;
        }
        OutputFormat::Summary | OutputFormat::Md => {
            println!("run {} ({})", manifest.run_id, manifest.name);
            println!("  dir: {}", handle.dir().display());
            println!(
                "  recorded {} of {} requested, {} pending",
                scan.completed.len(),
                requested.len(),
                pending
            );
            println!("  ok {}, flagged {}, failed {}", ok, flagged, failed);
            for (index, reason) in &scan.corrupted {
                println!("  corrupted {}: {}", index, reason);
            }
        }
    }
    Ok(ExitCode::Clean)
}

fn run_analyze(global: &GlobalOpts, args: &AnalyzeArgs) -> Result<ExitCode, Error> {
    let dir = resolve_run_target(&args.target.run)?;
    let handle = RunHandle::open(&dir)?;
    let manifest = handle.read_manifest()?;

    let mut config = manifest.config.clone();
    if let Some(bins) = args.bins {
        config.analysis.bins = bins;
    }
    if let Some(level) = args.level {
        config.analysis.level = level;
    }
    if let Some(alpha) = args.alpha {
        config.analysis.alpha = alpha;
    }
    validate_run(&config)?;

    let records = handle.load_records()?;
    let baseline = handle.read_prior_variance()?;
    let report = analyze(&manifest, &records, baseline.as_ref(), &config.analysis)?;
    log_report(&report);

    if let Some(csv_dir) = &args.csv {
        let _span = LogContext::new(manifest.run_id.to_string())
            .span(Stage::Report)
            .entered();
        let written = export_csv(&report, &records, csv_dir)?;
        info!(files = written.len(), dir = %csv_dir.display(), "csv tables written");
    }

    print!("{}", render(&report, global.format)?);
    Ok(report.exit_code())
}

fn run_list(global: &GlobalOpts) -> Result<ExitCode, Error> {
    let store = RunStore::from_env()?;
    let names = store.list_runs()?;
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "runs_root": store.runs_root().display().to_string(),
            "runs": names,
        }))?,
        OutputFormat::Summary | OutputFormat::Md => {
            if names.is_empty() {
                println!("no runs under {}", store.runs_root().display());
            }
            for name in names {
                println!("{}", name);
            }
        }
    }
    Ok(ExitCode::Clean)
}

fn run_check(global: &GlobalOpts, args: &InputArgs) -> Result<ExitCode, Error> {
    let mut results: Vec<serde_json::Value> = Vec::new();
    let mut first_error: Option<Error> = None;

    let mut record = |check: &str, outcome: Result<serde_json::Value, Error>| match outcome {
        Ok(mut detail) => {
            detail["check"] = check.into();
            detail["status"] = "ok".into();
            results.push(detail);
            true
        }
        Err(err) => {
            results.push(serde_json::json!({
                "check": check,
                "status": "error",
                "code": err.code(),
                "error": err.to_string(),
            }));
            first_error.get_or_insert(err);
            false
        }
    };

    let inputs = match load_inputs(args) {
        Ok(inputs) => {
            record("config", Ok(serde_json::json!({ "source": inputs.source })));
            Some(inputs)
        }
        Err(err) => {
            record("config", Err(err));
            None
        }
    };

    if let Some(inputs) = &inputs {
        let model_ok = record(
            "model",
            validate_model(&inputs.model)
                .map(|_| serde_json::json!({ "name": inputs.model.name }))
                .map_err(Error::from),
        );
        let design_ok = model_ok
            && record(
                "design",
                validate_design(&inputs.model, &inputs.design)
                    .map(|_| serde_json::json!({ "observations": inputs.design.n_obs() }))
                    .map_err(Error::from),
            );
        let run_ok = record(
            "run",
            validate_run(&inputs.config)
                .map(|_| {
                    serde_json::json!({
                        "replicates": inputs.config.replicates,
                        "draws": inputs.config.draws,
                        "thin": inputs.config.thin,
                    })
                })
                .map_err(Error::from),
        );

        if design_ok {
            let compiled = CompiledModel::compile(&inputs.model, &inputs.design);
            let parameters = compiled
                .as_ref()
                .map(|m| serde_json::json!({ "parameters": m.parameter_names() }))
                .map_err(|e| Error::InvalidPriorSpec(e.to_string()));
            let compiled_ok = record("compile", parameters);
            if let (true, true, Ok(model)) = (compiled_ok, run_ok, &compiled) {
                let backend = fitter_for(&inputs.config).and_then(|fitter| {
                    fitter.supports(model)?;
                    Ok(serde_json::json!({ "backend": fitter.name() }))
                });
                record("backend", backend);
            }
        }
    }

    let exit_code = first_error
        .as_ref()
        .map(ExitCode::from_error)
        .unwrap_or(ExitCode::Clean);

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "status": if exit_code == ExitCode::Clean { "ok" } else { "error" },
            "checks": results,
        }))?,
        OutputFormat::Summary | OutputFormat::Md => {
            for result in &results {
                let mark = if result["status"] == "ok" { "✓" } else { "✗" };
                let detail = result
                    .get("error")
                    .and_then(|e| e.as_str())
                    .unwrap_or("");
                println!("{} {} {}", mark, result["check"].as_str().unwrap_or(""), detail);
            }
        }
    }
    Ok(exit_code)
}

fn run_prior_predictive(global: &GlobalOpts, args: &PriorPredictiveArgs) -> Result<ExitCode, Error> {
    let inputs = load_inputs(&args.inputs)?;
    validate_model(&inputs.model)?;
    validate_design(&inputs.model, &inputs.design)?;
    if args.datasets == 0 {
        return Err(Error::Config("--datasets must be at least 1".to_string()));
    }
    let model = CompiledModel::compile(&inputs.model, &inputs.design)?;
    let seed = args.seed.unwrap_or(inputs.config.seed);
    let summary = predictive::prior_predictive(&model, args.datasets, seed)?;
    print!("{}", predictive::render(&summary, global.format)?);
    Ok(ExitCode::Clean)
}

fn run_init(global: &GlobalOpts, args: &InitArgs) -> Result<ExitCode, Error> {
    let preset = get_preset(args.preset);
    std::fs::create_dir_all(&args.dir)?;

    let model_path = args.dir.join("model.json");
    let design_path = args.dir.join("design.json");
    let config_path = args.dir.join(CONFIG_FILENAME);
    if !args.force {
        if let Some(existing) = [&model_path, &design_path, &config_path]
            .into_iter()
            .find(|p| p.exists())
        {
            return Err(Error::Config(format!(
                "{} already exists; pass --force to overwrite",
                existing.display()
            )));
        }
    }

    let mut run = preset.run.clone();
    run.model = Some(PathBuf::from("model.json"));
    run.design = Some(PathBuf::from("design.json"));

    std::fs::write(&model_path, serde_json::to_string_pretty(&preset.model)?)?;
    std::fs::write(&design_path, serde_json::to_string_pretty(&preset.design)?)?;
    std::fs::write(&config_path, run.to_toml_string()?)?;

    let files = [&model_path, &design_path, &config_path];
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "preset": args.preset,
            "backend": run.backend,
            "files": files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        }))?,
        OutputFormat::Summary | OutputFormat::Md => {
            println!("initialized preset {} in {}", args.preset, args.dir.display());
            for file in files {
                println!("  {}", file.display());
            }
            if !run.fit_command.is_empty() {
                println!("  edit fit_command in {} to point at your sampler", CONFIG_FILENAME);
            }
        }
    }
    Ok(ExitCode::Clean)
}

fn run_presets(global: &GlobalOpts) -> Result<ExitCode, Error> {
    let presets = list_presets();
    match global.format {
        OutputFormat::Json => print_json(&presets)?,
        OutputFormat::Summary | OutputFormat::Md => {
            for preset in &presets {
                println!(
                    "{:<14} {:<10} {}",
                    preset.name.as_str(),
                    preset.backend.to_string(),
                    preset.description
                );
            }
        }
    }
    Ok(ExitCode::Clean)
}

fn run_oracle() -> Result<ExitCode, Error> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let request: FitRequestMessage = serde_json::from_str(&input)
        .map_err(|e| Error::SchemaMismatch(format!("invalid fit request: {}", e)))?;
    let response = answer_with_conjugate(&request)?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(ExitCode::Clean)
}

fn print_version(global: &GlobalOpts) {
    match global.format {
        OutputFormat::Json => {
            let version_info = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "sbc_version": env!("CARGO_PKG_VERSION"),
            });
            println!("{}", version_info);
        }
        OutputFormat::Summary | OutputFormat::Md => {
            println!("sbc {}", env!("CARGO_PKG_VERSION"));
            println!("schema version: {}", SCHEMA_VERSION);
        }
    }
}
