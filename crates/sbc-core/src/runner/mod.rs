//! Replicate runner.
//!
//! Each replicate runs prior draw, simulation, fit, thinning and ranking on
//! its own derived random streams. Replicates share nothing but the
//! read-only compiled model and the fitter, so a fixed pool of scoped
//! worker threads pulls indices from an atomic cursor and sends finished
//! records back to the calling thread, which persists them as they arrive.
//!
//! Per-replicate errors become failed records. Only errors detected before
//! the first replicate (model, config, store) abort a run.

pub mod seed;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use indexmap::IndexMap;
use sbc_common::{Error, ReplicateIndex, Result};
use sbc_config::RunConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::fit::{thin, FitRequest, PosteriorFitter};
use crate::logging::{event_names, LogContext, Stage};
use crate::model::{sample_prior, simulate, CompiledModel, ParameterVector};
use crate::rank::rank_all;
use crate::record::{summarize_draws, ReplicateRecord, ReplicateStatus};
use crate::store::{PriorVariance, RunHandle};
use seed::{stream_rng, Stream, BASELINE_INDEX};

/// Outcome of one `run` invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub run_dir: String,
    /// Indices covered by the configuration.
    pub requested: usize,
    /// Indices already recorded and left alone.
    pub skipped: usize,
    /// Indices executed by this invocation.
    pub executed: usize,
    pub ok: usize,
    pub flagged: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
}

/// Estimate per-parameter prior variance from `n` prior draws.
pub fn prior_variance(model: &CompiledModel, n: usize, master_seed: u64) -> Result<PriorVariance> {
    let mut rng = stream_rng(master_seed, BASELINE_INDEX, Stream::Simulate);
    let names = model.parameter_names();
    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(n); names.len()];
    for _ in 0..n {
        let draw = sample_prior(model, &mut rng)?;
        let values = draw.values_for(names).ok_or_else(|| {
            Error::SchemaMismatch("prior draw does not cover the parameter schema".to_string())
        })?;
        for (col, v) in columns.iter_mut().zip(values) {
            col.push(v);
        }
    }
    let variances: IndexMap<String, f64> = names
        .iter()
        .zip(&columns)
        .map(|(name, col)| (name.clone(), sbc_math::variance(col)))
        .collect();
    if let Some((name, _)) = variances.iter().find(|(_, v)| !v.is_finite()) {
        return Err(Error::NumericalInstability(format!(
            "prior variance of {} is not finite; increase prior_variance_draws or check its prior",
            name
        )));
    }
    Ok(PriorVariance { draws: n, variances })
}

/// Drives replicates of one run.
pub struct Runner<'a> {
    model: &'a CompiledModel,
    config: &'a RunConfig,
    fitter: &'a dyn PosteriorFitter,
    context: LogContext,
}

impl<'a> Runner<'a> {
    pub fn new(
        model: &'a CompiledModel,
        config: &'a RunConfig,
        fitter: &'a dyn PosteriorFitter,
        context: LogContext,
    ) -> Self {
        Runner {
            model,
            config,
            fitter,
            context,
        }
    }

    fn max_rank(&self) -> u32 {
        self.config.draws as u32
    }

    /// Load the stored prior-variance baseline or compute and store it.
    pub fn ensure_baseline(&self, handle: &RunHandle) -> Result<PriorVariance> {
        let _span = self.context.span(Stage::Baseline).entered();
        if let Some(baseline) = handle.read_prior_variance()? {
            info!(
                target: event_names::BASELINE_LOADED,
                draws = baseline.draws,
                "prior variance baseline loaded"
            );
            return Ok(baseline);
        }
        let baseline = prior_variance(self.model, self.config.prior_variance_draws, self.config.seed)?;
        handle.write_prior_variance(&baseline)?;
        info!(
            target: event_names::BASELINE_COMPUTED,
            draws = baseline.draws,
            "prior variance baseline computed"
        );
        Ok(baseline)
    }

    /// Indices of the configured range that still need a record.
    pub fn pending(&self, handle: &RunHandle) -> Result<Vec<ReplicateIndex>> {
        let scan = handle.scan()?;
        for (index, reason) in &scan.corrupted {
            warn!(
                target: event_names::REPLICATE_SKIPPED,
                replicate = index.get(),
                reason = %reason,
                "unreadable record will be recomputed"
            );
        }
        Ok(self
            .config
            .indices()
            .map(ReplicateIndex)
            .filter(|index| match scan.completed.get(index) {
                None => true,
                Some(ReplicateStatus::Failed) => self.config.retry_failed,
                Some(_) => false,
            })
            .collect())
    }

    /// Run every pending index of the configured range and persist records.
    pub fn run(&self, handle: &RunHandle) -> Result<RunSummary> {
        let started = Instant::now();
        self.ensure_baseline(handle)?;

        let requested = self.config.indices().count();
        let pending = self.pending(handle)?;
        let skipped = requested - pending.len();
        {
            let _span = self.context.span(Stage::Init).entered();
            if skipped > 0 {
                info!(
                    target: event_names::RUN_RESUMED,
                    requested,
                    pending = pending.len(),
                    skipped,
                    backend = self.fitter.name(),
                    "resuming run"
                );
            } else {
                info!(
                    target: event_names::RUN_STARTED,
                    requested,
                    backend = self.fitter.name(),
                    "starting run"
                );
            }
        }

        let mut summary = RunSummary {
            run_id: self.context.run_id.clone(),
            run_dir: handle.dir().display().to_string(),
            requested,
            skipped,
            ..Default::default()
        };
        self.execute(&pending, |record| {
            handle.write_record(&record)?;
            summary.executed += 1;
            match record.status {
                ReplicateStatus::Ok => summary.ok += 1,
                ReplicateStatus::Flagged => summary.flagged += 1,
                ReplicateStatus::Failed => summary.failed += 1,
            }
            Ok(())
        })?;
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            target: event_names::RUN_FINISHED,
            executed = summary.executed,
            ok = summary.ok,
            flagged = summary.flagged,
            failed = summary.failed,
            elapsed_ms = summary.elapsed_ms,
            "replicates finished"
        );
        Ok(summary)
    }

    /// Run `indices` on the worker pool, handing each record to `on_record`
    /// on the calling thread. The first collector error stops the pool.
    pub fn execute<F>(&self, indices: &[ReplicateIndex], mut on_record: F) -> Result<()>
    where
        F: FnMut(ReplicateRecord) -> Result<()>,
    {
        if indices.is_empty() {
            return Ok(());
        }
        let workers = self.config.effective_workers().clamp(1, indices.len());
        let cursor = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<ReplicateRecord>();

        thread::scope(|s| {
            for _ in 0..workers {
                let tx = tx.clone();
                let cursor = &cursor;
                let stop = &stop;
                s.spawn(move || {
                    let _span = self.context.span(Stage::Replicate).entered();
                    while !stop.load(Ordering::Relaxed) {
                        let i = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(&index) = indices.get(i) else {
                            break;
                        };
                        if tx.send(self.run_replicate(index)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            let mut outcome = Ok(());
            for record in rx {
                if outcome.is_err() {
                    continue;
                }
                if let Err(e) = on_record(record) {
                    stop.store(true, Ordering::Relaxed);
                    outcome = Err(e);
                }
            }
            outcome
        })
    }

    /// One replicate end to end; never returns an error.
    pub fn run_replicate(&self, index: ReplicateIndex) -> ReplicateRecord {
        let started = Instant::now();
        debug!(
            target: event_names::REPLICATE_STARTED,
            replicate = index.get(),
            "replicate started"
        );
        let mut truth = ParameterVector::new();
        let result = catch_unwind(AssertUnwindSafe(|| self.attempt(index, started, &mut truth)))
            .unwrap_or_else(|_| Err(Error::FitFailed("replicate panicked".to_string())));
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(record) => {
                if record.status == ReplicateStatus::Flagged {
                    warn!(
                        target: event_names::REPLICATE_FLAGGED,
                        replicate = index.get(),
                        issues = %record.issues.join("; "),
                        "fit did not converge; ranks kept"
                    );
                } else {
                    info!(
                        target: event_names::REPLICATE_FINISHED,
                        replicate = index.get(),
                        elapsed_ms,
                        "replicate finished"
                    );
                }
                record
            }
            Err(err) => {
                if matches!(err, Error::FitTimeout { .. }) {
                    warn!(
                        target: event_names::FIT_TIMEOUT,
                        replicate = index.get(),
                        seconds = self.config.fit_timeout_secs,
                        "fit abandoned at its deadline"
                    );
                }
                warn!(
                    target: event_names::REPLICATE_FAILED,
                    replicate = index.get(),
                    kind = err.kind(),
                    code = err.code(),
                    error = %err,
                    "replicate failed; excluded from aggregation"
                );
                ReplicateRecord::failed(
                    index,
                    truth,
                    self.max_rank(),
                    self.fitter.name(),
                    &err,
                    elapsed_ms,
                )
            }
        }
    }

    fn attempt(
        &self,
        index: ReplicateIndex,
        started: Instant,
        truth_out: &mut ParameterVector,
    ) -> Result<ReplicateRecord> {
        let seed = self.config.seed;
        let mut sim_rng = stream_rng(seed, index.get(), Stream::Simulate);
        let truth = sample_prior(self.model, &mut sim_rng)?;
        *truth_out = truth.clone();
        let dataset = simulate(self.model, &truth, &mut sim_rng)?;

        let mut fit_rng = stream_rng(seed, index.get(), Stream::Fit);
        let request = FitRequest {
            model: self.model,
            dataset: &dataset,
            n_raw_draws: self.config.raw_draws(),
            deadline: Some(started + Duration::from_secs(self.config.fit_timeout_secs)),
        };
        let output = self.fitter.fit(&request, &mut fit_rng)?;
        let thinned = thin(&output.draws, self.config.thin, self.config.draws)?;
        thinned.check_against(self.model.parameter_names())?;
        let mut ranks = rank_all(&truth, &thinned)?;
        // Constant draws always tie the truth and would rank 0.
        let fixed = self.model.spec().fixed_parameters();
        ranks.retain(|name, _| !fixed.contains(name));
        let posterior = summarize_draws(&thinned);
        let issues = output
            .diagnostics
            .convergence_issues(self.config.rhat_threshold, self.config.min_ess);
        let status = if issues.is_empty() {
            ReplicateStatus::Ok
        } else {
            ReplicateStatus::Flagged
        };

        Ok(ReplicateRecord {
            schema_version: sbc_common::SCHEMA_VERSION.to_string(),
            index,
            status,
            truth,
            outcome: Some(dataset.outcome),
            draws: self.config.persist_draws.then_some(thinned),
            ranks,
            posterior,
            max_rank: self.max_rank(),
            diagnostics: output.diagnostics,
            issues,
            error: None,
            backend: self.fitter.name().to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            finished_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::{ConjugateNormalFitter, DrawTable, FitDiagnostics, FitError, FitOutput};
    use crate::store::RunManifest;
    use rand::RngCore;
    use sbc_config::preset::{get_preset, PresetName};
    use tempfile::TempDir;

    fn setup() -> (CompiledModel, RunConfig) {
        let preset = get_preset(PresetName::NormalNormal);
        let model = CompiledModel::compile(&preset.model, &preset.design).unwrap();
        let config = RunConfig {
            replicates: 12,
            draws: 19,
            thin: 2,
            workers: Some(3),
            prior_variance_draws: 500,
            ..preset.run
        };
        (model, config)
    }

    fn handle(dir: &TempDir, model: &CompiledModel, config: &RunConfig) -> RunHandle {
        let manifest = RunManifest::new(
            "nn",
            model.parameter_names().to_vec(),
            model.spec(),
            model.design(),
            config,
        );
        RunHandle::create(dir.path().join("nn"), &manifest).unwrap()
    }

    /// Fails odd replicates, reports divergences on multiples of four.
    struct Flaky;

    impl PosteriorFitter for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn supports(&self, _model: &CompiledModel) -> std::result::Result<(), FitError> {
            Ok(())
        }

        fn fit(
            &self,
            request: &FitRequest<'_>,
            rng: &mut dyn RngCore,
        ) -> std::result::Result<FitOutput, FitError> {
            let marker = request.dataset.outcome[0];
            let _ = rng.next_u64();
            let mut draws = DrawTable::new(request.model.parameter_names().to_vec());
            draws.rows = (0..request.n_raw_draws).map(|i| vec![i as f64, -(i as f64)]).collect();
            let mut diagnostics = FitDiagnostics::default();
            if marker > 0.0 {
                diagnostics.divergences = 3;
            }
            if marker > 1.0 {
                return Err(FitError::Failed("sampler crashed".to_string()));
            }
            Ok(FitOutput { draws, diagnostics })
        }
    }

    #[test]
    fn baseline_matches_prior() {
        let (model, _) = setup();
        let baseline = prior_variance(&model, 4000, 11).unwrap();
        for name in ["alpha", "beta"] {
            let v = baseline.variances[name];
            assert!((v - 1.0).abs() < 0.1, "{name}: {v}");
        }
        assert_eq!(baseline, prior_variance(&model, 4000, 11).unwrap());
    }

    #[test]
    fn replicates_are_independent_of_scheduling() {
        let (model, config) = setup();
        let fitter = ConjugateNormalFitter::new();
        let runner = Runner::new(&model, &config, &fitter, LogContext::new("test"));
        let a = runner.run_replicate(ReplicateIndex(5));

        let single = RunConfig {
            workers: Some(1),
            ..config.clone()
        };
        let other = Runner::new(&model, &single, &fitter, LogContext::new("test"));
        let mut collected = Vec::new();
        other
            .execute(&[ReplicateIndex(4), ReplicateIndex(5)], |r| {
                collected.push(r);
                Ok(())
            })
            .unwrap();
        let b = collected
            .into_iter()
            .find(|r| r.index == ReplicateIndex(5))
            .unwrap();
        assert_eq!(a.truth, b.truth);
        assert_eq!(a.ranks, b.ranks);
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(a.status, ReplicateStatus::Ok);
        assert_eq!(a.draws.as_ref().map(|d| d.len()), Some(19));
    }

    #[test]
    fn run_persists_every_index_and_resumes() {
        let tmp = TempDir::new().unwrap();
        let (model, config) = setup();
        let fitter = ConjugateNormalFitter::new();
        let store = handle(&tmp, &model, &config);
        let runner = Runner::new(&model, &config, &fitter, LogContext::new("test"));

        let first = runner.run(&store).unwrap();
        assert_eq!(first.requested, 12);
        assert_eq!(first.executed, 12);
        assert_eq!(first.ok, 12);
        assert!(store.read_prior_variance().unwrap().is_some());
        assert_eq!(store.completed_indices().unwrap().len(), 12);

        let second = runner.run(&store).unwrap();
        assert_eq!(second.skipped, 12);
        assert_eq!(second.executed, 0);
    }

    #[test]
    fn unreadable_records_are_recomputed_once() {
        let tmp = TempDir::new().unwrap();
        let (model, config) = setup();
        let fitter = ConjugateNormalFitter::new();
        let store = handle(&tmp, &model, &config);
        let runner = Runner::new(&model, &config, &fitter, LogContext::new("test"));
        runner.run(&store).unwrap();

        std::fs::write(store.replicate_path(ReplicateIndex(4)), "{ truncated").unwrap();
        assert_eq!(runner.pending(&store).unwrap(), vec![ReplicateIndex(4)]);

        let rerun = runner.run(&store).unwrap();
        assert_eq!(rerun.executed, 1);
        assert!(runner.pending(&store).unwrap().is_empty());
        assert_eq!(store.load_records().unwrap().len(), 12);
    }

    #[test]
    fn failures_are_recorded_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let (model, config) = setup();
        let store = handle(&tmp, &model, &config);
        let runner = Runner::new(&model, &config, &Flaky, LogContext::new("test"));
        let summary = runner.run(&store).unwrap();
        assert_eq!(summary.executed, 12);
        assert_eq!(summary.ok + summary.flagged + summary.failed, 12);

        for record in store.load_records().unwrap() {
            let marker = record.outcome.as_ref().map(|o| o[0]);
            match record.status {
                ReplicateStatus::Failed => {
                    assert!(record.ranks.is_empty());
                    assert_eq!(record.error.as_ref().unwrap().kind, "fit_failed");
                    assert!(!record.truth.is_empty());
                }
                ReplicateStatus::Flagged => {
                    assert!(marker.unwrap() > 0.0);
                    assert_eq!(record.ranks.len(), 2);
                    assert!(record.issues[0].contains("divergent"));
                }
                ReplicateStatus::Ok => assert!(marker.unwrap() <= 0.0),
            }
        }
    }

    #[test]
    fn too_few_draws_fail_the_replicate() {
        let (model, mut config) = setup();
        config.thin = 0;
        config.draws = 19;
        struct Short;
        impl PosteriorFitter for Short {
            fn name(&self) -> &'static str {
                "short"
            }
            fn supports(&self, _: &CompiledModel) -> std::result::Result<(), FitError> {
                Ok(())
            }
            fn fit(
                &self,
                request: &FitRequest<'_>,
                _: &mut dyn RngCore,
            ) -> std::result::Result<FitOutput, FitError> {
                let mut draws = DrawTable::new(request.model.parameter_names().to_vec());
                draws.rows = vec![vec![0.0, 0.0]; 5];
                Ok(FitOutput {
                    draws,
                    diagnostics: FitDiagnostics::default(),
                })
            }
        }
        let runner = Runner::new(&model, &config, &Short, LogContext::new("test"));
        let record = runner.run_replicate(ReplicateIndex(1));
        assert_eq!(record.status, ReplicateStatus::Failed);
        assert_eq!(record.error.unwrap().kind, "insufficient_draws");
    }

    #[test]
    fn retry_failed_reruns_failed_indices() {
        let tmp = TempDir::new().unwrap();
        let (model, config) = setup();
        let store = handle(&tmp, &model, &config);
        Runner::new(&model, &config, &Flaky, LogContext::new("test"))
            .run(&store)
            .unwrap();
        let failed = store.scan().unwrap().count(ReplicateStatus::Failed);

        let retry = RunConfig {
            retry_failed: true,
            ..config.clone()
        };
        let fitter = ConjugateNormalFitter::new();
        let runner = Runner::new(&model, &retry, &fitter, LogContext::new("test"));
        assert_eq!(runner.pending(&store).unwrap().len(), failed);
        let summary = runner.run(&store).unwrap();
        assert_eq!(summary.executed, failed);
        assert_eq!(store.scan().unwrap().count(ReplicateStatus::Failed), 0);
    }
}
