//! External sampler backend.
//!
//! The sampler is any program that reads one JSON request on stdin and
//! writes one JSON response on stdout:
//!
//! ```json
//! { "protocol": "sbc-fit/1", "parameters": ["alpha", "beta"],
//!   "model": { ... }, "data": { "columns": { "x": [...], "y": [...] } },
//!   "outcome": "y", "n_draws": 990, "seed": 12345 }
//! ```
//!
//! ```json
//! { "parameters": ["alpha", "beta"], "draws": [[0.1, 0.9], ...],
//!   "chain": [1, 1, ...], "diagnostics": { "divergences": 0 } }
//! ```
//!
//! The child is killed when the replicate's deadline passes. Its stderr is
//! forwarded to the log at debug level.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sbc_common::Error;
use sbc_config::{Column, Design, ModelSpec};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::diagnostics;
use super::{
    ConjugateNormalFitter, DrawTable, FitDiagnostics, FitError, FitOutput, FitRequest,
    PosteriorFitter,
};
use crate::logging::event_names;
use crate::model::{CompiledModel, SimulatedDataset, OUTCOME_COLUMN};

const BACKEND: &str = "command";

/// Protocol tag sent with every request.
pub const PROTOCOL: &str = "sbc-fit/1";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Request written to the sampler's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRequestMessage {
    pub protocol: String,
    /// Column names the response must use, in order.
    pub parameters: Vec<String>,
    pub model: ModelSpec,
    /// Design columns plus the simulated outcome.
    pub data: Design,
    pub outcome: String,
    /// Raw draws to return (before thinning).
    pub n_draws: usize,
    pub seed: u64,
}

impl FitRequestMessage {
    pub fn new(request: &FitRequest<'_>, seed: u64) -> Self {
        FitRequestMessage {
            protocol: PROTOCOL.to_string(),
            parameters: request.model.parameter_names().to_vec(),
            model: request.model.spec().clone(),
            data: request.dataset.to_table(request.model.design()),
            outcome: OUTCOME_COLUMN.to_string(),
            n_draws: request.n_raw_draws,
            seed,
        }
    }

    /// Split `data` back into the design template and the outcome.
    pub fn split_data(&self) -> Result<(Design, SimulatedDataset), Error> {
        let mut design = self.data.clone();
        let outcome = match design.columns.shift_remove(&self.outcome) {
            Some(Column::Numbers(values)) => values,
            Some(Column::Labels(_)) => {
                return Err(Error::SchemaMismatch(format!(
                    "outcome column '{}' holds labels",
                    self.outcome
                )))
            }
            None => {
                return Err(Error::SchemaMismatch(format!(
                    "outcome column '{}' is missing",
                    self.outcome
                )))
            }
        };
        Ok((design, SimulatedDataset { outcome }))
    }
}

/// Response read from the sampler's stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResponseMessage {
    pub parameters: Vec<String>,
    pub draws: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<FitDiagnostics>,
}

impl FitResponseMessage {
    pub fn into_table(self) -> (DrawTable, FitDiagnostics) {
        let table = DrawTable {
            parameters: self.parameters,
            rows: self.draws,
            chains: self.chain,
        };
        (table, self.diagnostics.unwrap_or_default())
    }
}

/// Posterior fitter that delegates to an external program.
#[derive(Debug, Clone)]
pub struct CommandFitter {
    argv: Vec<String>,
    timeout_secs: u64,
}

impl CommandFitter {
    pub fn new(argv: Vec<String>) -> Result<Self, FitError> {
        if argv.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(FitError::Unsupported {
                backend: BACKEND,
                reason: "fit_command is empty".to_string(),
            });
        }
        Ok(CommandFitter {
            argv,
            timeout_secs: 300,
        })
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Run the child once: write `input`, collect stdout, enforce `deadline`.
    fn exchange(&self, input: Vec<u8>, deadline: Instant) -> Result<Vec<u8>, FitError> {
        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FitError::Failed(format!("failed to spawn '{}': {}", self.argv[0], e)))?;

        // Pipes are drained on their own threads so a chatty child cannot
        // block on a full buffer while we wait for it.
        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || match stdin.write_all(&input) {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            })
        });
        let stdout_reader = child.stdout.take().map(|mut stdout| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                stdout.read_to_end(&mut buf).map(|_| buf)
            })
        });
        let stderr_reader = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                let mut tail: Vec<String> = Vec::new();
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    debug!(target: event_names::FIT_STDERR, line = %line);
                    tail.push(line);
                    if tail.len() > 20 {
                        tail.remove(0);
                    }
                }
                tail
            })
        });

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(FitError::Timeout {
                    seconds: self.timeout_secs,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        if let Some(handle) = writer {
            handle
                .join()
                .map_err(|_| FitError::Failed("stdin writer panicked".to_string()))??;
        }
        let stdout = match stdout_reader {
            Some(handle) => handle
                .join()
                .map_err(|_| FitError::Failed("stdout reader panicked".to_string()))??,
            None => Vec::new(),
        };
        let stderr_tail = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(FitError::Failed(format!(
                "sampler exited with {}: {}",
                status
                    .code()
                    .map_or_else(|| "a signal".to_string(), |c| format!("code {}", c)),
                stderr_tail.join(" | ")
            )));
        }
        Ok(stdout)
    }
}

impl PosteriorFitter for CommandFitter {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn supports(&self, _model: &CompiledModel) -> Result<(), FitError> {
        // Whatever the sampler accepts; failures surface per replicate.
        Ok(())
    }

    fn fit(&self, request: &FitRequest<'_>, rng: &mut dyn RngCore) -> Result<FitOutput, FitError> {
        let message = FitRequestMessage::new(request, rng.next_u64());
        let input = serde_json::to_vec(&message)?;
        let deadline = request
            .deadline
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(self.timeout_secs));

        let stdout = self.exchange(input, deadline)?;
        let response: FitResponseMessage = serde_json::from_slice(&stdout)?;
        let (draws, reported) = response.into_table();
        draws.check_against(request.model.parameter_names())?;
        if draws.len() < request.n_raw_draws {
            debug!(
                returned = draws.len(),
                requested = request.n_raw_draws,
                "sampler returned fewer raw draws than requested"
            );
        }

        let computed = diagnostics::summarize(&draws);
        Ok(FitOutput {
            draws,
            diagnostics: reported.merge(computed),
        })
    }
}

/// Chains the oracle reports, so downstream diagnostics see several.
const ORACLE_CHAINS: usize = 4;

/// Answer a fit request with the exact conjugate posterior.
///
/// This is what `sbc oracle` runs; it lets the command backend be driven
/// end to end without an external toolchain.
pub fn answer_with_conjugate(request: &FitRequestMessage) -> Result<FitResponseMessage, Error> {
    if request.protocol != PROTOCOL {
        return Err(Error::SchemaMismatch(format!(
            "unsupported protocol '{}', expected '{}'",
            request.protocol, PROTOCOL
        )));
    }
    let (design, dataset) = request.split_data()?;
    let model = CompiledModel::compile(&request.model, &design)?;
    let fit_request = FitRequest {
        model: &model,
        dataset: &dataset,
        n_raw_draws: request.n_draws,
        deadline: None,
    };
    let mut rng = StdRng::seed_from_u64(request.seed);
    let output = ConjugateNormalFitter::new().fit(&fit_request, &mut rng)?;

    let per_chain = output.draws.len().div_ceil(ORACLE_CHAINS).max(1);
    let chain = (0..output.draws.len())
        .map(|i| (i / per_chain) as u32 + 1)
        .collect();
    Ok(FitResponseMessage {
        parameters: output.draws.parameters,
        draws: output.draws.rows,
        chain: Some(chain),
        diagnostics: Some(FitDiagnostics::default()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbc_config::preset::{get_preset, PresetName};

    fn normal_normal() -> CompiledModel {
        let preset = get_preset(PresetName::NormalNormal);
        CompiledModel::compile(&preset.model, &preset.design).unwrap()
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandFitter::new(Vec::new()).is_err());
        assert!(CommandFitter::new(vec!["  ".to_string()]).is_err());
    }

    #[test]
    fn request_round_trips_through_json() {
        let model = normal_normal();
        let data = SimulatedDataset {
            outcome: (0..10).map(|i| i as f64).collect(),
        };
        let request = FitRequest {
            model: &model,
            dataset: &data,
            n_raw_draws: 40,
            deadline: None,
        };
        let message = FitRequestMessage::new(&request, 9);
        let json = serde_json::to_string(&message).unwrap();
        let back: FitRequestMessage = serde_json::from_str(&json).unwrap();
        let (design, dataset) = back.split_data().unwrap();
        assert_eq!(&design, model.design());
        assert_eq!(dataset, data);
        assert_eq!(back.parameters, vec!["alpha", "beta"]);
    }

    #[test]
    fn oracle_answers_with_chains() {
        let model = normal_normal();
        let data = SimulatedDataset {
            outcome: vec![0.5; 10],
        };
        let request = FitRequest {
            model: &model,
            dataset: &data,
            n_raw_draws: 100,
            deadline: None,
        };
        let response = answer_with_conjugate(&FitRequestMessage::new(&request, 1)).unwrap();
        assert_eq!(response.draws.len(), 100);
        let chain = response.chain.clone().unwrap();
        assert_eq!(chain[0], 1);
        assert_eq!(chain[99], 4);
        let (table, _) = response.into_table();
        table.check_against(model.parameter_names()).unwrap();
    }

    #[test]
    fn oracle_rejects_other_protocols() {
        let model = normal_normal();
        let data = SimulatedDataset {
            outcome: vec![0.0; 10],
        };
        let request = FitRequest {
            model: &model,
            dataset: &data,
            n_raw_draws: 10,
            deadline: None,
        };
        let mut message = FitRequestMessage::new(&request, 1);
        message.protocol = "other/2".to_string();
        assert!(answer_with_conjugate(&message).is_err());
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use rand::rngs::StdRng;

        fn request_parts() -> (CompiledModel, SimulatedDataset) {
            (
                normal_normal(),
                SimulatedDataset {
                    outcome: vec![0.0; 10],
                },
            )
        }

        fn sh(script: &str) -> CommandFitter {
            CommandFitter::new(vec!["sh".to_string(), "-c".to_string(), script.to_string()])
                .unwrap()
                .with_timeout_secs(1)
        }

        #[test]
        fn parses_sampler_output() {
            let (model, data) = request_parts();
            let request = FitRequest {
                model: &model,
                dataset: &data,
                n_raw_draws: 4,
                deadline: None,
            };
            let fitter = sh(
                r#"cat > /dev/null; echo '{"parameters":["alpha","beta"],"draws":[[0,1],[1,2],[2,3],[3,4]],"diagnostics":{"divergences":2}}'"#,
            );
            let out = fitter.fit(&request, &mut StdRng::seed_from_u64(0)).unwrap();
            assert_eq!(out.draws.len(), 4);
            assert_eq!(out.diagnostics.divergences, 2);
        }

        #[test]
        fn wrong_columns_are_schema_errors() {
            let (model, data) = request_parts();
            let request = FitRequest {
                model: &model,
                dataset: &data,
                n_raw_draws: 1,
                deadline: None,
            };
            let fitter = sh(r#"cat > /dev/null; echo '{"parameters":["alpha","gamma"],"draws":[[0,1]]}'"#);
            let err = fitter
                .fit(&request, &mut StdRng::seed_from_u64(0))
                .unwrap_err();
            assert!(matches!(err, FitError::Schema(_)));
        }

        #[test]
        fn slow_sampler_times_out() {
            let (model, data) = request_parts();
            let request = FitRequest {
                model: &model,
                dataset: &data,
                n_raw_draws: 1,
                deadline: Some(Instant::now() + Duration::from_millis(200)),
            };
            let started = Instant::now();
            let err = sh("sleep 5")
                .fit(&request, &mut StdRng::seed_from_u64(0))
                .unwrap_err();
            assert!(matches!(err, FitError::Timeout { .. }));
            assert!(started.elapsed() < Duration::from_secs(4));
        }

        #[test]
        fn failing_sampler_reports_stderr() {
            let (model, data) = request_parts();
            let request = FitRequest {
                model: &model,
                dataset: &data,
                n_raw_draws: 1,
                deadline: None,
            };
            let err = sh("cat > /dev/null; echo 'model exploded' >&2; exit 3")
                .fit(&request, &mut StdRng::seed_from_u64(0))
                .unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains("code 3") && msg.contains("model exploded"), "{msg}");
        }
    }
}
