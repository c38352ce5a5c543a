//! Run store: manifest, prior-variance baseline and one record per replicate.
//!
//! Layout under the data root:
//!
//! ```text
//! runs/<run-name>/
//!   manifest.json          run id, fingerprint, parameter schema, inputs
//!   prior_variance.json    prior variance baseline
//!   replicates/
//!     rep-000001.json      one ReplicateRecord per finished index
//! ```
//!
//! Records are written to a temporary file and renamed into place, so a
//! crash never leaves a half-written record behind. Writers touch distinct
//! replicate files and need no locking.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use sbc_common::{Error, ReplicateIndex, RunId};
use sbc_config::{Design, ModelSpec, RunConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::record::{ReplicateRecord, ReplicateStatus};

/// Environment override for the data root.
pub const ENV_DATA_DIR: &str = "SBC_DATA";

const DIR_NAME: &str = "sbc";
const RUNS_DIR_NAME: &str = "runs";
const MANIFEST_FILE: &str = "manifest.json";
const PRIOR_VARIANCE_FILE: &str = "prior_variance.json";
const REPLICATES_DIR: &str = "replicates";

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("failed to resolve a data directory (set {ENV_DATA_DIR} or XDG_DATA_HOME)")]
    DataDirUnavailable,

    #[error("no run at {path}")]
    NotFound { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse JSON at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DataDirUnavailable => Error::Config(err.to_string()),
            StoreError::NotFound { path } => Error::RunNotFound {
                path: path.display().to_string(),
            },
            StoreError::Io { source, .. } => Error::Io(source),
            StoreError::Json { .. } => Error::RecordCorrupted(err.to_string()),
        }
    }
}

/// Identity and inputs of a run; written once, updated on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: String,
    pub run_id: RunId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Fingerprint of the replicate-defining inputs.
    pub fingerprint: String,
    /// Parameter Vector schema shared by every record.
    pub parameters: Vec<String>,
    pub draws: usize,
    pub thin: usize,
    pub model: ModelSpec,
    pub design: Design,
    pub config: RunConfig,
}

impl RunManifest {
    pub fn new(
        name: &str,
        parameters: Vec<String>,
        model: &ModelSpec,
        design: &Design,
        config: &RunConfig,
    ) -> Self {
        RunManifest {
            schema_version: sbc_common::SCHEMA_VERSION.to_string(),
            run_id: RunId::new(),
            name: name.to_string(),
            created_at: Utc::now(),
            updated_at: None,
            fingerprint: sbc_config::fingerprint(model, design, config),
            parameters,
            draws: config.draws,
            thin: config.thin,
            model: model.clone(),
            design: design.clone(),
            config: config.clone(),
        }
    }

    /// Parameters that get a rank: the schema minus constant-prior ones.
    pub fn ranked_parameters(&self) -> Vec<String> {
        let fixed = self.model.fixed_parameters();
        self.parameters
            .iter()
            .filter(|name| !fixed.contains(name))
            .cloned()
            .collect()
    }

    /// Rank support upper bound for this run.
    pub fn max_rank(&self) -> u32 {
        self.draws as u32
    }
}

/// Prior variance per parameter, estimated once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorVariance {
    pub draws: usize,
    pub variances: IndexMap<String, f64>,
}

/// What a directory scan found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunScan {
    pub completed: BTreeMap<ReplicateIndex, ReplicateStatus>,
    /// Record files that failed to parse; their indices count as pending.
    pub corrupted: Vec<(ReplicateIndex, String)>,
}

impl RunScan {
    pub fn count(&self, status: ReplicateStatus) -> usize {
        self.completed.values().filter(|&&s| s == status).count()
    }
}

/// Root directory holding all runs.
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    /// Data root from `SBC_DATA`, then `XDG_DATA_HOME`, then the platform
    /// data directory.
    pub fn from_env() -> Result<Self, StoreError> {
        resolve_runs_root().map(|root| RunStore { root })
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        RunStore { root: root.into() }
    }

    pub fn runs_root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Names of runs that have a manifest, sorted.
    pub fn list_runs(&self) -> Result<Vec<String>, StoreError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.root.clone(),
                    source: e,
                })
            }
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().join(MANIFEST_FILE).is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Handle to one run directory.
#[derive(Debug, Clone)]
pub struct RunHandle {
    dir: PathBuf,
}

impl RunHandle {
    /// Open an existing run; its manifest must exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let handle = RunHandle { dir: dir.into() };
        if !handle.manifest_path().is_file() {
            return Err(StoreError::NotFound {
                path: handle.dir.clone(),
            });
        }
        Ok(handle)
    }

    /// Create a run directory and write its manifest.
    pub fn create(dir: impl Into<PathBuf>, manifest: &RunManifest) -> Result<Self, StoreError> {
        let handle = RunHandle { dir: dir.into() };
        let replicates = handle.replicates_dir();
        std::fs::create_dir_all(&replicates).map_err(|e| StoreError::Io {
            path: replicates,
            source: e,
        })?;
        handle.write_manifest(manifest)?;
        Ok(handle)
    }

    /// Open the run at `dir` if it exists, refusing a changed fingerprint;
    /// otherwise create it from `manifest`.
    pub fn open_or_create(dir: impl Into<PathBuf>, manifest: &RunManifest) -> Result<(Self, RunManifest), Error> {
        let dir = dir.into();
        match RunHandle::open(&dir) {
            Ok(handle) => {
                let mut stored = handle.read_manifest()?;
                if stored.fingerprint != manifest.fingerprint {
                    return Err(Error::ConfigMismatch {
                        expected: stored.fingerprint,
                        actual: manifest.fingerprint.clone(),
                    });
                }
                stored.config = manifest.config.clone();
                stored.updated_at = Some(Utc::now());
                handle.write_manifest(&stored)?;
                Ok((handle, stored))
            }
            Err(StoreError::NotFound { .. }) => {
                let handle = RunHandle::create(&dir, manifest)?;
                Ok((handle, manifest.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    pub fn prior_variance_path(&self) -> PathBuf {
        self.dir.join(PRIOR_VARIANCE_FILE)
    }

    pub fn replicates_dir(&self) -> PathBuf {
        self.dir.join(REPLICATES_DIR)
    }

    pub fn replicate_path(&self, index: ReplicateIndex) -> PathBuf {
        self.replicates_dir()
            .join(format!("{}.json", index.file_stem()))
    }

    pub fn read_manifest(&self) -> Result<RunManifest, StoreError> {
        read_json(&self.manifest_path())
    }

    pub fn write_manifest(&self, manifest: &RunManifest) -> Result<(), StoreError> {
        write_json_atomic(&self.manifest_path(), manifest)
    }

    /// The stored baseline, if one has been computed.
    pub fn read_prior_variance(&self) -> Result<Option<PriorVariance>, StoreError> {
        let path = self.prior_variance_path();
        if !path.is_file() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    pub fn write_prior_variance(&self, baseline: &PriorVariance) -> Result<(), StoreError> {
        write_json_atomic(&self.prior_variance_path(), baseline)
    }

    pub fn write_record(&self, record: &ReplicateRecord) -> Result<(), StoreError> {
        write_json_atomic(&self.replicate_path(record.index), record)
    }

    pub fn read_record(&self, index: ReplicateIndex) -> Result<ReplicateRecord, StoreError> {
        let path = self.replicate_path(index);
        if !path.is_file() {
            return Err(StoreError::NotFound { path });
        }
        read_json(&path)
    }

    /// Indices that have a record file, without parsing them.
    pub fn completed_indices(&self) -> Result<Vec<ReplicateIndex>, StoreError> {
        let dir = self.replicates_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io { path: dir, source: e }),
        };
        let mut indices: Vec<ReplicateIndex> = entries
            .flatten()
            .filter_map(|e| record_index(&e.path()))
            .collect();
        indices.sort();
        Ok(indices)
    }

    /// Parse every record for its status; unreadable records are reported
    /// rather than failing the scan.
    pub fn scan(&self) -> Result<RunScan, StoreError> {
        let mut scan = RunScan::default();
        for index in self.completed_indices()? {
            match self.read_record(index) {
                Ok(record) => {
                    scan.completed.insert(index, record.status);
                }
                Err(e @ StoreError::Json { .. }) => scan.corrupted.push((index, e.to_string())),
                Err(e) => return Err(e),
            }
        }
        Ok(scan)
    }

    /// Every record in index order. A corrupted record is an error.
    pub fn load_records(&self) -> Result<Vec<ReplicateRecord>, StoreError> {
        self.completed_indices()?
            .into_iter()
            .map(|index| self.read_record(index))
            .collect()
    }
}

fn record_index(path: &Path) -> Option<ReplicateIndex> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    ReplicateIndex::from_file_stem(path.file_stem()?.to_str()?)
}

fn resolve_runs_root() -> Result<PathBuf, StoreError> {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir).join(RUNS_DIR_NAME));
        }
    }

    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join(DIR_NAME).join(RUNS_DIR_NAME));
        }
    }

    if let Some(base) = dirs::data_dir() {
        return Ok(base.join(DIR_NAME).join(RUNS_DIR_NAME));
    }

    Err(StoreError::DataDirUnavailable)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = std::fs::read_to_string(path).map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| StoreError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let content = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("record.json");
    let tmp_path = path.with_file_name(format!("{}.tmp.{}", file_name, std::process::id()));
    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp_path).map_err(|e| StoreError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        file.write_all(&content).map_err(|e| StoreError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        let _ = file.sync_all();
    }
    std::fs::rename(&tmp_path, path).map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::FitDiagnostics;
    use crate::model::ParameterVector;
    use sbc_config::preset::{get_preset, PresetName};
    use tempfile::TempDir;

    fn manifest() -> RunManifest {
        let preset = get_preset(PresetName::NormalNormal);
        RunManifest::new(
            "nn",
            vec!["alpha".to_string(), "beta".to_string()],
            &preset.model,
            &preset.design,
            &preset.run,
        )
    }

    fn record(index: u32, status: ReplicateStatus) -> ReplicateRecord {
        let mut truth = ParameterVector::new();
        truth.insert("alpha", 0.1);
        truth.insert("beta", -0.2);
        let mut ranks = IndexMap::new();
        if status.has_ranks() {
            ranks.insert("alpha".to_string(), 10);
            ranks.insert("beta".to_string(), 90);
        }
        ReplicateRecord {
            schema_version: sbc_common::SCHEMA_VERSION.to_string(),
            index: ReplicateIndex(index),
            status,
            truth,
            outcome: None,
            draws: None,
            ranks,
            posterior: IndexMap::new(),
            max_rank: 99,
            diagnostics: FitDiagnostics::default(),
            issues: Vec::new(),
            error: None,
            backend: "conjugate".to_string(),
            elapsed_ms: 1,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn create_then_open() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nn");
        let m = manifest();
        RunHandle::create(&dir, &m).unwrap();
        let handle = RunHandle::open(&dir).unwrap();
        assert_eq!(handle.read_manifest().unwrap(), m);
        assert!(handle.read_prior_variance().unwrap().is_none());
        assert!(handle.completed_indices().unwrap().is_empty());
    }

    #[test]
    fn missing_run_maps_to_run_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = RunHandle::open(tmp.path().join("absent")).unwrap_err();
        assert!(matches!(Error::from(err), Error::RunNotFound { .. }));
    }

    #[test]
    fn records_are_keyed_by_index() {
        let tmp = TempDir::new().unwrap();
        let handle = RunHandle::create(tmp.path().join("nn"), &manifest()).unwrap();
        for i in [3, 1, 2] {
            handle.write_record(&record(i, ReplicateStatus::Ok)).unwrap();
        }
        handle.write_record(&record(4, ReplicateStatus::Failed)).unwrap();
        std::fs::write(handle.replicates_dir().join("notes.txt"), "x").unwrap();

        let indices = handle.completed_indices().unwrap();
        assert_eq!(
            indices,
            vec![ReplicateIndex(1), ReplicateIndex(2), ReplicateIndex(3), ReplicateIndex(4)]
        );
        let records = handle.load_records().unwrap();
        assert_eq!(records[0].index, ReplicateIndex(1));
        assert_eq!(records[3].status, ReplicateStatus::Failed);

        // Rewriting an index replaces the record.
        handle.write_record(&record(4, ReplicateStatus::Ok)).unwrap();
        assert_eq!(handle.read_record(ReplicateIndex(4)).unwrap().status, ReplicateStatus::Ok);
        assert!(!handle
            .replicates_dir()
            .read_dir()
            .unwrap()
            .flatten()
            .any(|e| e.file_name().to_string_lossy().contains(".tmp.")));
    }

    #[test]
    fn scan_reports_corrupted_records() {
        let tmp = TempDir::new().unwrap();
        let handle = RunHandle::create(tmp.path().join("nn"), &manifest()).unwrap();
        handle.write_record(&record(1, ReplicateStatus::Ok)).unwrap();
        handle.write_record(&record(2, ReplicateStatus::Failed)).unwrap();
        std::fs::write(handle.replicate_path(ReplicateIndex(3)), "{ truncated").unwrap();

        let scan = handle.scan().unwrap();
        assert_eq!(scan.completed.len(), 2);
        assert_eq!(scan.count(ReplicateStatus::Failed), 1);
        assert_eq!(scan.corrupted.len(), 1);
        assert_eq!(scan.corrupted[0].0, ReplicateIndex(3));

        let err = Error::from(handle.load_records().unwrap_err());
        assert_eq!(err.code(), 31);
    }

    #[test]
    fn resume_refuses_changed_inputs() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nn");
        let m = manifest();
        let (_, first) = RunHandle::open_or_create(&dir, &m).unwrap();
        assert_eq!(first.run_id, m.run_id);

        // Same inputs, new invocation: reuses the stored run id.
        let again = manifest();
        let (_, resumed) = RunHandle::open_or_create(&dir, &again).unwrap();
        assert_eq!(resumed.run_id, m.run_id);
        assert!(resumed.updated_at.is_some());

        let preset = get_preset(PresetName::NormalNormal);
        let mut config = preset.run.clone();
        config.seed += 1;
        let changed = RunManifest::new("nn", m.parameters.clone(), &preset.model, &preset.design, &config);
        let err = RunHandle::open_or_create(&dir, &changed).unwrap_err();
        assert!(matches!(err, Error::ConfigMismatch { .. }));
    }

    #[test]
    fn prior_variance_round_trip() {
        let tmp = TempDir::new().unwrap();
        let handle = RunHandle::create(tmp.path().join("nn"), &manifest()).unwrap();
        let mut variances = IndexMap::new();
        variances.insert("alpha".to_string(), 1.02);
        let baseline = PriorVariance {
            draws: 4000,
            variances,
        };
        handle.write_prior_variance(&baseline).unwrap();
        assert_eq!(handle.read_prior_variance().unwrap(), Some(baseline));
    }

    #[test]
    fn list_runs_only_counts_manifests() {
        let tmp = TempDir::new().unwrap();
        let store = RunStore::at(tmp.path());
        assert!(store.list_runs().unwrap().is_empty());
        RunHandle::create(store.run_dir("b"), &manifest()).unwrap();
        RunHandle::create(store.run_dir("a"), &manifest()).unwrap();
        std::fs::create_dir_all(store.run_dir("stray")).unwrap();
        assert_eq!(store.list_runs().unwrap(), vec!["a", "b"]);
    }
}
