//! Persisted run record: the outcome of one orchestrator invocation.
//!
//! On disk this is a single JSON object keyed by stringified accession number.
//! Key `"0"` is reserved for the run summary; every other key is one model's
//! outcome. Keys are written sorted so two records diff cleanly.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use crate::domain::error::{ModelDbError, Result};
use crate::domain::model::ModelId;

/// Key of the build phase in [`ModelOutcome::run_times`].
pub const PHASE_BUILD: &str = "nrnivmodl";

/// Key of the execution phase in [`ModelOutcome::run_times`].
pub const PHASE_RUN: &str = "model";

/// Summary field holding the simulator version.
pub const VERSION_KEY: &str = "NEURON version";

/// Resolved paths of one prepared model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    /// Root of the extracted package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<PathBuf>,

    /// Working directory of the simulator process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_dir: Option<PathBuf>,

    /// Entry point handed to the simulator (`mosinit.hoc`, `model_run.py`, `quit.hoc`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<PathBuf>,

    /// Synthesized driver script; absent for python-style models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<PathBuf>,

    /// Directory whose mod files were compiled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod_dir: Option<PathBuf>,

    /// Pre-run shell script lines that were executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<Vec<String>>,
}

/// Folded outcome of one model in a run record.
///
/// Flags are persisted only when set, matching the historical schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOutcome {
    /// Preparation and build log.
    #[serde(default)]
    pub logs: Vec<String>,

    /// Simulator output.
    #[serde(default)]
    pub nrn_run: Vec<String>,

    /// Graph dump produced by the driver (only kept on request).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gout: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub do_not_run: bool,

    /// Build-log lines carrying the build error marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderr: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub nrn_run_err: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub no_mosinit_hoc: bool,

    #[serde(default)]
    pub run_info: RunInfo,

    /// Legacy combined runtime in seconds (sum of `run_times`).
    #[serde(default, deserialize_with = "seconds")]
    pub run_time: f64,

    /// Elapsed seconds per recorded phase.
    #[serde(default)]
    pub run_times: BTreeMap<String, f64>,
}

/// Coarse classification of a model outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelStatus {
    Skipped,
    BuildFailed,
    RunFailed,
    /// Ran, but without a native entry point (fell back to do-not-run).
    NoEntryPoint,
    Passed,
}

impl ModelOutcome {
    pub fn status(&self) -> ModelStatus {
        if self.do_not_run {
            ModelStatus::Skipped
        } else if self.moderr.is_some() {
            ModelStatus::BuildFailed
        } else if self.nrn_run_err {
            ModelStatus::RunFailed
        } else if self.no_mosinit_hoc {
            ModelStatus::NoEntryPoint
        } else {
            ModelStatus::Passed
        }
    }

    /// Skipped, failed to build, or failed to run: no meaningful runtime or
    /// output to compare against another run.
    pub fn is_degenerate(&self) -> bool {
        self.do_not_run || self.moderr.is_some() || self.nrn_run_err
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Older records stored `run_time` as a string.
fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(f64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(value) => Ok(value),
        Seconds::Text(text) => text.trim().parse::<f64>().map_err(serde::de::Error::custom),
    }
}

/// Count plus accession numbers of one outcome category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdList {
    #[serde(rename = "Count")]
    pub count: usize,

    #[serde(rename = "Accession numbers")]
    pub accession_numbers: Vec<ModelId>,
}

impl IdList {
    pub fn new(ids: Vec<ModelId>) -> Self {
        Self {
            count: ids.len(),
            accession_numbers: ids,
        }
    }
}

/// Aggregate statistics of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(rename = "Failed models")]
    pub failed_models: IdList,

    #[serde(rename = "Failed runs")]
    pub failed_runs: IdList,

    #[serde(rename = "Skipped runs")]
    pub skipped_runs: IdList,

    #[serde(rename = "Total nof models run")]
    pub total_models: usize,
}

impl Stats {
    /// Classify every outcome. A model with a build error counts only as a
    /// failed build, never also as a failed run.
    pub fn from_outcomes(models: &BTreeMap<ModelId, ModelOutcome>) -> Self {
        let mut failed_models = Vec::new();
        let mut failed_runs = Vec::new();
        let mut skipped = Vec::new();

        for (id, outcome) in models {
            if outcome.do_not_run {
                skipped.push(*id);
            }
            if outcome.moderr.is_some() {
                failed_models.push(*id);
            } else if outcome.nrn_run_err {
                failed_runs.push(*id);
            }
        }

        Self {
            failed_models: IdList::new(failed_models),
            failed_runs: IdList::new(failed_runs),
            skipped_runs: IdList::new(skipped),
            total_models: models.len(),
        }
    }
}

/// The reserved `"0"` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(rename = "NEURON version")]
    pub runtime_version: String,

    #[serde(rename = "Stats")]
    pub stats: Stats,
}

/// Complete outcome of one orchestrator invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRecord {
    pub summary: RunSummary,
    pub models: BTreeMap<ModelId, ModelOutcome>,
}

impl RunRecord {
    /// Build a record, computing the stats from the outcomes.
    pub fn new(runtime_version: impl Into<String>, models: BTreeMap<ModelId, ModelOutcome>) -> Self {
        let stats = Stats::from_outcomes(&models);
        Self {
            summary: RunSummary {
                runtime_version: runtime_version.into(),
                stats,
            },
            models,
        }
    }

    pub fn runtime_version(&self) -> &str {
        &self.summary.runtime_version
    }

    pub fn stats(&self) -> &Stats {
        &self.summary.stats
    }

    /// JSON object form with the summary under key `"0"`.
    pub fn to_json(&self) -> Result<Value> {
        let mut root = Map::new();
        root.insert(
            ModelId::SUMMARY.to_string(),
            serde_json::to_value(&self.summary)?,
        );
        for (id, outcome) in &self.models {
            root.insert(id.to_string(), serde_json::to_value(outcome)?);
        }
        Ok(Value::Object(root))
    }

    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(root) = value else {
            return Err(ModelDbError::InvalidRecord(
                "run record must be a JSON object".to_string(),
            ));
        };

        let mut summary = None;
        let mut models = BTreeMap::new();
        for (key, entry) in root {
            let id: ModelId = key
                .parse()
                .map_err(|_| ModelDbError::InvalidRecord(format!("non-numeric key {key:?}")))?;
            if id.is_summary() {
                summary = Some(serde_json::from_value::<RunSummary>(entry)?);
            } else {
                models.insert(id, serde_json::from_value::<ModelOutcome>(entry)?);
            }
        }

        let summary = summary.ok_or_else(|| {
            ModelDbError::InvalidRecord("missing summary key \"0\"".to_string())
        })?;
        Ok(Self { summary, models })
    }

    /// Four-space indented JSON, the layout existing report tooling expects.
    pub fn to_json_string(&self) -> Result<String> {
        let value = self.to_json()?;
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        value.serialize(&mut serializer)?;
        String::from_utf8(out).map_err(|e| ModelDbError::InvalidRecord(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)?;
        Self::from_json(value)
    }

    /// Write the record in one atomic step: temp file in the target directory,
    /// then rename over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_json_string()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Merge several run records of the same simulator version.
///
/// Model ids must not overlap; id lists are concatenated in input order and
/// counts summed.
pub fn merge_records(records: &[RunRecord]) -> Result<RunRecord> {
    let Some(first) = records.first() else {
        return Err(ModelDbError::Config("no run records to merge".to_string()));
    };
    let version = first.runtime_version().to_string();

    let mut models = BTreeMap::new();
    let mut failed_models = Vec::new();
    let mut failed_runs = Vec::new();
    let mut skipped = Vec::new();
    let mut total = 0;

    for record in records {
        if record.runtime_version() != version {
            return Err(ModelDbError::Config(format!(
                "NEURON version mismatch: {} vs {}",
                version,
                record.runtime_version()
            )));
        }

        let stats = record.stats();
        failed_models.extend(stats.failed_models.accession_numbers.iter().copied());
        failed_runs.extend(stats.failed_runs.accession_numbers.iter().copied());
        skipped.extend(stats.skipped_runs.accession_numbers.iter().copied());
        total += stats.total_models;

        for (id, outcome) in &record.models {
            if models.insert(*id, outcome.clone()).is_some() {
                return Err(ModelDbError::Config(format!("duplicate model id found: {id}")));
            }
        }
    }

    Ok(RunRecord {
        summary: RunSummary {
            runtime_version: version,
            stats: Stats {
                failed_models: IdList::new(failed_models),
                failed_runs: IdList::new(failed_runs),
                skipped_runs: IdList::new(skipped),
                total_models: total,
            },
        },
        models,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcome() -> ModelOutcome {
        ModelOutcome {
            logs: vec!["compiling".to_string()],
            nrn_run: vec!["RUNNING -> nrniv".to_string()],
            run_time: 1.5,
            run_times: BTreeMap::from([(PHASE_RUN.to_string(), 1.5)]),
            ..Default::default()
        }
    }

    fn record() -> RunRecord {
        let mut models = BTreeMap::new();
        models.insert(ModelId(100), outcome());
        models.insert(
            ModelId(3264),
            ModelOutcome {
                do_not_run: true,
                ..outcome()
            },
        );
        models.insert(
            ModelId(23613),
            ModelOutcome {
                moderr: Some(vec!["x.mod:1: error: bad".to_string()]),
                nrn_run_err: true,
                ..outcome()
            },
        );
        models.insert(
            ModelId(7),
            ModelOutcome {
                nrn_run_err: true,
                ..outcome()
            },
        );
        RunRecord::new("9.0.0", models)
    }

    #[test]
    fn test_total_equals_keys_minus_summary() {
        let rec = record();
        let json = rec.to_json().unwrap();
        let keys = json.as_object().unwrap().len();
        assert_eq!(rec.stats().total_models, keys - 1);
    }

    #[test]
    fn test_build_failure_is_not_also_a_run_failure() {
        let stats = record().summary.stats;
        assert_eq!(stats.failed_models.accession_numbers, vec![ModelId(23613)]);
        assert_eq!(stats.failed_runs.accession_numbers, vec![ModelId(7)]);
        assert_eq!(stats.skipped_runs.accession_numbers, vec![ModelId(3264)]);
        assert_eq!(stats.skipped_runs.count, 1);
    }

    #[test]
    fn test_summary_schema_keys() {
        let json = record().to_json().unwrap();
        let summary = &json["0"];
        assert_eq!(summary[VERSION_KEY], json!("9.0.0"));
        assert_eq!(summary["Stats"]["Total nof models run"], json!(4));
        assert_eq!(summary["Stats"]["Failed models"]["Count"], json!(1));
        assert_eq!(
            summary["Stats"]["Failed models"]["Accession numbers"],
            json!([23613])
        );
    }

    #[test]
    fn test_flags_omitted_unless_set() {
        let json = record().to_json().unwrap();
        let ok = json["100"].as_object().unwrap();
        assert!(!ok.contains_key("do_not_run"));
        assert!(!ok.contains_key("moderr"));
        assert!(!ok.contains_key("nrn_run_err"));
        assert!(!ok.contains_key("gout"));
        assert_eq!(json["3264"]["do_not_run"], json!(true));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let rec = record();
        rec.save(&path).unwrap();

        let loaded = RunRecord::load(&path).unwrap();
        assert_eq!(loaded, rec);
        assert_eq!(loaded.models[&ModelId(23613)].status(), ModelStatus::BuildFailed);
    }

    #[test]
    fn test_keys_written_sorted() {
        let text = record().to_json_string().unwrap();
        let pos = |key: &str| text.find(&format!("\"{key}\": {{")).unwrap();
        assert!(pos("0") < pos("100"));
        assert!(pos("100") < pos("23613"));
        assert!(pos("23613") < pos("3264"));
    }

    #[test]
    fn test_legacy_string_run_time() {
        let value = json!({
            "0": {"NEURON version": "8.2.6", "Stats": Stats::default()},
            "42": {"logs": [], "nrn_run": [], "run_info": {}, "run_time": "2.25"}
        });
        let rec = RunRecord::from_json(value).unwrap();
        assert_eq!(rec.models[&ModelId(42)].run_time, 2.25);
    }

    #[test]
    fn test_missing_summary_is_invalid() {
        let err = RunRecord::from_json(json!({"42": {}})).unwrap_err();
        assert!(matches!(err, ModelDbError::InvalidRecord(_)));
    }

    #[test]
    fn test_merge_sums_stats() {
        let mut a = BTreeMap::new();
        a.insert(ModelId(1), ModelOutcome { do_not_run: true, ..outcome() });
        let mut b = BTreeMap::new();
        b.insert(ModelId(2), ModelOutcome { nrn_run_err: true, ..outcome() });

        let merged =
            merge_records(&[RunRecord::new("9.0", a), RunRecord::new("9.0", b)]).unwrap();
        assert_eq!(merged.models.len(), 2);
        assert_eq!(merged.stats().total_models, 2);
        assert_eq!(merged.stats().skipped_runs.accession_numbers, vec![ModelId(1)]);
        assert_eq!(merged.stats().failed_runs.count, 1);
    }

    #[test]
    fn test_merge_rejects_overlap_and_version_mismatch() {
        let models = BTreeMap::from([(ModelId(1), outcome())]);
        let same = RunRecord::new("9.0", models.clone());
        assert!(merge_records(&[same.clone(), same.clone()]).is_err());
        assert!(merge_records(&[same, RunRecord::new("8.2", BTreeMap::new())]).is_err());
        assert!(merge_records(&[]).is_err());
    }
}
