//! Report differencing engine.
//!
//! Compares two run records model by model:
//! - curated simulator output, rendered as unified diffs (`text`)
//! - graphical output artifacts through a bounded-time external diff (`gout`)
//! - per-phase runtime speedup
//! - the two aggregate stats blocks

pub mod gout;
pub mod text;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::curation::Curator;
use crate::domain::error::Result;
use crate::domain::model::ModelId;
use crate::domain::registry::ModelRegistry;
use crate::obs::emit_diff_completed;
use crate::record::{ModelOutcome, RunRecord, Stats, PHASE_BUILD, PHASE_RUN};

pub use gout::{compare_gout_trees, diff_gout_files, GoutTreeComparison, GOUT_FILE};
pub use text::{cap_lines, unified_diff};

/// Knobs of the differencing engine.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// External diff program used for artifacts.
    pub diff_tool: String,
    /// Hard wall-clock limit of one artifact diff.
    pub gout_timeout: Duration,
    /// Line cap of one rendered artifact diff.
    pub gout_max_lines: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            diff_tool: "diff".to_string(),
            gout_timeout: Duration::from_secs(2),
            gout_max_lines: 30,
        }
    }
}

/// Runtime of one phase in both runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Speedup {
    pub v1: f64,
    pub v2: f64,
    /// `(v2 - v1) / v2 * 100`; negative is a slowdown of the first run.
    pub speedup: f64,
}

impl Speedup {
    /// Zero when the reference time `b` is zero.
    pub fn compute(a: f64, b: f64) -> Self {
        let speedup = if b == 0.0 { 0.0 } else { (b - a) / b * 100.0 };
        Self {
            v1: a,
            v2: b,
            speedup,
        }
    }
}

/// Runtime comparison of one model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeComparison {
    pub total: Speedup,
    /// Only phases recorded in both runs.
    pub phases: BTreeMap<String, Speedup>,
}

/// In-memory result of comparing two run records.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub version_a: String,
    pub version_b: String,
    /// Unified diff of the two summary entries (empty when equal).
    pub summary_diff: String,
    pub stats_a: Stats,
    pub stats_b: Stats,
    /// Curated output diffs, only for models that differ.
    pub text_diffs: BTreeMap<ModelId, String>,
    /// Artifact diffs, only for models with a non-empty diff.
    pub gout_diffs: BTreeMap<ModelId, String>,
    pub runtimes: BTreeMap<ModelId, RuntimeComparison>,
}

impl DiffResult {
    pub fn has_differences(&self) -> bool {
        !self.text_diffs.is_empty() || !self.gout_diffs.is_empty()
    }
}

/// Compare run record `a` against run record `b`.
///
/// Model-specific curation rules come from `registry`. Models skipped or
/// failed in either run are left out of the runtime and artifact comparison.
pub async fn diff_reports(
    a: &RunRecord,
    b: &RunRecord,
    registry: &ModelRegistry,
    options: &DiffOptions,
) -> Result<DiffResult> {
    let mut result = DiffResult {
        version_a: a.runtime_version().to_string(),
        version_b: b.runtime_version().to_string(),
        summary_diff: summary_diff(a, b)?,
        stats_a: a.stats().clone(),
        stats_b: b.stats().clone(),
        ..Default::default()
    };

    let global = Curator::global()?;
    for (id, outcome_a) in &a.models {
        let Some(outcome_b) = b.models.get(id) else {
            let missing = [format!("Accession number {id} not found in report2")];
            let diff = unified_diff(&outcome_a.nrn_run, &missing[..], &start_dir_label(outcome_a), "");
            result.text_diffs.insert(*id, diff);
            continue;
        };

        let curator = global.with_overrides(&registry.instruction(*id).curate_patterns);
        let curated_a = curator.curate(&outcome_a.nrn_run);
        let curated_b = curator.curate(&outcome_b.nrn_run);
        if curated_a != curated_b {
            let diff = unified_diff(
                &curated_a,
                &curated_b,
                &start_dir_label(outcome_a),
                &start_dir_label(outcome_b),
            );
            result.text_diffs.insert(*id, diff);
        }

        if outcome_a.is_degenerate() || outcome_b.is_degenerate() {
            debug!(model_id = %id, "excluded from runtime and gout comparison");
            continue;
        }

        result.runtimes.insert(*id, compare_runtimes(outcome_a, outcome_b));

        let (Some(gout_a), Some(gout_b)) = (gout_path(outcome_a), gout_path(outcome_b)) else {
            continue;
        };
        if !gout_a.is_file() && !gout_b.is_file() {
            continue;
        }
        let diff = diff_gout_files(
            &options.diff_tool,
            &gout_a,
            &gout_b,
            options.gout_timeout,
            options.gout_max_lines,
        )
        .await;
        if !diff.is_empty() {
            result.gout_diffs.insert(*id, diff);
        }
    }

    emit_diff_completed(
        &result.version_a,
        &result.version_b,
        result.text_diffs.len(),
        result.gout_diffs.len(),
    );
    Ok(result)
}

fn summary_diff(a: &RunRecord, b: &RunRecord) -> Result<String> {
    let render = |record: &RunRecord| -> Result<Vec<String>> {
        let text = serde_json::to_string_pretty(&record.summary)?;
        Ok(text.lines().map(str::to_string).collect())
    };
    Ok(unified_diff(
        &render(a)?,
        &render(b)?,
        a.runtime_version(),
        b.runtime_version(),
    ))
}

fn compare_runtimes(a: &ModelOutcome, b: &ModelOutcome) -> RuntimeComparison {
    let mut phases = BTreeMap::new();
    for phase in [PHASE_RUN, PHASE_BUILD] {
        if let (Some(ta), Some(tb)) = (a.run_times.get(phase), b.run_times.get(phase)) {
            phases.insert(phase.to_string(), Speedup::compute(*ta, *tb));
        }
    }
    RuntimeComparison {
        total: Speedup::compute(a.run_time, b.run_time),
        phases,
    }
}

fn start_dir_label(outcome: &ModelOutcome) -> String {
    outcome
        .run_info
        .start_dir
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// The driver writes `gout` into the package root.
fn gout_path(outcome: &ModelOutcome) -> Option<PathBuf> {
    outcome
        .run_info
        .model_dir
        .as_ref()
        .or(outcome.run_info.start_dir.as_ref())
        .map(|dir| dir.join(GOUT_FILE))
}
