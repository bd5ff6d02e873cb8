//! CI gate evaluation for pass/fail criteria of a report comparison.

use modeldb_core::{DiffResult, ModelDbError, ModelId, Result};
use serde::{Deserialize, Serialize};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

impl GateVerdict {
    /// Process exit code for this verdict.
    pub fn exit_code(&self) -> i32 {
        if self.passed {
            0
        } else {
            1
        }
    }
}

/// CI gate evaluation rules.
pub struct CiGate;

impl CiGate {
    /// Evaluate a comparison of two run records.
    ///
    /// Gate rule, each independently failing the gate:
    /// - per-model output diffs
    /// - gout diffs
    /// - failed builds in either run
    /// - failed runs in either run
    ///
    /// Both runs must cover the same model set: differing skip counts or
    /// totals are an invariant violation, not a gate failure.
    pub fn evaluate(diff: &DiffResult) -> Result<GateVerdict> {
        let (a, b) = (&diff.stats_a, &diff.stats_b);
        if a.skipped_runs.count != b.skipped_runs.count {
            return Err(ModelDbError::InvariantViolation(format!(
                "skipped run counts differ between runs: {} vs {}",
                a.skipped_runs.count, b.skipped_runs.count
            )));
        }
        if a.total_models != b.total_models {
            return Err(ModelDbError::InvariantViolation(format!(
                "total model counts differ between runs: {} vs {}",
                a.total_models, b.total_models
            )));
        }

        let mut violations = Vec::new();
        if !diff.text_diffs.is_empty() {
            violations.push(format!(
                "stdout diffs in {}",
                id_set(diff.text_diffs.keys())
            ));
        }
        if !diff.gout_diffs.is_empty() {
            violations.push(format!("gout diffs in {}", id_set(diff.gout_diffs.keys())));
        }

        let versions = version_count(diff);
        let failed_builds = a.failed_models.count + b.failed_models.count;
        if failed_builds > 0 {
            violations.push(format!(
                "there were {failed_builds} failed model builds across {versions} versions of NEURON"
            ));
        }
        let failed_runs = a.failed_runs.count + b.failed_runs.count;
        if failed_runs > 0 {
            violations.push(format!(
                "there were {failed_runs} failed model runs across {versions} versions of NEURON"
            ));
        }

        let passed = violations.is_empty();
        let message = if passed {
            format!("{} and {} agree", diff.version_a, diff.version_b)
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        Ok(GateVerdict {
            passed,
            violations,
            message,
        })
    }
}

/// Distinct runtime versions in the comparison; only used for wording.
fn version_count(diff: &DiffResult) -> usize {
    if diff.version_a == diff.version_b {
        1
    } else {
        2
    }
}

fn id_set<'a>(ids: impl Iterator<Item = &'a ModelId>) -> String {
    let ids: Vec<String> = ids.map(ToString::to_string).collect();
    format!("{{{}}}", ids.join(", "))
}
