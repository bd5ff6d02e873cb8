//! Structured observability hooks for batch and model lifecycle events.
//!
//! This module provides:
//! - Model-scoped tracing spans via the `ModelSpan` RAII guard
//! - Emission functions for batch start/finish, per-model progress and failures,
//!   and report comparison
//!
//! Events carry an `event` field so JSON log consumers can filter on it.

use tracing::{error, info};

use crate::domain::model::ModelId;

/// RAII guard that enters a model-scoped tracing span while one model is
/// being prepared, built and run.
///
/// # Example
///
/// ```ignore
/// let _span = ModelSpan::enter(ModelId(3264));
/// // every log line is now tagged with model_id = 3264
/// ```
pub struct ModelSpan {
    _span: tracing::span::EnteredSpan,
}

impl ModelSpan {
    pub fn enter(model_id: ModelId) -> Self {
        Self {
            _span: model_span(model_id).entered(),
        }
    }
}

/// Model-scoped span for instrumenting futures that cross await points.
pub fn model_span(model_id: ModelId) -> tracing::Span {
    tracing::info_span!("modeldb.model", model_id = %model_id)
}

/// Emit event: batch started.
pub fn emit_batch_started(workdir: &str, models: usize, workers: usize) {
    info!(event = "batch.started", workdir = %workdir, models = models, workers = workers);
}

/// Emit event: one model picked up by a worker.
pub fn emit_model_started(model_id: ModelId, name: &str) {
    info!(event = "model.started", model_id = %model_id, name = %name);
}

/// Emit event: one model finished with its coarse status.
pub fn emit_model_finished(model_id: ModelId, status: &str, duration_ms: u64) {
    info!(
        event = "model.finished",
        model_id = %model_id,
        status = %status,
        duration_ms = duration_ms,
    );
}

/// Emit event: build log of a model contains error lines.
pub fn emit_model_build_error(model_id: ModelId, lines: &[String]) {
    error!(
        event = "model.build_error",
        model_id = %model_id,
        errors = %lines.join("\n"),
    );
}

/// Emit event: simulator run of a model failed; carries the whole run log.
pub fn emit_model_run_error(model_id: ModelId, nrn_run: &[String]) {
    error!(
        event = "model.run_error",
        model_id = %model_id,
        nrn_run = %nrn_run.join("\n"),
    );
}

/// Emit event: batch finished and the run record was written.
pub fn emit_batch_finished(
    workdir: &str,
    total: usize,
    failed_builds: usize,
    failed_runs: usize,
    skipped: usize,
    duration_ms: u64,
) {
    info!(
        event = "batch.finished",
        workdir = %workdir,
        total = total,
        failed_builds = failed_builds,
        failed_runs = failed_runs,
        skipped = skipped,
        duration_ms = duration_ms,
    );
}

/// Emit event: two run records compared.
pub fn emit_diff_completed(version_a: &str, version_b: &str, text_diffs: usize, gout_diffs: usize) {
    info!(
        event = "diff.completed",
        version_a = %version_a,
        version_b = %version_b,
        text_diffs = text_diffs,
        gout_diffs = gout_diffs,
    );
}
