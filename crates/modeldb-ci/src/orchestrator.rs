//! Run orchestrator: fan models out to a bounded worker pool and fold the
//! results into one run record.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use modeldb_core::{
    emit_batch_finished, emit_batch_started, emit_model_build_error, emit_model_finished,
    emit_model_run_error, emit_model_started, model_span, CiConfig, ModelId, ModelOutcome,
    ModelRegistry, Result, RunRecord,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use crate::executor::RunExecutor;
use crate::options::RunOptions;
use crate::runner::{ProcessRunner, ProcessSpec};
use crate::task::{ModelTask, TaskState};

/// Marker that turns a build-log line into a build error.
pub const BUILD_ERROR_MARKER: &str = " error:";

/// Version recorded when the simulator cannot be asked.
pub const UNKNOWN_VERSION: &str = "unknown";

pub struct RunOrchestrator {
    registry: Arc<ModelRegistry>,
    config: CiConfig,
    options: Arc<RunOptions>,
}

impl RunOrchestrator {
    pub fn new(registry: Arc<ModelRegistry>, config: CiConfig, options: RunOptions) -> Self {
        Self {
            registry,
            config,
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// `<workdir>.json`
    pub fn record_path(workdir: &Path) -> PathBuf {
        sibling_with_suffix(workdir, ".json")
    }

    /// `<workdir>.log`
    pub fn log_path(workdir: &Path) -> PathBuf {
        sibling_with_suffix(workdir, ".log")
    }

    /// Run the selected models (all registered ones for `None`) and persist the
    /// record next to `workdir`. Unknown ids fail before any work starts.
    pub async fn run(&self, workdir: &Path, ids: Option<&[ModelId]>) -> Result<RunRecord> {
        let selected = self.registry.select(ids)?;
        let started = Instant::now();

        if !workdir.is_dir() {
            info!(workdir = %workdir.display(), "creating working directory");
        }
        tokio::fs::create_dir_all(workdir).await?;

        let workers = self.options.workers.max(1);
        emit_batch_started(&workdir.display().to_string(), selected.len(), workers);

        let version = self.runtime_version().await;
        debug!(version = %version, "simulator version");

        let executor = Arc::new(RunExecutor::new(Arc::clone(&self.options)));
        let sem = Arc::new(Semaphore::new(workers));
        let mut join_set = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, ModelId> = HashMap::new();
        for identity in selected {
            let id = identity.id;
            let task = ModelTask {
                instruction: self.registry.instruction(id).clone(),
                workdir: workdir.to_path_buf(),
                archive: self.config.cached_archive(id),
                identity,
            };
            let executor = Arc::clone(&executor);
            let sem = Arc::clone(&sem);
            let handle = join_set.spawn(
                async move {
                    let _permit = sem.acquire_owned().await.ok();
                    emit_model_started(id, &task.identity.name);
                    let begin = Instant::now();
                    let state = executor.execute(&task).await;
                    (id, state, begin.elapsed())
                }
                .instrument(model_span(id)),
            );
            pending.insert(handle.id(), id);
        }

        let mut models = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, state, elapsed)) => {
                    let outcome = self.fold(state);
                    emit_model_finished(id, status_label(&outcome), millis(elapsed));
                    models.insert(id, outcome);
                }
                Err(e) => match pending.get(&e.id()) {
                    Some(&id) => {
                        error!(model_id = %id, error = %e, "model task did not complete");
                        let outcome = aborted_outcome(&e.to_string());
                        emit_model_finished(id, status_label(&outcome), 0);
                        models.insert(id, outcome);
                    }
                    None => error!(error = %e, "model task join error"),
                },
            }
        }

        info!("grepping all models for build errors and dumping run errors");
        for (id, outcome) in &models {
            if let Some(lines) = &outcome.moderr {
                emit_model_build_error(*id, lines);
            }
            if outcome.nrn_run_err {
                emit_model_run_error(*id, &outcome.nrn_run);
            }
        }

        let record = RunRecord::new(version, models);
        let record_path = Self::record_path(workdir);
        info!(path = %record_path.display(), "dumping run logs");
        record.save(&record_path)?;

        let stats = record.stats();
        emit_batch_finished(
            &workdir.display().to_string(),
            stats.total_models,
            stats.failed_models.count,
            stats.failed_runs.count,
            stats.skipped_runs.count,
            millis(started.elapsed()),
        );
        Ok(record)
    }

    fn fold(&self, state: TaskState) -> ModelOutcome {
        let mut outcome = state.into_outcome(self.options.gout);
        let errors = grep_build_errors(&outcome.logs);
        if !errors.is_empty() {
            outcome.moderr = Some(errors);
        }
        outcome
    }

    /// Version override, else the first line of `nrniv --version`.
    pub async fn runtime_version(&self) -> String {
        if let Some(version) = &self.options.runtime_version {
            return version.clone();
        }
        let spec = ProcessSpec::new(&self.options.simulator.nrniv, ".").arg("--version");
        match ProcessRunner::run(&spec).await {
            Ok(output) if output.success() => parse_version(&output.lossy_text())
                .unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
            Ok(output) => {
                warn!(exit_code = output.exit_code, "simulator version query failed");
                UNKNOWN_VERSION.to_string()
            }
            Err(e) => {
                warn!(error = %e, "simulator version query failed");
                UNKNOWN_VERSION.to_string()
            }
        }
    }
}

/// Outcome for a model whose task panicked or was cancelled, counted as a
/// failed run.
fn aborted_outcome(reason: &str) -> ModelOutcome {
    ModelOutcome {
        nrn_run: vec![format!("run error: model task did not complete: {reason}")],
        nrn_run_err: true,
        ..Default::default()
    }
}

/// Build-log lines carrying [`BUILD_ERROR_MARKER`].
pub fn grep_build_errors(logs: &[String]) -> Vec<String> {
    logs.iter()
        .filter(|line| line.contains(BUILD_ERROR_MARKER))
        .cloned()
        .collect()
}

/// `NEURON -- VERSION 8.2.2 HEAD (...)` yields `8.2.2`; anything else yields
/// its first non-empty line.
fn parse_version(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut words = line.split_whitespace();
    while let Some(word) = words.next() {
        if word == "VERSION" {
            if let Some(version) = words.next() {
                return Some(version.to_string());
            }
        }
    }
    Some(line.to_string())
}

fn status_label(outcome: &ModelOutcome) -> &'static str {
    use modeldb_core::ModelStatus;
    match outcome.status() {
        ModelStatus::Skipped => "skipped",
        ModelStatus::BuildFailed => "build_failed",
        ModelStatus::RunFailed => "run_failed",
        ModelStatus::NoEntryPoint => "no_entry_point",
        ModelStatus::Passed => "passed",
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let trimmed = path.components().as_path();
    let mut name = OsString::from(trimmed.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
