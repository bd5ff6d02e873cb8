//! Per-model task inputs, mutable capture state and phase errors.

use std::collections::BTreeMap;
use std::path::PathBuf;

use modeldb_core::{
    mask_model_dir, ModelDbError, ModelId, ModelIdentity, ModelOutcome, RunInfo, RunInstruction,
};

/// Immutable inputs of one model run.
#[derive(Debug, Clone)]
pub struct ModelTask {
    pub identity: ModelIdentity,
    pub instruction: RunInstruction,
    /// Batch working directory; the model gets `<workdir>/<id>`.
    pub workdir: PathBuf,
    /// Cached package archive.
    pub archive: PathBuf,
}

impl ModelTask {
    pub fn id(&self) -> ModelId {
        self.identity.id
    }

    /// Per-model extraction directory.
    pub fn task_dir(&self) -> PathBuf {
        self.workdir.join(self.identity.id.to_string())
    }
}

/// Where a task is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStage {
    Pending,
    Skipped,
    Preparing,
    DiscoveringSources,
    Building,
    Running,
    Done,
}

/// Failure of one phase of one model. Folded into the task's logs; never
/// propagates past the executor.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("package archive not found: {}", .0.display())]
    MissingArchive(PathBuf),

    #[error("invalid package archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("mod directory {} does not exist", .0.display())]
    MissingModDir(PathBuf),

    #[error(
        "multiple directories with mod files found, set model_dir in the run instructions: {}",
        join_paths(.0)
    )]
    AmbiguousModDirs(Vec<PathBuf>),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("prepared state missing: {0}")]
    NotPrepared(&'static str),

    #[error("background task failed: {0}")]
    Join(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] ModelDbError),
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Everything captured while one model is prepared, built and run.
#[derive(Debug, Clone)]
pub struct TaskState {
    pub stage: TaskStage,
    pub skipped: bool,
    pub logs: Vec<String>,
    pub nrn_run: Vec<String>,
    pub gout: Option<Vec<String>>,
    pub nrn_run_err: bool,
    pub no_mosinit_hoc: bool,
    pub run_info: RunInfo,
    pub run_times: BTreeMap<String, f64>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            stage: TaskStage::Pending,
            skipped: false,
            logs: Vec::new(),
            nrn_run: Vec::new(),
            gout: None,
            nrn_run_err: false,
            no_mosinit_hoc: false,
            run_info: RunInfo::default(),
            run_times: BTreeMap::new(),
        }
    }
}

impl TaskState {
    fn model_dir_str(&self) -> String {
        self.run_info
            .model_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }

    fn masked_lines(&self, text: &str) -> Vec<String> {
        mask_model_dir(text, &self.model_dir_str())
            .split('\n')
            .map(str::to_string)
            .collect()
    }

    /// Append text to the preparation/build log, one entry per line.
    pub fn log(&mut self, text: &str) {
        let lines = self.masked_lines(text);
        self.logs.extend(lines);
    }

    /// Append text to the simulator log, one entry per line.
    pub fn log_run(&mut self, text: &str) {
        let lines = self.masked_lines(text);
        self.nrn_run.extend(lines);
    }

    /// Record a phase failure in the build log with the build error marker.
    pub fn log_phase_error(&mut self, phase: &str, err: &PhaseError) {
        self.log(&format!("{phase} error: {err}"));
    }

    /// Sum of all recorded phases.
    pub fn total_time(&self) -> f64 {
        self.run_times.values().sum()
    }

    /// Fold into the persisted outcome. Build errors are filled in later by
    /// the orchestrator.
    pub fn into_outcome(self, include_gout: bool) -> ModelOutcome {
        let run_time = self.total_time();
        ModelOutcome {
            logs: self.logs,
            nrn_run: self.nrn_run,
            gout: if include_gout {
                Some(self.gout.unwrap_or_default())
            } else {
                None
            },
            do_not_run: self.skipped,
            moderr: None,
            nrn_run_err: self.nrn_run_err,
            no_mosinit_hoc: self.no_mosinit_hoc,
            run_info: self.run_info,
            run_time,
            run_times: self.run_times,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modeldb_core::{PHASE_BUILD, PHASE_RUN};

    #[test]
    fn test_log_masks_model_dir() {
        let mut state = TaskState::default();
        state.run_info.model_dir = Some(PathBuf::from("/w/1/pkg"));
        state.log("cd /w/1/pkg\nls /w/1/pkg/x");
        assert_eq!(state.logs, vec!["cd %model_dir%", "ls %model_dir%/x"]);
    }

    #[test]
    fn test_total_time_is_sum_of_phases() {
        let mut state = TaskState::default();
        state.run_times.insert(PHASE_BUILD.to_string(), 1.5);
        state.run_times.insert(PHASE_RUN.to_string(), 2.0);
        let outcome = state.into_outcome(false);
        assert_eq!(outcome.run_time, 3.5);
        assert!(outcome.gout.is_none());
    }

    #[test]
    fn test_phase_error_carries_marker() {
        let mut state = TaskState::default();
        state.log_phase_error(
            "sources",
            &PhaseError::AmbiguousModDirs(vec![PathBuf::from("a"), PathBuf::from("b")]),
        );
        assert!(state.logs[0].contains(" error:"));
        assert!(state.logs[0].contains("a, b"));
    }
}
