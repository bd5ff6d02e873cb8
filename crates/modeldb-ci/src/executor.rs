//! Run executor: prepare, discover sources, build and run one model.
//!
//! [`RunExecutor::execute`] never fails. Every problem ends up as a log line
//! in the task state plus, where it applies, the run failure flag.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modeldb_core::{PHASE_BUILD, PHASE_RUN};
use tracing::{debug, info, warn};

use crate::options::RunOptions;
use crate::prepare::{collect_files, prepare, run_blocking};
use crate::runner::{ProcessRunner, ProcessSpec};
use crate::task::{ModelTask, PhaseError, TaskStage, TaskState};

const MOD_EXTENSION: &str = "mod";

/// Extension sources selected for one model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSet {
    pub dir: Option<PathBuf>,
    pub files: Vec<PathBuf>,
}

impl SourceSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

pub struct RunExecutor {
    options: Arc<RunOptions>,
}

impl RunExecutor {
    pub fn new(options: Arc<RunOptions>) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Drive one model through its pipeline and return what was captured.
    pub async fn execute(&self, task: &ModelTask) -> TaskState {
        let mut state = TaskState::default();

        if task.instruction.skip {
            state.stage = TaskStage::Skipped;
            state.skipped = true;
            state.log(&format!(
                "Model is skipped according to modeldb-run.yaml:\n\t{}\n",
                task.instruction.comment_or_default()
            ));
            return state;
        }

        state.stage = TaskStage::Preparing;
        if let Err(e) = prepare(task, &self.options, &mut state).await {
            warn!(error = %e, "preparation failed");
            state.log_phase_error("prepare", &e);
            state.stage = TaskStage::Done;
            return state;
        }

        state.stage = TaskStage::DiscoveringSources;
        let sources = match self.discover_sources(task, &mut state).await {
            Ok(sources) => sources,
            Err(e) => {
                warn!(error = %e, "source discovery failed");
                state.log_phase_error("sources", &e);
                state.stage = TaskStage::Done;
                return state;
            }
        };

        if !sources.is_empty() {
            state.stage = TaskStage::Building;
            if let Err(e) = self.build(&sources, &mut state).await {
                warn!(error = %e, "build failed");
                state.log_phase_error("build", &e);
            }
        }

        if self.options.norun {
            state.log("norun requested: model build only, simulator not started");
            state.stage = TaskStage::Done;
            return state;
        }

        state.stage = TaskStage::Running;
        if let Err(e) = self.run(task, !sources.is_empty(), &mut state).await {
            warn!(error = %e, "run failed");
            state.log_run(&format!("run error: {e}"));
            state.nrn_run_err = true;
        }

        if self.options.gout {
            state.gout = read_gout(&state).await;
        }

        state.stage = TaskStage::Done;
        state
    }

    /// Explicit directories from the run instruction, or a walk of the start
    /// directory that must find at most one directory with sources.
    pub async fn discover_sources(
        &self,
        task: &ModelTask,
        state: &mut TaskState,
    ) -> Result<SourceSet, PhaseError> {
        let model_dir = state
            .run_info
            .model_dir
            .clone()
            .ok_or(PhaseError::NotPrepared("model_dir"))?;

        if let Some(dirs) = task.instruction.mod_dirs() {
            let dirs: Vec<PathBuf> = dirs.into_iter().map(|dir| model_dir.join(dir)).collect();
            let sources = run_blocking(move || {
                let mut sources = SourceSet::default();
                for dir in dirs {
                    if !dir.is_dir() {
                        return Err(PhaseError::MissingModDir(dir));
                    }
                    sources.files.extend(mod_files_in(&dir)?);
                    sources.dir.get_or_insert(dir);
                }
                Ok(sources)
            })
            .await?;
            state.run_info.mod_dir = sources.dir.clone();
            return Ok(sources);
        }

        let start_dir = state
            .run_info
            .start_dir
            .clone()
            .ok_or(PhaseError::NotPrepared("start_dir"))?;
        let skip = self
            .options
            .simulator
            .build_dir()
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);
        let files = run_blocking(move || collect_files(&start_dir, skip.as_deref())).await?;

        let mut by_dir: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for file in files {
            if !is_mod_file(&file) {
                continue;
            }
            if let Some(parent) = file.parent() {
                by_dir.entry(parent.to_path_buf()).or_default().push(file);
            }
        }

        if by_dir.len() > 1 {
            return Err(PhaseError::AmbiguousModDirs(by_dir.into_keys().collect()));
        }
        match by_dir.pop_first() {
            Some((dir, files)) => {
                state.log(&format!("mod files found in {}", dir.display()));
                state.run_info.mod_dir = Some(dir.clone());
                Ok(SourceSet {
                    dir: Some(dir),
                    files,
                })
            }
            None => {
                state.log("no directory found with mod files");
                Ok(SourceSet::default())
            }
        }
    }

    /// Rebuild from scratch in the start directory.
    async fn build(&self, sources: &SourceSet, state: &mut TaskState) -> Result<(), PhaseError> {
        let start_dir = state
            .run_info
            .start_dir
            .clone()
            .ok_or(PhaseError::NotPrepared("start_dir"))?;
        let simulator = &self.options.simulator;

        let build_dir = start_dir.join(simulator.build_dir());
        if build_dir.exists() {
            debug!(dir = %build_dir.display(), "removing previous build");
            tokio::fs::remove_dir_all(&build_dir).await?;
        }

        let spec = self.with_env(
            ProcessSpec::new(&simulator.nrnivmodl, &start_dir)
                .args(sources.files.iter().map(|f| f.display().to_string())),
        );
        let output = ProcessRunner::run(&spec).await?;
        state.log(&output.lossy_text());
        state
            .run_times
            .insert(PHASE_BUILD.to_string(), output.duration.as_secs_f64());

        if !output.success() {
            state.log(&format!(
                "build error: {} exited with status {}",
                simulator.nrnivmodl.display(),
                output.exit_code
            ));
        }
        Ok(())
    }

    async fn run(
        &self,
        task: &ModelTask,
        built: bool,
        state: &mut TaskState,
    ) -> Result<(), PhaseError> {
        let start_dir = state
            .run_info
            .start_dir
            .clone()
            .ok_or(PhaseError::NotPrepared("start_dir"))?;
        let init = state
            .run_info
            .init
            .clone()
            .ok_or(PhaseError::NotPrepared("init"))?;
        let simulator = &self.options.simulator;

        let mut args = vec!["-nobanner".to_string()];
        if let Some(nstack) = task.instruction.nstack {
            args.push("-NSTACK".to_string());
            args.push(nstack.to_string());
        }
        if task.instruction.python {
            args.push("-python".to_string());
        }
        args.push(init.display().to_string());
        if let Some(driver) = &state.run_info.driver {
            args.push(driver.display().to_string());
        }

        let (shown, program) = if built {
            (simulator.special.clone(), start_dir.join(&simulator.special))
        } else {
            (simulator.nrniv.clone(), simulator.nrniv.clone())
        };
        let spec = self.with_env(ProcessSpec::new(program, &start_dir).args(args));
        let shown = ProcessSpec {
            program: shown,
            ..spec.clone()
        };
        state.log_run(&format!("RUNNING -> {}", shown.command_line()));

        let output = ProcessRunner::run(&spec).await?;
        state
            .run_times
            .insert(PHASE_RUN.to_string(), output.duration.as_secs_f64());

        match output.text() {
            Ok(text) => state.log_run(text),
            Err(e) => {
                state.log_run(&format!("decode error: simulator output is not valid UTF-8: {e}"));
                state.log_run(&output.lossy_text());
                state.nrn_run_err = true;
            }
        }

        if !output.success() {
            if task.instruction.ignore_exit_code {
                info!(exit_code = output.exit_code, "ignoring simulator exit code");
            } else {
                state.nrn_run_err = true;
            }
        }
        Ok(())
    }

    fn with_env(&self, mut spec: ProcessSpec) -> ProcessSpec {
        spec = spec.env("MAKEFLAGS", self.options.makeflags());
        if let Some(display) = &self.options.display {
            spec = spec.env("DISPLAY", display);
        }
        spec
    }
}

fn is_mod_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == MOD_EXTENSION)
}

fn mod_files_in(dir: &Path) -> Result<Vec<PathBuf>, PhaseError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_mod_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Graph dump written by the driver into the package root, if any. Invalid
/// UTF-8 is kept lossily so a corrupt dump still shows up in the comparison.
async fn read_gout(state: &TaskState) -> Option<Vec<String>> {
    let path = state
        .run_info
        .model_dir
        .as_ref()?
        .join(modeldb_core::GOUT_FILE);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read gout");
            return None;
        }
    };
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), "gout is not valid UTF-8");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };
    Some(text.lines().map(str::to_string).collect())
}
