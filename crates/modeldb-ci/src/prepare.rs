//! Task preparation: extract the package, write drivers, resolve the entry point.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use modeldb_core::{ModelSpan, RunCommands, RunInfo};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::hoc::{
    driver_hoc, python_runfile, DRIVER_FILE, MOSINIT_FILE, PYTHON_RUN_FILE, QUIT_FILE, QUIT_HOC,
    SCRIPT_FILE,
};
use crate::options::RunOptions;
use crate::runner::ProcessRunner;
use crate::task::{ModelTask, PhaseError, TaskState};

/// Resolution persisted next to the extracted package for in-place reruns.
pub const PREPARED_STATE_FILE: &str = "run_info.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedState {
    #[serde(flatten)]
    pub run_info: RunInfo,

    /// Version timestamp of the package this preparation came from.
    pub ver_date: String,

    #[serde(default)]
    pub no_mosinit_hoc: bool,
}

/// Outcome of [`prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preparation {
    Fresh,
    Reused,
}

/// Materialize one model under `<workdir>/<id>` and fill in `state.run_info`.
pub async fn prepare(
    task: &ModelTask,
    options: &RunOptions,
    state: &mut TaskState,
) -> Result<Preparation, PhaseError> {
    let task_dir = task.task_dir();

    if options.inplace {
        if let Some(prior) = load_prepared(&task_dir) {
            if prior.ver_date == task.identity.ver_date {
                debug!(dir = %task_dir.display(), "reusing prepared model");
                state.run_info = prior.run_info;
                state.no_mosinit_hoc = prior.no_mosinit_hoc;
                log_do_not_run(task, state);
                return Ok(Preparation::Reused);
            }
            warn!(
                dir = %task_dir.display(),
                "prepared model is from another version, preparing again"
            );
        }
    }

    let model_dir = extract(task.id(), task.archive.clone(), task_dir.clone()).await?;
    state.run_info.model_dir = Some(model_dir.clone());

    let commands = match task.instruction.run_commands() {
        RunCommands::Commands(commands) => commands,
        RunCommands::DoNotRun => Vec::new(),
    };
    let driver = model_dir.join(DRIVER_FILE);
    write_file(&driver, &driver_hoc(&model_dir.display().to_string(), &commands))?;
    state.run_info.driver = Some(driver);

    if let Some(lines) = &task.instruction.script {
        write_file(&model_dir.join(SCRIPT_FILE), &lines.join("\n"))?;
        let output = ProcessRunner::run_shell_script(&model_dir, SCRIPT_FILE).await?;
        state.log(&output.lossy_text());
        if !output.success() {
            warn!(exit_code = output.exit_code, "pre-run script failed");
        }
        state.run_info.script = Some(lines.clone());
    }

    if task.instruction.is_do_not_run() {
        write_quit_hoc(&model_dir, state)?;
    } else if task.instruction.python {
        write_file(&model_dir.join(PYTHON_RUN_FILE), &python_runfile(&commands))?;
        state.run_info.start_dir = Some(model_dir.clone());
        state.run_info.init = Some(PathBuf::from(PYTHON_RUN_FILE));
        state.run_info.driver = None;
    } else {
        let root = model_dir.clone();
        match run_blocking(move || select_mosinit(&root)).await? {
            Some(mosinit) => {
                let start_dir = if task.instruction.mod_dirs().is_some() {
                    model_dir.clone()
                } else {
                    mosinit.parent().map(Path::to_path_buf).unwrap_or_else(|| model_dir.clone())
                };
                state.run_info.start_dir = Some(start_dir);
                state.run_info.init = Some(mosinit);
            }
            None => {
                write_quit_hoc(&model_dir, state)?;
                state.no_mosinit_hoc = true;
            }
        }
    }

    log_do_not_run(task, state);

    save_prepared(
        &task_dir,
        &PreparedState {
            run_info: state.run_info.clone(),
            ver_date: task.identity.ver_date.clone(),
            no_mosinit_hoc: state.no_mosinit_hoc,
        },
    )?;
    Ok(Preparation::Fresh)
}

fn log_do_not_run(task: &ModelTask, state: &mut TaskState) {
    if task.instruction.is_do_not_run() {
        state.log(&format!(
            "Model in do not run mode according to modeldb-run.yaml:\n\t{}\n",
            task.instruction.comment_or_default()
        ));
    }
}

fn write_quit_hoc(model_dir: &Path, state: &mut TaskState) -> Result<(), PhaseError> {
    let quit = model_dir.join(QUIT_FILE);
    write_file(&quit, QUIT_HOC)?;
    state.run_info.start_dir = Some(model_dir.to_path_buf());
    state.run_info.init = Some(quit);
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<(), PhaseError> {
    fs::write(path, contents)?;
    Ok(())
}

/// Run a filesystem walk on the blocking pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, PhaseError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PhaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PhaseError::Join(e.to_string()))?
}

/// Extract on the blocking pool; returns the package root.
async fn extract(
    id: modeldb_core::ModelId,
    archive: PathBuf,
    task_dir: PathBuf,
) -> Result<PathBuf, PhaseError> {
    run_blocking(move || {
        let _span = ModelSpan::enter(id);
        extract_archive(&archive, &task_dir)
    })
    .await
}

/// Replace `task_dir` with the archive contents. A single top-level directory
/// in the archive is the package root; otherwise `task_dir` itself is.
pub fn extract_archive(archive: &Path, task_dir: &Path) -> Result<PathBuf, PhaseError> {
    if !archive.is_file() {
        return Err(PhaseError::MissingArchive(archive.to_path_buf()));
    }
    if task_dir.exists() {
        debug!(dir = %task_dir.display(), "removing previous extraction");
        fs::remove_dir_all(task_dir)?;
    }
    fs::create_dir_all(task_dir)?;

    let file = fs::File::open(archive)?;
    let zip_err = |source: zip::result::ZipError| PhaseError::Archive {
        path: archive.to_path_buf(),
        source,
    };
    let mut zip = zip::ZipArchive::new(file).map_err(zip_err)?;
    zip.extract(task_dir).map_err(zip_err)?;

    let entries = fs::read_dir(task_dir)?.collect::<std::io::Result<Vec<_>>>()?;
    match entries.as_slice() {
        [only] if only.file_type()?.is_dir() => Ok(only.path()),
        _ => Ok(task_dir.to_path_buf()),
    }
}

/// Shallowest `mosinit.hoc` under `model_dir`, ties broken lexicographically.
pub fn select_mosinit(model_dir: &Path) -> Result<Option<PathBuf>, PhaseError> {
    let found = collect_files(model_dir, None)?
        .into_iter()
        .filter(|p| p.file_name().is_some_and(|n| n == MOSINIT_FILE))
        .min_by(|a, b| {
            let depth = |p: &Path| p.components().count();
            depth(a).cmp(&depth(b)).then_with(|| a.cmp(b))
        });
    Ok(found)
}

/// All regular files below `root`, sorted. Directories named `skip_dir` are
/// not descended into.
pub fn collect_files(root: &Path, skip_dir: Option<&str>) -> Result<Vec<PathBuf>, PhaseError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if skip_dir.is_some_and(|skip| entry.file_name() == skip) {
                    continue;
                }
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn load_prepared(task_dir: &Path) -> Option<PreparedState> {
    let raw = fs::read_to_string(task_dir.join(PREPARED_STATE_FILE)).ok()?;
    match serde_json::from_str(&raw) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "ignoring unreadable prepared state");
            None
        }
    }
}

fn save_prepared(task_dir: &Path, prepared: &PreparedState) -> Result<(), PhaseError> {
    let json = serde_json::to_string_pretty(prepared)
        .map_err(|e| PhaseError::Io(std::io::Error::other(e)))?;
    let mut tmp = NamedTempFile::new_in(task_dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.persist(task_dir.join(PREPARED_STATE_FILE))
        .map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_mosinit_prefers_shallowest() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/deep")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::create_dir_all(root.join("c")).unwrap();
        fs::write(root.join("b/deep/mosinit.hoc"), "").unwrap();
        fs::write(root.join("c/mosinit.hoc"), "").unwrap();
        fs::write(root.join("a/mosinit.hoc"), "").unwrap();

        let found = select_mosinit(root).unwrap().unwrap();
        assert_eq!(found, root.join("a/mosinit.hoc"));
    }

    #[test]
    fn test_select_mosinit_absent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("init.hoc"), "").unwrap();
        assert!(select_mosinit(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_collect_files_skips_build_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("x86_64")).unwrap();
        fs::write(dir.path().join("x86_64/hh.mod"), "").unwrap();
        fs::write(dir.path().join("na.mod"), "").unwrap();
        let files = collect_files(dir.path(), Some("x86_64")).unwrap();
        assert_eq!(files, vec![dir.path().join("na.mod")]);
    }

    #[test]
    fn test_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_archive(&dir.path().join("1.zip"), &dir.path().join("1")).unwrap_err();
        assert!(matches!(err, PhaseError::MissingArchive(_)));
    }

    #[test]
    fn test_prepared_state_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let prepared = PreparedState {
            run_info: RunInfo {
                model_dir: Some(dir.path().join("pkg")),
                ..Default::default()
            },
            ver_date: "2020-02-02".to_string(),
            no_mosinit_hoc: true,
        };
        save_prepared(dir.path(), &prepared).unwrap();
        assert_eq!(load_prepared(dir.path()), Some(prepared));
    }
}
