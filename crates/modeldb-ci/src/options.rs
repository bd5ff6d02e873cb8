//! Run options and pre-flight validation.

use std::path::{Path, PathBuf};

use modeldb_core::{CiConfig, ModelDbError, Result};
use serde::{Deserialize, Serialize};

/// Simulator and build-tool executables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Generic simulator binary.
    pub nrniv: PathBuf,

    /// Mod-file build tool.
    pub nrnivmodl: PathBuf,

    /// Specialized binary produced by the build, relative to the start directory.
    pub special: PathBuf,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            nrniv: PathBuf::from("nrniv"),
            nrnivmodl: PathBuf::from("nrnivmodl"),
            special: PathBuf::from("./x86_64/special"),
        }
    }
}

impl SimulatorConfig {
    /// Directory holding build output, relative to the start directory.
    pub fn build_dir(&self) -> PathBuf {
        self.special
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("x86_64"))
    }
}

/// Options of one orchestrator invocation. Every field is always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Remove a model's directory before extracting it again.
    pub clean: bool,

    /// Reuse a previous preparation of the same model version.
    pub inplace: bool,

    /// Build only; do not start the simulator.
    pub norun: bool,

    /// Keep graphical output in the run record.
    pub gout: bool,

    /// Concurrent model workers.
    pub workers: usize,

    /// Parallel jobs of one build (`MAKEFLAGS=-j<n>`).
    pub build_jobs: usize,

    /// `DISPLAY` handed to child processes.
    pub display: Option<String>,

    /// Version string recorded instead of asking the simulator.
    pub runtime_version: Option<String>,

    pub simulator: SimulatorConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            clean: false,
            inplace: false,
            norun: false,
            gout: false,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            build_jobs: 1,
            display: None,
            runtime_version: None,
            simulator: SimulatorConfig::default(),
        }
    }
}

impl RunOptions {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_simulator(mut self, simulator: SimulatorConfig) -> Self {
        self.simulator = simulator;
        self
    }

    pub fn makeflags(&self) -> String {
        format!("-j{}", self.build_jobs.max(1))
    }

    /// Refuse to start a batch that would clobber or mix results.
    pub fn validate(&self, workdir: &Path, config: &CiConfig) -> Result<()> {
        if config.is_root_dir(workdir) {
            return Err(ModelDbError::Config(format!(
                "cannot run models directly into ROOT_DIR -> {}",
                config.root_dir.display()
            )));
        }
        if self.clean && self.inplace {
            return Err(ModelDbError::ConflictingOptions(
                "--clean and --inplace are mutually exclusive".to_string(),
            ));
        }
        if !(self.clean || self.inplace) && is_dir_non_empty(workdir) {
            return Err(ModelDbError::Config(format!(
                "working directory {} exists and is non empty; re-run with --clean to \
                 overwrite model runs or --inplace to re-run them in place",
                workdir.display()
            )));
        }
        Ok(())
    }
}

/// `true` if `dir` exists and has at least one entry.
pub fn is_dir_non_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, CiConfig) {
        let root = tempfile::tempdir().unwrap();
        let config = CiConfig::with_root(root.path());
        (root, config)
    }

    #[test]
    fn test_clean_and_inplace_conflict() {
        let (root, config) = setup();
        let options = RunOptions {
            clean: true,
            inplace: true,
            ..Default::default()
        };
        let err = options.validate(&root.path().join("work"), &config).unwrap_err();
        assert!(matches!(err, ModelDbError::ConflictingOptions(_)));
    }

    #[test]
    fn test_root_dir_rejected() {
        let (root, config) = setup();
        let err = RunOptions::default()
            .validate(root.path(), &config)
            .unwrap_err();
        assert!(err.to_string().contains("ROOT_DIR"));
    }

    #[test]
    fn test_non_empty_workdir_needs_override() {
        let (root, config) = setup();
        let work = root.path().join("work");
        std::fs::create_dir_all(work.join("3264")).unwrap();

        assert!(RunOptions::default().validate(&work, &config).is_err());
        let clean = RunOptions {
            clean: true,
            ..Default::default()
        };
        assert!(clean.validate(&work, &config).is_ok());
        let inplace = RunOptions {
            inplace: true,
            ..Default::default()
        };
        assert!(inplace.validate(&work, &config).is_ok());
    }

    #[test]
    fn test_missing_workdir_is_fine() {
        let (root, config) = setup();
        assert!(RunOptions::default()
            .validate(&root.path().join("fresh"), &config)
            .is_ok());
    }

    #[test]
    fn test_defaults() {
        let options = RunOptions::default();
        assert_eq!(options.makeflags(), "-j1");
        assert!(options.workers >= 1);
        assert_eq!(options.simulator.build_dir(), PathBuf::from("./x86_64"));
    }
}
