//! Child process execution with combined output capture.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;

use crate::task::PhaseError;

/// One child process invocation.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Space-joined command line, as written to the logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a finished child process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,

    /// Interleaved stdout and stderr bytes.
    pub output: Vec<u8>,

    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Output as UTF-8, failing on invalid bytes.
    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.output)
    }

    pub fn lossy_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Runs child processes with stdin closed and stdout/stderr merged.
pub struct ProcessRunner;

impl ProcessRunner {
    /// Run to completion. Both streams share one anonymous file so the
    /// captured text keeps the order the child wrote it in.
    pub async fn run(spec: &ProcessSpec) -> Result<ProcessOutput, PhaseError> {
        let start = Instant::now();

        let capture = tempfile::tempfile()?;
        let stdout = capture.try_clone()?;
        let stderr = capture.try_clone()?;

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PhaseError::Spawn {
                program: spec.program.display().to_string(),
                source,
            })?;

        let status = child.wait().await?;
        let duration = start.elapsed();

        let mut file = tokio::fs::File::from_std(capture);
        file.seek(SeekFrom::Start(0)).await?;
        let mut output = Vec::new();
        file.read_to_end(&mut output).await?;

        Ok(ProcessOutput {
            exit_code: status.code().unwrap_or(-1),
            output,
            duration,
        })
    }

    /// Run `/bin/sh <script>` inside `cwd`.
    pub async fn run_shell_script(cwd: &Path, script: &str) -> Result<ProcessOutput, PhaseError> {
        Self::run(&ProcessSpec::new("/bin/sh", cwd).arg(script)).await
    }
}
