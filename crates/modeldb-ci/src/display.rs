//! Headless X display for models that open graphics windows.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::task::PhaseError;

const FIRST_DISPLAY: u32 = 99;
const LAST_DISPLAY: u32 = 199;

/// Running `Xvfb` server. The server is killed when the guard is dropped.
pub struct VirtualDisplay {
    number: u32,
    _child: Child,
}

impl VirtualDisplay {
    /// Start `Xvfb` on the first display number without a lock file.
    pub async fn start() -> Result<Self, PhaseError> {
        Self::start_with("Xvfb").await
    }

    pub async fn start_with(program: &str) -> Result<Self, PhaseError> {
        let number = free_display_number(Path::new("/tmp")).ok_or_else(|| {
            PhaseError::Io(std::io::Error::other("no free X display number"))
        })?;

        let mut child = Command::new(program)
            .arg(format!(":{number}"))
            .args(["-nolisten", "tcp"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PhaseError::Spawn {
                program: program.to_string(),
                source,
            })?;

        // Give the server a moment; an immediate exit means it could not start.
        tokio::time::sleep(Duration::from_millis(500)).await;
        if let Some(status) = child.try_wait()? {
            return Err(PhaseError::Io(std::io::Error::other(format!(
                "{program} :{number} exited early with {status}"
            ))));
        }

        info!(display = %format!(":{number}"), "virtual display started");
        Ok(Self {
            number,
            _child: child,
        })
    }

    /// Value for the `DISPLAY` variable.
    pub fn display(&self) -> String {
        format!(":{}", self.number)
    }
}

impl Drop for VirtualDisplay {
    fn drop(&mut self) {
        debug!(display = %self.display(), "stopping virtual display");
    }
}

/// First display number in range whose X lock file does not exist.
pub fn free_display_number(lock_dir: &Path) -> Option<u32> {
    (FIRST_DISPLAY..=LAST_DISPLAY).find(|n| !lock_dir.join(format!(".X{n}-lock")).exists())
}
