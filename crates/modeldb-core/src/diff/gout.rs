//! Graphical-output (`gout`) comparison.
//!
//! Two flavours: a bounded-time external diff of one model's artifact pair,
//! used by the report differencing engine, and a whole-tree comparison of two
//! run directories.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::diff::text::cap_lines;
use crate::domain::error::Result;

/// File name of the graphical-output artifact.
pub const GOUT_FILE: &str = "gout";

/// External diff of two artifact files.
///
/// A missing file on either side is treated as empty (`diff -N`). The child is
/// killed when `timeout` elapses and a placeholder is returned instead.
pub async fn diff_gout_files(
    diff_tool: &str,
    a: &Path,
    b: &Path,
    timeout: Duration,
    max_lines: usize,
) -> String {
    let argv = vec![
        diff_tool.to_string(),
        "-uN".to_string(),
        "--speed-large-files".to_string(),
        a.display().to_string(),
        b.display().to_string(),
    ];

    let child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();
    let child = match child {
        Ok(child) => child,
        Err(e) => {
            warn!(tool = %diff_tool, error = %e, "failed to start gout diff");
            return format!("{argv:?} could not be started: {e}");
        }
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let text = String::from_utf8_lossy(&output.stdout);
            cap_lines(&text, max_lines)
        }
        Ok(Err(e)) => format!("{argv:?} failed: {e}"),
        Err(_) => {
            debug!(a = %a.display(), b = %b.display(), "gout diff timed out");
            format!(
                "{argv:?} did not complete in {} seconds, killing it",
                timeout.as_secs()
            )
        }
    }
}

/// Outcome of comparing the `gout` files of two run directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoutTreeComparison {
    pub only_in_first: Vec<PathBuf>,
    pub only_in_second: Vec<PathBuf>,
    pub differing: Vec<PathBuf>,
}

impl GoutTreeComparison {
    pub fn is_identical(&self) -> bool {
        self.only_in_first.is_empty() && self.only_in_second.is_empty() && self.differing.is_empty()
    }
}

/// Compare every `gout` file under two directories by relative path and bytes.
pub fn compare_gout_trees(first: &Path, second: &Path) -> Result<GoutTreeComparison> {
    let files_a = collect_gout_files(first)?;
    let files_b = collect_gout_files(second)?;

    let mut comparison = GoutTreeComparison {
        only_in_first: files_a.difference(&files_b).cloned().collect(),
        only_in_second: files_b.difference(&files_a).cloned().collect(),
        differing: Vec::new(),
    };
    for rel in files_a.intersection(&files_b) {
        if std::fs::read(first.join(rel))? != std::fs::read(second.join(rel))? {
            comparison.differing.push(rel.clone());
        }
    }
    Ok(comparison)
}

fn collect_gout_files(root: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut found = BTreeSet::new();
    walk(root, root, &mut found)?;
    Ok(found)
}

fn walk(root: &Path, dir: &Path, found: &mut BTreeSet<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, found)?;
        } else if file_type.is_file() && entry.file_name() == GOUT_FILE {
            if let Ok(rel) = path.strip_prefix(root) {
                found.insert(rel.to_path_buf());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_compare_gout_trees() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        write(a.path(), "100/model/gout", "same");
        write(b.path(), "100/model/gout", "same");
        write(a.path(), "200/gout", "one");
        write(b.path(), "200/gout", "two");
        write(a.path(), "300/gout", "x");
        write(b.path(), "400/x/gout", "y");
        write(b.path(), "400/x/not-gout", "ignored");

        let cmp = compare_gout_trees(a.path(), b.path()).unwrap();
        assert_eq!(cmp.only_in_first, vec![PathBuf::from("300/gout")]);
        assert_eq!(cmp.only_in_second, vec![PathBuf::from("400/x/gout")]);
        assert_eq!(cmp.differing, vec![PathBuf::from("200/gout")]);
        assert!(!cmp.is_identical());
    }

    #[test]
    fn test_identical_trees() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        write(a.path(), "1/gout", "g");
        write(b.path(), "1/gout", "g");
        assert!(compare_gout_trees(a.path(), b.path()).unwrap().is_identical());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_diff_gout_files_timeout_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("slowdiff");
        std::fs::write(&tool, "#!/bin/sh\nsleep 5\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let out = diff_gout_files(
            tool.to_str().unwrap(),
            &dir.path().join("a"),
            &dir.path().join("b"),
            Duration::from_millis(200),
            30,
        )
        .await;
        assert!(out.contains("did not complete in 0 seconds, killing it"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_diff_gout_files_missing_side_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("gout_a");
        std::fs::write(&a, "line1\nline2\n").unwrap();

        let out = diff_gout_files(
            "diff",
            &a,
            &dir.path().join("missing"),
            Duration::from_secs(2),
            30,
        )
        .await;
        assert!(out.contains("-line1"));
    }
}
