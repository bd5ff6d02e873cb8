//! Per-model run instructions (`modeldb-run.yaml`).
//!
//! Most models run with the defaults. An instruction record overrides how a
//! single model is fetched, built, run and curated. Absence of a record, or of
//! any field in it, must always fall back to the safe default.

use serde::de::{Deserializer, IgnoredAny};
use serde::{Deserialize, Serialize};

/// Default run command for script-style (HOC) models: dump all graphs to `gout`.
pub const DEFAULT_HOC_RUN: &str = "verify_graph_()";

/// Default run command for python-style models.
pub const DEFAULT_PYTHON_RUN: &str = "python mosinit.py";

/// Where the model package should come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GithubSource {
    /// Default branch of the model's GitHub mirror.
    DefaultBranch,
    /// Head of a pull request against the mirror.
    PullRequest(u64),
    /// Any other named branch, tag or commit.
    Ref(String),
}

impl GithubSource {
    /// Parse the value of the `github` key.
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.is_empty() {
            return Err("empty github source".to_string());
        }
        if value == "default" {
            return Ok(Self::DefaultBranch);
        }
        if let Some(number) = value.strip_prefix("pull/") {
            return number
                .parse::<u64>()
                .map(Self::PullRequest)
                .map_err(|_| format!("invalid pull request reference: {value}"));
        }
        Ok(Self::Ref(value.to_string()))
    }

    /// Path suffix appended to the zipball endpoint of the GitHub API.
    pub fn zipball_suffix(&self) -> String {
        match self {
            Self::DefaultBranch => String::new(),
            Self::PullRequest(number) => format!("/pull/{number}/head"),
            Self::Ref(name) => format!("/{name}"),
        }
    }
}

impl Serialize for GithubSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::DefaultBranch => serializer.serialize_str("default"),
            Self::PullRequest(number) => serializer.serialize_str(&format!("pull/{number}")),
            Self::Ref(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for GithubSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A model-specific curation rule applied to captured simulator output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurationPattern {
    pub pattern: String,
    #[serde(default)]
    pub repl: String,
}

/// Resolved run commands of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunCommands {
    /// Explicit command list (or the style default when none were configured).
    Commands(Vec<String>),
    /// `run: null` - the model must not be run.
    DoNotRun,
}

/// Run-instruction override record for one model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInstruction {
    /// Fetch the package from the GitHub mirror instead of ModelDB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubSource>,

    /// Semicolon-separated mod-file directories, relative to the package root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<String>,

    /// `None`: key absent (default commands). `Some(None)`: `run: null`.
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub run: Option<Option<Vec<String>>>,

    /// Shell lines executed before the simulator starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<Vec<String>>,

    #[serde(default, deserialize_with = "presence_flag", skip_serializing_if = "is_false")]
    pub skip: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default, deserialize_with = "presence_flag", skip_serializing_if = "is_false")]
    pub ignore_exit_code: bool,

    #[serde(default, deserialize_with = "presence_flag", skip_serializing_if = "is_false")]
    pub python: bool,

    #[serde(default, alias = "NSTACK", skip_serializing_if = "Option::is_none")]
    pub nstack: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub curate_patterns: Vec<CurationPattern>,
}

impl RunInstruction {
    /// Run commands with the style default applied.
    pub fn run_commands(&self) -> RunCommands {
        match &self.run {
            Some(None) => RunCommands::DoNotRun,
            Some(Some(commands)) => RunCommands::Commands(commands.clone()),
            None if self.python => RunCommands::Commands(vec![DEFAULT_PYTHON_RUN.to_string()]),
            None => RunCommands::Commands(vec![DEFAULT_HOC_RUN.to_string()]),
        }
    }

    pub fn is_do_not_run(&self) -> bool {
        matches!(self.run, Some(None))
    }

    /// Explicit mod directories, in declaration order.
    pub fn mod_dirs(&self) -> Option<Vec<String>> {
        self.model_dir.as_ref().map(|dirs| {
            dirs.split(';')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    pub fn comment_or_default(&self) -> &str {
        self.comment.as_deref().unwrap_or("")
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Distinguish `run: null` from a missing `run` key.
fn explicit_null<'de, D>(deserializer: D) -> Result<Option<Option<Vec<String>>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<String>>::deserialize(deserializer).map(Some)
}

/// A flag is set when its key is present with any value other than `false`.
fn presence_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Present(IgnoredAny),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Present(_) => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_run_defaults_to_graph_dump() {
        let instr = RunInstruction::default();
        assert_eq!(
            instr.run_commands(),
            RunCommands::Commands(vec![DEFAULT_HOC_RUN.to_string()])
        );
    }

    #[test]
    fn test_python_models_default_to_mosinit_py() {
        let instr: RunInstruction = serde_yaml::from_str("python: true").unwrap();
        assert!(instr.python);
        assert_eq!(
            instr.run_commands(),
            RunCommands::Commands(vec![DEFAULT_PYTHON_RUN.to_string()])
        );
    }

    #[test]
    fn test_run_null_means_do_not_run() {
        let instr: RunInstruction =
            serde_yaml::from_str("run: null\ncomment: needs a GUI").unwrap();
        assert!(instr.is_do_not_run());
        assert_eq!(instr.run_commands(), RunCommands::DoNotRun);
        assert_eq!(instr.comment_or_default(), "needs a GUI");
    }

    #[test]
    fn test_explicit_run_commands_kept_in_order() {
        let instr: RunInstruction =
            serde_yaml::from_str("run:\n  - run()\n  - verify_graph_()\n").unwrap();
        assert_eq!(
            instr.run_commands(),
            RunCommands::Commands(vec!["run()".to_string(), "verify_graph_()".to_string()])
        );
    }

    #[test]
    fn test_presence_flags() {
        let instr: RunInstruction =
            serde_yaml::from_str("skip: broken upstream\nignore_exit_code:\npython: false").unwrap();
        assert!(instr.skip);
        assert!(instr.ignore_exit_code);
        assert!(!instr.python);
    }

    #[test]
    fn test_mod_dirs_split_on_semicolons() {
        let instr = RunInstruction {
            model_dir: Some("mechanisms; lib/mod;".to_string()),
            ..Default::default()
        };
        assert_eq!(
            instr.mod_dirs(),
            Some(vec!["mechanisms".to_string(), "lib/mod".to_string()])
        );
    }

    #[test]
    fn test_nstack_alias() {
        let instr: RunInstruction = serde_yaml::from_str("NSTACK: 100000").unwrap();
        assert_eq!(instr.nstack, Some(100000));
    }

    #[test]
    fn test_github_source_parsing() {
        assert_eq!(GithubSource::parse("default").unwrap(), GithubSource::DefaultBranch);
        assert_eq!(GithubSource::parse("pull/7").unwrap(), GithubSource::PullRequest(7));
        assert_eq!(
            GithubSource::parse("fix-units").unwrap(),
            GithubSource::Ref("fix-units".to_string())
        );
        assert!(GithubSource::parse("pull/seven").is_err());
        assert_eq!(GithubSource::PullRequest(7).zipball_suffix(), "/pull/7/head");
        assert_eq!(GithubSource::DefaultBranch.zipball_suffix(), "");
    }

    #[test]
    fn test_curate_patterns_parsed() {
        let yaml = "curate_patterns:\n  - pattern: 'seed [0-9]+'\n    repl: 'seed %seed%'\n";
        let instr: RunInstruction = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(instr.curate_patterns.len(), 1);
        assert_eq!(instr.curate_patterns[0].repl, "seed %seed%");
    }
}
