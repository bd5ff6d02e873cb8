//! Resolved locations and endpoints.
//!
//! Everything hangs off a root directory (the checkout of the CI harness):
//! the package cache, the model metadata file and the run-instruction file.
//! Each item can be overridden from the environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::error::{ModelDbError, Result};

pub const DEFAULT_MODELS_URL: &str =
    "http://modeldb.science/api/v1/models?modeling_application=NEURON";
pub const DEFAULT_DOWNLOAD_URL: &str =
    "https://senselab.med.yale.edu/_site/webapi/object.json/{model_id}";
pub const DEFAULT_GITHUB_URL: &str = "https://api.github.com/repos/ModelDBRepository";

/// Placeholder substituted in [`CiConfig::download_url`].
pub const MODEL_ID_PLACEHOLDER: &str = "{model_id}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CiConfig {
    pub root_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub metadata_file: PathBuf,
    pub run_file: PathBuf,
    /// Endpoint listing all NEURON model ids.
    pub models_url: String,
    /// Object endpoint, with a `{model_id}` placeholder.
    pub download_url: String,
    /// Base of the GitHub mirror repositories.
    pub github_url: String,
}

impl CiConfig {
    /// Defaults for a given root directory.
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        let root_dir = root_dir.into();
        let modeldb_dir = root_dir.join("modeldb");
        Self {
            cache_dir: root_dir.join("cache"),
            metadata_file: modeldb_dir.join("modeldb-meta.yaml"),
            run_file: modeldb_dir.join("modeldb-run.yaml"),
            root_dir,
            models_url: DEFAULT_MODELS_URL.to_string(),
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            github_url: DEFAULT_GITHUB_URL.to_string(),
        }
    }

    /// Defaults rooted at the current directory, with environment overrides.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`CiConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let root_dir = match lookup("MODELDB_ROOT_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()?,
        };
        let mut config = Self::with_root(root_dir);

        if let Some(dir) = lookup("MODELDB_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("MODELDB_METADATA_FILE") {
            config.metadata_file = PathBuf::from(file);
        }
        if let Some(file) = lookup("MODELDB_RUN_FILE") {
            config.run_file = PathBuf::from(file);
        }
        if let Some(url) = lookup("MDB_NEURON_MODELS_URL") {
            config.models_url = url;
        }
        if let Some(url) = lookup("MDB_MODEL_DOWNLOAD_URL") {
            config.download_url = url;
        }
        if let Some(url) = lookup("MODELDB_GITHUB_URL") {
            config.github_url = url.trim_end_matches('/').to_string();
        }

        if !config.download_url.contains(MODEL_ID_PLACEHOLDER) {
            return Err(ModelDbError::Config(format!(
                "download url must contain {MODEL_ID_PLACEHOLDER}: {}",
                config.download_url
            )));
        }
        Ok(config)
    }

    pub fn model_download_url(&self, model_id: impl std::fmt::Display) -> String {
        self.download_url
            .replace(MODEL_ID_PLACEHOLDER, &model_id.to_string())
    }

    /// Cached archive of one model.
    pub fn cached_archive(&self, model_id: impl std::fmt::Display) -> PathBuf {
        self.cache_dir.join(format!("{model_id}.zip"))
    }

    /// Whether `path` is the protected root directory.
    pub fn is_root_dir(&self, path: &Path) -> bool {
        let canonical = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
        canonical(path) == canonical(&self.root_dir)
    }

    /// Items by their printable name (`config` command).
    pub fn items(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("ROOT_DIR", self.root_dir.display().to_string()),
            ("MODELS_ZIP_DIR", self.cache_dir.display().to_string()),
            ("MODELDB_METADATA_FILE", self.metadata_file.display().to_string()),
            ("MODELDB_RUN_FILE", self.run_file.display().to_string()),
            ("MDB_NEURON_MODELS_URL", self.models_url.clone()),
            ("MDB_MODEL_DOWNLOAD_URL", self.download_url.clone()),
            ("MODELDB_GITHUB_URL", self.github_url.clone()),
        ])
    }

    pub fn item(&self, name: &str) -> Option<String> {
        self.items().remove(name)
    }
}
