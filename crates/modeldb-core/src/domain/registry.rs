//! Immutable registry snapshot: model metadata plus run instructions.
//!
//! Loaded once at process start and shared read-only (`Arc<ModelRegistry>`)
//! with every worker.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;

use tracing::{info, warn};

use crate::domain::error::{ModelDbError, Result};
use crate::domain::instruction::RunInstruction;
use crate::domain::model::{ModelId, ModelIdentity};

/// Model metadata and run instructions, keyed by accession number.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    metadata: BTreeMap<ModelId, ModelIdentity>,
    instructions: BTreeMap<ModelId, RunInstruction>,
}

impl ModelRegistry {
    pub fn new(
        metadata: BTreeMap<ModelId, ModelIdentity>,
        instructions: BTreeMap<ModelId, RunInstruction>,
    ) -> Self {
        Self {
            metadata,
            instructions,
        }
    }

    /// Load the registry from the metadata cache and the run-instruction file.
    ///
    /// A missing metadata file is tolerated (nothing has been fetched yet); a
    /// missing instruction file means no overrides. Malformed YAML in either is
    /// an error.
    pub fn load(metadata_file: &Path, run_file: &Path) -> Result<Self> {
        let instructions = load_yaml_map::<RunInstruction>(run_file)?.unwrap_or_else(|| {
            warn!(path = %run_file.display(), "run instruction file not found");
            BTreeMap::new()
        });
        let metadata = load_yaml_map::<ModelIdentity>(metadata_file)?.unwrap_or_else(|| {
            warn!(path = %metadata_file.display(), "model metadata file not found");
            BTreeMap::new()
        });

        info!(
            models = metadata.len(),
            instructions = instructions.len(),
            "loaded model registry"
        );

        Ok(Self::new(metadata, instructions))
    }

    /// Write the metadata cache (sorted by accession number).
    pub fn save_metadata(&self, metadata_file: &Path) -> Result<()> {
        if let Some(parent) = metadata_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(&self.metadata)?;
        std::fs::write(metadata_file, yaml)?;
        Ok(())
    }

    pub fn metadata(&self) -> &BTreeMap<ModelId, ModelIdentity> {
        &self.metadata
    }

    pub fn instructions(&self) -> &BTreeMap<ModelId, RunInstruction> {
        &self.instructions
    }

    pub fn identity(&self, id: ModelId) -> Option<&ModelIdentity> {
        self.metadata.get(&id)
    }

    /// Run instruction for `id`, or the all-defaults instruction.
    pub fn instruction(&self, id: ModelId) -> &RunInstruction {
        static DEFAULT: OnceLock<RunInstruction> = OnceLock::new();
        self.instructions
            .get(&id)
            .unwrap_or_else(|| DEFAULT.get_or_init(RunInstruction::default))
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Resolve the model subset for a batch.
    ///
    /// `None` selects every registered model. An explicit list must only name
    /// registered models; unknown ids are reported together, before any work
    /// starts. Duplicates in the list are collapsed.
    pub fn select(&self, ids: Option<&[ModelId]>) -> Result<Vec<ModelIdentity>> {
        let Some(ids) = ids else {
            return Ok(self.metadata.values().cloned().collect());
        };

        let unknown: Vec<ModelId> = ids
            .iter()
            .filter(|id| !self.metadata.contains_key(id))
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !unknown.is_empty() {
            return Err(ModelDbError::UnknownModels(unknown));
        }

        let mut seen = BTreeSet::new();
        Ok(ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| self.metadata.get(id).cloned())
            .collect())
    }

    /// Replace or add metadata entries (used after a fetch).
    pub fn with_metadata(mut self, fetched: impl IntoIterator<Item = ModelIdentity>) -> Self {
        for identity in fetched {
            self.metadata.insert(identity.id, identity);
        }
        self
    }

    /// Drop all metadata (a full re-fetch starts from scratch).
    pub fn without_metadata(mut self) -> Self {
        self.metadata.clear();
        self
    }
}

fn load_yaml_map<T>(path: &Path) -> Result<Option<BTreeMap<ModelId, T>>>
where
    T: serde::de::DeserializeOwned,
{
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if content.trim().is_empty() {
        return Ok(Some(BTreeMap::new()));
    }
    let map: Option<BTreeMap<ModelId, T>> = serde_yaml::from_str(&content)?;
    Ok(Some(map.unwrap_or_default()))
}
