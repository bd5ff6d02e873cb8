//! Domain-level error taxonomy for ModelDB CI.

use crate::domain::model::ModelId;

/// ModelDB CI domain errors.
///
/// Everything here is either a pre-flight problem (the batch never starts),
/// a malformed input file, or a broken pipeline invariant. Per-model build and
/// run failures are not errors at this level; they are folded into the model's
/// outcome in the run record.
#[derive(Debug, thiserror::Error)]
pub enum ModelDbError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown model id(s) requested: {}", join_ids(.0))]
    UnknownModels(Vec<ModelId>),

    #[error("conflicting options: {0}")]
    ConflictingOptions(String),

    #[error("invalid curation pattern {pattern:?}: {source}")]
    InvalidCuration {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid run record: {0}")]
    InvalidRecord(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_ids(ids: &[ModelId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for ModelDB CI domain operations.
pub type Result<T> = std::result::Result<T, ModelDbError>;
