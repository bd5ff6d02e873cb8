//! Domain models for ModelDB CI.
//!
//! - `ModelIdentity`: accession number and version metadata of one model
//! - `RunInstruction`: per-model overrides from `modeldb-run.yaml`
//! - `ModelRegistry`: immutable snapshot of both, shared by every worker

pub mod error;
pub mod instruction;
pub mod model;
pub mod registry;

pub use error::{ModelDbError, Result};
pub use instruction::{
    CurationPattern, GithubSource, RunCommands, RunInstruction, DEFAULT_HOC_RUN,
    DEFAULT_PYTHON_RUN,
};
pub use model::{ModelId, ModelIdentity};
pub use registry::ModelRegistry;
