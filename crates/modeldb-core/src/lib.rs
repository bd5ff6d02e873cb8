//! ModelDB CI Core Library
//!
//! Model registry, run records, output curation and report differencing,
//! shared by the fetch, run and report front ends.

pub mod config;
pub mod curation;
pub mod diff;
pub mod domain;
pub mod obs;
pub mod record;
pub mod report;
pub mod telemetry;

pub use config::CiConfig;
pub use curation::{mask_model_dir, CurationRule, Curator, GLOBAL_RULES};
pub use diff::{
    compare_gout_trees, diff_reports, DiffOptions, DiffResult, GoutTreeComparison,
    RuntimeComparison, Speedup, GOUT_FILE,
};
pub use domain::{
    CurationPattern, GithubSource, ModelDbError, ModelId, ModelIdentity, ModelRegistry, Result,
    RunCommands, RunInstruction,
};
pub use record::{
    merge_records, IdList, ModelOutcome, ModelStatus, RunInfo, RunRecord, RunSummary, Stats,
    PHASE_BUILD, PHASE_RUN,
};

pub use obs::{
    emit_batch_finished, emit_batch_started, emit_diff_completed, emit_model_build_error,
    emit_model_finished, emit_model_run_error, emit_model_started, model_span, ModelSpan,
};
pub use telemetry::init_tracing;

/// ModelDB CI version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
