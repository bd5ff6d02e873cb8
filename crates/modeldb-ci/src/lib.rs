//! ModelDB CI - prepare, build and run ModelDB models
//!
//! Provides the run side of the harness:
//! - Extracts cached model packages and synthesizes simulator drivers
//! - Builds mod files and runs the simulator, capturing output and timings
//! - Runs a whole batch on a bounded worker pool into one run record
//! - Gates a comparison of two run records for CI

pub mod display;
pub mod executor;
pub mod gate;
pub mod hoc;
pub mod options;
pub mod orchestrator;
pub mod prepare;
pub mod runner;
pub mod task;

// Re-export key types
pub use display::VirtualDisplay;
pub use executor::{RunExecutor, SourceSet};
pub use gate::{CiGate, GateVerdict};
pub use options::{RunOptions, SimulatorConfig};
pub use orchestrator::{grep_build_errors, RunOrchestrator, BUILD_ERROR_MARKER};
pub use prepare::{prepare, Preparation, PreparedState, PREPARED_STATE_FILE};
pub use runner::{ProcessOutput, ProcessRunner, ProcessSpec};
pub use task::{ModelTask, PhaseError, TaskStage, TaskState};
