//! ModelDB CI - run ModelDB models against NEURON builds and compare the results
//!
//! The `modeldb-ci` command drives the harness.
//!
//! ## Commands
//!
//! - `run`: prepare, build and run models into `<workdir>.json`
//! - `fetch`: download model packages into the cache
//! - `report`: render one run record to HTML
//! - `diff-reports`: compare two run records and gate on the result
//! - `merge-reports`: combine run records of disjoint model sets
//! - `compare-gout`: compare the gout files of two run directories
//! - `config`: print the resolved configuration

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use modeldb_ci::{CiGate, RunOptions, RunOrchestrator, VirtualDisplay};
use modeldb_core::report::{
    diff_file_names, render_diff_html, render_report_html, render_runtimes_html,
    report_file_name, write_html,
};
use modeldb_core::{
    compare_gout_trees, diff_reports, merge_records, CiConfig, DiffOptions, ModelId,
    ModelRegistry, RunRecord,
};
use modeldb_fetch::{download_models, FetchConfig};

#[derive(Parser)]
#[command(name = "modeldb-ci")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run ModelDB models against NEURON builds and compare the results", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare, build and run models; writes `<workdir>.json` and `<workdir>.log`
    Run {
        /// Working directory for the model runs
        #[arg(long)]
        workdir: PathBuf,

        /// Keep graphical output in the run record
        #[arg(long)]
        gout: bool,

        /// Run under a headless X display
        #[arg(long = "virtual")]
        virtual_display: bool,

        /// Remove existing model directories before extracting again
        #[arg(long)]
        clean: bool,

        /// Build only, do not start the simulator
        #[arg(long)]
        norun: bool,

        /// Reuse prepared models of the same version
        #[arg(long)]
        inplace: bool,

        /// Concurrent model workers (default: available parallelism)
        #[arg(long)]
        workers: Option<usize>,

        /// Parallel jobs of one mod-file build
        #[arg(long, default_value = "1")]
        build_jobs: usize,

        /// Simulator version recorded instead of asking nrniv
        #[arg(long, env = "MODELDB_NEURON_VERSION")]
        neuron_version: Option<String>,

        /// Accession numbers to run (default: every known model)
        models: Vec<ModelId>,
    },

    /// Download model packages into the cache and update the metadata file
    Fetch {
        /// Accession numbers to fetch (default: every NEURON model in ModelDB)
        models: Vec<ModelId>,

        /// Concurrent downloads
        #[arg(long, default_value = "8")]
        concurrency: usize,
    },

    /// Render one run record to `<name>.html`
    Report {
        /// Run record (JSON)
        json_report: PathBuf,
    },

    /// Compare two run records; exits 1 when the CI gate fails
    DiffReports {
        /// Reference run record
        json_report1: PathBuf,

        /// Run record to compare against the reference
        json_report2: PathBuf,
    },

    /// Merge run records of the same NEURON version
    MergeReports {
        /// Output run record
        #[arg(short, long)]
        output: PathBuf,

        /// Run records to merge
        #[arg(required = true)]
        json_reports: Vec<PathBuf>,
    },

    /// Compare the gout files of two run directories; exits 1 on differences
    CompareGout {
        dir1: PathBuf,
        dir2: PathBuf,
    },

    /// Print the resolved configuration
    Config {
        /// Print a single item
        #[arg(long)]
        item: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let config = CiConfig::from_env().context("Invalid configuration")?;
    let log_file = match &cli.command {
        Commands::Run {
            workdir,
            clean,
            inplace,
            ..
        } => Some(run_log_file(workdir, *clean, *inplace, &config)?),
        _ => None,
    };
    modeldb_core::init_tracing(cli.json, level, log_file.as_deref())
        .context("Failed to initialise logging")?;

    match cli.command {
        Commands::Run {
            workdir,
            gout,
            virtual_display,
            clean,
            norun,
            inplace,
            workers,
            build_jobs,
            neuron_version,
            models,
        } => {
            let mut options = RunOptions {
                clean,
                inplace,
                norun,
                gout,
                build_jobs,
                runtime_version: neuron_version,
                ..Default::default()
            };
            if let Some(workers) = workers {
                options = options.with_workers(workers);
            }
            cmd_run(&config, &workdir, options, virtual_display, &models).await
        }
        Commands::Fetch {
            models,
            concurrency,
        } => cmd_fetch(&config, &models, concurrency).await,
        Commands::Report { json_report } => cmd_report(&json_report),
        Commands::DiffReports {
            json_report1,
            json_report2,
        } => cmd_diff_reports(&config, &json_report1, &json_report2).await,
        Commands::MergeReports {
            output,
            json_reports,
        } => cmd_merge_reports(&output, &json_reports),
        Commands::CompareGout { dir1, dir2 } => cmd_compare_gout(&dir1, &dir2),
        Commands::Config { item } => cmd_config(&config, item.as_deref()),
    }
}

/// Validate the run flags, then name `<workdir>.log`. A rejected run must not
/// leave a log file behind.
fn run_log_file(workdir: &Path, clean: bool, inplace: bool, config: &CiConfig) -> Result<PathBuf> {
    let options = RunOptions {
        clean,
        inplace,
        ..Default::default()
    };
    options.validate(workdir, config)?;
    Ok(RunOrchestrator::log_path(workdir))
}

fn load_registry(config: &CiConfig) -> Result<ModelRegistry> {
    ModelRegistry::load(&config.metadata_file, &config.run_file).with_context(|| {
        format!(
            "Failed to load model registry from {:?} and {:?}",
            config.metadata_file, config.run_file
        )
    })
}

fn model_filter(models: &[ModelId]) -> Option<&[ModelId]> {
    (!models.is_empty()).then_some(models)
}

/// Run models into `<workdir>.json`
async fn cmd_run(
    config: &CiConfig,
    workdir: &Path,
    mut options: RunOptions,
    virtual_display: bool,
    models: &[ModelId],
) -> Result<ExitCode> {
    let registry = load_registry(config)?;
    // Unknown ids must fail before a display is started or anything is written.
    registry.select(model_filter(models))?;

    let _display = if virtual_display {
        let display = VirtualDisplay::start()
            .await
            .context("Failed to start virtual display")?;
        options.display = Some(display.display());
        Some(display)
    } else {
        None
    };

    info!(workdir = %workdir.display(), "running models");
    let orchestrator = RunOrchestrator::new(Arc::new(registry), config.clone(), options);
    let record = orchestrator.run(workdir, model_filter(models)).await?;

    let stats = record.stats();
    println!("Run record: {}", RunOrchestrator::record_path(workdir).display());
    println!("NEURON version: {}", record.runtime_version());
    println!("Models run: {}", stats.total_models);
    println!("Failed builds: {}", stats.failed_models.count);
    println!("Failed runs: {}", stats.failed_runs.count);
    println!("Skipped: {}", stats.skipped_runs.count);
    Ok(ExitCode::SUCCESS)
}

/// Download packages and update the metadata file
async fn cmd_fetch(config: &CiConfig, models: &[ModelId], concurrency: usize) -> Result<ExitCode> {
    let registry = load_registry(config)?;
    let fetch_config = FetchConfig::from_ci_config(config).with_concurrency(concurrency);
    let ids = (!models.is_empty()).then(|| models.to_vec());

    let (registry, report) = download_models(fetch_config, registry, ids)
        .await
        .context("Model download failed")?;
    registry.save_metadata(&config.metadata_file)?;

    println!("Fetched: {}", report.fetched.len());
    if !report.failed.is_empty() {
        println!("Failed: {}", report.failed.len());
        for (id, error) in &report.failed {
            println!("  - {id}: {error}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Render one run record
fn cmd_report(json_report: &Path) -> Result<ExitCode> {
    let record = RunRecord::load(json_report)
        .with_context(|| format!("Failed to load run record {:?}", json_report))?;
    let title = json_report
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let out = report_file_name(json_report);
    write_html(&out, &render_report_html(&record, &title))?;
    println!("Report: {}", out.display());
    Ok(ExitCode::SUCCESS)
}

/// Compare two run records and apply the CI gate
async fn cmd_diff_reports(config: &CiConfig, report1: &Path, report2: &Path) -> Result<ExitCode> {
    let a = RunRecord::load(report1)
        .with_context(|| format!("Failed to load run record {:?}", report1))?;
    let b = RunRecord::load(report2)
        .with_context(|| format!("Failed to load run record {:?}", report2))?;
    let registry = load_registry(config)?;

    let diff = diff_reports(&a, &b, &registry, &DiffOptions::default()).await?;

    let (title, diff_page, runtimes_page) = diff_file_names(report1, report2);
    write_html(&diff_page, &render_diff_html(&diff, &title))?;
    write_html(&runtimes_page, &render_runtimes_html(&diff, &title))?;
    println!("Diff report: {}", diff_page.display());
    println!("Runtimes report: {}", runtimes_page.display());
    println!("Done.");

    let verdict = CiGate::evaluate(&diff)?;
    for violation in &verdict.violations {
        println!("FAILURE: {violation}");
    }
    if verdict.passed {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Merge run records
fn cmd_merge_reports(output: &Path, json_reports: &[PathBuf]) -> Result<ExitCode> {
    let records = json_reports
        .iter()
        .map(|path| {
            RunRecord::load(path).with_context(|| format!("Failed to load run record {:?}", path))
        })
        .collect::<Result<Vec<_>>>()?;
    let merged = merge_records(&records)?;
    merged.save(output)?;
    println!(
        "Merged {} reports ({} models) into {}",
        records.len(),
        merged.stats().total_models,
        output.display()
    );
    Ok(ExitCode::SUCCESS)
}

/// Compare gout files of two run directories
fn cmd_compare_gout(dir1: &Path, dir2: &Path) -> Result<ExitCode> {
    let comparison = compare_gout_trees(dir1, dir2)?;
    for path in &comparison.only_in_first {
        println!("Only in {}: {}", dir1.display(), path.display());
    }
    for path in &comparison.only_in_second {
        println!("Only in {}: {}", dir2.display(), path.display());
    }
    for path in &comparison.differing {
        println!("Differs: {}", path.display());
    }
    if comparison.is_identical() {
        println!("No gout differences");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Print configuration
fn cmd_config(config: &CiConfig, item: Option<&str>) -> Result<ExitCode> {
    match item {
        Some(name) => match config.item(name) {
            Some(value) => {
                println!("{value}");
                Ok(ExitCode::SUCCESS)
            }
            None => anyhow::bail!("Unknown configuration item: {}", name),
        },
        None => {
            println!("{}", serde_json::to_string_pretty(&config.items())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "modeldb-ci",
            "run",
            "--workdir",
            "runs/8.2.2",
            "--virtual",
            "--clean",
            "--workers",
            "4",
            "3264",
            "87284",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                workdir,
                virtual_display,
                clean,
                inplace,
                workers,
                build_jobs,
                models,
                ..
            } => {
                assert_eq!(workdir, PathBuf::from("runs/8.2.2"));
                assert!(virtual_display);
                assert!(clean);
                assert!(!inplace);
                assert_eq!(workers, Some(4));
                assert_eq!(build_jobs, 1);
                assert_eq!(models, vec![ModelId(3264), ModelId(87284)]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_rejected_run_leaves_no_log_file() {
        let root = tempfile::tempdir().unwrap();
        let config = CiConfig::with_root(root.path());
        let workdir = root.path().join("runs").join("8.2.2");

        assert!(run_log_file(&workdir, true, true, &config).is_err());
        assert!(!RunOrchestrator::log_path(&workdir).exists());

        let log = run_log_file(&workdir, false, false, &config).unwrap();
        assert_eq!(log, root.path().join("runs").join("8.2.2.log"));
    }

    #[test]
    fn test_cli_rejects_bad_model_id() {
        assert!(Cli::try_parse_from(["modeldb-ci", "fetch", "abc"]).is_err());
    }

    #[test]
    fn test_merge_requires_inputs() {
        assert!(Cli::try_parse_from(["modeldb-ci", "merge-reports", "-o", "out.json"]).is_err());
    }

    #[test]
    fn test_compare_gout_exit_status() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(a.path().join("1")).unwrap();
        std::fs::create_dir_all(b.path().join("1")).unwrap();
        std::fs::write(a.path().join("1/gout"), "Graphs 1\n").unwrap();
        std::fs::write(b.path().join("1/gout"), "Graphs 1\n").unwrap();
        assert_eq!(cmd_compare_gout(a.path(), b.path()).unwrap(), ExitCode::SUCCESS);

        std::fs::write(b.path().join("1/gout"), "Graphs 2\n").unwrap();
        assert_eq!(cmd_compare_gout(a.path(), b.path()).unwrap(), ExitCode::FAILURE);
    }

    #[test]
    fn test_merge_reports_writes_output() {
        use modeldb_core::ModelOutcome;
        use std::collections::BTreeMap;

        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.json");
        let second = dir.path().join("b.json");
        RunRecord::new("8.2.2", BTreeMap::from([(ModelId(1), ModelOutcome::default())]))
            .save(&first)
            .unwrap();
        RunRecord::new("8.2.2", BTreeMap::from([(ModelId(2), ModelOutcome::default())]))
            .save(&second)
            .unwrap();

        let out = dir.path().join("merged.json");
        cmd_merge_reports(&out, &[first, second]).unwrap();
        let merged = RunRecord::load(&out).unwrap();
        assert_eq!(merged.stats().total_models, 2);
    }
}
