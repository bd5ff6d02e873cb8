//! Integration tests for the run orchestrator with a fake simulator toolchain.
#![cfg(unix)]

use std::collections::BTreeMap;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modeldb_ci::{PreparedState, RunOptions, RunOrchestrator, SimulatorConfig, PREPARED_STATE_FILE};
use modeldb_core::{
    CiConfig, ModelDbError, ModelId, ModelIdentity, ModelRegistry, RunInstruction, RunRecord,
    PHASE_BUILD, PHASE_RUN,
};

const FAKE_SIMULATOR: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "NEURON -- VERSION 8.2.2 HEAD (fake) 2022-12-15"
  exit 0
fi
echo "$(basename "$0") $*"
for a in "$@"; do
  case "$a" in
    *driver.hoc) echo "Graphs 0" > "$(dirname "$a")/gout" ;;
  esac
done
for a in "$@"; do
  case "$a" in
    *.hoc) if grep -q "exit 3 please" "$a"; then echo "model asked to fail"; exit 3; fi ;;
  esac
done
exit 0
"#;

const FAKE_BUILD_TOOL: &str = r#"#!/bin/sh
mkdir -p x86_64
for f in "$@"; do
  echo "Translating $(basename "$f")"
  if grep -q BROKEN "$f"; then
    echo "$(basename "$f"):1:1: error: broken mechanism"
    exit 1
  fi
done
cp "@SPECIAL@" x86_64/special
chmod +x x86_64/special
"#;

struct Harness {
    _root: tempfile::TempDir,
    config: CiConfig,
    simulator: SimulatorConfig,
    workdir: PathBuf,
    metadata: BTreeMap<ModelId, ModelIdentity>,
    instructions: BTreeMap<ModelId, RunInstruction>,
}

fn write_script(path: &Path, body: &str) {
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file.sync_all().unwrap();
    drop(file);
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

impl Harness {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        write_script(&bin.join("nrniv"), FAKE_SIMULATOR);
        write_script(&bin.join("special.sh"), FAKE_SIMULATOR);
        write_script(
            &bin.join("nrnivmodl"),
            &FAKE_BUILD_TOOL.replace("@SPECIAL@", &bin.join("special.sh").display().to_string()),
        );

        let mut config = CiConfig::with_root(root.path());
        config.cache_dir = root.path().join("cache");
        std::fs::create_dir_all(&config.cache_dir).unwrap();

        let simulator = SimulatorConfig {
            nrniv: bin.join("nrniv"),
            nrnivmodl: bin.join("nrnivmodl"),
            ..Default::default()
        };
        let workdir = root.path().join("runs").join("8.2.2");

        Self {
            _root: root,
            config,
            simulator,
            workdir,
            metadata: BTreeMap::new(),
            instructions: BTreeMap::new(),
        }
    }

    fn add_model(&mut self, id: u64, files: &[(&str, &str)], instruction: Option<RunInstruction>) {
        let file = std::fs::File::create(self.config.cached_archive(id)).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, contents) in files {
            zip.start_file(format!("pkg{id}/{name}"), options).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();

        self.metadata.insert(
            ModelId(id),
            ModelIdentity::new(ModelId(id), format!("model {id}"), "2001-01-01", "2020-02-02"),
        );
        if let Some(instruction) = instruction {
            self.instructions.insert(ModelId(id), instruction);
        }
    }

    fn orchestrator(&self, options: RunOptions) -> RunOrchestrator {
        let registry = ModelRegistry::new(self.metadata.clone(), self.instructions.clone());
        RunOrchestrator::new(
            Arc::new(registry),
            self.config.clone(),
            options.with_workers(3).with_simulator(self.simulator.clone()),
        )
    }

    fn model_dir(&self, id: u64) -> PathBuf {
        self.workdir.join(id.to_string()).join(format!("pkg{id}"))
    }
}

fn prepared_version(h: &Harness, id: u64) -> String {
    let raw = std::fs::read_to_string(h.workdir.join(id.to_string()).join(PREPARED_STATE_FILE)).unwrap();
    let prepared: PreparedState = serde_json::from_str(&raw).unwrap();
    prepared.ver_date
}

fn ids(raw: &[u64]) -> Vec<ModelId> {
    raw.iter().copied().map(ModelId).collect()
}

#[tokio::test]
async fn test_batch_outcomes_and_stats() {
    let mut h = Harness::new();
    h.add_model(1, &[("mosinit.hoc", "load_file(\"nrngui.hoc\")"), ("na.mod", "NEURON { SUFFIX na }")], None);
    h.add_model(
        2,
        &[("mosinit.hoc", "")],
        Some(RunInstruction {
            skip: true,
            comment: Some("needs MPI".to_string()),
            ..Default::default()
        }),
    );
    h.add_model(
        3,
        &[("mosinit.hoc", "")],
        Some(RunInstruction {
            run: Some(None),
            comment: Some("interactive only".to_string()),
            ..Default::default()
        }),
    );
    h.add_model(4, &[("mosinit.hoc", ""), ("na.mod", "BROKEN")], None);
    h.add_model(5, &[("mosinit.hoc", "// exit 3 please")], None);
    h.add_model(
        6,
        &[("mosinit.hoc", "// exit 3 please")],
        Some(RunInstruction {
            ignore_exit_code: true,
            ..Default::default()
        }),
    );
    h.add_model(
        7,
        &[("mosinit.hoc", ""), ("a/x.mod", ""), ("b/y.mod", "")],
        None,
    );
    h.add_model(8, &[("init.hoc", "")], None);

    let options = RunOptions {
        gout: true,
        ..Default::default()
    };
    let record = h.orchestrator(options).run(&h.workdir, None).await.unwrap();

    assert_eq!(record.runtime_version(), "8.2.2");
    let stats = record.stats();
    assert_eq!(stats.total_models, 8);
    assert_eq!(stats.failed_models.accession_numbers, ids(&[4, 7]));
    assert_eq!(stats.failed_runs.accession_numbers, ids(&[5]));
    assert_eq!(stats.skipped_runs.accession_numbers, ids(&[2]));

    let built = &record.models[&ModelId(1)];
    assert!(built.moderr.is_none());
    assert!(!built.nrn_run_err);
    assert_eq!(built.run_info.model_dir.as_deref(), Some(h.model_dir(1).as_path()));
    assert_eq!(built.run_info.mod_dir.as_deref(), Some(h.model_dir(1).as_path()));
    assert!(built.run_times.contains_key(PHASE_BUILD));
    assert!(built.run_times.contains_key(PHASE_RUN));
    assert!(built.nrn_run.contains(
        &"RUNNING -> ./x86_64/special -nobanner %model_dir%/mosinit.hoc %model_dir%/driver.hoc"
            .to_string()
    ));
    assert!(built.logs.contains(&"Translating na.mod".to_string()));
    assert_eq!(built.gout.as_deref(), Some(&["Graphs 0".to_string()][..]));

    let skipped = &record.models[&ModelId(2)];
    assert!(skipped.do_not_run);
    assert_eq!(skipped.logs[1], "\tneeds MPI");
    assert!(skipped.run_times.is_empty());

    let do_not_run = &record.models[&ModelId(3)];
    assert!(!do_not_run.do_not_run);
    assert!(do_not_run
        .logs
        .contains(&"Model in do not run mode according to modeldb-run.yaml:".to_string()));
    assert_eq!(
        do_not_run.run_info.init.as_deref(),
        Some(h.model_dir(3).join("quit.hoc").as_path())
    );

    let broken = &record.models[&ModelId(4)];
    let moderr = broken.moderr.as_ref().unwrap();
    assert!(moderr.iter().any(|l| l == "na.mod:1:1: error: broken mechanism"));

    assert!(record.models[&ModelId(5)].nrn_run_err);
    assert!(!record.models[&ModelId(6)].nrn_run_err);

    let ambiguous = record.models[&ModelId(7)].moderr.as_ref().unwrap();
    assert!(ambiguous[0].starts_with("sources error: multiple directories"));

    let no_entry = &record.models[&ModelId(8)];
    assert!(no_entry.no_mosinit_hoc);
    assert!(!no_entry.nrn_run_err);

    let persisted = RunRecord::load(&RunOrchestrator::record_path(&h.workdir)).unwrap();
    assert_eq!(persisted, record);
}

#[tokio::test]
async fn test_unknown_ids_fail_before_any_work() {
    let mut h = Harness::new();
    h.add_model(1, &[("mosinit.hoc", "")], None);

    let err = h
        .orchestrator(RunOptions::default())
        .run(&h.workdir, Some(&ids(&[1, 12344])))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelDbError::UnknownModels(ref unknown) if unknown == &ids(&[12344])));
    assert!(!h.workdir.exists());
    assert!(!RunOrchestrator::record_path(&h.workdir).exists());
}

#[tokio::test]
async fn test_inplace_reuses_matching_version_only() {
    let mut h = Harness::new();
    h.add_model(1, &[("mosinit.hoc", "")], None);
    h.orchestrator(RunOptions::default())
        .run(&h.workdir, Some(&ids(&[1])))
        .await
        .unwrap();
    assert!(h.workdir.join("1").join(PREPARED_STATE_FILE).is_file());

    let marker = h.model_dir(1).join("marker");
    std::fs::write(&marker, "kept").unwrap();

    let inplace = RunOptions {
        inplace: true,
        ..Default::default()
    };
    let record = h
        .orchestrator(inplace.clone())
        .run(&h.workdir, Some(&ids(&[1])))
        .await
        .unwrap();
    assert!(marker.exists(), "matching version must not be re-extracted");
    assert_eq!(prepared_version(&h, 1), "2020-02-02");
    assert!(record.models[&ModelId(1)].run_info.init.is_some());

    h.metadata.insert(
        ModelId(1),
        ModelIdentity::new(ModelId(1), "model 1", "2001-01-01", "2024-01-01"),
    );
    let record = h
        .orchestrator(inplace)
        .run(&h.workdir, Some(&ids(&[1])))
        .await
        .unwrap();
    assert!(!marker.exists(), "stale version must be prepared again");
    assert_eq!(prepared_version(&h, 1), "2024-01-01");
    assert!(record.models[&ModelId(1)].run_info.init.is_some());
}

#[tokio::test]
async fn test_norun_builds_without_running() {
    let mut h = Harness::new();
    h.add_model(1, &[("mosinit.hoc", ""), ("na.mod", "")], None);

    let options = RunOptions {
        norun: true,
        ..Default::default()
    };
    let record = h.orchestrator(options).run(&h.workdir, None).await.unwrap();
    let outcome = &record.models[&ModelId(1)];
    assert!(outcome.nrn_run.is_empty());
    assert!(outcome.logs.iter().any(|l| l.starts_with("norun requested")));
    assert!(outcome.run_times.contains_key(PHASE_BUILD));
    assert!(!outcome.run_times.contains_key(PHASE_RUN));
    assert!(h.model_dir(1).join("x86_64").join("special").is_file());
}
