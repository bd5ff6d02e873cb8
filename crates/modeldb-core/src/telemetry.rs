//! Centralised tracing initialisation for ModelDB CI binaries.
//!
//! Call [`init_tracing`] once at program start. The console layer honours
//! `RUST_LOG` (falling back to the given level); an optional file layer
//! records everything at DEBUG so a batch leaves a complete log behind.
//!
//! Safe to call more than once; subsequent calls are ignored (the global
//! subscriber can only be set once per process).

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON on the console.
/// * `level`: console verbosity when `RUST_LOG` is not set.
/// * `log_file`: when given, the file is truncated and receives plain-text
///   DEBUG output regardless of the console level.
pub fn init_tracing(json: bool, level: Level, log_file: Option<&Path>) -> std::io::Result<()> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if json {
        layers.push(
            fmt::layer()
                .with_target(false)
                .json()
                .with_filter(console_filter)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_filter(console_filter)
                .boxed(),
        );
    }

    if let Some(path) = log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        layers.push(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(EnvFilter::new("debug,hyper=info,reqwest=info"))
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).try_init().ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_with_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("logs").join("run.log");
        init_tracing(false, Level::INFO, Some(&log)).unwrap();
        init_tracing(true, Level::DEBUG, None).unwrap();
        assert!(log.exists());
    }
}
