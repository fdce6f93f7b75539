use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, Registry, fmt};

fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// `RUST_LOG` wins over the `-v` count. Log files never go below `info`.
fn filter(verbosity: u8, floor: u8) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbosity.max(floor))))
}

fn open_log_file(path: &Path) -> Result<Arc<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    Ok(Arc::new(file))
}

/// Installs the global subscriber: human-readable events on stderr plus a
/// plain-text copy in each engine's log file. Returns the log files that could
/// not be opened; the run continues without them.
pub fn init(verbosity: u8, log_paths: &[&Path]) -> Result<Vec<String>> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(filter(verbosity, 0))
            .boxed(),
    ];

    let mut skipped = Vec::new();
    let mut opened: Vec<&Path> = Vec::new();
    for path in log_paths {
        if opened.contains(path) {
            continue;
        }
        opened.push(*path);
        match open_log_file(path) {
            Ok(file) => layers.push(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(file)
                    .with_filter(filter(verbosity, 1))
                    .boxed(),
            ),
            Err(error) => skipped.push(format!("{error:#}")),
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("failed to install log subscriber")?;
    Ok(skipped)
}
