//! Diagnostic tracing for runs.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: operator diagnostics on stderr, optionally
//!   mirrored to a log file. `RUST_LOG` overrides the configured level.
//!
//! - **Run log (`io/run_log`)**: per-run artifacts (prompts, agent responses,
//!   `report.json`). Always written, unaffected by the log level.

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::io::config::LoggingSettings;

/// Initialize the global subscriber.
///
/// Output: compact lines on stderr, plus plain (no ANSI) lines appended to
/// `settings.file` when set. Calling it twice is harmless; the second call
/// keeps the first subscriber.
///
/// # Example
/// ```bash
/// RUST_LOG=ticket2pr=debug ticket2pr run PROJ-123
/// ```
pub fn init(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(settings.level.trim()))
        .context("parse log level")?;

    let file_layer = match &settings.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log dir {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(file_layer)
        .try_init();
    Ok(())
}
