//! Interrupt handling and last-resort cleanup of temporary workspaces.
//!
//! The first Ctrl+C (or SIGTERM) only sets the shared [`CancelToken`]: running
//! child processes are killed, the engine stops before the next step, and the
//! workspace lease is released on the normal return path. A second signal
//! removes every registered temporary directory and exits immediately.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::exit_codes;

/// Shared cancellation flag, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Directories that must not outlive the process.
#[derive(Debug, Clone, Default)]
pub struct CleanupRegistry {
    dirs: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dir: &Path) {
        if let Ok(mut dirs) = self.dirs.lock() {
            dirs.insert(dir.to_path_buf());
        }
    }

    pub fn unregister(&self, dir: &Path) {
        if let Ok(mut dirs) = self.dirs.lock() {
            dirs.remove(dir);
        }
    }

    pub fn registered(&self) -> Vec<PathBuf> {
        self.dirs
            .lock()
            .map(|dirs| dirs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every registered directory, returning how many were removed.
    pub fn remove_all(&self) -> usize {
        let Ok(mut dirs) = self.dirs.lock() else {
            return 0;
        };
        let mut removed = 0;
        for dir in std::mem::take(&mut *dirs) {
            match fs::remove_dir_all(&dir) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(dir = %dir.display(), err = %err, "failed to remove directory"),
            }
        }
        removed
    }
}

/// Install the process-wide Ctrl+C / SIGTERM handler.
pub fn install(cancel: CancelToken, registry: CleanupRegistry) -> Result<()> {
    let presses = AtomicU32::new(0);
    ctrlc::set_handler(move || {
        if presses.fetch_add(1, Ordering::SeqCst) == 0 {
            cancel.cancel();
            eprintln!("\ninterrupt received, cleaning up (press Ctrl+C again to force exit)");
            return;
        }
        let removed = registry.remove_all();
        eprintln!("forced exit, removed {removed} temporary workspace(s)");
        std::process::exit(exit_codes::INTERRUPTED);
    })
    .context("install signal handler")?;
    debug!("signal handler installed");
    Ok(())
}
