//! Workspace acquisition and guaranteed release.
//!
//! A run either reuses a caller-supplied checkout or clones the target
//! repository into a fresh temporary directory. Temporary workspaces are
//! removed when the lease is released or dropped, and are registered with the
//! [`CleanupRegistry`] so a forced exit still removes them. Supplied
//! directories are never removed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, instrument, warn};

use crate::core::types::WorkspaceKind;
use crate::io::git::{Git, GitOptions};
use crate::io::host::CloneSource;
use crate::io::signals::CleanupRegistry;

pub struct WorkspaceManager {
    tmp_root: PathBuf,
    registry: CleanupRegistry,
    git: GitOptions,
}

/// Exclusive use of one workspace for the duration of a run.
#[derive(Debug)]
pub struct WorkspaceLease {
    path: PathBuf,
    kind: WorkspaceKind,
    temp: Option<TempDir>,
    registry: CleanupRegistry,
}

/// What happened when a lease was released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseOutcome {
    pub path: PathBuf,
    pub kind: WorkspaceKind,
    pub removed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkspaceManager {
    /// Temporary workspaces are created under `tmp_root`.
    pub fn new(tmp_root: impl Into<PathBuf>, registry: CleanupRegistry, git: GitOptions) -> Self {
        Self {
            tmp_root: tmp_root.into(),
            registry,
            git,
        }
    }

    /// Default root: `<system temp>/ticket2pr`.
    pub fn default_tmp_root() -> PathBuf {
        std::env::temp_dir().join("ticket2pr")
    }

    /// Reuse an existing checkout. It must be a git work tree.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn use_existing(&self, path: &Path) -> Result<WorkspaceLease> {
        let path = fs::canonicalize(path)
            .with_context(|| format!("workspace {} does not exist", path.display()))?;
        if !path.is_dir() {
            return Err(anyhow!("workspace {} is not a directory", path.display()));
        }
        if !Git::with_options(&path, self.git.clone()).is_work_tree()? {
            return Err(anyhow!("workspace {} is not a git work tree", path.display()));
        }
        info!("using supplied workspace");
        Ok(WorkspaceLease {
            path,
            kind: WorkspaceKind::UserSupplied,
            temp: None,
            registry: self.registry.clone(),
        })
    }

    /// Clone `source` into a new temporary directory, trying SSH first and HTTPS second.
    #[instrument(skip_all, fields(repo = %source.name))]
    pub fn clone_temporary(&self, source: &CloneSource) -> Result<WorkspaceLease> {
        fs::create_dir_all(&self.tmp_root)
            .with_context(|| format!("create {}", self.tmp_root.display()))?;
        let temp = tempfile::Builder::new()
            .prefix(&format!("{}_", source.name))
            .tempdir_in(&self.tmp_root)
            .context("create temporary workspace")?;
        self.registry.register(temp.path());
        // From here on the lease owns the directory, so any error below removes it on drop.
        let mut lease = WorkspaceLease {
            path: temp.path().join(&source.name),
            kind: WorkspaceKind::Temporary,
            temp: Some(temp),
            registry: self.registry.clone(),
        };

        let ssh = Git::clone_repo(&source.ssh_url, &lease.path, &self.git);
        if let Err(ssh_err) = ssh {
            warn!(err = %format!("{ssh_err:#}"), "ssh clone failed, falling back to https");
            if lease.path.exists() {
                fs::remove_dir_all(&lease.path)
                    .with_context(|| format!("remove partial clone {}", lease.path.display()))?;
            }
            Git::clone_repo(&source.https_url, &lease.path, &self.git).with_context(|| {
                format!("clone failed over ssh ({ssh_err:#}) and https")
            })?;
        }
        lease.path = fs::canonicalize(&lease.path)
            .with_context(|| format!("resolve {}", lease.path.display()))?;
        info!(path = %lease.path.display(), "cloned temporary workspace");
        Ok(lease)
    }
}

impl WorkspaceLease {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> WorkspaceKind {
        self.kind
    }

    /// Release the workspace, removing it if it is temporary.
    pub fn release(mut self) -> ReleaseOutcome {
        let mut outcome = ReleaseOutcome {
            path: self.path.clone(),
            kind: self.kind,
            removed: false,
            error: None,
        };
        if let Some(temp) = self.temp.take() {
            let root = temp.path().to_path_buf();
            match temp.close() {
                Ok(()) => outcome.removed = true,
                Err(err) => {
                    warn!(
                        dir = %root.display(),
                        err = %err,
                        "failed to remove temporary workspace"
                    );
                    outcome.error = Some(err.to_string());
                }
            }
            self.registry.unregister(&root);
        }
        info!(
            path = %outcome.path.display(),
            removed = outcome.removed,
            "workspace released"
        );
        outcome
    }
}

impl Drop for WorkspaceLease {
    fn drop(&mut self) {
        if let Some(temp) = self.temp.take() {
            let root = temp.path().to_path_buf();
            if let Err(err) = temp.close() {
                warn!(
                    dir = %root.display(),
                    err = %err,
                    "failed to remove temporary workspace on drop"
                );
            }
            self.registry.unregister(&root);
        }
    }
}
