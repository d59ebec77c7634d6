//! Git adapter for pipeline steps.
//!
//! Every call goes through the bounded process runner so a hung remote or
//! credential prompt cannot stall a run. Network operations (`clone`,
//! `fetch`, `push`) get a longer timeout and retry transient failures.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::backoff::Backoff;
use crate::io::process::{CommandOutput, ProcessLimits, run_command};
use crate::io::signals::CancelToken;

const GIT_OUTPUT_LIMIT_BYTES: usize = 10_000_000;

/// Stderr fragments that indicate a connection problem rather than a rejection.
const TRANSIENT_MARKERS: &[&str] = &[
    "could not resolve host",
    "connection timed out",
    "connection reset",
    "connection refused",
    "operation timed out",
    "early eof",
    "the remote end hung up unexpectedly",
    "unexpected disconnect",
    "timed out",
    "temporary failure",
];

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file (the new path for renames).
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct GitOptions {
    /// Timeout for local commands.
    pub timeout: Duration,
    /// Timeout for each network attempt.
    pub network_timeout: Duration,
    pub backoff: Backoff,
    pub cancel: Option<CancelToken>,
}

impl Default for GitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            network_timeout: Duration::from_secs(300),
            backoff: Backoff::default(),
            cancel: None,
        }
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    options: GitOptions,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self::with_options(workdir, GitOptions::default())
    }

    pub fn with_options(workdir: impl Into<PathBuf>, options: GitOptions) -> Self {
        Self {
            workdir: workdir.into(),
            options,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Clone `url` into `dest` (which must not exist or be empty).
    #[instrument(skip_all, fields(url, dest = %dest.display()))]
    pub fn clone_repo(url: &str, dest: &Path, options: &GitOptions) -> Result<()> {
        let parent = dest
            .parent()
            .with_context(|| format!("clone destination has no parent {}", dest.display()))?;
        let runner = Git::with_options(parent, options.clone());
        let dest_arg = dest.to_string_lossy().to_string();
        info!(url, "cloning repository");
        runner.run_network(&["clone", "--quiet", url, &dest_arg])?;
        Ok(())
    }

    pub fn is_work_tree(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--is-inside-work-tree"], self.options.timeout)?;
        Ok(out.success() && out.stdout_lossy().trim() == "true")
    }

    /// Return the current branch name (errors on detached HEAD).
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            return Err(anyhow!("detached HEAD"));
        }
        Ok(name)
    }

    pub fn head_sha(&self) -> Result<String> {
        Ok(self.run_capture(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    #[instrument(skip_all)]
    pub fn fetch_origin(&self) -> Result<()> {
        self.run_network(&["fetch", "--quiet", "origin"])?;
        Ok(())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let out = self.run(
            &[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ],
            self.options.timeout,
        )?;
        Ok(out.success())
    }

    /// Create a local branch tracking `origin/<branch>` and check it out.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_remote_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out remote branch");
        let upstream = format!("origin/{branch}");
        self.run_checked(&["checkout", "--quiet", "-b", branch, "--track", &upstream])?;
        Ok(())
    }

    /// Get status entries (including untracked files).
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-z", "-uall"])?;
        parse_status_z(&out)
    }

    /// Like [`Git::status_porcelain`], plus ignored entries (code `!!`).
    ///
    /// Ignored directories are reported once with a trailing `/` and not
    /// descended into.
    pub fn status_with_ignored(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&[
            "status",
            "--porcelain=v1",
            "-z",
            "-uall",
            "--ignored=matching",
        ])?;
        parse_status_z(&out)
    }

    /// Unstage everything, leaving the working tree untouched.
    pub fn reset_index(&self) -> Result<()> {
        self.run_checked(&["reset", "--quiet"])?;
        Ok(())
    }

    /// Stage exactly `paths` (additions, modifications and deletions).
    pub fn add_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "-A", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_checked(&args)?;
        Ok(())
    }

    /// True if `path` is known to the index.
    pub fn is_tracked(&self, path: &str) -> Result<bool> {
        let out = self.run(
            &["ls-files", "--error-unmatch", "--", path],
            self.options.timeout,
        )?;
        Ok(out.success())
    }

    /// Paths currently staged in the index.
    pub fn staged_paths(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["diff", "--cached", "--name-only", "-z"])?;
        Ok(out
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Untracked (and not ignored) files among `paths`.
    pub fn untracked_among(&self, paths: &[String]) -> Result<Vec<String>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["ls-files", "--others", "--exclude-standard", "-z", "--"];
        args.extend(paths.iter().map(String::as_str));
        let out = self.run_capture(&args)?;
        Ok(out
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Diff of tracked `paths` against HEAD.
    pub fn diff_against_head(&self, paths: &[String]) -> Result<String> {
        if paths.is_empty() {
            return Ok(String::new());
        }
        let mut args = vec!["diff", "HEAD", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_capture(&args)
    }

    /// Commit the index and return the new HEAD sha.
    #[instrument(skip_all, fields(no_verify))]
    pub fn commit(&self, message: &str, no_verify: bool) -> Result<String> {
        let mut args = vec!["commit", "--quiet", "-m", message];
        if no_verify {
            args.push("--no-verify");
        }
        self.run_checked(&args)?;
        self.head_sha()
    }

    #[instrument(skip_all, fields(branch))]
    pub fn push_branch(&self, branch: &str) -> Result<()> {
        info!(branch, "pushing branch");
        self.run_network(&["push", "--quiet", "-u", "origin", branch])?;
        Ok(())
    }

    fn run_network(&self, args: &[&str]) -> Result<String> {
        let what = format!("git {}", args.first().copied().unwrap_or_default());
        self.options.backoff.retry(&what, is_transient_error, || {
            let out = self.run(args, self.options.network_timeout)?;
            check_output(args, &out)?;
            Ok(out.stdout_lossy())
        })
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let out = self.run_checked(args)?;
        Ok(out.stdout_lossy())
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let out = self.run(args, self.options.timeout)?;
        check_output(args, &out)?;
        Ok(out)
    }

    fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0");
        let mut limits = ProcessLimits::new(timeout, GIT_OUTPUT_LIMIT_BYTES);
        if let Some(cancel) = &self.options.cancel {
            limits = limits.with_cancel(cancel.clone());
        }
        run_command(cmd, None, &limits).with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn check_output(args: &[&str], out: &CommandOutput) -> Result<()> {
    if out.cancelled {
        return Err(anyhow!("git {} cancelled", args.join(" ")));
    }
    if out.timed_out {
        return Err(anyhow!("git {} timed out", args.join(" ")));
    }
    if !out.status.success() {
        let stderr = out.stderr_lossy();
        return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
    }
    Ok(())
}

fn is_transient_error(err: &anyhow::Error) -> bool {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("cancelled") {
        return false;
    }
    let transient = TRANSIENT_MARKERS.iter().any(|m| msg.contains(m));
    if !transient {
        warn!(err = %msg, "git failure is not transient");
    }
    transient
}

/// Parse NUL-separated `git status --porcelain=v1 -z` output.
fn parse_status_z(out: &str) -> Result<Vec<StatusEntry>> {
    let mut entries = Vec::new();
    let mut fields = out.split('\0').filter(|f| !f.is_empty());
    while let Some(field) = fields.next() {
        if field.len() < 4 || !field.is_char_boundary(3) {
            return Err(anyhow!("unexpected porcelain entry: '{field}'"));
        }
        let code = field[..2].to_string();
        let path = field[3..].to_string();
        // Renames and copies carry the original path as the next field.
        if code.starts_with('R') || code.starts_with('C') {
            fields.next();
        }
        entries.push(StatusEntry { code, path });
    }
    Ok(entries)
}
