//! Content snapshots of a workspace's dirty files.
//!
//! Taken before and after each agent invocation; the difference is the set of
//! paths the agent actually touched, whatever it claims in its response.
//! Gitignored files count too; only the contents of wholly ignored
//! directories (`target/`, `node_modules/`) go unseen.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::io::git::Git;

const DELETED: &str = "deleted";

/// Path -> content fingerprint of every file git reports as changed, untracked
/// or ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceSnapshot {
    entries: BTreeMap<String, String>,
}

impl WorkspaceSnapshot {
    pub fn capture(git: &Git) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for entry in git
            .status_with_ignored()
            .context("snapshot workspace status")?
        {
            if entry.path.ends_with('/') {
                continue;
            }
            let fingerprint = fingerprint(git, &entry.path)?;
            entries.insert(entry.path, fingerprint);
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paths whose state differs between `self` (before) and `after`.
    pub fn changed_paths(&self, after: &WorkspaceSnapshot) -> BTreeSet<String> {
        let keys: BTreeSet<&String> = self.entries.keys().chain(after.entries.keys()).collect();
        keys.into_iter()
            .filter(|k| self.entries.get(*k) != after.entries.get(*k))
            .cloned()
            .collect()
    }

    #[cfg(test)]
    fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            entries: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

fn fingerprint(git: &Git, rel: &str) -> Result<String> {
    let path = git.workdir().join(rel);
    match fs::read(&path) {
        Ok(bytes) => Ok(hex::encode(Sha256::digest(&bytes))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(DELETED.to_string()),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_paths_covers_new_modified_and_reverted_files() {
        let before = WorkspaceSnapshot::from_pairs(&[("dirty.rs", "aaa"), ("same.rs", "bbb")]);
        let after = WorkspaceSnapshot::from_pairs(&[
            ("same.rs", "bbb"),
            ("new.rs", "ccc"),
            ("gone.rs", DELETED),
        ]);
        let changed: Vec<String> = before.changed_paths(&after).into_iter().collect();
        assert_eq!(changed, vec!["dirty.rs", "gone.rs", "new.rs"]);
    }

    #[test]
    fn identical_snapshots_have_no_changes() {
        let snap = WorkspaceSnapshot::from_pairs(&[("a", "1")]);
        assert!(snap.changed_paths(&snap.clone()).is_empty());
    }

    /// Verifies capture fingerprints real files and marks deleted tracked files.
    #[test]
    fn capture_reads_git_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        let run = |args: &[&str]| {
            let status = std::process::Command::new("git")
                .args(args)
                .current_dir(temp.path())
                .status()
                .expect("git");
            assert!(status.success(), "git {args:?}");
        };
        run(&["init", "--quiet"]);
        run(&["config", "user.email", "t@example.com"]);
        run(&["config", "user.name", "t"]);
        fs::write(temp.path().join("tracked.txt"), "one\n").expect("write");
        run(&["add", "tracked.txt"]);
        run(&["commit", "--quiet", "-m", "init"]);

        let before = WorkspaceSnapshot::capture(&git).expect("before");
        assert!(before.is_empty());

        fs::remove_file(temp.path().join("tracked.txt")).expect("remove");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("src/new.rs"), "fn main() {}\n").expect("write");
        let after = WorkspaceSnapshot::capture(&git).expect("after");
        assert_eq!(after.len(), 2);
        let changed: Vec<String> = before.changed_paths(&after).into_iter().collect();
        assert_eq!(changed, vec!["src/new.rs", "tracked.txt"]);
    }

    /// Verifies gitignored files are fingerprinted while ignored directories are skipped.
    #[test]
    fn capture_sees_ignored_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        let run = |args: &[&str]| {
            let status = std::process::Command::new("git")
                .args(args)
                .current_dir(temp.path())
                .status()
                .expect("git");
            assert!(status.success(), "git {args:?}");
        };
        run(&["init", "--quiet"]);
        run(&["config", "user.email", "t@example.com"]);
        run(&["config", "user.name", "t"]);
        fs::write(temp.path().join(".gitignore"), "local.cfg\ntarget/\n").expect("write");
        fs::write(temp.path().join("local.cfg"), "a = 1\n").expect("write");
        run(&["add", ".gitignore"]);
        run(&["commit", "--quiet", "-m", "init"]);

        let before = WorkspaceSnapshot::capture(&git).expect("before");
        assert_eq!(before.len(), 1);

        fs::write(temp.path().join("local.cfg"), "a = 2\n").expect("write");
        fs::create_dir_all(temp.path().join("target")).expect("mkdir");
        fs::write(temp.path().join("target/out.bin"), "bin").expect("write");
        let after = WorkspaceSnapshot::capture(&git).expect("after");
        let changed: Vec<String> = before.changed_paths(&after).into_iter().collect();
        assert_eq!(changed, vec!["local.cfg"]);
    }
}
