//! The set of files intended for the run's commit.
//!
//! Only two things extend it: files an agent explicitly reported as staged
//! (after the invoker checked them against the allowlist) and explicit step
//! logic. It is never derived from a working-tree diff, so unrelated local
//! drift cannot leak into the commit.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::core::scope::{FileScope, normalize_rel_path};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChangeSetTracker {
    files: BTreeSet<String>,
}

impl ChangeSetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept an agent's staged list, all or nothing.
    ///
    /// Returns how many paths were new, or the out-of-scope paths when any
    /// entry is not covered by `scope` (in which case nothing is added).
    pub fn accept_staged(
        &mut self,
        staged: &[String],
        scope: &FileScope,
    ) -> Result<usize, Vec<String>> {
        let outside = scope.outside(staged);
        if !outside.is_empty() {
            return Err(outside);
        }
        let mut added = 0;
        for path in staged {
            if let Ok(normalized) = normalize_rel_path(path)
                && self.files.insert(normalized)
            {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Deterministic staging by step logic. Returns true if the path was new.
    pub fn add_explicit(&mut self, path: &str) -> Result<bool, String> {
        let normalized = normalize_rel_path(path)?;
        Ok(self.files.insert(normalized))
    }

    pub fn files(&self) -> &BTreeSet<String> {
        &self.files
    }

    pub fn contains(&self, path: &str) -> bool {
        normalize_rel_path(path).is_ok_and(|p| self.files.contains(&p))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn accepts_in_scope_staged_files() {
        let scope = FileScope::from_paths(["src/a.rs", "src/b.rs"]).unwrap();
        let mut tracker = ChangeSetTracker::new();
        let added = tracker
            .accept_staged(&paths(&["./src/a.rs", "src/b.rs", "src/a.rs"]), &scope)
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(tracker.len(), 2);
        assert!(tracker.contains("src/a.rs"));
    }

    /// Verifies a single out-of-scope entry rejects the whole list.
    #[test]
    fn out_of_scope_entry_adds_nothing() {
        let scope = FileScope::from_paths(["src/a.rs"]).unwrap();
        let mut tracker = ChangeSetTracker::new();
        let err = tracker
            .accept_staged(&paths(&["src/a.rs", "Cargo.lock"]), &scope)
            .unwrap_err();
        assert_eq!(err, paths(&["Cargo.lock"]));
        assert!(tracker.is_empty());
    }

    #[test]
    fn explicit_add_normalizes_and_dedups() {
        let mut tracker = ChangeSetTracker::new();
        assert!(tracker.add_explicit("./docs/x.md").unwrap());
        assert!(!tracker.add_explicit("docs/x.md").unwrap());
        assert!(tracker.add_explicit("../x").is_err());
        assert_eq!(tracker.files().len(), 1);
    }
}
