//! File-scope allowlists for agent invocations.
//!
//! Paths are compared in a normalized, workspace-relative form: forward
//! slashes, no `.` components, no leading `./`. Anything that could escape the
//! workspace (absolute paths, `..`) is rejected outright.

use std::collections::BTreeSet;

use serde::Serialize;

/// Normalize a workspace-relative path or explain why it is not one.
pub fn normalize_rel_path(raw: &str) -> Result<String, String> {
    let unified = raw.trim().replace('\\', "/");
    if unified.is_empty() {
        return Err("empty path".to_string());
    }
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(format!("'{raw}' is absolute"));
    }
    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(format!("'{raw}' escapes the workspace")),
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(format!("'{raw}' names the workspace root"));
    }
    Ok(parts.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Set of files a single invocation may create, modify or delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileScope {
    paths: BTreeSet<String>,
}

impl FileScope {
    /// Scope that permits no writes at all.
    pub fn read_only() -> Self {
        Self::default()
    }

    pub fn from_paths<I, S>(paths: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized = BTreeSet::new();
        for path in paths {
            normalized.insert(normalize_rel_path(path.as_ref())?);
        }
        Ok(Self { paths: normalized })
    }

    pub fn allows(&self, path: &str) -> bool {
        normalize_rel_path(path).is_ok_and(|p| self.paths.contains(&p))
    }

    /// Paths (as given) that fall outside this scope, sorted and deduplicated.
    pub fn outside<'a, I>(&self, paths: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        paths
            .into_iter()
            .filter(|p| !self.allows(p))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn paths(&self) -> &BTreeSet<String> {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_relative_paths() {
        assert_eq!(normalize_rel_path("./src//lib.rs").unwrap(), "src/lib.rs");
        assert_eq!(normalize_rel_path("src\\a\\b.rs").unwrap(), "src/a/b.rs");
        assert_eq!(normalize_rel_path("docs/./x.md").unwrap(), "docs/x.md");
    }

    #[test]
    fn rejects_escaping_paths() {
        assert!(normalize_rel_path("/etc/passwd").is_err());
        assert!(normalize_rel_path("C:/x").is_err());
        assert!(normalize_rel_path("src/../../x").is_err());
        assert!(normalize_rel_path("./").is_err());
        assert!(normalize_rel_path("  ").is_err());
    }

    #[test]
    fn scope_matches_normalized_forms() {
        let scope = FileScope::from_paths(["src/lib.rs", "PLAN.md"]).unwrap();
        assert!(scope.allows("./src/lib.rs"));
        assert!(scope.allows("PLAN.md"));
        assert!(!scope.allows("src/main.rs"));
        assert!(!scope.allows("../PLAN.md"));
    }

    #[test]
    fn outside_lists_each_violation_once() {
        let scope = FileScope::from_paths(["a.rs"]).unwrap();
        let touched = vec!["b.rs".to_string(), "a.rs".to_string(), "b.rs".to_string()];
        assert_eq!(scope.outside(&touched), vec!["b.rs".to_string()]);
    }

    #[test]
    fn read_only_scope_allows_nothing() {
        let scope = FileScope::read_only();
        assert!(scope.is_empty());
        assert!(!scope.allows("README.md"));
    }
}
